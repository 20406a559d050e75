//! Media proxy implementation using Pingora

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Uri};
use pingora_core::prelude::*;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{ProxyHttp, Session};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::router::{Rewrite, Router};
use super::transform::{ResponseTransformer, ScrubBuffer};
use crate::metrics;

/// Object store the proxy forwards to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    host: String,
    port: u16,
    tls: bool,
    /// Value for the upstream `Host` header
    authority: String,
}

impl Backend {
    /// Parse an endpoint such as `http://minio:9000`
    pub fn from_endpoint(endpoint: &str) -> anyhow::Result<Self> {
        let url = Url::parse(endpoint)
            .with_context(|| format!("invalid backend endpoint: {}", endpoint))?;
        let tls = match url.scheme() {
            "https" => true,
            "http" => false,
            other => bail!("unsupported backend scheme: {}", other),
        };
        let host = url
            .host_str()
            .with_context(|| format!("backend endpoint has no host: {}", endpoint))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(if tls { 443 } else { 80 });
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        };
        if !matches!(url.path(), "" | "/") {
            warn!(path = url.path(), "Ignoring path component of backend endpoint");
        }

        Ok(Self { host, port, tls, authority })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    fn peer(&self) -> HttpPeer {
        HttpPeer::new((self.host.as_str(), self.port), self.tls, self.host.clone())
    }
}

/// Media proxy request handler
pub struct MediaProxyHandler {
    backend: Backend,
    router: Router,
    transformer: ResponseTransformer,
}

/// Context for each request
pub struct MediaProxyCtx {
    /// How the request was rewritten for the backend
    rewrite: Option<Rewrite>,
    /// Set while an XML body is being collected for scrubbing
    scrub: Option<ScrubBuffer>,
    started_at: Instant,
}

impl MediaProxyHandler {
    pub fn new(backend: Backend, router: Router, transformer: ResponseTransformer) -> Self {
        Self { backend, router, transformer }
    }

    /// The proxy only serves reads
    fn is_allowed_method(method: &Method) -> bool {
        matches!(*method, Method::GET | Method::HEAD)
    }

    /// Apply the router to an upstream request
    fn rewrite_request(&self, upstream_request: &mut RequestHeader) -> Result<Rewrite> {
        let rewrite = self
            .router
            .rewrite(upstream_request.uri.path(), upstream_request.uri.query());

        let uri: Uri = rewrite.path_and_query().parse().map_err(|e| {
            Error::because(ErrorType::InternalError, "rewritten uri is invalid", e)
        })?;
        upstream_request.set_uri(uri);
        upstream_request.insert_header(http::header::HOST, self.backend.authority())?;

        Ok(rewrite)
    }
}

/// Feed one body chunk through the scrub buffer, if any.
///
/// Chunks are held back until end of stream, when the scrubbed document is
/// emitted as the only body. Returns true once a document was emitted. The
/// response head is already on the wire here, so an overflow can only abort
/// the stream.
fn scrub_body(
    scrub: &mut Option<ScrubBuffer>,
    body: &mut Option<Bytes>,
    end_of_stream: bool,
) -> Result<bool> {
    let Some(buffer) = scrub.as_mut() else {
        return Ok(false);
    };

    if let Some(chunk) = body.take() {
        buffer.push(&chunk).map_err(|e| {
            Error::because(ErrorType::HTTPStatus(502), "failed to buffer xml body", e)
        })?;
    }

    if !end_of_stream {
        return Ok(false);
    }

    *body = Some(buffer.finish());
    *scrub = None;
    Ok(true)
}

#[async_trait]
impl ProxyHttp for MediaProxyHandler {
    type CTX = MediaProxyCtx;

    fn new_ctx(&self) -> Self::CTX {
        MediaProxyCtx {
            rewrite: None,
            scrub: None,
            started_at: Instant::now(),
        }
    }

    async fn request_filter(&self, session: &mut Session, _ctx: &mut Self::CTX) -> Result<bool> {
        if Self::is_allowed_method(&session.req_header().method) {
            return Ok(false);
        }

        let mut resp = ResponseHeader::build(405, None)?;
        resp.insert_header("allow", "GET, HEAD")?;
        resp.insert_header("content-length", "0")?;
        session.write_response_header(Box::new(resp), true).await?;
        Ok(true)
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        Ok(Box::new(self.backend.peer()))
    }

    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let rewrite = self.rewrite_request(upstream_request)?;

        debug!(
            upstream = %rewrite.path_and_query(),
            object = ?rewrite.object,
            "Rewrote request"
        );

        ctx.rewrite = Some(rewrite);
        Ok(())
    }

    async fn response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        if let Some(ref rewrite) = ctx.rewrite {
            self.transformer.annotate(&rewrite.path, upstream_response).await;
        }

        ctx.scrub = self.transformer.prepare_scrub(upstream_response)?;

        Ok(())
    }

    fn response_body_filter(
        &self,
        _session: &mut Session,
        body: &mut Option<Bytes>,
        end_of_stream: bool,
        ctx: &mut Self::CTX,
    ) -> Result<Option<Duration>> {
        if scrub_body(&mut ctx.scrub, body, end_of_stream)? {
            metrics::record_scrubbed_response();
        }
        Ok(None)
    }

    async fn logging(
        &self,
        session: &mut Session,
        e: Option<&pingora_core::Error>,
        ctx: &mut Self::CTX,
    ) {
        let method = session.req_header().method.as_str();
        let uri = session.req_header().uri.to_string();
        let status = session
            .response_written()
            .map(|r| r.status.as_u16())
            .unwrap_or(0);
        let elapsed = ctx.started_at.elapsed();

        metrics::record_request(status, elapsed.as_secs_f64());

        if let Some(e) = e {
            metrics::record_upstream_error();
            warn!(method = %method, uri = %uri, error = %e, "Proxying failed");
        }

        info!(
            method = %method,
            uri = %uri,
            upstream = ?ctx.rewrite.as_ref().map(|r| r.path.as_str()),
            status = %status,
            duration_ms = elapsed.as_millis() as u64,
            "Request completed"
        );
    }
}
