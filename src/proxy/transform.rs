//! Response post-processing
//!
//! Two independent steps run on every backend response:
//! - XML bodies lose their `<BucketName>`, `<Resource>` and `<Key>` elements
//!   so error documents do not reveal the bucket layout.
//! - Song responses get a `Content-Disposition` header naming the file the
//!   user uploaded.

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use pingora_core::{Error, ErrorType};
use pingora_http::ResponseHeader;
use regex::bytes::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;

use super::router::{split_extension, split_object_name, ResourceClass};
use crate::error::{ResolveError, ScrubError};
use crate::resolver::FilenameResolver;

// `(?-u)` so `.` matches any byte except newline, including non-UTF-8 bytes.
static BUCKET_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)<BucketName>.*?</BucketName>").expect("valid regex"));
static RESOURCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)<Resource>.*?</Resource>").expect("valid regex"));
static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)<Key>.*?</Key>").expect("valid regex"));

/// Strip bucket, resource and key elements from an XML document
pub fn scrub_metadata(body: &[u8]) -> Bytes {
    let body = BUCKET_NAME_RE.replace_all(body, &b""[..]);
    let body = RESOURCE_RE.replace_all(&body, &b""[..]);
    let body = KEY_RE.replace_all(&body, &b""[..]);
    Bytes::copy_from_slice(&body)
}

/// Whether the response body must be scrubbed
pub fn is_scrubbable(header: &ResponseHeader) -> bool {
    header
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("application/xml"))
        .unwrap_or(false)
}

fn declared_length(header: &ResponseHeader) -> Option<usize> {
    header
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// `Content-Disposition` value for a resolved filename
pub fn content_disposition(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("inline; filename=\"{}\"", escaped)
}

/// Accumulates an XML body until end of stream
#[derive(Debug)]
pub struct ScrubBuffer {
    buf: BytesMut,
    limit: usize,
}

impl ScrubBuffer {
    pub fn new(limit: usize) -> Self {
        Self { buf: BytesMut::new(), limit }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<(), ScrubError> {
        if self.buf.len() + chunk.len() > self.limit {
            return Err(ScrubError::TooLarge { limit: self.limit });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    /// Scrub everything buffered so far and reset the buffer
    pub fn finish(&mut self) -> Bytes {
        let body = std::mem::take(&mut self.buf);
        scrub_metadata(&body)
    }
}

/// Applies metadata scrubbing and filename annotation to backend responses
pub struct ResponseTransformer {
    bucket: String,
    resolver: Arc<FilenameResolver>,
    resolve_timeout: Duration,
    max_scrub_bytes: usize,
}

impl ResponseTransformer {
    pub fn new(
        bucket: impl Into<String>,
        resolver: Arc<FilenameResolver>,
        resolve_timeout: Duration,
        max_scrub_bytes: usize,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            resolver,
            resolve_timeout,
            max_scrub_bytes,
        }
    }

    /// Prepare headers for a body that will be replaced.
    ///
    /// The upstream `Content-Length` describes the unscrubbed body, and the
    /// header goes out before the body is complete, so the rewritten body
    /// is sent chunked. Returns a buffer when the body needs scrubbing.
    ///
    /// A declared length over the scrub limit is rejected with 502 while the
    /// response head can still be replaced. Undeclared lengths are checked
    /// as the body streams in.
    pub fn prepare_scrub(&self, header: &mut ResponseHeader) -> pingora_core::Result<Option<ScrubBuffer>> {
        if !is_scrubbable(header) {
            return Ok(None);
        }
        if let Some(len) = declared_length(header) {
            if len > self.max_scrub_bytes {
                return Err(Error::because(
                    ErrorType::HTTPStatus(502),
                    "xml body too large to scrub",
                    ScrubError::TooLarge { limit: self.max_scrub_bytes },
                ));
            }
        }
        header.remove_header(&CONTENT_LENGTH);
        header.insert_header(TRANSFER_ENCODING, "chunked")?;
        Ok(Some(ScrubBuffer::new(self.max_scrub_bytes)))
    }

    /// Re-extract `(user_id, hash)` from a rewritten `/{bucket}/songs/...` path
    pub fn song_target<'a>(&self, upstream_path: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = upstream_path
            .strip_prefix('/')?
            .strip_prefix(self.bucket.as_str())?
            .strip_prefix(ResourceClass::Song.prefix())?;
        let (user_id, name) = split_object_name(rest)?;
        let (hash, _ext) = split_extension(name);
        Some((user_id, hash))
    }

    /// Resolve a song's display filename within the lookup deadline
    pub async fn resolve_filename(&self, user_id: &str, hash: &str) -> Result<String, ResolveError> {
        tokio::time::timeout(self.resolve_timeout, self.resolver.resolve(user_id, hash))
            .await
            .map_err(|_| ResolveError::TimedOut(self.resolve_timeout))?
    }

    /// Add `Content-Disposition` to song responses whose filename resolves.
    ///
    /// Best effort: any failure leaves the response untouched.
    pub async fn annotate(&self, upstream_path: &str, header: &mut ResponseHeader) {
        let Some((user_id, hash)) = self.song_target(upstream_path) else {
            return;
        };

        match self.resolve_filename(user_id, hash).await {
            Ok(name) if !name.is_empty() => {
                if let Err(e) = header.insert_header(CONTENT_DISPOSITION, content_disposition(&name)) {
                    debug!(user_id, hash, "Unusable audio name for header: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => debug!(user_id, hash, "No download filename: {}", e),
        }
    }
}
