//! Error types shared across the proxy

use std::time::Duration;
use thiserror::Error;

/// Why a display filename could not be resolved.
///
/// None of these reach the client: a failed lookup only means the
/// `Content-Disposition` header is left off.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no audio name recorded for user {user_id} and hash {hash}")]
    NotFound { user_id: String, hash: String },

    #[error("profile store query failed: {0}")]
    Store(#[from] sqlx::Error),

    #[error("filename lookup timed out after {0:?}")]
    TimedOut(Duration),
}

/// Failure while buffering a body for metadata scrubbing
#[derive(Debug, Error)]
pub enum ScrubError {
    #[error("xml body exceeds scrub limit of {limit} bytes")]
    TooLarge { limit: usize },
}
