//! cdn-proxy library
//!
//! Media CDN proxy in front of an S3-compatible object store: rewrites public
//! media URLs to bucket object keys, scrubs bucket metadata from XML
//! responses and names audio downloads from the profile cache.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod resolver;

pub use config::Config;
