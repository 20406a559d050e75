//! Filename resolution for audio downloads
//!
//! Resolves the display name of a user's audio track cache-aside: the fast
//! cache is consulted first (full profile blob, then the short-lived name
//! entry this module writes), and the durable store is the authoritative
//! fallback. Cache failures never fail a lookup.

mod pg_store;
mod profile;
mod redis_cache;

#[cfg(test)]
pub(crate) mod testing;

pub use pg_store::PgProfileStore;
pub use profile::{audio_name_key, profile_key, UserProfile};
pub use redis_cache::RedisProfileCache;

use crate::error::ResolveError;
use crate::metrics;
use async_trait::async_trait;
use redis::RedisResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Key/value fast cache holding profile blobs and name entries
#[async_trait]
pub trait ProfileCache: Send + Sync {
    /// `Ok(None)` when the key does not exist
    async fn get(&self, key: &str) -> RedisResult<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> RedisResult<()>;

    async fn ping(&self) -> RedisResult<()>;
}

/// Authoritative user profile storage
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Audio name of the profile `user_id` whose audio hash is `hash`
    async fn audio_name(&self, user_id: &str, hash: &str) -> Result<Option<String>, sqlx::Error>;

    async fn ping(&self) -> Result<(), sqlx::Error>;
}

/// Where a resolved name came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    ProfileCache,
    NameCache,
    Store,
}

impl LookupSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupSource::ProfileCache => "profile_cache",
            LookupSource::NameCache => "name_cache",
            LookupSource::Store => "store",
        }
    }
}

/// Cache-aside resolver for audio display filenames
pub struct FilenameResolver {
    cache: Arc<dyn ProfileCache>,
    store: Arc<dyn ProfileStore>,
    /// Write the name entry after a store hit
    repopulate: bool,
    name_ttl: Duration,
}

impl FilenameResolver {
    pub fn new(
        cache: Arc<dyn ProfileCache>,
        store: Arc<dyn ProfileStore>,
        repopulate: bool,
        name_ttl: Duration,
    ) -> Self {
        Self { cache, store, repopulate, name_ttl }
    }

    pub fn cache(&self) -> &Arc<dyn ProfileCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    /// Resolve the display filename of `user_id`'s audio object `hash`
    pub async fn resolve(&self, user_id: &str, hash: &str) -> Result<String, ResolveError> {
        match self.lookup(user_id, hash).await {
            Ok((name, source)) => {
                metrics::record_filename_lookup(source.as_str());
                debug!(user_id, hash, source = source.as_str(), "Resolved audio name");
                Ok(name)
            }
            Err(e) => {
                let outcome = match e {
                    ResolveError::NotFound { .. } => "not_found",
                    _ => "error",
                };
                metrics::record_filename_lookup(outcome);
                Err(e)
            }
        }
    }

    async fn lookup(&self, user_id: &str, hash: &str) -> Result<(String, LookupSource), ResolveError> {
        if let Some(raw) = self.cached(&profile_key(user_id)).await {
            match UserProfile::from_json(&raw) {
                Ok(profile) => {
                    if let Some(name) = profile.audio_name_for(hash) {
                        return Ok((name.to_string(), LookupSource::ProfileCache));
                    }
                }
                Err(e) => debug!(user_id, "Ignoring unparsable cached profile: {}", e),
            }
        }

        let name_key = audio_name_key(user_id, hash);
        if let Some(name) = self.cached(&name_key).await {
            if !name.is_empty() {
                return Ok((name, LookupSource::NameCache));
            }
        }

        let name = self
            .store
            .audio_name(user_id, hash)
            .await?
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ResolveError::NotFound {
                user_id: user_id.to_string(),
                hash: hash.to_string(),
            })?;

        if self.repopulate {
            if let Err(e) = self.cache.set_with_ttl(&name_key, &name, self.name_ttl).await {
                warn!(key = %name_key, "Failed to cache audio name: {}", e);
            }
        }

        Ok((name, LookupSource::Store))
    }

    /// Cache read where every failure counts as a miss
    async fn cached(&self, key: &str) -> Option<String> {
        match self.cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, "Profile cache read failed, falling back: {}", e);
                None
            }
        }
    }
}
