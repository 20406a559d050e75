//! In-memory fakes for the resolver seams

use super::{ProfileCache, ProfileStore};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::{ErrorKind, RedisError, RedisResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Fast cache fake recording the TTL of every write
#[derive(Default)]
pub struct MemoryProfileCache {
    entries: DashMap<String, (String, Option<Duration>)>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), (value.to_string(), None));
    }

    pub fn entry(&self, key: &str) -> Option<(String, Option<Duration>)> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProfileCache for MemoryProfileCache {
    async fn get(&self, key: &str) -> RedisResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RedisError::from((ErrorKind::IoError, "connection refused")));
        }
        Ok(self.entries.get(key).map(|e| e.value().0.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> RedisResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RedisError::from((ErrorKind::ResponseError, "READONLY replica")));
        }
        self.entries.insert(key.to_string(), (value.to_string(), Some(ttl)));
        Ok(())
    }

    async fn ping(&self) -> RedisResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RedisError::from((ErrorKind::IoError, "connection refused")));
        }
        Ok(())
    }
}

/// Durable store fake counting queries
#[derive(Default)]
pub struct MemoryProfileStore {
    rows: DashMap<(String, String), String>,
    queries: AtomicUsize,
    fail_queries: AtomicBool,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: &str, hash: &str, audio_name: &str) {
        self.rows
            .insert((user_id.to_string(), hash.to_string()), audio_name.to_string());
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn audio_name(&self, user_id: &str, hash: &str) -> Result<Option<String>, sqlx::Error> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(self
            .rows
            .get(&(user_id.to_string(), hash.to_string()))
            .map(|row| row.value().clone()))
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(())
    }
}
