//! Redis/Valkey backed profile cache

use super::ProfileCache;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

/// Profile cache over a shared, auto-reconnecting Redis connection.
///
/// The connection is opened on first use so it lives on the runtime that
/// serves requests rather than the one that ran startup.
pub struct RedisProfileCache {
    client: Client,
    conn: OnceCell<ConnectionManager>,
}

impl RedisProfileCache {
    /// Parse the URL; no connection is made yet
    pub fn new(url: &str) -> RedisResult<Self> {
        Ok(Self {
            client: Client::open(url)?,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> RedisResult<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = ConnectionManager::new(self.client.clone()).await?;
                info!("Connected to profile cache");
                Ok::<_, redis::RedisError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl ProfileCache for RedisProfileCache {
    async fn get(&self, key: &str) -> RedisResult<Option<String>> {
        let mut conn = self.connection().await?;
        conn.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> RedisResult<()> {
        let mut conn = self.connection().await?;
        conn.set_ex(key, value, ttl.as_secs().max(1)).await
    }

    async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_does_not_connect() {
        assert!(RedisProfileCache::new("redis://127.0.0.1:1").is_ok());
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(RedisProfileCache::new("not-a-url").is_err());
    }
}
