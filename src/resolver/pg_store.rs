//! PostgreSQL backed profile store

use super::ProfileStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::Connection;
use std::time::Duration;
use tracing::debug;

const AUDIO_NAME_QUERY: &str =
    "SELECT audio_name FROM user_profiles WHERE id = $1 AND audio_hash = $2";

/// Read-only access to the `user_profiles` table
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    /// Build a lazily connecting pool; connections are opened on demand by
    /// whichever runtime first needs one.
    pub fn connect_lazy(url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url)?;
        Ok(Self { pool })
    }

    /// Open, ping and close a one-off connection.
    ///
    /// Used at startup so an unreachable database stops the process before
    /// it accepts traffic.
    pub async fn verify_connection(url: &str) -> Result<(), sqlx::Error> {
        let mut conn = PgConnection::connect(url).await?;
        conn.ping().await?;
        conn.close().await
    }
}

/// Profile ids are bigints; anything else cannot match a row
fn parse_user_id(user_id: &str) -> Option<i64> {
    user_id.parse::<i64>().ok()
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn audio_name(&self, user_id: &str, hash: &str) -> Result<Option<String>, sqlx::Error> {
        let Some(id) = parse_user_id(user_id) else {
            debug!(user_id, "Non-numeric user id, skipping profile query");
            return Ok(None);
        };

        let name: Option<Option<String>> = sqlx::query_scalar(AUDIO_NAME_QUERY)
            .bind(id)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(name.flatten())
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_id() {
        assert_eq!(parse_user_id("42"), Some(42));
        assert_eq!(parse_user_id("-1"), Some(-1));
        assert_eq!(parse_user_id("abc"), None);
        assert_eq!(parse_user_id(""), None);
        assert_eq!(parse_user_id("99999999999999999999"), None);
    }

    #[tokio::test]
    async fn test_non_numeric_user_id_skips_query() {
        let store = PgProfileStore::connect_lazy(
            "postgres://app@127.0.0.1:1/app",
            1,
            Duration::from_millis(100),
        )
        .unwrap();

        let name = store.audio_name("not-a-number", "abcdef").await.unwrap();
        assert_eq!(name, None);
    }
}
