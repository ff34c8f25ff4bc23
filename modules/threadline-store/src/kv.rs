//! `kv_cache` table: JSONB values with an optional expiry.
//!
//! Expired rows are invisible to reads and are deleted lazily when a read
//! runs into one.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::PgPool;
use tracing::debug;

use threadline_common::{KvStore, StoreError, StoreResult};

use crate::db_error;

#[derive(Clone)]
pub struct PgKvStore {
    pool: PgPool,
}

impl PgKvStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_cache (
                key         TEXT         PRIMARY KEY,
                value       JSONB        NOT NULL,
                expires_at  TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    /// Delete every expired row. Returns how many were removed.
    pub async fn purge_expired(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM kv_cache WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

fn expiry(ttl: Duration) -> StoreResult<DateTime<Utc>> {
    let delta = TimeDelta::from_std(ttl)
        .map_err(|e| StoreError::Other(anyhow::anyhow!("TTL out of range: {e}")))?;
    Utc::now()
        .checked_add_signed(delta)
        .ok_or_else(|| StoreError::Other(anyhow::anyhow!("TTL out of range: {ttl:?}")))
}

#[async_trait]
impl KvStore for PgKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            r#"
            SELECT value FROM kv_cache
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        if let Some((value,)) = row {
            return Ok(Some(value));
        }

        let purged = sqlx::query("DELETE FROM kv_cache WHERE key = $1 AND expires_at <= now()")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if purged.rows_affected() > 0 {
            debug!(key, "Evicted expired cache entry");
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let expires_at = ttl.map(expiry).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO kv_cache (key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(&value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM kv_cache WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_in_the_future() {
        let at = expiry(Duration::from_secs(10)).unwrap();
        assert!(at > Utc::now());
    }

    #[test]
    fn absurd_ttl_is_rejected() {
        assert!(expiry(Duration::from_secs(u64::MAX)).is_err());
    }
}
