//! `memories` table. Inserts are idempotent on the deterministic record id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use threadline_common::{AccountId, MemoryContent, MemoryRecord, MemoryStore, StoreResult};

use crate::db_error;

type MemoryRow = (Uuid, String, Uuid, Uuid, serde_json::Value, DateTime<Utc>);

fn from_row((id, account, entity_id, room_id, content, created_at): MemoryRow) -> StoreResult<MemoryRecord> {
    let content: MemoryContent = serde_json::from_value(content)?;
    Ok(MemoryRecord {
        id,
        account: AccountId::new(account),
        entity_id,
        room_id,
        content,
        created_at,
    })
}

#[derive(Clone)]
pub struct PgMemoryStore {
    pool: PgPool,
}

impl PgMemoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id          UUID         PRIMARY KEY,
                account     TEXT         NOT NULL,
                entity_id   UUID         NOT NULL,
                room_id     UUID         NOT NULL,
                content     JSONB        NOT NULL,
                created_at  TIMESTAMPTZ  NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS memories_room_created_idx ON memories (room_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for PgMemoryStore {
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<MemoryRecord>> {
        let row = sqlx::query_as::<_, MemoryRow>(
            r#"
            SELECT id, account, entity_id, room_id, content, created_at
            FROM memories
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(from_row).transpose()
    }

    async fn create(&self, record: MemoryRecord) -> StoreResult<bool> {
        let content = serde_json::to_value(&record.content)?;
        let result = sqlx::query(
            r#"
            INSERT INTO memories (id, account, entity_id, room_id, content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.account.as_str())
        .bind(record.entity_id)
        .bind(record.room_id)
        .bind(&content)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn query_by_room_ids(&self, room_ids: &[Uuid]) -> StoreResult<Vec<MemoryRecord>> {
        if room_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, MemoryRow>(
            r#"
            SELECT id, account, entity_id, room_id, content, created_at
            FROM memories
            WHERE room_id = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(room_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(from_row).collect()
    }
}
