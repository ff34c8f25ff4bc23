// Persistence seams consumed by the ingestion pipeline.
//
// KvStore: account-scoped key/value cache with optional expiry.
// MemoryStore: durable conversation records, idempotent by id.
//
// Postgres implementations live in threadline-store; the in-process ones
// below back tests and single-process runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::StoreError;
use crate::memory::MemoryRecord;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a live value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> StoreResult<Option<serde_json::Value>>;

    /// Write a value, replacing any previous one. `ttl = None` never expires.
    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<MemoryRecord>>;

    /// Insert a record. Inserting an id that already exists is a no-op and
    /// returns `false`.
    async fn create(&self, record: MemoryRecord) -> StoreResult<bool>;

    /// All records in any of the given rooms, oldest first.
    async fn query_by_room_ids(&self, room_ids: &[Uuid]) -> StoreResult<Vec<MemoryRecord>>;
}

#[async_trait]
impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    async fn get(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        (**self).get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        (**self).delete(key).await
    }
}

#[async_trait]
impl<S: MemoryStore + ?Sized> MemoryStore for Arc<S> {
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<MemoryRecord>> {
        (**self).get_by_id(id).await
    }

    async fn create(&self, record: MemoryRecord) -> StoreResult<bool> {
        (**self).create(record).await
    }

    async fn query_by_room_ids(&self, room_ids: &[Uuid]) -> StoreResult<Vec<MemoryRecord>> {
        (**self).query_by_room_ids(room_ids).await
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryKvStore
// ---------------------------------------------------------------------------

struct KvEntry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

/// In-process key/value store. Expiry runs on tokio's clock so paused-time
/// tests can step past TTLs.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, KvEntry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, live or expired.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        let mut entries = lock(&self.entries);
        let expired = match entries.get(key) {
            None => return Ok(None),
            Some(entry) => entry.expires_at.is_some_and(|at| Instant::now() >= at),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        lock(&self.entries).insert(key.to_string(), KvEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// InMemoryMemoryStore
// ---------------------------------------------------------------------------

/// In-process memory store. Keeps insertion order for room queries.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    records: Mutex<Vec<MemoryRecord>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records (for test assertions).
    pub fn records(&self) -> Vec<MemoryRecord> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<MemoryRecord>> {
        Ok(lock(&self.records).iter().find(|r| r.id == id).cloned())
    }

    async fn create(&self, record: MemoryRecord) -> StoreResult<bool> {
        let mut records = lock(&self.records);
        if records.iter().any(|r| r.id == record.id) {
            return Ok(false);
        }
        records.push(record);
        Ok(true)
    }

    async fn query_by_room_ids(&self, room_ids: &[Uuid]) -> StoreResult<Vec<MemoryRecord>> {
        let mut found: Vec<MemoryRecord> = lock(&self.records)
            .iter()
            .filter(|r| room_ids.contains(&r.room_id))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }
}
