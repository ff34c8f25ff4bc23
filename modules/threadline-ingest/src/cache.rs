// ItemCache: typed, account-scoped view over the key/value collaborator.
//
// Keys are `twitter/{account}/{namespace}/{id}`. Callers only see typed
// getters and setters. Items, threads and profiles never expire;
// mentions/timeline snapshots expire quickly so repeated fetches inside one
// cycle are served locally.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use threadline_common::{AccountId, Item, ItemId, KvStore, Profile, StoreResult, Thread};

#[derive(Debug, Clone)]
pub struct CacheTtls {
    /// Expiry for mentions and home-timeline snapshots.
    pub snapshot: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            snapshot: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Namespace {
    Tweet,
    Thread,
    Timeline,
    Mentions,
    Profile,
    Cursor,
    Watermark,
}

impl Namespace {
    fn as_str(self) -> &'static str {
        match self {
            Namespace::Tweet => "tweet",
            Namespace::Thread => "thread",
            Namespace::Timeline => "timeline",
            Namespace::Mentions => "mentions",
            Namespace::Profile => "profile",
            Namespace::Cursor => "cursor",
            Namespace::Watermark => "watermark",
        }
    }
}

#[derive(Clone)]
pub struct ItemCache {
    kv: Arc<dyn KvStore>,
    prefix: String,
    ttls: CacheTtls,
}

impl ItemCache {
    pub fn new(kv: Arc<dyn KvStore>, account: &AccountId) -> Self {
        Self::with_ttls(kv, account, CacheTtls::default())
    }

    pub fn with_ttls(kv: Arc<dyn KvStore>, account: &AccountId, ttls: CacheTtls) -> Self {
        Self {
            kv,
            prefix: format!("twitter/{account}"),
            ttls,
        }
    }

    fn key(&self, ns: Namespace, id: &str) -> String {
        format!("{}/{}/{}", self.prefix, ns.as_str(), id)
    }

    async fn read<T: DeserializeOwned>(&self, ns: Namespace, id: &str) -> StoreResult<Option<T>> {
        let key = self.key(ns, id);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // Unreadable entries (older schema, manual edits) behave as misses.
                warn!(key, error = %e, "Discarding unreadable cache entry");
                Ok(None)
            }
        }
    }

    async fn write<T: Serialize>(
        &self,
        ns: Namespace,
        id: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let raw = serde_json::to_value(value)?;
        self.kv.set(&self.key(ns, id), raw, ttl).await
    }

    // --- Items ---

    pub async fn get_item(&self, id: &ItemId) -> StoreResult<Option<Item>> {
        self.read(Namespace::Tweet, id.as_str()).await
    }

    pub async fn set_item(&self, item: &Item) -> StoreResult<()> {
        self.write(Namespace::Tweet, item.id.as_str(), item, None).await
    }

    pub async fn clear_item(&self, id: &ItemId) -> StoreResult<()> {
        self.kv.delete(&self.key(Namespace::Tweet, id.as_str())).await
    }

    // --- Threads (keyed by leaf) ---

    /// Last thread resolved for `leaf`. Write-only metadata for the pipeline
    /// itself: `ThreadBuilder` always walks the chain again, since walking is
    /// what records each item, and nothing in the cycle serves threads from
    /// here. Kept for operators and external readers of the cache.
    pub async fn get_thread(&self, leaf: &ItemId) -> StoreResult<Option<Thread>> {
        self.read(Namespace::Thread, leaf.as_str()).await
    }

    pub async fn set_thread(&self, leaf: &ItemId, thread: &Thread) -> StoreResult<()> {
        self.write(Namespace::Thread, leaf.as_str(), thread, None).await
    }

    // --- Snapshots ---

    pub async fn get_mentions(&self, query: &str) -> StoreResult<Option<Vec<Item>>> {
        self.read(Namespace::Mentions, query).await
    }

    pub async fn set_mentions(&self, query: &str, items: &[Item]) -> StoreResult<()> {
        self.write(Namespace::Mentions, query, &items, Some(self.ttls.snapshot))
            .await
    }

    pub async fn get_timeline(&self) -> StoreResult<Option<Vec<Item>>> {
        self.read(Namespace::Timeline, "home").await
    }

    pub async fn set_timeline(&self, items: &[Item]) -> StoreResult<()> {
        self.write(Namespace::Timeline, "home", &items, Some(self.ttls.snapshot))
            .await
    }

    // --- Profiles ---

    pub async fn get_profile(&self, username: &str) -> StoreResult<Option<Profile>> {
        self.read(Namespace::Profile, &username.to_lowercase()).await
    }

    pub async fn set_profile(&self, profile: &Profile) -> StoreResult<()> {
        self.write(
            Namespace::Profile,
            &profile.username.to_lowercase(),
            profile,
            None,
        )
        .await
    }

    // --- Search cursors ---

    /// Last pagination cursor seen for `query`. Write-only metadata for the
    /// pipeline: candidate searches always start from the newest page, and
    /// resuming from an old cursor would walk backwards in time.
    pub async fn get_cursor(&self, query: &str) -> StoreResult<Option<String>> {
        self.read(Namespace::Cursor, query).await
    }

    pub async fn set_cursor(&self, query: &str, cursor: &str) -> StoreResult<()> {
        self.write(Namespace::Cursor, query, &cursor, None).await
    }

    // --- Watermark ---

    pub async fn get_watermark(&self) -> StoreResult<Option<ItemId>> {
        self.read(Namespace::Watermark, "latest_checked").await
    }

    pub async fn set_watermark(&self, id: &ItemId) -> StoreResult<()> {
        self.write(Namespace::Watermark, "latest_checked", id, None)
            .await
    }
}
