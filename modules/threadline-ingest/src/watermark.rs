use tracing::{debug, info, warn};

use threadline_common::{ItemId, StoreResult};

use crate::cache::ItemCache;

/// Durable "last processed id" for one account.
///
/// The in-memory value only moves forward: `load` and `advance` both keep the
/// larger of the current and the incoming id, compared numerically. Ids that
/// are not plain digit strings are never accepted as a watermark, since they
/// order above every numeric id.
pub struct WatermarkStore {
    cache: ItemCache,
    current: Option<ItemId>,
}

impl WatermarkStore {
    pub fn new(cache: ItemCache) -> Self {
        Self {
            cache,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&ItemId> {
        self.current.as_ref()
    }

    /// Read the persisted value, keeping whichever of it and the in-memory
    /// value is higher.
    pub async fn load(&mut self) -> StoreResult<Option<ItemId>> {
        let stored = self.cache.get_watermark().await?;
        if let Some(stored) = stored {
            if !stored.is_numeric() {
                warn!(watermark = %stored, "Ignoring non-numeric stored watermark");
                return Ok(self.current.clone());
            }
            if self.current.as_ref().map_or(true, |current| stored > *current) {
                debug!(watermark = %stored, "Loaded watermark");
                self.current = Some(stored);
            }
        }
        Ok(self.current.clone())
    }

    /// Persist the in-memory value, if there is one.
    pub async fn save(&self) -> StoreResult<()> {
        match &self.current {
            Some(id) => self.cache.set_watermark(id).await,
            None => Ok(()),
        }
    }

    /// True if `id` is at or below the watermark.
    pub fn is_processed(&self, id: &ItemId) -> bool {
        self.current.as_ref().is_some_and(|current| id <= current)
    }

    /// Move the watermark to `id` and persist immediately. Returns `false`
    /// (and writes nothing) when `id` is not above the current value or is
    /// not numeric.
    pub async fn advance(&mut self, id: &ItemId) -> StoreResult<bool> {
        if !id.is_numeric() {
            warn!(id = %id, "Refusing to advance watermark to non-numeric id");
            return Ok(false);
        }
        if self.is_processed(id) {
            return Ok(false);
        }
        self.cache.set_watermark(id).await?;
        info!(watermark = %id, "Watermark advanced");
        self.current = Some(id.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use threadline_common::{AccountId, MemoryKvStore};

    fn store_on(kv: &Arc<MemoryKvStore>) -> WatermarkStore {
        WatermarkStore::new(ItemCache::new(kv.clone(), &AccountId::new("agent")))
    }

    #[tokio::test]
    async fn advance_is_monotonic_and_numeric() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut wm = store_on(&kv);

        assert!(wm.advance(&ItemId::new("99")).await.unwrap());
        assert!(wm.advance(&ItemId::new("100")).await.unwrap());
        // "99" > "100" lexically; numerically it is behind.
        assert!(!wm.advance(&ItemId::new("99")).await.unwrap());
        assert!(!wm.advance(&ItemId::new("100")).await.unwrap());
        assert_eq!(wm.current(), Some(&ItemId::new("100")));
    }

    #[tokio::test]
    async fn survives_restart() {
        let kv = Arc::new(MemoryKvStore::new());
        {
            let mut wm = store_on(&kv);
            wm.advance(&ItemId::new("12345678901234567890123")).await.unwrap();
        }

        let mut restarted = store_on(&kv);
        assert_eq!(
            restarted.load().await.unwrap(),
            Some(ItemId::new("12345678901234567890123"))
        );
        assert!(restarted.is_processed(&ItemId::new("12345678901234567890122")));
        assert!(!restarted.is_processed(&ItemId::new("12345678901234567890124")));
    }

    #[tokio::test]
    async fn load_never_moves_backwards() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut wm = store_on(&kv);
        wm.advance(&ItemId::new("500")).await.unwrap();

        // Another writer left an older value behind.
        let cache = ItemCache::new(kv.clone(), &AccountId::new("agent"));
        cache.set_watermark(&ItemId::new("400")).await.unwrap();

        assert_eq!(wm.load().await.unwrap(), Some(ItemId::new("500")));
        wm.save().await.unwrap();
        assert_eq!(cache.get_watermark().await.unwrap(), Some(ItemId::new("500")));
    }

    #[tokio::test]
    async fn non_numeric_ids_never_become_the_watermark() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut wm = store_on(&kv);
        wm.advance(&ItemId::new("100")).await.unwrap();

        assert!(!wm.advance(&ItemId::new("")).await.unwrap());
        assert!(!wm.advance(&ItemId::new("abc")).await.unwrap());
        assert_eq!(wm.current(), Some(&ItemId::new("100")));
        assert!(!wm.is_processed(&ItemId::new("999999999999999999999")));
    }

    #[tokio::test]
    async fn load_ignores_a_non_numeric_stored_value() {
        let kv = Arc::new(MemoryKvStore::new());
        let cache = ItemCache::new(kv.clone(), &AccountId::new("agent"));
        cache.set_watermark(&ItemId::new("")).await.unwrap();

        let mut wm = store_on(&kv);
        assert_eq!(wm.load().await.unwrap(), None);
        assert!(!wm.is_processed(&ItemId::new("1")));
    }

    #[tokio::test]
    async fn empty_watermark_processes_everything() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut wm = store_on(&kv);
        assert_eq!(wm.load().await.unwrap(), None);
        assert!(!wm.is_processed(&ItemId::new("1")));
        wm.save().await.unwrap();
        assert!(kv.is_empty());
    }
}
