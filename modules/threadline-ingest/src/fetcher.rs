// Read-through access to the social API.
//
// Lookups hit ItemCache first; a miss becomes exactly one queued call on the
// account lane, and the result is written back before it is returned. Cache
// failures degrade to a direct fetch (logged), never to an error.

use std::sync::Arc;

use tracing::{debug, warn};

use threadline_common::{Item, ItemId, Profile, ThreadlineError};

use crate::cache::ItemCache;
use crate::registry::AccountLane;

pub struct ItemFetcher {
    lane: Arc<AccountLane>,
    cache: ItemCache,
}

impl ItemFetcher {
    pub fn new(lane: Arc<AccountLane>, cache: ItemCache) -> Self {
        Self { lane, cache }
    }

    pub fn lane(&self) -> &Arc<AccountLane> {
        &self.lane
    }

    pub fn cache(&self) -> &ItemCache {
        &self.cache
    }

    async fn remember(&self, item: &Item) {
        if let Err(e) = self.cache.set_item(item).await {
            warn!(id = %item.id, error = %e, "Failed to cache item");
        }
    }

    /// One item by id. `Ok(None)` when the API reports it missing.
    pub async fn item(&self, id: &ItemId) -> Result<Option<Item>, ThreadlineError> {
        match self.cache.get_item(id).await {
            Ok(Some(item)) => return Ok(Some(item)),
            Ok(None) => {}
            Err(e) => warn!(id = %id, error = %e, "Item cache read failed"),
        }

        debug!(id = %id, "Item cache miss, fetching");
        let fetched = self.lane.fetch_by_id(id).await?;
        if let Some(item) = &fetched {
            self.remember(item).await;
        }
        Ok(fetched)
    }

    /// Recent search, following cursors for up to `max_pages` pages or
    /// `max` items. Every returned item is cached, and the last cursor seen
    /// is stored for the query.
    pub async fn search(
        &self,
        query: &str,
        max: u32,
        max_pages: u32,
    ) -> Result<Vec<Item>, ThreadlineError> {
        let mut items: Vec<Item> = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..max_pages.max(1) {
            let remaining = max.saturating_sub(items.len() as u32);
            if remaining == 0 {
                break;
            }

            let page = self
                .lane
                .search_recent(query, remaining, cursor.as_deref())
                .await?;
            for item in &page.items {
                self.remember(item).await;
            }
            items.extend(page.items);

            match page.next_cursor {
                Some(next) => {
                    if let Err(e) = self.cache.set_cursor(query, &next).await {
                        warn!(query, error = %e, "Failed to store search cursor");
                    }
                    cursor = Some(next);
                }
                None => break,
            }
        }

        items.truncate(max as usize);
        Ok(items)
    }

    /// Items mentioning `@username`. Served from the snapshot cache when a
    /// fetch for the same query happened inside the snapshot window.
    pub async fn mentions(
        &self,
        username: &str,
        max: u32,
        max_pages: u32,
    ) -> Result<Vec<Item>, ThreadlineError> {
        let query = format!("@{username}");
        match self.cache.get_mentions(&query).await {
            Ok(Some(items)) => {
                debug!(query, count = items.len(), "Mentions served from snapshot");
                return Ok(items);
            }
            Ok(None) => {}
            Err(e) => warn!(query, error = %e, "Mentions snapshot read failed"),
        }

        let items = self.search(&query, max, max_pages).await?;
        if let Err(e) = self.cache.set_mentions(&query, &items).await {
            warn!(query, error = %e, "Failed to store mentions snapshot");
        }
        Ok(items)
    }

    /// Mentions through the dedicated endpoint (needs the numeric user id).
    pub async fn direct_mentions(
        &self,
        user_id: &str,
        max: u32,
    ) -> Result<Vec<Item>, ThreadlineError> {
        let items = self.lane.fetch_mentions(user_id, max).await?;
        for item in &items {
            self.remember(item).await;
        }
        Ok(items)
    }

    /// Home timeline, snapshot-cached like mentions.
    pub async fn home_timeline(&self, max: u32) -> Result<Vec<Item>, ThreadlineError> {
        match self.cache.get_timeline().await {
            Ok(Some(items)) => return Ok(items),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Timeline snapshot read failed"),
        }

        let items = self.lane.fetch_home_timeline(max).await?;
        for item in &items {
            self.remember(item).await;
        }
        if let Err(e) = self.cache.set_timeline(&items).await {
            warn!(error = %e, "Failed to store timeline snapshot");
        }
        Ok(items)
    }

    pub async fn profile(&self, username: &str) -> Result<Option<Profile>, ThreadlineError> {
        match self.cache.get_profile(username).await {
            Ok(Some(profile)) => return Ok(Some(profile)),
            Ok(None) => {}
            Err(e) => warn!(username, error = %e, "Profile cache read failed"),
        }

        let fetched = self.lane.fetch_profile(username).await?;
        if let Some(profile) = &fetched {
            if let Err(e) = self.cache.set_profile(profile).await {
                warn!(username, error = %e, "Failed to cache profile");
            }
        }
        Ok(fetched)
    }
}
