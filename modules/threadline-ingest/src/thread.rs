// Reply-chain resolution.
//
// Walks from a leaf towards the root one parent at a time, each parent fetch
// going through the read-through fetcher (and so through the account lane).
// The walk is a plain loop with a visited set: malformed or cyclic reply
// graphs truncate the thread instead of looping, and a failed or missing
// parent ends the thread at the last item resolved.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use threadline_common::{
    memory_id, AccountId, Item, ItemId, MemoryRecord, MemoryStore, Thread, ThreadlineError,
};

use crate::fetcher::ItemFetcher;

pub struct ThreadBuilder {
    fetcher: Arc<ItemFetcher>,
    memory: Arc<dyn MemoryStore>,
}

impl ThreadBuilder {
    pub fn new(fetcher: Arc<ItemFetcher>, memory: Arc<dyn MemoryStore>) -> Self {
        Self { fetcher, memory }
    }

    fn account(&self) -> &AccountId {
        self.fetcher.lane().account()
    }

    /// Root-first chain ending at `leaf`, at most `max_depth` items long.
    ///
    /// Every item on the chain is recorded in the memory store (once). Only
    /// fatal client errors are returned; anything else truncates.
    pub async fn build(&self, leaf: &Item, max_depth: usize) -> Result<Thread, ThreadlineError> {
        let mut chain: VecDeque<Item> = VecDeque::new();
        let mut visited: HashSet<ItemId> = HashSet::new();
        let mut current = leaf.clone();

        loop {
            if chain.len() >= max_depth {
                break;
            }
            if !visited.insert(current.id.clone()) {
                warn!(id = %current.id, leaf = %leaf.id, "Reply cycle detected, truncating thread");
                break;
            }

            self.persist(&current).await;
            let parent_id = current.in_reply_to_id.clone();
            chain.push_front(current);

            let Some(parent_id) = parent_id else {
                break;
            };
            if chain.len() >= max_depth {
                break;
            }
            if visited.contains(&parent_id) {
                warn!(id = %parent_id, leaf = %leaf.id, "Reply cycle detected, truncating thread");
                break;
            }

            match self.fetcher.item(&parent_id).await {
                Ok(Some(parent)) => current = parent,
                Ok(None) => {
                    debug!(parent = %parent_id, leaf = %leaf.id, "Parent unavailable, thread ends here");
                    break;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(parent = %parent_id, leaf = %leaf.id, error = %e, "Parent fetch failed, truncating thread");
                    break;
                }
            }
        }

        let thread = Thread::from_root_first(chain.into());
        if let Err(e) = self.fetcher.cache().set_thread(&leaf.id, &thread).await {
            warn!(leaf = %leaf.id, error = %e, "Failed to cache thread");
        }
        debug!(leaf = %leaf.id, len = thread.len(), "Thread built");
        Ok(thread)
    }

    /// Record `item` as a memory unless it already is one.
    async fn persist(&self, item: &Item) {
        let id = memory_id(&item.id, self.account());
        match self.memory.get_by_id(id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                let record = MemoryRecord::from_item(item, self.account());
                if let Err(e) = self.memory.create(record).await {
                    warn!(id = %item.id, error = %e, "Failed to record thread item");
                }
            }
            Err(e) => warn!(id = %item.id, error = %e, "Memory lookup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ItemCache;
    use crate::client::{ClientError, SocialClient};
    use crate::queue::QueueConfig;
    use crate::registry::ClientRegistry;
    use crate::testing::{item, reply_chain, MockSocialClient};
    use threadline_common::{InMemoryMemoryStore, MemoryKvStore};

    struct Fixture {
        client: Arc<MockSocialClient>,
        memory: Arc<InMemoryMemoryStore>,
        builder: ThreadBuilder,
    }

    fn fixture(client: MockSocialClient) -> Fixture {
        let client = Arc::new(client);
        let registry = ClientRegistry::new(QueueConfig::default().without_jitter());
        let account = AccountId::new("agent");
        let shared: Arc<dyn SocialClient> = client.clone();
        let lane = registry.lane(&account, move || shared);
        let cache = ItemCache::new(Arc::new(MemoryKvStore::new()), &account);
        let fetcher = Arc::new(ItemFetcher::new(lane, cache));
        let memory = Arc::new(InMemoryMemoryStore::new());
        let builder = ThreadBuilder::new(fetcher, memory.clone());
        Fixture {
            client,
            memory,
            builder,
        }
    }

    fn ids(thread: &Thread) -> Vec<&str> {
        thread.items().iter().map(|i| i.id.as_str()).collect()
    }

    #[tokio::test]
    async fn resolves_parent_root_first() {
        let fx = fixture(MockSocialClient::new().with_item(item("99", None)));

        let thread = fx.builder.build(&item("100", Some("99")), 10).await.unwrap();

        assert_eq!(ids(&thread), vec!["99", "100"]);
        assert_eq!(fx.memory.records().len(), 2);

        let cached = fx
            .builder
            .fetcher
            .cache()
            .get_thread(&ItemId::new("100"))
            .await
            .unwrap();
        assert_eq!(cached, Some(thread));
    }

    #[tokio::test]
    async fn two_item_cycle_terminates() {
        // A replies to B, B replies to A.
        let a = item("1", Some("2"));
        let b = item("2", Some("1"));
        let fx = fixture(MockSocialClient::new().with_item(a.clone()).with_item(b));

        let thread = fx.builder.build(&a, 10).await.unwrap();

        assert!(thread.len() <= 2);
        assert_eq!(ids(&thread), vec!["2", "1"]);
    }

    #[tokio::test]
    async fn self_reply_stops_immediately() {
        let looped = item("5", Some("5"));
        let fx = fixture(MockSocialClient::new());

        let thread = fx.builder.build(&looped, 10).await.unwrap();
        assert_eq!(ids(&thread), vec!["5"]);
        assert!(fx.client.fetch_calls().is_empty());
    }

    #[tokio::test]
    async fn depth_bound_stops_before_the_root() {
        let chain = reply_chain(50);
        let leaf = chain[49].clone();
        let fx = fixture(MockSocialClient::new().with_items(chain));

        let thread = fx.builder.build(&leaf, 10).await.unwrap();

        assert_eq!(thread.len(), 10);
        assert_eq!(thread.root().unwrap().id, ItemId::new("41"));
        assert_eq!(thread.leaf().unwrap().id, ItemId::new("50"));
        // Nothing beyond the bound is fetched.
        assert_eq!(fx.client.fetch_calls().len(), 9);
    }

    #[tokio::test]
    async fn missing_parent_truncates() {
        let fx = fixture(MockSocialClient::new());
        let thread = fx.builder.build(&item("100", Some("99")), 10).await.unwrap();
        assert_eq!(ids(&thread), vec!["100"]);
    }

    #[tokio::test]
    async fn failed_parent_fetch_truncates() {
        let fx = fixture(
            MockSocialClient::new()
                .with_item(item("99", Some("98")))
                .fail_fetch("98", ClientError::NotFound("98".into())),
        );

        let thread = fx.builder.build(&item("100", Some("99")), 10).await.unwrap();
        assert_eq!(ids(&thread), vec!["99", "100"]);
    }

    #[tokio::test]
    async fn auth_failure_is_returned() {
        let fx = fixture(MockSocialClient::new().reject_auth());
        let err = fx
            .builder
            .build(&item("100", Some("99")), 10)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn rebuilding_does_not_duplicate_records() {
        let fx = fixture(MockSocialClient::new().with_items(reply_chain(3)));
        let leaf = item("3", Some("2"));

        let first = fx.builder.build(&leaf, 10).await.unwrap();
        let second = fx.builder.build(&leaf, 10).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.memory.records().len(), 3);
        // Parents came from the item cache the second time.
        assert_eq!(fx.client.fetch_calls().len(), 2);
    }

    #[tokio::test]
    async fn zero_depth_is_empty() {
        let fx = fixture(MockSocialClient::new());
        let thread = fx.builder.build(&item("1", None), 0).await.unwrap();
        assert!(thread.is_empty());
        assert!(fx.memory.records().is_empty());
    }
}
