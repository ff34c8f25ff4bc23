// Account → (client, lane) registry.
//
// Owned by the process bootstrap and passed by reference. Asking twice for
// the same account returns the same lane, so two components talking to one
// account can never open a second, independent rate-limiting lane.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use threadline_common::{AccountId, Item, ItemId, Profile, SearchPage};

use crate::client::SocialClient;
use crate::queue::{QueueConfig, QueueError, SerialRequestQueue};

/// A social client bound to its account's serial lane. Every method here
/// is one queued call.
pub struct AccountLane {
    account: AccountId,
    client: Arc<dyn SocialClient>,
    queue: SerialRequestQueue,
}

impl AccountLane {
    fn new(account: AccountId, client: Arc<dyn SocialClient>, config: QueueConfig) -> Self {
        Self {
            account,
            client,
            queue: SerialRequestQueue::new(config),
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn queue(&self) -> &SerialRequestQueue {
        &self.queue
    }

    pub async fn fetch_by_id(&self, id: &ItemId) -> Result<Option<Item>, QueueError> {
        let client = self.client.clone();
        let id = id.clone();
        self.queue
            .submit("fetch_by_id", move || {
                let client = client.clone();
                let id = id.clone();
                async move { client.fetch_by_id(&id).await }
            })
            .await
    }

    pub async fn search_recent(
        &self,
        query: &str,
        max: u32,
        cursor: Option<&str>,
    ) -> Result<SearchPage, QueueError> {
        let client = self.client.clone();
        let query = query.to_string();
        let cursor = cursor.map(str::to_string);
        self.queue
            .submit("search_recent", move || {
                let client = client.clone();
                let query = query.clone();
                let cursor = cursor.clone();
                async move { client.search_recent(&query, max, cursor.as_deref()).await }
            })
            .await
    }

    pub async fn fetch_home_timeline(&self, max: u32) -> Result<Vec<Item>, QueueError> {
        let client = self.client.clone();
        self.queue
            .submit("fetch_home_timeline", move || {
                let client = client.clone();
                async move { client.fetch_home_timeline(max).await }
            })
            .await
    }

    pub async fn fetch_mentions(&self, user_id: &str, max: u32) -> Result<Vec<Item>, QueueError> {
        let client = self.client.clone();
        let user_id = user_id.to_string();
        self.queue
            .submit("fetch_mentions", move || {
                let client = client.clone();
                let user_id = user_id.clone();
                async move { client.fetch_mentions(&user_id, max).await }
            })
            .await
    }

    pub async fn fetch_profile(&self, username: &str) -> Result<Option<Profile>, QueueError> {
        let client = self.client.clone();
        let username = username.to_string();
        self.queue
            .submit("fetch_profile", move || {
                let client = client.clone();
                let username = username.clone();
                async move { client.fetch_profile(&username).await }
            })
            .await
    }

    pub async fn post_item(
        &self,
        text: &str,
        reply_to: Option<&ItemId>,
        media_ids: &[String],
    ) -> Result<Item, QueueError> {
        let client = self.client.clone();
        let text = text.to_string();
        let reply_to = reply_to.cloned();
        let media_ids = media_ids.to_vec();
        self.queue
            .submit("post_item", move || {
                let client = client.clone();
                let text = text.clone();
                let reply_to = reply_to.clone();
                let media_ids = media_ids.clone();
                async move { client.post_item(&text, reply_to.as_ref(), &media_ids).await }
            })
            .await
    }

    pub async fn like(&self, id: &ItemId) -> Result<(), QueueError> {
        let client = self.client.clone();
        let id = id.clone();
        self.queue
            .submit("like", move || {
                let client = client.clone();
                let id = id.clone();
                async move { client.like(&id).await }
            })
            .await
    }

    pub async fn unlike(&self, id: &ItemId) -> Result<(), QueueError> {
        let client = self.client.clone();
        let id = id.clone();
        self.queue
            .submit("unlike", move || {
                let client = client.clone();
                let id = id.clone();
                async move { client.unlike(&id).await }
            })
            .await
    }

    pub async fn repost(&self, id: &ItemId) -> Result<(), QueueError> {
        let client = self.client.clone();
        let id = id.clone();
        self.queue
            .submit("repost", move || {
                let client = client.clone();
                let id = id.clone();
                async move { client.repost(&id).await }
            })
            .await
    }

    pub async fn unrepost(&self, id: &ItemId) -> Result<(), QueueError> {
        let client = self.client.clone();
        let id = id.clone();
        self.queue
            .submit("unrepost", move || {
                let client = client.clone();
                let id = id.clone();
                async move { client.unrepost(&id).await }
            })
            .await
    }

    pub async fn quote(&self, text: &str, id: &ItemId) -> Result<Item, QueueError> {
        let client = self.client.clone();
        let text = text.to_string();
        let id = id.clone();
        self.queue
            .submit("quote", move || {
                let client = client.clone();
                let text = text.clone();
                let id = id.clone();
                async move { client.quote(&text, &id).await }
            })
            .await
    }
}

pub struct ClientRegistry {
    queue_config: QueueConfig,
    lanes: Mutex<HashMap<AccountId, Arc<AccountLane>>>,
}

impl ClientRegistry {
    pub fn new(queue_config: QueueConfig) -> Self {
        Self {
            queue_config,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// The lane for `account`, creating it with `make_client` on first use.
    /// Later calls ignore `make_client` and return the existing lane.
    pub fn lane<F>(&self, account: &AccountId, make_client: F) -> Arc<AccountLane>
    where
        F: FnOnce() -> Arc<dyn SocialClient>,
    {
        let mut lanes = self
            .lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        lanes
            .entry(account.clone())
            .or_insert_with(|| {
                info!(account = %account, "Opening request lane");
                Arc::new(AccountLane::new(
                    account.clone(),
                    make_client(),
                    self.queue_config.clone(),
                ))
            })
            .clone()
    }

    /// The existing lane for `account`, if one was opened.
    pub fn get(&self, account: &AccountId) -> Option<Arc<AccountLane>> {
        self.lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(account)
            .cloned()
    }

    pub fn accounts(&self) -> Vec<AccountId> {
        self.lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSocialClient;

    fn mock() -> Arc<dyn SocialClient> {
        Arc::new(MockSocialClient::new())
    }

    #[tokio::test]
    async fn same_account_shares_one_lane() {
        let registry = ClientRegistry::new(QueueConfig::default().without_jitter());
        let account = AccountId::new("agent");

        let first = registry.lane(&account, mock);
        let second = registry.lane(&account, || panic!("client factory called twice"));

        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.get(&account).is_some());
        assert_eq!(registry.accounts(), vec![account]);
    }

    #[tokio::test]
    async fn distinct_accounts_get_distinct_lanes() {
        let registry = ClientRegistry::new(QueueConfig::default().without_jitter());
        let a = registry.lane(&AccountId::new("a"), mock);
        let b = registry.lane(&AccountId::new("b"), mock);

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(registry.get(&AccountId::new("c")).is_none());
    }
}
