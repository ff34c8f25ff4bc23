// Offline social client backed by a JSON fixture.
//
// Fixture shape: `{ "items": [Item...], "profiles": [Profile...] }`. Searches
// run against the fixture in memory, newest first, with the cursor being the
// offset of the next page. Posts are appended to the in-memory item set with
// fresh ids above every fixture id, so later searches can see them.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use threadline_common::{Item, ItemId, Profile, ReferenceKind, ReferencedItem, SearchPage};

use crate::client::{ClientError, ClientResult, SocialClient};

#[derive(Debug, Default, Deserialize)]
pub struct ReplayFixture {
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

struct ReplayState {
    items: Vec<Item>,
    profiles: Vec<Profile>,
    next_id: u128,
    actions: Vec<(String, ItemId)>,
}

pub struct ReplayClient {
    username: String,
    state: Mutex<ReplayState>,
}

impl ReplayClient {
    /// `username` authors everything posted through this client.
    pub fn new(fixture: ReplayFixture, username: &str) -> Self {
        let next_id = fixture
            .items
            .iter()
            .filter_map(|i| i.id.as_str().parse::<u128>().ok())
            .max()
            .map_or(1, |max| max.saturating_add(1));

        Self {
            username: username.to_string(),
            state: Mutex::new(ReplayState {
                items: fixture.items,
                profiles: fixture.profiles,
                next_id,
                actions: Vec::new(),
            }),
        }
    }

    pub fn from_path(path: &Path, username: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay fixture {}", path.display()))?;
        let fixture: ReplayFixture = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid replay fixture {}", path.display()))?;
        info!(
            path = %path.display(),
            items = fixture.items.len(),
            profiles = fixture.profiles.len(),
            "Loaded replay fixture"
        );
        Ok(Self::new(fixture, username))
    }

    fn state(&self) -> MutexGuard<'_, ReplayState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Engagement actions taken, as `(kind, target)`.
    pub fn actions(&self) -> Vec<(String, ItemId)> {
        self.state().actions.clone()
    }

    fn newest_first(items: &[Item]) -> Vec<Item> {
        let mut sorted = items.to_vec();
        sorted.sort_by(|a, b| b.id.cmp(&a.id));
        sorted
    }

    fn act(&self, kind: &str, id: &ItemId) -> ClientResult<()> {
        let mut state = self.state();
        if !state.items.iter().any(|i| i.id == *id) {
            return Err(ClientError::NotFound(id.to_string()));
        }
        state.actions.push((kind.to_string(), id.clone()));
        Ok(())
    }

    fn publish(&self, text: &str, reply_to: Option<&ItemId>, quoted: Option<&ItemId>) -> Item {
        let mut state = self.state();
        let id = state.next_id.to_string();
        state.next_id = state.next_id.saturating_add(1);

        let conversation_id = reply_to
            .and_then(|parent| state.items.iter().find(|i| i.id == *parent))
            .map(|parent| parent.conversation_id.clone())
            .unwrap_or_else(|| id.clone());

        let referenced_items = reply_to
            .map(|p| (ReferenceKind::RepliedTo, p))
            .into_iter()
            .chain(quoted.map(|q| (ReferenceKind::Quoted, q)))
            .map(|(kind, id)| ReferencedItem {
                kind,
                id: id.clone(),
            })
            .collect();

        let item = Item {
            id: ItemId::new(id.clone()),
            text: text.to_string(),
            author_id: self.username.clone(),
            author_username: self.username.clone(),
            author_display_name: self.username.clone(),
            conversation_id,
            created_at: chrono::Utc::now().timestamp(),
            in_reply_to_id: reply_to.cloned(),
            referenced_items,
            metrics: serde_json::Value::Null,
            permanent_url: format!("https://x.com/{}/status/{id}", self.username),
        };
        state.items.push(item.clone());
        item
    }
}

/// Space-separated terms, all of which must match. `from:name` matches the
/// author, anything else is a case-insensitive substring of the text.
fn matches_query(item: &Item, query: &str) -> bool {
    let text = item.text.to_lowercase();
    query.split_whitespace().all(|term| {
        match term.strip_prefix("from:") {
            Some(author) => item.author_username.eq_ignore_ascii_case(author),
            None => text.contains(&term.to_lowercase()),
        }
    })
}

#[async_trait]
impl SocialClient for ReplayClient {
    async fn fetch_by_id(&self, id: &ItemId) -> ClientResult<Option<Item>> {
        Ok(self.state().items.iter().find(|i| i.id == *id).cloned())
    }

    async fn search_recent(
        &self,
        query: &str,
        max: u32,
        cursor: Option<&str>,
    ) -> ClientResult<SearchPage> {
        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| ClientError::Other(format!("Invalid cursor: {c}")))?,
            None => 0,
        };

        let matching: Vec<Item> = Self::newest_first(&self.state().items)
            .into_iter()
            .filter(|i| matches_query(i, query))
            .collect();

        let end = offset.saturating_add(max as usize).min(matching.len());
        let items = matching.get(offset..end).map(<[Item]>::to_vec).unwrap_or_default();
        let next_cursor = (end < matching.len()).then(|| end.to_string());
        Ok(SearchPage { items, next_cursor })
    }

    async fn fetch_home_timeline(&self, max: u32) -> ClientResult<Vec<Item>> {
        let mut items = Self::newest_first(&self.state().items);
        items.truncate(max as usize);
        Ok(items)
    }

    async fn fetch_mentions(&self, user_id: &str, max: u32) -> ClientResult<Vec<Item>> {
        let username = self
            .state()
            .profiles
            .iter()
            .find(|p| p.id == user_id)
            .map(|p| p.username.clone())
            .ok_or_else(|| ClientError::NotFound(format!("user {user_id}")))?;

        let page = self.search_recent(&format!("@{username}"), max, None).await?;
        Ok(page.items)
    }

    async fn fetch_profile(&self, username: &str) -> ClientResult<Option<Profile>> {
        Ok(self
            .state()
            .profiles
            .iter()
            .find(|p| p.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn post_item(
        &self,
        text: &str,
        reply_to: Option<&ItemId>,
        _media_ids: &[String],
    ) -> ClientResult<Item> {
        Ok(self.publish(text, reply_to, None))
    }

    async fn like(&self, id: &ItemId) -> ClientResult<()> {
        self.act("like", id)
    }

    async fn unlike(&self, id: &ItemId) -> ClientResult<()> {
        self.act("unlike", id)
    }

    async fn repost(&self, id: &ItemId) -> ClientResult<()> {
        self.act("repost", id)
    }

    async fn unrepost(&self, id: &ItemId) -> ClientResult<()> {
        self.act("unrepost", id)
    }

    async fn quote(&self, text: &str, id: &ItemId) -> ClientResult<Item> {
        Ok(self.publish(text, None, Some(id)))
    }
}
