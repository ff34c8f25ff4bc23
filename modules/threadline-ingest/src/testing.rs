//! Test doubles for the social API and the Responder, plus item builders.
//!
//! Compiled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use threadline_common::{
    Item, ItemId, Profile, ReferenceKind, ReferencedItem, SearchPage,
};

use crate::client::{ClientError, ClientResult, SocialClient};
use crate::respond::{ResponseContext, ResponseIntent, Responder};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A plain item authored by `alice` in conversation `c1`.
pub fn item(id: &str, parent: Option<&str>) -> Item {
    Item {
        id: ItemId::new(id),
        text: format!("item {id}"),
        author_id: "1001".into(),
        author_username: "alice".into(),
        author_display_name: "Alice".into(),
        conversation_id: "c1".into(),
        created_at: 1_700_000_000 + id.parse::<i64>().unwrap_or(0),
        in_reply_to_id: parent.map(ItemId::new),
        referenced_items: parent
            .map(|p| {
                vec![ReferencedItem {
                    kind: ReferenceKind::RepliedTo,
                    id: ItemId::new(p),
                }]
            })
            .unwrap_or_default(),
        metrics: serde_json::Value::Null,
        permanent_url: format!("https://x.com/alice/status/{id}"),
    }
}

/// `item` with a different author.
pub fn item_by(id: &str, parent: Option<&str>, username: &str) -> Item {
    Item {
        author_id: format!("id-{username}"),
        author_username: username.into(),
        author_display_name: username.into(),
        permanent_url: format!("https://x.com/{username}/status/{id}"),
        ..item(id, parent)
    }
}

/// Items `1..=n` where each replies to the one before it. Root is `1`.
pub fn reply_chain(n: usize) -> Vec<Item> {
    (1..=n)
        .map(|i| {
            let parent = (i > 1).then(|| (i - 1).to_string());
            item(&i.to_string(), parent.as_deref())
        })
        .collect()
}

/// A post made through the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct PostRecord {
    pub text: String,
    pub reply_to: Option<ItemId>,
    pub media_ids: Vec<String>,
}

#[derive(Default)]
struct MockState {
    items: HashMap<ItemId, Item>,
    searches: HashMap<String, Vec<SearchPage>>,
    timeline: Vec<Item>,
    mentions: HashMap<String, Vec<Item>>,
    profiles: HashMap<String, Profile>,

    failing_fetches: HashMap<ItemId, ClientError>,
    failing_searches: HashMap<String, ClientError>,
    fail_first: HashMap<&'static str, (usize, ClientError)>,
    auth_rejected: bool,

    calls: Vec<&'static str>,
    fetch_calls: Vec<ItemId>,
    search_calls: Vec<String>,
    posts: Vec<PostRecord>,
    actions: Vec<(String, ItemId)>,
    next_id: u64,
}

/// In-memory `SocialClient` with builder-style fixtures and call recording.
pub struct MockSocialClient {
    state: Mutex<MockState>,
}

impl Default for MockSocialClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSocialClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_id: 9_000_000_000,
                ..MockState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    // --- Fixtures ---

    pub fn with_item(self, item: Item) -> Self {
        self.state().items.insert(item.id.clone(), item);
        self
    }

    pub fn with_items(self, items: impl IntoIterator<Item = Item>) -> Self {
        {
            let mut state = self.state();
            for item in items {
                state.items.insert(item.id.clone(), item);
            }
        }
        self
    }

    /// Single-page search result for `query`.
    pub fn on_search(self, query: &str, items: Vec<Item>) -> Self {
        self.on_search_pages(
            query,
            vec![SearchPage {
                items,
                next_cursor: None,
            }],
        )
    }

    /// Multi-page result. Page `n + 1` is served for the cursor page `n`
    /// returned.
    pub fn on_search_pages(self, query: &str, pages: Vec<SearchPage>) -> Self {
        self.state().searches.insert(query.to_string(), pages);
        self
    }

    pub fn with_timeline(self, items: Vec<Item>) -> Self {
        self.state().timeline = items;
        self
    }

    pub fn with_mentions(self, user_id: &str, items: Vec<Item>) -> Self {
        self.state().mentions.insert(user_id.to_string(), items);
        self
    }

    pub fn with_profile(self, profile: Profile) -> Self {
        self.state()
            .profiles
            .insert(profile.username.to_lowercase(), profile);
        self
    }

    // --- Failure injection ---

    /// Every fetch of `id` fails with `err`.
    pub fn fail_fetch(self, id: &str, err: ClientError) -> Self {
        self.state().failing_fetches.insert(ItemId::new(id), err);
        self
    }

    /// Every search for `query` fails with `err`.
    pub fn fail_search(self, query: &str, err: ClientError) -> Self {
        self.state()
            .failing_searches
            .insert(query.to_string(), err);
        self
    }

    /// The first `times` calls of `op` fail with `err`, later ones behave
    /// normally.
    pub fn fail_first(self, op: &'static str, times: usize, err: ClientError) -> Self {
        self.state().fail_first.insert(op, (times, err));
        self
    }

    /// Every call fails with `ClientError::Auth`.
    pub fn reject_auth(self) -> Self {
        self.state().auth_rejected = true;
        self
    }

    // --- Inspection ---

    pub fn fetch_calls(&self) -> Vec<ItemId> {
        self.state().fetch_calls.clone()
    }

    pub fn search_calls(&self) -> Vec<String> {
        self.state().search_calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == op).count()
    }

    pub fn posts(&self) -> Vec<PostRecord> {
        self.state().posts.clone()
    }

    /// Engagement actions as `(kind, target)`, in call order.
    pub fn actions(&self) -> Vec<(String, ItemId)> {
        self.state().actions.clone()
    }

    /// Record the call and apply injected failures.
    fn enter(&self, op: &'static str) -> ClientResult<()> {
        let mut state = self.state();
        state.calls.push(op);
        if state.auth_rejected {
            return Err(ClientError::Auth("token rejected".into()));
        }
        if let Some((remaining, err)) = state.fail_first.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(err.clone());
            }
        }
        Ok(())
    }

    fn create(&self, text: &str, reply_to: Option<&ItemId>, quoted: Option<&ItemId>) -> Item {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id.to_string();

        let conversation_id = reply_to
            .map(|parent| {
                state
                    .items
                    .get(parent)
                    .map(|p| p.conversation_id.clone())
                    .unwrap_or_else(|| parent.to_string())
            })
            .unwrap_or_else(|| id.clone());

        let mut referenced_items = Vec::new();
        if let Some(parent) = reply_to {
            referenced_items.push(ReferencedItem {
                kind: ReferenceKind::RepliedTo,
                id: parent.clone(),
            });
        }
        if let Some(quoted) = quoted {
            referenced_items.push(ReferencedItem {
                kind: ReferenceKind::Quoted,
                id: quoted.clone(),
            });
        }

        let created = Item {
            id: ItemId::new(id.clone()),
            text: text.to_string(),
            author_id: "agent-id".into(),
            author_username: "agent".into(),
            author_display_name: "Agent".into(),
            conversation_id,
            created_at: 1_800_000_000,
            in_reply_to_id: reply_to.cloned(),
            referenced_items,
            metrics: serde_json::Value::Null,
            permanent_url: format!("https://x.com/agent/status/{id}"),
        };
        state.items.insert(created.id.clone(), created.clone());
        created
    }
}

#[async_trait]
impl SocialClient for MockSocialClient {
    async fn fetch_by_id(&self, id: &ItemId) -> ClientResult<Option<Item>> {
        self.state().fetch_calls.push(id.clone());
        self.enter("fetch_by_id")?;
        let state = self.state();
        if let Some(err) = state.failing_fetches.get(id) {
            return Err(err.clone());
        }
        Ok(state.items.get(id).cloned())
    }

    async fn search_recent(
        &self,
        query: &str,
        max: u32,
        cursor: Option<&str>,
    ) -> ClientResult<SearchPage> {
        self.state().search_calls.push(query.to_string());
        self.enter("search_recent")?;
        let state = self.state();
        if let Some(err) = state.failing_searches.get(query) {
            return Err(err.clone());
        }

        let Some(pages) = state.searches.get(query) else {
            return Ok(SearchPage::default());
        };
        let index = match cursor {
            None => 0,
            Some(cursor) => match pages
                .iter()
                .position(|p| p.next_cursor.as_deref() == Some(cursor))
            {
                Some(i) => i + 1,
                None => return Ok(SearchPage::default()),
            },
        };
        let mut page = pages.get(index).cloned().unwrap_or_default();
        page.items.truncate(max as usize);
        Ok(page)
    }

    async fn fetch_home_timeline(&self, max: u32) -> ClientResult<Vec<Item>> {
        self.enter("fetch_home_timeline")?;
        Ok(self
            .state()
            .timeline
            .iter()
            .take(max as usize)
            .cloned()
            .collect())
    }

    async fn fetch_mentions(&self, user_id: &str, max: u32) -> ClientResult<Vec<Item>> {
        self.enter("fetch_mentions")?;
        Ok(self
            .state()
            .mentions
            .get(user_id)
            .map(|items| items.iter().take(max as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_profile(&self, username: &str) -> ClientResult<Option<Profile>> {
        self.enter("fetch_profile")?;
        Ok(self
            .state()
            .profiles
            .get(&username.to_lowercase())
            .cloned())
    }

    async fn post_item(
        &self,
        text: &str,
        reply_to: Option<&ItemId>,
        media_ids: &[String],
    ) -> ClientResult<Item> {
        self.enter("post_item")?;
        self.state().posts.push(PostRecord {
            text: text.to_string(),
            reply_to: reply_to.cloned(),
            media_ids: media_ids.to_vec(),
        });
        Ok(self.create(text, reply_to, None))
    }

    async fn like(&self, id: &ItemId) -> ClientResult<()> {
        self.enter("like")?;
        self.state().actions.push(("like".into(), id.clone()));
        Ok(())
    }

    async fn unlike(&self, id: &ItemId) -> ClientResult<()> {
        self.enter("unlike")?;
        self.state().actions.push(("unlike".into(), id.clone()));
        Ok(())
    }

    async fn repost(&self, id: &ItemId) -> ClientResult<()> {
        self.enter("repost")?;
        self.state().actions.push(("repost".into(), id.clone()));
        Ok(())
    }

    async fn unrepost(&self, id: &ItemId) -> ClientResult<()> {
        self.enter("unrepost")?;
        self.state().actions.push(("unrepost".into(), id.clone()));
        Ok(())
    }

    async fn quote(&self, text: &str, id: &ItemId) -> ClientResult<Item> {
        self.enter("quote")?;
        self.state().posts.push(PostRecord {
            text: text.to_string(),
            reply_to: None,
            media_ids: Vec::new(),
        });
        Ok(self.create(text, None, Some(id)))
    }
}

// ---------------------------------------------------------------------------
// RecordingResponder
// ---------------------------------------------------------------------------

type IntentFn = Box<dyn Fn(&ResponseContext) -> Vec<ResponseIntent> + Send + Sync>;

/// Records every context it is handed. Intents come from a closure; the
/// default says nothing.
pub struct RecordingResponder {
    seen: Mutex<Vec<ResponseContext>>,
    intents: IntentFn,
    fail_on: Mutex<Vec<ItemId>>,
}

impl Default for RecordingResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingResponder {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            intents: Box::new(|_: &ResponseContext| Vec::new()),
            fail_on: Mutex::new(Vec::new()),
        }
    }

    pub fn with_intents<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResponseContext) -> Vec<ResponseIntent> + Send + Sync + 'static,
    {
        self.intents = Box::new(f);
        self
    }

    /// Replies `text` to every item.
    pub fn replying(self, text: &str) -> Self {
        let text = text.to_string();
        self.with_intents(move |ctx| vec![ResponseIntent::reply(text.clone(), &ctx.item.id)])
    }

    /// `respond` errors for this item id.
    pub fn failing_on(self, id: &str) -> Self {
        lock(&self.fail_on).push(ItemId::new(id));
        self
    }

    pub fn contexts(&self) -> Vec<ResponseContext> {
        lock(&self.seen).clone()
    }

    pub fn seen_ids(&self) -> Vec<ItemId> {
        lock(&self.seen).iter().map(|c| c.item.id.clone()).collect()
    }
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn respond(&self, ctx: &ResponseContext) -> anyhow::Result<Vec<ResponseIntent>> {
        lock(&self.seen).push(ctx.clone());
        if lock(&self.fail_on).contains(&ctx.item.id) {
            anyhow::bail!("responder failed on {}", ctx.item.id);
        }
        Ok((self.intents)(ctx))
    }
}
