// Responder / Poster seam.
//
// A Responder looks at one item in context and returns intents. It never
// touches the API itself; the Poster executes intents through the account
// lane, caches what it creates, and records created posts as memories.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use threadline_common::{
    AccountId, Item, ItemId, MemoryRecord, MemoryStore, Thread, ThreadlineError,
};

use crate::cache::ItemCache;
use crate::registry::AccountLane;

/// Everything a Responder gets to see for one candidate.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub item: Item,
    /// Rendered transcript: the thread plus earlier memories from the room.
    pub conversation_context: String,
    pub thread: Thread,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseIntent {
    Reply {
        text: String,
        in_reply_to: ItemId,
        media_ids: Vec<String>,
    },
    Quote {
        text: String,
        quoted: ItemId,
    },
    Like(ItemId),
    Unlike(ItemId),
    Repost(ItemId),
    Unrepost(ItemId),
}

impl ResponseIntent {
    pub fn reply(text: impl Into<String>, in_reply_to: &ItemId) -> Self {
        ResponseIntent::Reply {
            text: text.into(),
            in_reply_to: in_reply_to.clone(),
            media_ids: Vec::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResponseIntent::Reply { .. } => "reply",
            ResponseIntent::Quote { .. } => "quote",
            ResponseIntent::Like(_) => "like",
            ResponseIntent::Unlike(_) => "unlike",
            ResponseIntent::Repost(_) => "repost",
            ResponseIntent::Unrepost(_) => "unrepost",
        }
    }

    /// The item this intent acts on.
    pub fn target(&self) -> &ItemId {
        match self {
            ResponseIntent::Reply { in_reply_to, .. } => in_reply_to,
            ResponseIntent::Quote { quoted, .. } => quoted,
            ResponseIntent::Like(id)
            | ResponseIntent::Unlike(id)
            | ResponseIntent::Repost(id)
            | ResponseIntent::Unrepost(id) => id,
        }
    }
}

/// Decides what, if anything, to do about an item. An empty vec means "stay
/// quiet".
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, ctx: &ResponseContext) -> anyhow::Result<Vec<ResponseIntent>>;
}

/// Never responds. The default when no decision logic is wired in.
pub struct SilentResponder;

#[async_trait]
impl Responder for SilentResponder {
    async fn respond(&self, ctx: &ResponseContext) -> anyhow::Result<Vec<ResponseIntent>> {
        info!(
            id = %ctx.item.id,
            author = %ctx.item.author_username,
            thread_len = ctx.thread.len(),
            "Observed item"
        );
        Ok(Vec::new())
    }
}

/// Executes intents for one account.
pub struct Poster {
    lane: Arc<AccountLane>,
    cache: ItemCache,
    memory: Arc<dyn MemoryStore>,
    dry_run: bool,
}

impl Poster {
    pub fn new(
        lane: Arc<AccountLane>,
        cache: ItemCache,
        memory: Arc<dyn MemoryStore>,
        dry_run: bool,
    ) -> Self {
        Self {
            lane,
            cache,
            memory,
            dry_run,
        }
    }

    fn account(&self) -> &AccountId {
        self.lane.account()
    }

    /// Run one intent. Returns the created item for replies and quotes,
    /// `None` for engagement actions and in dry-run mode.
    pub async fn execute(&self, intent: &ResponseIntent) -> Result<Option<Item>, ThreadlineError> {
        if self.dry_run {
            info!(
                account = %self.account(),
                kind = intent.kind(),
                target = %intent.target(),
                "Dry run, not executing intent"
            );
            return Ok(None);
        }

        let created = match intent {
            ResponseIntent::Reply {
                text,
                in_reply_to,
                media_ids,
            } => Some(
                self.lane
                    .post_item(text, Some(in_reply_to), media_ids)
                    .await?,
            ),
            ResponseIntent::Quote { text, quoted } => Some(self.lane.quote(text, quoted).await?),
            ResponseIntent::Like(id) => {
                self.lane.like(id).await?;
                None
            }
            ResponseIntent::Unlike(id) => {
                self.lane.unlike(id).await?;
                None
            }
            ResponseIntent::Repost(id) => {
                self.lane.repost(id).await?;
                None
            }
            ResponseIntent::Unrepost(id) => {
                self.lane.unrepost(id).await?;
                None
            }
        };

        info!(
            account = %self.account(),
            kind = intent.kind(),
            target = %intent.target(),
            created = created.as_ref().map(|i| i.id.as_str()),
            "Intent executed"
        );

        if let Some(item) = &created {
            self.record(item).await;
        }
        Ok(created)
    }

    async fn record(&self, item: &Item) {
        if let Err(e) = self.cache.set_item(item).await {
            warn!(id = %item.id, error = %e, "Failed to cache created item");
        }
        let record = MemoryRecord::from_item(item, self.account());
        if let Err(e) = self.memory.create(record).await {
            warn!(id = %item.id, error = %e, "Failed to record created item");
        }
    }
}
