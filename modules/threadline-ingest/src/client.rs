// The social API seam. Every call is rate-limited and fallible, and every
// call made by this crate goes through the account's SerialRequestQueue.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use threadline_common::{Item, ItemId, Profile, SearchPage};

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Whether the queue may retry the call in place.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ClientError::Auth(_) | ClientError::NotFound(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Auth(_))
    }
}

#[async_trait]
pub trait SocialClient: Send + Sync {
    /// Fetch one item. `Ok(None)` means it does not exist (deleted, protected).
    async fn fetch_by_id(&self, id: &ItemId) -> ClientResult<Option<Item>>;

    /// Recent-search, newest first. Pass the previous page's `next_cursor` to continue.
    async fn search_recent(
        &self,
        query: &str,
        max: u32,
        cursor: Option<&str>,
    ) -> ClientResult<SearchPage>;

    async fn fetch_home_timeline(&self, max: u32) -> ClientResult<Vec<Item>>;

    async fn fetch_mentions(&self, user_id: &str, max: u32) -> ClientResult<Vec<Item>>;

    async fn fetch_profile(&self, username: &str) -> ClientResult<Option<Profile>>;

    /// Publish a post. Returns the created item.
    async fn post_item(
        &self,
        text: &str,
        reply_to: Option<&ItemId>,
        media_ids: &[String],
    ) -> ClientResult<Item>;

    async fn like(&self, id: &ItemId) -> ClientResult<()>;

    async fn unlike(&self, id: &ItemId) -> ClientResult<()>;

    async fn repost(&self, id: &ItemId) -> ClientResult<()>;

    async fn unrepost(&self, id: &ItemId) -> ClientResult<()>;

    async fn quote(&self, text: &str, id: &ItemId) -> ClientResult<Item>;
}
