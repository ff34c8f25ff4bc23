use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

// --- Identity ---

/// Social item id. Ids are numeric strings that can exceed `u64`, so ordering
/// compares them as big integers (length first, then digits), never lexically.
/// Non-numeric ids fall back to plain string order after every numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits with leading zeros stripped, or `None` if the id is not a
    /// non-negative integer.
    pub fn magnitude(&self) -> Option<&str> {
        if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let trimmed = self.0.trim_start_matches('0');
        Some(if trimmed.is_empty() { "0" } else { trimmed })
    }

    /// Whether the id can take part in watermark comparisons.
    pub fn is_numeric(&self) -> bool {
        self.magnitude().is_some()
    }
}

impl Ord for ItemId {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_value = match (self.magnitude(), other.magnitude()) {
            (Some(a), Some(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        // Raw text breaks ties so Ord agrees with Eq ("007" vs "7").
        by_value.then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for ItemId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The account an ingestion lane acts for. Scopes cache keys, watermarks,
/// and memory ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// --- Items ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Reposted,
    Quoted,
    RepliedTo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedItem {
    pub kind: ReferenceKind,
    pub id: ItemId,
}

/// A normalized social post. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub text: String,
    pub author_id: String,
    pub author_username: String,
    pub author_display_name: String,
    pub conversation_id: String,
    pub created_at: i64,
    #[serde(default)]
    pub in_reply_to_id: Option<ItemId>,
    #[serde(default)]
    pub referenced_items: Vec<ReferencedItem>,
    /// Engagement counters, passed through untouched.
    #[serde(default)]
    pub metrics: serde_json::Value,
    pub permanent_url: String,
}

impl Item {
    pub fn is_reply(&self) -> bool {
        self.in_reply_to_id.is_some()
    }

    pub fn quoted_id(&self) -> Option<&ItemId> {
        self.referenced_items
            .iter()
            .find(|r| r.kind == ReferenceKind::Quoted)
            .map(|r| &r.id)
    }
}

/// One page of a cursor-paginated search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub items: Vec<Item>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub bio: Option<String>,
}

// --- Threads ---

/// Root-to-leaf reply chain. Never contains the same id twice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    items: Vec<Item>,
}

impl Thread {
    /// Build from a root-first sequence. Callers guarantee id uniqueness.
    pub fn from_root_first(items: Vec<Item>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Item> {
        self.items
    }

    pub fn root(&self) -> Option<&Item> {
        self.items.first()
    }

    pub fn leaf(&self) -> Option<&Item> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<&ItemId> {
        self.items.iter().map(|i| &i.id).collect()
    }
}
