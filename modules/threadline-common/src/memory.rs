// Durable conversation records. One record per (item, account), keyed by a
// deterministic UUID so writes are idempotent across restarts.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AccountId, Item, ItemId};

/// Namespace for all Threadline v5 UUIDs.
const THREADLINE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b7e_8d4a_4c39_9e51_3a0d_7b24_c8f6);

/// Memory id for an item as seen by an account.
pub fn memory_id(item_id: &ItemId, account: &AccountId) -> Uuid {
    Uuid::new_v5(
        &THREADLINE_NAMESPACE,
        format!("{}-{}", item_id, account).as_bytes(),
    )
}

/// Room id for a conversation as seen by an account.
pub fn room_id(conversation_id: &str, account: &AccountId) -> Uuid {
    Uuid::new_v5(
        &THREADLINE_NAMESPACE,
        format!("room:{}-{}", conversation_id, account).as_bytes(),
    )
}

/// Author identity within an account's memory space.
pub fn entity_id(author_id: &str, account: &AccountId) -> Uuid {
    Uuid::new_v5(
        &THREADLINE_NAMESPACE,
        format!("user:{}-{}", author_id, account).as_bytes(),
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryContent {
    pub text: String,
    pub url: String,
    pub source: String,
    pub item_id: ItemId,
    pub author_username: String,
    #[serde(default)]
    pub in_reply_to: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub account: AccountId,
    pub entity_id: Uuid,
    pub room_id: Uuid,
    pub content: MemoryContent,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Record for an item observed by `account`.
    pub fn from_item(item: &Item, account: &AccountId) -> Self {
        let created_at = Utc
            .timestamp_opt(item.created_at, 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            id: memory_id(&item.id, account),
            account: account.clone(),
            entity_id: entity_id(&item.author_id, account),
            room_id: room_id(&item.conversation_id, account),
            content: MemoryContent {
                text: item.text.clone(),
                url: item.permanent_url.clone(),
                source: "twitter".to_string(),
                item_id: item.id.clone(),
                author_username: item.author_username.clone(),
                in_reply_to: item
                    .in_reply_to_id
                    .as_ref()
                    .map(|parent| memory_id(parent, account)),
            },
            created_at,
        }
    }
}
