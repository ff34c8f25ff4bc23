// Conversation context rendering for the Responder.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::warn;

use threadline_common::{room_id, AccountId, ItemId, MemoryRecord, MemoryStore, Thread};

/// Earlier room memories kept in the rendered context.
const MAX_EARLIER_MEMORIES: usize = 20;

fn stamp(seconds: i64) -> String {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown time".to_string())
}

fn line(username: &str, when: &str, text: &str) -> String {
    format!("@{username} ({when}): {text}")
}

/// Render the thread transcript, preceded by earlier memories from the same
/// conversation that the thread itself does not cover.
pub fn render_context(thread: &Thread, room_memories: &[MemoryRecord]) -> String {
    let in_thread: HashSet<&ItemId> = thread.items().iter().map(|i| &i.id).collect();

    let mut earlier: Vec<&MemoryRecord> = room_memories
        .iter()
        .filter(|m| !in_thread.contains(&m.content.item_id))
        .collect();
    earlier.sort_by_key(|m| m.created_at);
    let skip = earlier.len().saturating_sub(MAX_EARLIER_MEMORIES);

    let mut out = Vec::new();
    if earlier.len() > skip {
        out.push("# Earlier in this conversation".to_string());
        for m in &earlier[skip..] {
            let when = m.created_at.format("%Y-%m-%d %H:%M").to_string();
            out.push(line(&m.content.author_username, &when, &m.content.text));
        }
        out.push(String::new());
    }

    out.push("# Thread".to_string());
    for item in thread.items() {
        out.push(line(
            &item.author_username,
            &stamp(item.created_at),
            &item.text,
        ));
    }
    out.join("\n")
}

/// Load room memories for the thread's conversations and render. Memory
/// failures fall back to the bare transcript.
pub async fn conversation_context(
    memory: &dyn MemoryStore,
    account: &AccountId,
    thread: &Thread,
) -> String {
    let mut rooms = Vec::new();
    for item in thread.items() {
        let room = room_id(&item.conversation_id, account);
        if !rooms.contains(&room) {
            rooms.push(room);
        }
    }

    let memories = if rooms.is_empty() {
        Vec::new()
    } else {
        match memory.query_by_room_ids(&rooms).await {
            Ok(memories) => memories,
            Err(e) => {
                warn!(error = %e, "Room memory query failed, rendering thread only");
                Vec::new()
            }
        }
    };

    let mut seen = HashSet::new();
    let unique: Vec<MemoryRecord> = memories
        .into_iter()
        .filter(|m| seen.insert(m.id))
        .collect();
    render_context(thread, &unique)
}
