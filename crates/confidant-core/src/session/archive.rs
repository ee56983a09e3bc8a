//! Archive helpers: building conversations and keeping the cap.

use chrono::{DateTime, Utc};

use crate::ids::EntityId;
use crate::persistence::{conversation_preview, Conversation, Message};

/// Maximum number of archived conversations kept.
pub const ARCHIVE_CAP: usize = 50;

pub(crate) fn build_conversation(
    id: EntityId,
    created_at: DateTime<Utc>,
    messages: Vec<Message>,
) -> Conversation {
    Conversation {
        id,
        created_at,
        preview: conversation_preview(&messages),
        message_count: messages.len(),
        messages,
    }
}

/// Insert at the front, drop anything past [`ARCHIVE_CAP`].
/// Returns how many entries were dropped.
pub(crate) fn prepend_capped(archive: &mut Vec<Conversation>, conversation: Conversation) -> usize {
    archive.insert(0, conversation);
    let evicted = archive.len().saturating_sub(ARCHIVE_CAP);
    archive.truncate(ARCHIVE_CAP);
    evicted
}
