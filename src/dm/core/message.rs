//! Immutable message entries within a conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dm::core::errors::{DmError, DmResult};
use crate::dm::core::ids::{ConversationId, MessageId, PartyId};

/// One immutable text entry within a conversation.
///
/// Messages are append-only: nothing in this subsystem edits or deletes
/// them. Threads display them in `created_at` ascending order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Storage-assigned sequence number; strictly increasing per database.
    pub seq: i64,
    /// Authoring party; always one of the conversation's two participants.
    pub sender: PartyId,
    /// Message text, non-empty after trimming.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Validate and normalize user-supplied message content.
///
/// Trims surrounding whitespace, rejects empty results and enforces the
/// configured length ceiling.
///
/// # Errors
/// Returns `InvalidArgument` for empty or oversized content.
pub fn validate_content(raw: &str, max_chars: usize) -> DmResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DmError::InvalidArgument(
            "message content must not be empty".to_string(),
        ));
    }
    let chars = trimmed.chars().count();
    if chars > max_chars {
        return Err(DmError::InvalidArgument(format!(
            "message content too long: {chars} characters, max {max_chars}"
        )));
    }
    Ok(trimmed.to_string())
}
