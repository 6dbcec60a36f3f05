//! Conversation lifecycle types and the send permission matrix.
//!
//! A conversation starts `pending` when the initiator sends the first
//! message. Only the recipient moves it on, exactly once, to `active` or
//! `ignored`. While `pending`, sends are blocked from **both** sides: the
//! initiator cannot follow up until the recipient has agreed to the thread.
//! `ignored` blocks sends permanently; no transition leads out of it.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dm::core::ids::{ConversationId, PartyId};

/// Lifecycle state of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Awaiting the recipient's decision; sends blocked both ways.
    Pending,
    /// Recipient accepted; both parties may send.
    Active,
    /// Recipient declined; sends blocked both ways, permanently.
    Ignored,
}

impl ConversationStatus {
    /// Stable storage/wire form of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Ignored => "ignored",
        }
    }

    /// Whether a participant may post a message in this state.
    ///
    /// The matrix is symmetric: `pending` and `ignored` reject both the
    /// initiator and the recipient, `active` allows both.
    #[must_use]
    pub const fn allows_send(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a stored or client-supplied status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusParseError(pub String);

impl fmt::Display for StatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown conversation status {:?}", self.0)
    }
}

impl std::error::Error for StatusParseError {}

impl FromStr for ConversationStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "ignored" => Ok(Self::Ignored),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

/// Which side of a conversation a party is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantRole {
    /// The party that opened the thread with the first message.
    Initiator,
    /// The party the thread was opened towards.
    Recipient,
}

/// A DM thread between exactly two distinct parties.
///
/// Unread counts are not stored as mutable integers; each side carries a
/// watermark of the highest message sequence number it has read, and counts
/// are derived from the message log. A crash can never leave a counter out
/// of step with the messages it describes, and same-millisecond writes
/// cannot be miscounted the way timestamp watermarks would allow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique identifier.
    pub id: ConversationId,
    /// Party that sent the first message.
    pub initiator: PartyId,
    /// Party the first message was addressed to.
    pub recipient: PartyId,
    /// Current lifecycle state.
    pub status: ConversationStatus,
    /// Highest message sequence the initiator has marked read. 0 = none.
    pub initiator_last_read_seq: i64,
    /// Highest message sequence the recipient has marked read. 0 = none.
    pub recipient_last_read_seq: i64,
    /// Timestamp of the most recent message.
    pub last_message_at: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time (message, status change or mark-read).
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Role of `party` in this conversation, if it is a participant.
    #[must_use]
    pub fn role_of(&self, party: PartyId) -> Option<ParticipantRole> {
        if party == self.initiator {
            Some(ParticipantRole::Initiator)
        } else if party == self.recipient {
            Some(ParticipantRole::Recipient)
        } else {
            None
        }
    }

    /// Whether `party` is one of the two participants.
    #[must_use]
    pub fn is_participant(&self, party: PartyId) -> bool {
        self.role_of(party).is_some()
    }

    /// The participant on the other side from `party`.
    ///
    /// Callers must have checked participation first; returns the recipient
    /// for the initiator and vice versa.
    #[must_use]
    pub fn other_party(&self, party: PartyId) -> PartyId {
        if party == self.initiator {
            self.recipient
        } else {
            self.initiator
        }
    }

    /// The last-read watermark belonging to `role`.
    #[must_use]
    pub const fn last_read_seq(&self, role: ParticipantRole) -> i64 {
        match role {
            ParticipantRole::Initiator => self.initiator_last_read_seq,
            ParticipantRole::Recipient => self.recipient_last_read_seq,
        }
    }
}

/// Order a party pair canonically for the storage uniqueness constraint.
///
/// At most one conversation may exist per unordered pair, regardless of who
/// initiated. Storing the pair in a fixed order lets a plain two-column
/// unique index enforce that.
#[must_use]
pub fn canonical_pair(a: PartyId, b: PartyId) -> (PartyId, PartyId) {
    if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(initiator: PartyId, recipient: PartyId) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: ConversationId::new(),
            initiator,
            recipient,
            status: ConversationStatus::Pending,
            initiator_last_read_seq: 0,
            recipient_last_read_seq: 0,
            last_message_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            ConversationStatus::Pending,
            ConversationStatus::Active,
            ConversationStatus::Ignored,
        ] {
            let parsed: ConversationStatus =
                status.as_str().parse().expect("parse own storage form");
            assert_eq!(status, parsed);
        }
        assert!("archived".parse::<ConversationStatus>().is_err());
    }

    #[test]
    fn only_active_allows_send() {
        assert!(!ConversationStatus::Pending.allows_send());
        assert!(ConversationStatus::Active.allows_send());
        assert!(!ConversationStatus::Ignored.allows_send());
    }

    #[test]
    fn roles_and_other_party() {
        let a = PartyId::new();
        let b = PartyId::new();
        let conv = conversation(a, b);

        assert_eq!(conv.role_of(a), Some(ParticipantRole::Initiator));
        assert_eq!(conv.role_of(b), Some(ParticipantRole::Recipient));
        assert_eq!(conv.role_of(PartyId::new()), None);
        assert_eq!(conv.other_party(a), b);
        assert_eq!(conv.other_party(b), a);
    }

    #[test]
    fn canonical_pair_is_order_insensitive() {
        let a = PartyId::new();
        let b = PartyId::new();
        assert_eq!(canonical_pair(a, b), canonical_pair(b, a));
    }
}
