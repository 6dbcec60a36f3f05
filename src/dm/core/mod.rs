//! Core messaging types and identifiers.

pub mod config;
pub mod conversation;
pub mod errors;
pub mod ids;
pub mod message;

pub use config::{DmConfig, LimitsConfig, StorageConfig};
pub use conversation::{Conversation, ConversationStatus, ParticipantRole, StatusParseError};
pub use errors::{DmError, DmResult};
pub use ids::{ConversationId, MessageId, PartyId};
pub use message::Message;
