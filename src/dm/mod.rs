//! Direct-messaging subsystem, organized into:
//! - `core`: Configuration, errors, IDs, conversation and message types
//! - `storage`: Conversation/message store trait with a SQLite backend
//! - `engine`: Lifecycle operations and the send permission matrix
//! - `identity`: Seam to the identity provider that owns party accounts
//! - `rate_limit`: Capability interface for throttling thread creation

pub mod core;
pub mod engine;
pub mod identity;
pub mod rate_limit;
pub mod storage;

// Re-export commonly used types for convenience
pub use self::core::{
    Conversation, ConversationId, ConversationStatus, DmConfig, DmError, DmResult, LimitsConfig,
    Message, MessageId, PartyId, StorageConfig,
};
pub use engine::{ConversationEngine, ConversationView, Decision, Inbox, Thread};
pub use identity::{IdentityProvider, Party, StaticIdentityProvider};
pub use rate_limit::{InMemoryRateLimiter, NoopRateLimiter, RateLimiter};
pub use storage::{ConversationStore, NewConversation, NewMessage, SqliteConversationStore};
