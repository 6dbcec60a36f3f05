//! SQLite-backed persistence for conversations and messages.
//!
//! The unordered-pair uniqueness rule lives here as a real database
//! constraint (`UNIQUE (pair_low, pair_high)` over the canonically ordered
//! pair), not as a read-then-write check, so two racing creation calls for
//! the same pair resolve to exactly one winner. The conversation insert and
//! its first message share one transaction, as do every later message
//! insert and the owning row's `last_message_at` touch.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use rusqlite::types::Type;
use tokio_rusqlite::Connection;

use crate::dm::core::config::StorageConfig;
use crate::dm::core::conversation::{
    Conversation, ConversationStatus, ParticipantRole, canonical_pair,
};
use crate::dm::core::errors::{DmError, DmResult};
use crate::dm::core::ids::{ConversationId, MessageId, PartyId};
use crate::dm::core::message::Message;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Input record for a conversation insert.
#[derive(Clone, Debug)]
pub struct NewConversation {
    /// Identifier assigned by the caller.
    pub id: ConversationId,
    /// Party opening the thread.
    pub initiator: PartyId,
    /// Party the thread is opened towards.
    pub recipient: PartyId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Input record for a message insert.
#[derive(Clone, Debug)]
pub struct NewMessage {
    /// Identifier assigned by the caller.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Authoring party.
    pub sender: PartyId,
    /// Validated, trimmed content.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Trait for conversation and message storage.
pub trait ConversationStore: Send + Sync {
    /// Atomically create a `pending` conversation together with its first
    /// message.
    ///
    /// # Errors
    /// Returns `ConversationAlreadyExists` (with the winner's id and status)
    /// if the pair uniqueness constraint fires, or a storage error.
    fn create_with_first_message(
        &self,
        conversation: NewConversation,
        first_message: NewMessage,
    ) -> StoreFuture<'_, DmResult<(Conversation, Message)>>;

    /// Fetch a conversation by id.
    fn get(&self, id: ConversationId) -> StoreFuture<'_, DmResult<Option<Conversation>>>;

    /// Transition a `pending` conversation to `status` and touch
    /// `updated_at`.
    ///
    /// The update is guarded on the current status, so two racing
    /// decisions resolve to exactly one transition.
    ///
    /// # Errors
    /// `NotFound` for a missing conversation, `InvalidStateTransition`
    /// when it is no longer `pending`.
    fn set_status(
        &self,
        id: ConversationId,
        status: ConversationStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DmResult<()>>;

    /// Advance one side's read watermark to the latest stored message.
    fn mark_read(
        &self,
        id: ConversationId,
        role: ParticipantRole,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DmResult<()>>;

    /// Insert a message and touch the owning conversation in one
    /// transaction, guarded on the conversation being `active`.
    ///
    /// # Errors
    /// `NotFound` for a missing conversation, `InvalidStateTransition`
    /// when it is not `active` by the time the transaction runs.
    fn append_message(&self, message: NewMessage) -> StoreFuture<'_, DmResult<Message>>;

    /// All conversations where `party` is on either side, most recent
    /// activity first.
    fn list_for_party(&self, party: PartyId) -> StoreFuture<'_, DmResult<Vec<Conversation>>>;

    /// Full thread in insertion order.
    fn messages(&self, id: ConversationId) -> StoreFuture<'_, DmResult<Vec<Message>>>;

    /// Most recent message of a conversation, for list previews.
    fn latest_message(&self, id: ConversationId) -> StoreFuture<'_, DmResult<Option<Message>>>;

    /// Messages in `id` authored by the other side with a sequence above
    /// `read_seq`.
    fn unread_count(
        &self,
        id: ConversationId,
        party: PartyId,
        read_seq: i64,
    ) -> StoreFuture<'_, DmResult<u64>>;
}

/// Outcome of the creation transaction, carried out of the blocking closure.
enum CreateOutcome {
    Created(Box<(Conversation, Message)>),
    Exists {
        id: ConversationId,
        status: ConversationStatus,
    },
}

/// Outcome of a guarded write, carried out of the blocking closure.
enum GuardedWrite<T> {
    Applied(T),
    Missing,
    WrongStatus(ConversationStatus),
}

/// `SQLite` implementation of the conversation store.
pub struct SqliteConversationStore {
    conn: Connection,
    conversations: String,
    messages: String,
}

impl SqliteConversationStore {
    /// Open the database and create tables and indexes if missing.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn new(config: &StorageConfig) -> DmResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        let conversations = config.conversations_table.clone();
        let messages = config.messages_table.clone();

        let conv = conversations.clone();
        let msgs = messages.clone();
        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {conv} (
                    id TEXT PRIMARY KEY,
                    initiator TEXT NOT NULL,
                    recipient TEXT NOT NULL,
                    pair_low TEXT NOT NULL,
                    pair_high TEXT NOT NULL,
                    status TEXT NOT NULL,
                    initiator_last_read_seq INTEGER NOT NULL DEFAULT 0,
                    recipient_last_read_seq INTEGER NOT NULL DEFAULT 0,
                    last_message_at INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    UNIQUE (pair_low, pair_high)
                );
                CREATE INDEX IF NOT EXISTS idx_{conv}_initiator
                    ON {conv} (initiator, last_message_at DESC);
                CREATE INDEX IF NOT EXISTS idx_{conv}_recipient
                    ON {conv} (recipient, last_message_at DESC);
                CREATE TABLE IF NOT EXISTS {msgs} (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    conversation_id TEXT NOT NULL,
                    sender TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{msgs}_thread
                    ON {msgs} (conversation_id, seq);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            conversations,
            messages,
        })
    }

    /// Columns selected for conversation rows, in `conversation_from_row` order.
    const CONVERSATION_COLUMNS: &'static str = "id, initiator, recipient, status, \
         initiator_last_read_seq, recipient_last_read_seq, last_message_at, created_at, updated_at";

    /// Columns selected for message rows, in `message_from_row` order.
    const MESSAGE_COLUMNS: &'static str = "seq, id, conversation_id, sender, content, created_at";
}

/// Wrap a column-level conversion failure in the rusqlite error shape.
fn bad_column<E>(idx: usize, ty: Type, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn uuid_column<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: core::str::FromStr<Err = uuid::Error>,
{
    raw.parse().map_err(|e| bad_column(idx, Type::Text, e))
}

fn status_column(idx: usize, raw: &str) -> rusqlite::Result<ConversationStatus> {
    raw.parse().map_err(|e| bad_column(idx, Type::Text, e))
}

fn timestamp_column(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
        bad_column(
            idx,
            Type::Integer,
            std::io::Error::new(std::io::ErrorKind::InvalidData, "timestamp out of range"),
        )
    })
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id: String = row.get(0)?;
    let initiator: String = row.get(1)?;
    let recipient: String = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(Conversation {
        id: uuid_column(0, &id)?,
        initiator: uuid_column(1, &initiator)?,
        recipient: uuid_column(2, &recipient)?,
        status: status_column(3, &status)?,
        initiator_last_read_seq: row.get(4)?,
        recipient_last_read_seq: row.get(5)?,
        last_message_at: timestamp_column(6, row.get(6)?)?,
        created_at: timestamp_column(7, row.get(7)?)?,
        updated_at: timestamp_column(8, row.get(8)?)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(1)?;
    let conversation_id: String = row.get(2)?;
    let sender: String = row.get(3)?;
    Ok(Message {
        seq: row.get(0)?,
        id: uuid_column(1, &id)?,
        conversation_id: uuid_column(2, &conversation_id)?,
        sender: uuid_column(3, &sender)?,
        content: row.get(4)?,
        created_at: timestamp_column(5, row.get(5)?)?,
    })
}

impl ConversationStore for SqliteConversationStore {
    fn create_with_first_message(
        &self,
        conversation: NewConversation,
        first_message: NewMessage,
    ) -> StoreFuture<'_, DmResult<(Conversation, Message)>> {
        Box::pin(async move {
            let conversations = self.conversations.clone();
            let messages = self.messages.clone();

            let outcome = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let (pair_low, pair_high) =
                        canonical_pair(conversation.initiator, conversation.recipient);
                    let created_ms = conversation.created_at.timestamp_millis();

                    let inserted = tx.execute(
                        &format!(
                            "INSERT INTO {conversations}
                                 (id, initiator, recipient, pair_low, pair_high, status,
                                  last_message_at, created_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?7)"
                        ),
                        rusqlite::params![
                            conversation.id.to_string(),
                            conversation.initiator.to_string(),
                            conversation.recipient.to_string(),
                            pair_low.to_string(),
                            pair_high.to_string(),
                            ConversationStatus::Pending.as_str(),
                            created_ms,
                        ],
                    );
                    match inserted {
                        Ok(_) => {}
                        Err(rusqlite::Error::SqliteFailure(e, _))
                            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                        {
                            // Lost the race (or the pair already had a thread):
                            // surface the winner so the caller can redirect.
                            let existing = tx
                                .query_row(
                                    &format!(
                                        "SELECT id, status FROM {conversations}
                                         WHERE pair_low = ?1 AND pair_high = ?2"
                                    ),
                                    rusqlite::params![pair_low.to_string(), pair_high.to_string()],
                                    |row| {
                                        let id: String = row.get(0)?;
                                        let status: String = row.get(1)?;
                                        Ok((uuid_column(0, &id)?, status_column(1, &status)?))
                                    },
                                )
                                .optional()?;
                            let (id, status) =
                                existing.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
                            return Ok(CreateOutcome::Exists { id, status });
                        }
                        Err(e) => return Err(e.into()),
                    }

                    tx.execute(
                        &format!(
                            "INSERT INTO {messages}
                                 (id, conversation_id, sender, content, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5)"
                        ),
                        rusqlite::params![
                            first_message.id.to_string(),
                            first_message.conversation_id.to_string(),
                            first_message.sender.to_string(),
                            first_message.content,
                            first_message.created_at.timestamp_millis(),
                        ],
                    )?;
                    let seq = tx.last_insert_rowid();
                    tx.commit()?;

                    Ok(CreateOutcome::Created(Box::new((
                        Conversation {
                            id: conversation.id,
                            initiator: conversation.initiator,
                            recipient: conversation.recipient,
                            status: ConversationStatus::Pending,
                            initiator_last_read_seq: 0,
                            recipient_last_read_seq: 0,
                            last_message_at: conversation.created_at,
                            created_at: conversation.created_at,
                            updated_at: conversation.created_at,
                        },
                        Message {
                            id: first_message.id,
                            conversation_id: first_message.conversation_id,
                            seq,
                            sender: first_message.sender,
                            content: first_message.content,
                            created_at: first_message.created_at,
                        },
                    ))))
                })
                .await?;

            match outcome {
                CreateOutcome::Created(pair) => Ok(*pair),
                CreateOutcome::Exists { id, status } => {
                    Err(DmError::ConversationAlreadyExists { id, status })
                }
            }
        })
    }

    fn get(&self, id: ConversationId) -> StoreFuture<'_, DmResult<Option<Conversation>>> {
        Box::pin(async move {
            let conversations = self.conversations.clone();
            let id_str = id.to_string();
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!(
                                "SELECT {} FROM {conversations} WHERE id = ?1",
                                Self::CONVERSATION_COLUMNS
                            ),
                            rusqlite::params![id_str],
                            conversation_from_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            Ok(row)
        })
    }

    fn set_status(
        &self,
        id: ConversationId,
        status: ConversationStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DmResult<()>> {
        Box::pin(async move {
            let conversations = self.conversations.clone();
            let id_str = id.to_string();
            let updated_ms = at.timestamp_millis();
            let outcome = self
                .conn
                .call(move |conn| {
                    // Only a pending row matches; a racing decision that
                    // already landed leaves nothing to update.
                    let updated = conn.execute(
                        &format!(
                            "UPDATE {conversations} SET status = ?1, updated_at = ?2
                             WHERE id = ?3 AND status = ?4"
                        ),
                        rusqlite::params![
                            status.as_str(),
                            updated_ms,
                            id_str,
                            ConversationStatus::Pending.as_str(),
                        ],
                    )?;
                    if updated == 1 {
                        return Ok(GuardedWrite::Applied(()));
                    }
                    let current = conn
                        .query_row(
                            &format!("SELECT status FROM {conversations} WHERE id = ?1"),
                            rusqlite::params![id_str],
                            |row| {
                                let raw: String = row.get(0)?;
                                status_column(0, &raw)
                            },
                        )
                        .optional()?;
                    Ok(match current {
                        Some(status) => GuardedWrite::WrongStatus(status),
                        None => GuardedWrite::Missing,
                    })
                })
                .await?;
            match outcome {
                GuardedWrite::Applied(()) => Ok(()),
                GuardedWrite::Missing => {
                    Err(DmError::NotFound(format!("conversation {id} not found")))
                }
                GuardedWrite::WrongStatus(current) => Err(DmError::InvalidStateTransition(
                    format!("this conversation is already {current}"),
                )),
            }
        })
    }

    fn mark_read(
        &self,
        id: ConversationId,
        role: ParticipantRole,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, DmResult<()>> {
        Box::pin(async move {
            let conversations = self.conversations.clone();
            let messages = self.messages.clone();
            let id_str = id.to_string();
            let updated_ms = at.timestamp_millis();
            let column = match role {
                ParticipantRole::Initiator => "initiator_last_read_seq",
                ParticipantRole::Recipient => "recipient_last_read_seq",
            };
            let updated = self
                .conn
                .call(move |conn| {
                    // One statement: the watermark lands on the newest message
                    // that existed at execution time.
                    let updated = conn.execute(
                        &format!(
                            "UPDATE {conversations}
                             SET {column} = (SELECT COALESCE(MAX(seq), 0)
                                             FROM {messages} WHERE conversation_id = ?1),
                                 updated_at = ?2
                             WHERE id = ?1"
                        ),
                        rusqlite::params![id_str, updated_ms],
                    )?;
                    Ok(updated)
                })
                .await?;
            if updated == 0 {
                return Err(DmError::NotFound(format!("conversation {id} not found")));
            }
            Ok(())
        })
    }

    fn append_message(&self, message: NewMessage) -> StoreFuture<'_, DmResult<Message>> {
        Box::pin(async move {
            let conversations = self.conversations.clone();
            let messages = self.messages.clone();
            let conversation_id = message.conversation_id;

            let outcome = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    // Touch first, guarded on status, inside the same
                    // transaction as the insert: a decision that landed
                    // after the caller's permission check cannot be
                    // messaged over.
                    let touched = tx.execute(
                        &format!(
                            "UPDATE {conversations}
                             SET last_message_at = ?1, updated_at = ?1
                             WHERE id = ?2 AND status = ?3"
                        ),
                        rusqlite::params![
                            message.created_at.timestamp_millis(),
                            message.conversation_id.to_string(),
                            ConversationStatus::Active.as_str(),
                        ],
                    )?;
                    if touched == 0 {
                        let current = tx
                            .query_row(
                                &format!("SELECT status FROM {conversations} WHERE id = ?1"),
                                rusqlite::params![message.conversation_id.to_string()],
                                |row| {
                                    let raw: String = row.get(0)?;
                                    status_column(0, &raw)
                                },
                            )
                            .optional()?;
                        return Ok(match current {
                            Some(status) => GuardedWrite::WrongStatus(status),
                            None => GuardedWrite::Missing,
                        });
                    }
                    tx.execute(
                        &format!(
                            "INSERT INTO {messages}
                                 (id, conversation_id, sender, content, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5)"
                        ),
                        rusqlite::params![
                            message.id.to_string(),
                            message.conversation_id.to_string(),
                            message.sender.to_string(),
                            message.content,
                            message.created_at.timestamp_millis(),
                        ],
                    )?;
                    let seq = tx.last_insert_rowid();
                    tx.commit()?;
                    Ok(GuardedWrite::Applied(Box::new(Message {
                        id: message.id,
                        conversation_id: message.conversation_id,
                        seq,
                        sender: message.sender,
                        content: message.content,
                        created_at: message.created_at,
                    })))
                })
                .await?;
            match outcome {
                GuardedWrite::Applied(stored) => Ok(*stored),
                GuardedWrite::Missing => Err(DmError::NotFound(format!(
                    "conversation {conversation_id} not found"
                ))),
                GuardedWrite::WrongStatus(status) => Err(DmError::InvalidStateTransition(
                    format!("this conversation is {status}"),
                )),
            }
        })
    }

    fn list_for_party(&self, party: PartyId) -> StoreFuture<'_, DmResult<Vec<Conversation>>> {
        Box::pin(async move {
            let conversations = self.conversations.clone();
            let party_str = party.to_string();
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM {conversations}
                         WHERE initiator = ?1 OR recipient = ?1
                         ORDER BY last_message_at DESC, updated_at DESC",
                        Self::CONVERSATION_COLUMNS
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![party_str], conversation_from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(rows)
        })
    }

    fn messages(&self, id: ConversationId) -> StoreFuture<'_, DmResult<Vec<Message>>> {
        Box::pin(async move {
            let messages = self.messages.clone();
            let id_str = id.to_string();
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM {messages}
                         WHERE conversation_id = ?1
                         ORDER BY seq ASC",
                        Self::MESSAGE_COLUMNS
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![id_str], message_from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(rows)
        })
    }

    fn latest_message(&self, id: ConversationId) -> StoreFuture<'_, DmResult<Option<Message>>> {
        Box::pin(async move {
            let messages = self.messages.clone();
            let id_str = id.to_string();
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!(
                                "SELECT {} FROM {messages}
                                 WHERE conversation_id = ?1
                                 ORDER BY seq DESC
                                 LIMIT 1",
                                Self::MESSAGE_COLUMNS
                            ),
                            rusqlite::params![id_str],
                            message_from_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            Ok(row)
        })
    }

    fn unread_count(
        &self,
        id: ConversationId,
        party: PartyId,
        read_seq: i64,
    ) -> StoreFuture<'_, DmResult<u64>> {
        Box::pin(async move {
            let messages = self.messages.clone();
            let id_str = id.to_string();
            let party_str = party.to_string();
            let count = self
                .conn
                .call(move |conn| {
                    let count: i64 = conn.query_row(
                        &format!(
                            "SELECT COUNT(*) FROM {messages}
                             WHERE conversation_id = ?1 AND sender != ?2 AND seq > ?3"
                        ),
                        rusqlite::params![id_str, party_str, read_seq],
                        |row| row.get(0),
                    )?;
                    u64::try_from(count).map_err(|e| bad_column(0, Type::Integer, e).into())
                })
                .await?;
            Ok(count)
        })
    }
}
