//! Lifecycle operations over conversations and the send permission matrix.
//!
//! Every authorization rule lives here, in one place, regardless of which
//! transport calls in: participant checks, the recipient-only respond rule,
//! and the state matrix that blocks sends from **both** sides of a
//! `pending` thread. Handlers stay thin and cannot disagree with each
//! other about who may do what.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::dm::core::config::LimitsConfig;
use crate::dm::core::conversation::{Conversation, ConversationStatus, ParticipantRole};
use crate::dm::core::errors::{DmError, DmResult};
use crate::dm::core::ids::{ConversationId, MessageId, PartyId};
use crate::dm::core::message::{Message, validate_content};
use crate::dm::identity::IdentityProvider;
use crate::dm::rate_limit::RateLimiter;
use crate::dm::storage::{ConversationStore, NewConversation, NewMessage};

/// The recipient's decision on a pending message request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Accept the request and open the thread both ways.
    Active,
    /// Decline the request and block the thread permanently.
    Ignored,
}

impl Decision {
    /// The lifecycle status this decision moves the conversation to.
    #[must_use]
    pub const fn into_status(self) -> ConversationStatus {
        match self {
            Self::Active => ConversationStatus::Active,
            Self::Ignored => ConversationStatus::Ignored,
        }
    }
}

/// One conversation as it appears in a party's inbox listing.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    /// The conversation itself.
    pub conversation: Conversation,
    /// The participant on the other side from the caller.
    pub other_party: PartyId,
    /// The caller's unread count for this thread.
    pub unread_count: u64,
    /// Most recent message, for preview display.
    pub latest_message: Option<Message>,
}

/// A party's full inbox.
#[derive(Debug, Clone, Serialize)]
pub struct Inbox {
    /// Conversations ordered by most recent activity.
    pub conversations: Vec<ConversationView>,
    /// Sum of the caller's unread counts, for badge display.
    pub total_unread_count: u64,
}

/// A full chronological thread.
#[derive(Debug, Clone, Serialize)]
pub struct Thread {
    /// Conversation metadata.
    pub conversation: Conversation,
    /// All messages, oldest first.
    pub messages: Vec<Message>,
}

/// Orchestrates conversation lifecycle, permissions and unread accounting.
pub struct ConversationEngine {
    store: Arc<dyn ConversationStore>,
    identity: Arc<dyn IdentityProvider>,
    rate_limiter: Arc<dyn RateLimiter>,
    limits: LimitsConfig,
}

impl ConversationEngine {
    /// Assemble an engine over its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        identity: Arc<dyn IdentityProvider>,
        rate_limiter: Arc<dyn RateLimiter>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            store,
            identity,
            rate_limiter,
            limits,
        }
    }

    /// Open a new thread towards `recipient` with a first message.
    ///
    /// The conversation starts `pending` with the first message already
    /// unread for the recipient. At most one conversation may exist per
    /// party pair; when the pair already has one (in any state, whoever
    /// initiated it), the error carries its id and status so the caller
    /// can redirect into the existing thread.
    ///
    /// # Errors
    /// `InvalidArgument` for self-messaging or empty content, `NotFound`
    /// for an unknown recipient, `RateLimited`, or
    /// `ConversationAlreadyExists`.
    pub async fn start_conversation(
        &self,
        initiator: PartyId,
        recipient: PartyId,
        first_message: &str,
    ) -> DmResult<(Conversation, Message)> {
        if initiator == recipient {
            return Err(DmError::InvalidArgument(
                "you cannot start a conversation with yourself".to_string(),
            ));
        }
        let content = validate_content(first_message, self.limits.max_message_chars)?;

        let window = Duration::from_secs(self.limits.start_rate_window_seconds);
        let key = format!("dm:start:{initiator}");
        if !self
            .rate_limiter
            .check_and_increment(&key, window, self.limits.start_rate_max)
        {
            tracing::warn!(party = %initiator, "conversation start rate limit hit");
            return Err(DmError::RateLimited(
                "too many new conversations; try again later".to_string(),
            ));
        }

        if !self.identity.party_exists(recipient).await? {
            return Err(DmError::NotFound("recipient not found".to_string()));
        }

        let now = Utc::now();
        let conversation = NewConversation {
            id: ConversationId::new(),
            initiator,
            recipient,
            created_at: now,
        };
        let message = NewMessage {
            id: MessageId::new(),
            conversation_id: conversation.id,
            sender: initiator,
            content,
            created_at: now,
        };

        let created = self
            .store
            .create_with_first_message(conversation, message)
            .await;
        match &created {
            Ok((conversation, _)) => {
                tracing::info!(conversation = %conversation.id, initiator = %initiator,
                    recipient = %recipient, "conversation started");
            }
            Err(DmError::ConversationAlreadyExists { id, .. }) => {
                tracing::debug!(conversation = %id, initiator = %initiator,
                    "conversation start redirected to existing thread");
            }
            Err(_) => {}
        }
        created
    }

    /// Accept or ignore a pending message request.
    ///
    /// Only the recipient may decide, and only once: the transition out of
    /// `pending` is the single state change a conversation ever makes.
    ///
    /// # Errors
    /// `NotFound`, `Forbidden` for anyone but the recipient, or
    /// `InvalidStateTransition` when the conversation is not `pending`.
    pub async fn respond(
        &self,
        conversation_id: ConversationId,
        acting_party: PartyId,
        decision: Decision,
    ) -> DmResult<Conversation> {
        let conversation = self.require_conversation(conversation_id).await?;
        let role = conversation.role_of(acting_party).ok_or_else(|| {
            DmError::Forbidden("you are not a participant in this conversation".to_string())
        })?;
        if role != ParticipantRole::Recipient {
            return Err(DmError::Forbidden(
                "only the recipient can accept or ignore a message request".to_string(),
            ));
        }
        if conversation.status != ConversationStatus::Pending {
            return Err(DmError::InvalidStateTransition(format!(
                "this conversation is already {}",
                conversation.status
            )));
        }

        let now = Utc::now();
        let status = decision.into_status();
        self.store.set_status(conversation_id, status, now).await?;
        tracing::info!(conversation = %conversation_id, party = %acting_party,
            status = %status, "message request decided");

        let mut conversation = conversation;
        conversation.status = status;
        conversation.updated_at = now;
        Ok(conversation)
    }

    /// Zero the caller's unread count by advancing their read watermark.
    ///
    /// Independent of status; the other side's count is untouched.
    ///
    /// # Errors
    /// `NotFound`, or `Forbidden` for non-participants.
    pub async fn mark_read(
        &self,
        conversation_id: ConversationId,
        acting_party: PartyId,
    ) -> DmResult<Conversation> {
        let conversation = self.require_conversation(conversation_id).await?;
        let role = conversation.role_of(acting_party).ok_or_else(|| {
            DmError::Forbidden("you are not a participant in this conversation".to_string())
        })?;

        self.store
            .mark_read(conversation_id, role, Utc::now())
            .await?;
        self.require_conversation(conversation_id).await
    }

    /// Post a message to an existing thread.
    ///
    /// The permission matrix rejects sends from both sides while `pending`
    /// (the initiator must wait for an explicit decision before following
    /// up) and from both sides forever once `ignored`. On success the
    /// other party's unread count grows by exactly one, by construction:
    /// the message lands above their read watermark.
    ///
    /// # Errors
    /// `NotFound`, `Forbidden` for non-participants, `InvalidArgument` for
    /// empty content, or `InvalidStateTransition` per the matrix.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        sender: PartyId,
        content: &str,
    ) -> DmResult<Message> {
        let content = validate_content(content, self.limits.max_message_chars)?;
        let conversation = self.require_conversation(conversation_id).await?;
        let role = conversation.role_of(sender).ok_or_else(|| {
            DmError::Forbidden("you are not a participant in this conversation".to_string())
        })?;

        if !conversation.status.allows_send() {
            let reason = match (conversation.status, role) {
                (ConversationStatus::Pending, ParticipantRole::Initiator) => {
                    "wait for the recipient to respond to your message request"
                }
                (ConversationStatus::Pending, ParticipantRole::Recipient) => {
                    "accept the message request before replying"
                }
                _ => "this conversation has been ignored",
            };
            return Err(DmError::InvalidStateTransition(reason.to_string()));
        }

        let message = NewMessage {
            id: MessageId::new(),
            conversation_id,
            sender,
            content,
            created_at: Utc::now(),
        };
        let stored = self.store.append_message(message).await?;
        tracing::debug!(conversation = %conversation_id, sender = %sender,
            seq = stored.seq, "message sent");
        Ok(stored)
    }

    /// The caller's inbox: every thread they are part of, most recent
    /// first, each with the other party, the caller's unread count and a
    /// latest-message preview, plus the unread total for badge display.
    ///
    /// # Errors
    /// Storage errors only; an unknown party simply has an empty inbox.
    pub async fn list_conversations(&self, party: PartyId) -> DmResult<Inbox> {
        let conversations = self.store.list_for_party(party).await?;
        let mut views = Vec::with_capacity(conversations.len());
        let mut total_unread_count: u64 = 0;

        for conversation in conversations {
            let role = match conversation.role_of(party) {
                Some(role) => role,
                None => continue,
            };
            let unread_count = self
                .store
                .unread_count(conversation.id, party, conversation.last_read_seq(role))
                .await?;
            let latest_message = self.store.latest_message(conversation.id).await?;
            total_unread_count = total_unread_count.saturating_add(unread_count);
            views.push(ConversationView {
                other_party: conversation.other_party(party),
                unread_count,
                latest_message,
                conversation,
            });
        }

        Ok(Inbox {
            conversations: views,
            total_unread_count,
        })
    }

    /// The full chronological thread of one conversation.
    ///
    /// # Errors
    /// `NotFound` both when the conversation does not exist and when the
    /// caller is not a participant; the two cases are deliberately
    /// indistinguishable so conversation ids cannot be enumerated.
    pub async fn get_thread(
        &self,
        conversation_id: ConversationId,
        acting_party: PartyId,
    ) -> DmResult<Thread> {
        let conversation = self
            .store
            .get(conversation_id)
            .await?
            .filter(|conversation| conversation.is_participant(acting_party))
            .ok_or_else(|| DmError::NotFound("conversation not found".to_string()))?;

        let messages = self.store.messages(conversation_id).await?;
        Ok(Thread {
            conversation,
            messages,
        })
    }

    /// The caller's unread count for one conversation.
    ///
    /// # Errors
    /// Same visibility rule as [`Self::get_thread`].
    pub async fn unread_count(
        &self,
        conversation_id: ConversationId,
        acting_party: PartyId,
    ) -> DmResult<u64> {
        let conversation = self
            .store
            .get(conversation_id)
            .await?
            .filter(|conversation| conversation.is_participant(acting_party))
            .ok_or_else(|| DmError::NotFound("conversation not found".to_string()))?;
        let role = conversation
            .role_of(acting_party)
            .ok_or_else(|| DmError::NotFound("conversation not found".to_string()))?;
        self.store
            .unread_count(conversation_id, acting_party, conversation.last_read_seq(role))
            .await
    }

    async fn require_conversation(&self, id: ConversationId) -> DmResult<Conversation> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| DmError::NotFound("conversation not found".to_string()))
    }
}
