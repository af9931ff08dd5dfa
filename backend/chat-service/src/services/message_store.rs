//! Delivery-state store abstraction
//!
//! The engine talks to persistence only through [`MessageStore`]; the
//! PostgreSQL implementation lives in [`crate::services::pg_store`].

use crate::error::AppResult;
use crate::models::{ConversationType, DeliveryState, Message};
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

/// Which rows make up a conversation's history. Soft-deleted rows never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryFilter {
    /// Rows between two users, in either direction
    Direct { user1: Uuid, user2: Uuid },
    /// Group rows whose receiver list contains `receiver`
    Group { receiver: Uuid },
    /// Broadcast rows sent by or addressed to `participant`
    Broadcast { participant: Uuid },
}

impl HistoryFilter {
    pub fn new(kind: ConversationType, user1: Uuid, user2: Uuid) -> Self {
        match kind {
            ConversationType::Direct => Self::Direct { user1, user2 },
            ConversationType::Group => Self::Group { receiver: user2 },
            ConversationType::Broadcast => Self::Broadcast { participant: user1 },
        }
    }

    pub fn matches(&self, m: &Message) -> bool {
        if m.is_deleted() {
            return false;
        }
        match *self {
            Self::Direct { user1, user2 } => {
                m.conversation_type == ConversationType::Direct
                    && ((m.sender.user_id == user1 && m.has_receiver(user2))
                        || (m.sender.user_id == user2 && m.has_receiver(user1)))
            }
            Self::Group { receiver } => {
                m.conversation_type == ConversationType::Group && m.has_receiver(receiver)
            }
            Self::Broadcast { participant } => {
                m.conversation_type == ConversationType::Broadcast
                    && (m.sender.user_id == participant || m.has_receiver(participant))
            }
        }
    }
}

/// Offset pagination over logical messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: i64,
    pub limit: i64,
}

/// Rows eligible for a bulk delivery transition.
///
/// Every variant is further restricted to pending, non-deleted rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryFilter {
    /// Rows from `sender` addressed to any of `receivers`, regardless of type
    Direct { sender: Uuid, receivers: Vec<Uuid> },
    Group { receivers: Vec<Uuid> },
    Broadcast { sender: Uuid, receivers: Vec<Uuid> },
}

impl DeliveryFilter {
    pub fn matches(&self, m: &Message) -> bool {
        if m.is_deleted() || !m.delivery_state.is_pending() {
            return false;
        }
        let addressed = |receivers: &[Uuid]| receivers.iter().any(|r| m.has_receiver(*r));
        match self {
            Self::Direct { sender, receivers } => {
                m.sender.user_id == *sender && addressed(receivers)
            }
            Self::Group { receivers } => {
                m.conversation_type == ConversationType::Group && addressed(receivers)
            }
            Self::Broadcast { sender, receivers } => {
                m.conversation_type == ConversationType::Broadcast
                    && m.sender.user_id == *sender
                    && addressed(receivers)
            }
        }
    }
}

/// Result of a bulk transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    /// Pending rows selected by the filter
    #[serde(rename = "matchedCount")]
    pub matched: u64,
    /// Rows whose state actually changed
    #[serde(rename = "modifiedCount")]
    pub modified: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnreadSummary {
    pub count: i64,
    pub messages: Vec<Message>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: &Message) -> AppResult<()>;

    /// Persist every row or none of them
    async fn insert_all(&self, messages: &[Message]) -> AppResult<()>;

    /// Lookup by id; deleted rows are returned too
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Message>>;

    async fn find_many(&self, ids: &[Uuid]) -> AppResult<Vec<Message>>;

    /// Replace the body of an active row. `None` when absent or deleted.
    async fn update_content(&self, id: Uuid, content: &str) -> AppResult<Option<Message>>;

    /// Rows of the logical messages on `page`, newest batch first and
    /// `fanout_index` order within a batch
    async fn history_page(&self, filter: &HistoryFilter, page: Page) -> AppResult<Vec<Message>>;

    async fn transition_delivery(
        &self,
        filter: &DeliveryFilter,
        state: DeliveryState,
    ) -> AppResult<TransitionOutcome>;

    /// Set the state of one row unconditionally; `false` when the id is unknown
    async fn set_delivery_state(&self, id: Uuid, state: DeliveryState) -> AppResult<bool>;

    /// Pending, non-deleted rows addressed to `user_id`
    async fn unread_for(&self, user_id: Uuid, limit: i64) -> AppResult<UnreadSummary>;

    /// Mark a row deleted and return it; `None` when the id is unknown
    async fn soft_delete(&self, id: Uuid) -> AppResult<Option<Message>>;
}
