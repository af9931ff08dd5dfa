use crate::error::{AppError, AppResult};
use crate::models::{ConversationType, DeliveryState};
use crate::services::message_store::{
    DeliveryFilter, MessageStore, TransitionOutcome, UnreadSummary,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Newest pending rows returned alongside the unread count
pub const UNREAD_LIST_LIMIT: i64 = 50;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkDeliveryRequest {
    #[serde(rename = "senderId")]
    pub sender_id: Option<Uuid>,
    #[serde(rename = "receiverId")]
    pub receiver_ids: Option<Vec<Uuid>>,
    #[serde(rename = "deliverType")]
    pub deliver_type: Option<String>,
    #[serde(rename = "type")]
    pub conversation_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SingleDeliveryRequest {
    #[serde(rename = "messageId")]
    pub message_id: Option<Uuid>,
    #[serde(rename = "deliverType")]
    pub deliver_type: Option<String>,
}

fn parse_state(raw: Option<&str>) -> AppResult<DeliveryState> {
    let raw = raw
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Validation("Missing required fields.".into()))?;
    DeliveryState::from_db(raw)
        .ok_or_else(|| AppError::Validation(format!("Unknown deliverType: {raw}")))
}

impl BulkDeliveryRequest {
    pub fn into_filter(self) -> AppResult<(DeliveryFilter, DeliveryState)> {
        let state = parse_state(self.deliver_type.as_deref())?;
        let receivers = self
            .receiver_ids
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AppError::Validation("Missing required field: receiverId".into()))?;

        let kind = ConversationType::from_query(self.conversation_type.as_deref());
        let sender = || {
            self.sender_id
                .ok_or_else(|| AppError::Validation("Missing required field: senderId".into()))
        };

        let filter = match kind {
            ConversationType::Group => DeliveryFilter::Group { receivers },
            ConversationType::Broadcast => DeliveryFilter::Broadcast {
                sender: sender()?,
                receivers,
            },
            ConversationType::Direct => DeliveryFilter::Direct {
                sender: sender()?,
                receivers,
            },
        };
        Ok((filter, state))
    }
}

pub struct DeliveryService {
    store: Arc<dyn MessageStore>,
}

impl DeliveryService {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Move every matching pending row to the requested state
    pub async fn bulk_transition(
        &self,
        request: BulkDeliveryRequest,
    ) -> AppResult<TransitionOutcome> {
        let (filter, state) = request.into_filter()?;
        let outcome = self.store.transition_delivery(&filter, state).await?;
        if outcome.matched == 0 {
            return Err(AppError::NotFound("No messages matched the query.".into()));
        }
        tracing::info!(
            ?filter,
            deliver_type = %state,
            matched = outcome.matched,
            modified = outcome.modified,
            "bulk delivery transition"
        );
        Ok(outcome)
    }

    /// Idempotent: repeating the same state succeeds without change
    pub async fn single_transition(&self, request: SingleDeliveryRequest) -> AppResult<()> {
        let message_id = request
            .message_id
            .ok_or_else(|| AppError::Validation("Missing required fields.".into()))?;
        let state = parse_state(request.deliver_type.as_deref())?;

        if !self.store.set_delivery_state(message_id, state).await? {
            return Err(AppError::NotFound(format!("Message {message_id} not found")));
        }
        Ok(())
    }

    pub async fn unread_count(&self, user_id: Uuid) -> AppResult<UnreadSummary> {
        self.store.unread_for(user_id, UNREAD_LIST_LIMIT).await
    }
}
