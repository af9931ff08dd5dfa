//! Body edits and soft deletion
//!
//! Deletion only flips the status flag. Replies that point at a deleted
//! message keep their `replyTo` and resolve to an unavailable preview.

use crate::error::{AppError, AppResult};
use crate::models::Message;
use crate::services::message_store::MessageStore;
use crate::websocket::events::RelayEvent;
use crate::websocket::relay::RelayPublisher;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditRequest {
    pub message: Option<String>,
}

/// Ids implicated in a delete; either may be omitted
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteRequest {
    #[serde(rename = "senderId")]
    pub sender_id: Option<Uuid>,
    #[serde(rename = "receiverId")]
    pub receiver_id: Option<Uuid>,
}

pub struct LifecycleService {
    store: Arc<dyn MessageStore>,
    relay: RelayPublisher,
}

impl LifecycleService {
    pub fn new(store: Arc<dyn MessageStore>, relay: RelayPublisher) -> Self {
        Self { store, relay }
    }

    pub async fn edit_content(&self, id: Uuid, request: EditRequest) -> AppResult<Message> {
        let content = request
            .message
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| AppError::Validation("Message content is required.".into()))?;

        self.store
            .update_content(id, &content)
            .await?
            .ok_or_else(|| AppError::NotFound("Message not found".into()))
    }

    /// Mark the message deleted and queue a `message-deleted` notification
    pub async fn soft_delete(&self, id: Uuid, request: DeleteRequest) -> AppResult<Message> {
        let message = self
            .store
            .soft_delete(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Chat not found".into()))?;

        let sender_id = request.sender_id.unwrap_or(message.sender.user_id);
        let receiver_id = request
            .receiver_id
            .or_else(|| message.receivers.first().map(|r| r.user_id))
            .unwrap_or(sender_id);

        tracing::info!(message_id = %id, %sender_id, %receiver_id, "message soft-deleted");

        self.relay.publish(RelayEvent::MessageDeleted {
            message_id: message.id,
            sender_id,
            receiver_id,
            conversation_type: message.conversation_type,
            reference_id: message.reference_id.clone(),
        });

        Ok(message)
    }
}
