use crate::models::{ConversationType, LogicalMessage};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

/// Notifications pushed over the relay
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// One per send; broadcast rows arrive collapsed into a single message
    MessageSent {
        message: LogicalMessage,
    },
    MessageDeleted {
        message_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        /// Used to resolve a member audience; not part of the wire payload
        conversation_type: ConversationType,
        reference_id: String,
    },
}

impl RelayEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RelayEvent::MessageSent { .. } => "message-sent",
            RelayEvent::MessageDeleted { .. } => "message-deleted",
        }
    }

    /// `{"type", "timestamp", "payload"}` text frame
    pub fn to_frame(&self) -> String {
        let payload = match self {
            RelayEvent::MessageSent { message } => json!(message),
            RelayEvent::MessageDeleted {
                message_id,
                sender_id,
                receiver_id,
                ..
            } => json!({
                "messageId": message_id,
                "senderId": sender_id,
                "receiverId": receiver_id,
            }),
        };

        json!({
            "type": self.event_type(),
            "timestamp": Utc::now().to_rfc3339(),
            "payload": payload,
        })
        .to_string()
    }
}
