//! Fan-out engine
//!
//! Expands one outgoing message into persisted rows: a single row carrying the
//! submitted receiver list for direct and group sends, one row per receiver
//! for broadcasts. Broadcast rows share a `batch_id` and `created_at`.

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    ConversationType, DeliveryState, FileAttachment, LifecycleStatus, Message, MessageBody,
    Participant, BROADCAST_CAPACITY, GROUP_CAPACITY,
};
use crate::services::identity::IdentityService;
use crate::services::message_store::MessageStore;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Display name recorded for receivers the identity service does not know
pub const UNKNOWN_NAME: &str = "Unknown";

#[derive(Debug, Deserialize)]
pub struct SendEnvelope {
    #[serde(rename = "newMessage")]
    pub new_message: Option<SendRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SenderInput {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverInput {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub name: Option<String>,
}

/// Outgoing message as submitted by a client; every field is checked by
/// [`SendRequest::validate`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRequest {
    #[serde(rename = "type")]
    pub conversation_type: Option<String>,
    #[serde(rename = "refId")]
    pub reference_id: Option<String>,
    pub sender: Option<SenderInput>,
    pub message: Option<String>,
    pub receiver: Option<Vec<ReceiverInput>>,
    #[serde(rename = "messageType")]
    pub message_type: Option<String>,
    #[serde(rename = "deliverType")]
    pub deliver_type: Option<String>,
    pub imagename: Option<String>,
    #[serde(rename = "isForwarded")]
    pub is_forwarded: Option<bool>,
    pub docname1: Option<String>,
    pub docname2: Option<String>,
    pub docname3: Option<String>,
    pub docicon: Option<String>,
    /// Kept untyped so a non-list value is reported as a validation error
    pub files: Option<serde_json::Value>,
    #[serde(rename = "replyTo")]
    pub reply_to: Option<Uuid>,
}

/// A send request that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedSend {
    pub conversation_type: ConversationType,
    pub reference_id: String,
    pub sender: Participant,
    pub receivers: Vec<ReceiverInput>,
    pub body: MessageBody,
    pub delivery_state: DeliveryState,
    pub is_forwarded: bool,
    pub reply_to: Option<Uuid>,
}

fn required<T>(value: Option<T>, field: &str) -> AppResult<T> {
    value.ok_or_else(|| AppError::Validation(format!("Missing required field: {field}")))
}

fn required_text(value: Option<String>, field: &str) -> AppResult<String> {
    required(value.filter(|v| !v.trim().is_empty()), field)
}

impl SendRequest {
    pub fn validate(self) -> AppResult<ValidatedSend> {
        let raw_type = required_text(self.conversation_type, "type")?;
        let conversation_type = ConversationType::from_db(&raw_type)
            .ok_or_else(|| AppError::Validation(format!("Unknown conversation type: {raw_type}")))?;
        let reference_id = required_text(self.reference_id, "refId")?;

        let sender = required(self.sender, "sender")?;
        let sender = Participant {
            user_id: sender.user_id,
            name: required_text(sender.name, "sender.name")?,
        };

        let content = required_text(self.message, "message")?;
        let receivers = required(self.receiver.filter(|r| !r.is_empty()), "receiver")?;
        let message_type = required_text(self.message_type, "messageType")?;

        let raw_state = required_text(self.deliver_type, "deliverType")?;
        let delivery_state = DeliveryState::from_db(&raw_state)
            .ok_or_else(|| AppError::Validation(format!("Unknown deliverType: {raw_state}")))?;

        let files = match self.files {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(value @ serde_json::Value::Array(_)) => {
                serde_json::from_value::<Vec<FileAttachment>>(value).map_err(|e| {
                    AppError::Validation(format!("files entries must be {{filename, size}}: {e}"))
                })?
            }
            Some(_) => return Err(AppError::Validation("files must be a list".into())),
        };

        Ok(ValidatedSend {
            conversation_type,
            reference_id,
            sender,
            receivers,
            body: MessageBody {
                message_type,
                content,
                image_name: self.imagename,
                doc_name1: self.docname1,
                doc_name2: self.docname2,
                doc_name3: self.docname3,
                doc_icon: self.docicon,
                files,
            },
            delivery_state,
            is_forwarded: self.is_forwarded.unwrap_or(false),
            reply_to: self.reply_to,
        })
    }
}

/// Rows persisted by one send
#[derive(Debug, Clone, Serialize)]
pub struct FanoutResult {
    pub messages: Vec<Message>,
    /// Broadcast receivers whose row could not be written
    #[serde(rename = "failedReceivers")]
    pub failed_receivers: Vec<Uuid>,
}

/// Store timestamps have microsecond resolution; truncate so every row of a
/// batch reads back with the same `created_at` it was built with
fn store_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

pub struct FanoutEngine {
    store: Arc<dyn MessageStore>,
    identity: Arc<dyn IdentityService>,
    transactional: bool,
}

impl FanoutEngine {
    pub fn new(
        store: Arc<dyn MessageStore>,
        identity: Arc<dyn IdentityService>,
        transactional: bool,
    ) -> Self {
        Self {
            store,
            identity,
            transactional,
        }
    }

    pub async fn send(&self, request: SendRequest) -> AppResult<FanoutResult> {
        let send = request.validate()?;
        match send.conversation_type {
            ConversationType::Broadcast => self.send_broadcast(send).await,
            ConversationType::Direct | ConversationType::Group => self.send_single(send).await,
        }
    }

    fn build_row(
        send: &ValidatedSend,
        batch_id: Uuid,
        fanout_index: i32,
        receivers: Vec<Participant>,
        now: DateTime<Utc>,
    ) -> Message {
        Message {
            id: Uuid::new_v4(),
            batch_id,
            fanout_index,
            conversation_type: send.conversation_type,
            reference_id: send.reference_id.clone(),
            sender: send.sender.clone(),
            receivers,
            body: send.body.clone(),
            delivery_state: send.delivery_state,
            status: LifecycleStatus::Active,
            is_forwarded: send.is_forwarded,
            reply_to: send.reply_to,
            created_at: now,
            updated_at: now,
        }
    }

    async fn send_single(&self, send: ValidatedSend) -> AppResult<FanoutResult> {
        if send.conversation_type == ConversationType::Group && send.receivers.len() > GROUP_CAPACITY
        {
            return Err(AppError::Validation(format!(
                "a group holds at most {GROUP_CAPACITY} members"
            )));
        }

        let receivers = send
            .receivers
            .iter()
            .map(|r| {
                Ok(Participant {
                    user_id: r.user_id,
                    name: required_text(r.name.clone(), "receiver.name")?,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        let row = Self::build_row(&send, Uuid::new_v4(), 0, receivers, store_now());
        self.store.insert(&row).await?;

        metrics::record_persisted(send.conversation_type.to_db(), 1);
        tracing::debug!(
            message_id = %row.id,
            conversation_type = %send.conversation_type,
            receivers = row.receivers.len(),
            "message persisted"
        );

        Ok(FanoutResult {
            messages: vec![row],
            failed_receivers: Vec::new(),
        })
    }

    async fn send_broadcast(&self, send: ValidatedSend) -> AppResult<FanoutResult> {
        let mut seen = HashSet::new();
        let receiver_ids: Vec<Uuid> = send
            .receivers
            .iter()
            .map(|r| r.user_id)
            .filter(|id| seen.insert(*id))
            .collect();

        if receiver_ids.len() > BROADCAST_CAPACITY {
            return Err(AppError::Validation(format!(
                "a broadcast reaches at most {BROADCAST_CAPACITY} receivers"
            )));
        }

        let names: HashMap<Uuid, String> = self
            .identity
            .find_by_ids(&receiver_ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u.name))
            .collect();

        let batch_id = Uuid::new_v4();
        let now = store_now();
        let rows: Vec<Message> = receiver_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let receiver = Participant {
                    user_id: *id,
                    name: names
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
                };
                Self::build_row(&send, batch_id, i as i32, vec![receiver], now)
            })
            .collect();

        if self.transactional {
            self.store.insert_all(&rows).await?;
            metrics::record_persisted(ConversationType::Broadcast.to_db(), rows.len());
            tracing::info!(%batch_id, rows = rows.len(), "broadcast persisted");
            return Ok(FanoutResult {
                messages: rows,
                failed_receivers: Vec::new(),
            });
        }

        let results = join_all(rows.iter().map(|row| self.store.insert(row))).await;

        let mut persisted = Vec::with_capacity(rows.len());
        let mut failed_receivers = Vec::new();
        let mut first_error = None;
        for (row, result) in rows.into_iter().zip(results) {
            match result {
                Ok(()) => persisted.push(row),
                Err(e) => {
                    tracing::warn!(
                        %batch_id,
                        receiver_id = %row.receivers[0].user_id,
                        error = %e,
                        "broadcast row write failed"
                    );
                    failed_receivers.push(row.receivers[0].user_id);
                    first_error.get_or_insert(e);
                }
            }
        }

        metrics::record_persisted(ConversationType::Broadcast.to_db(), persisted.len());
        metrics::record_fanout_failures(failed_receivers.len());

        if persisted.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        tracing::info!(
            %batch_id,
            rows = persisted.len(),
            failed = failed_receivers.len(),
            "broadcast persisted"
        );

        Ok(FanoutResult {
            messages: persisted,
            failed_receivers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileSize;
    use serde_json::json;

    fn request(value: serde_json::Value) -> SendRequest {
        serde_json::from_value(value).unwrap()
    }

    fn base() -> serde_json::Value {
        json!({
            "type": "direct",
            "refId": "thread-1",
            "sender": {"userId": Uuid::new_v4(), "name": "Ann"},
            "message": "hi",
            "receiver": [{"userId": Uuid::new_v4(), "name": "Bo"}],
            "messageType": "text",
            "deliverType": "sent"
        })
    }

    #[test]
    fn test_valid_request() {
        let send = request(base()).validate().unwrap();
        assert_eq!(send.conversation_type, ConversationType::Direct);
        assert_eq!(send.body.content, "hi");
        assert!(send.body.files.is_empty());
        assert!(!send.is_forwarded);
    }

    #[test]
    fn test_each_required_field() {
        for field in ["type", "refId", "sender", "message", "receiver", "messageType", "deliverType"] {
            let mut value = base();
            value.as_object_mut().unwrap().remove(field);
            let err = request(value).validate().unwrap_err();
            assert!(
                matches!(&err, AppError::Validation(msg) if msg.contains(field)),
                "{field}: {err}"
            );
        }
    }

    #[test]
    fn test_empty_receiver_list_is_missing() {
        let mut value = base();
        value["receiver"] = json!([]);
        assert!(matches!(request(value).validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_files_must_be_a_list() {
        let mut value = base();
        value["files"] = json!({"filename": "a.pdf", "size": 1});
        let err = request(value).validate().unwrap_err();
        assert!(err.to_string().contains("files must be a list"));

        let mut value = base();
        value["files"] = json!([{"filename": "a.pdf", "size": 12}]);
        let send = request(value).validate().unwrap();
        assert_eq!(send.body.files.len(), 1);
    }

    #[test]
    fn test_file_size_keeps_client_label() {
        let mut value = base();
        value["files"] = json!([
            {"filename": "a.pdf", "size": "12 KB"},
            {"filename": "b.png", "size": 2048}
        ]);
        let send = request(value).validate().unwrap();
        assert_eq!(send.body.files[0].size, FileSize::Label("12 KB".into()));
        assert_eq!(send.body.files[1].size, FileSize::Bytes(2048));

        let stored = serde_json::to_value(&send.body.files).unwrap();
        assert_eq!(stored[0]["size"], "12 KB");
        assert_eq!(stored[1]["size"], 2048);
    }

    #[test]
    fn test_unknown_enums_are_rejected() {
        let mut value = base();
        value["type"] = json!("channel");
        assert!(request(value).validate().is_err());

        let mut value = base();
        value["deliverType"] = json!("read");
        assert!(request(value).validate().is_err());

        let mut value = base();
        value["type"] = json!("personal");
        let send = request(value).validate().unwrap();
        assert_eq!(send.conversation_type, ConversationType::Direct);
    }

    #[test]
    fn test_store_now_has_microsecond_precision() {
        let now = store_now();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000, 0);
    }
}
