use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Conversation kind a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    /// One-to-one chat; older clients call it "personal"
    #[serde(alias = "personal")]
    Direct,
    Group,
    Broadcast,
}

impl ConversationType {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "direct" | "personal" => Some(Self::Direct),
            "group" => Some(Self::Group),
            "broadcast" => Some(Self::Broadcast),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Broadcast => "broadcast",
        }
    }

    /// Query-string form: absent or unrecognised values select direct
    pub fn from_query(s: Option<&str>) -> Self {
        s.and_then(Self::from_db).unwrap_or(Self::Direct)
    }
}

impl fmt::Display for ConversationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db())
    }
}

/// Transit status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Sent,
    Unread,
    Delivered,
}

impl DeliveryState {
    /// States a bulk transition is allowed to move out of
    pub const PENDING: [DeliveryState; 2] = [DeliveryState::Sent, DeliveryState::Unread];

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "unread" => Some(Self::Unread),
            "delivered" => Some(Self::Delivered),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Unread => "unread",
            Self::Delivered => "delivered",
        }
    }

    pub fn is_pending(&self) -> bool {
        Self::PENDING.contains(self)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db())
    }
}

/// Soft-delete flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    #[default]
    Active,
    Deleted,
}

impl LifecycleStatus {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }
}

/// `{userId, name}` snapshot taken at send time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub name: String,
}

/// Attachment size as the client sent it: a byte count or a label like `"12 KB"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileSize {
    Bytes(i64),
    Label(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub filename: String,
    pub size: FileSize,
}

/// Message content and attachment metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(rename = "messageType")]
    pub message_type: String,
    #[serde(rename = "message")]
    pub content: String,
    #[serde(rename = "imagename", default)]
    pub image_name: Option<String>,
    #[serde(rename = "docname1", default)]
    pub doc_name1: Option<String>,
    #[serde(rename = "docname2", default)]
    pub doc_name2: Option<String>,
    #[serde(rename = "docname3", default)]
    pub doc_name3: Option<String>,
    #[serde(rename = "docicon", default)]
    pub doc_icon: Option<String>,
    #[serde(default)]
    pub files: Vec<FileAttachment>,
}

/// Persisted message row
///
/// Broadcast sends materialize one row per receiver; those rows share
/// `batch_id`, `sender`, `body` and `created_at`, and differ in `receivers`
/// (exactly one entry) and `fanout_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "batchId")]
    pub batch_id: Uuid,
    /// Receiver position within the send; orders rows of one batch
    #[serde(skip)]
    pub fanout_index: i32,
    #[serde(rename = "type")]
    pub conversation_type: ConversationType,
    #[serde(rename = "refId")]
    pub reference_id: String,
    pub sender: Participant,
    #[serde(rename = "receiver")]
    pub receivers: Vec<Participant>,
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(rename = "deliverType")]
    pub delivery_state: DeliveryState,
    pub status: LifecycleStatus,
    #[serde(rename = "isForwarded")]
    pub is_forwarded: bool,
    #[serde(rename = "replyTo")]
    pub reply_to: Option<Uuid>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.status == LifecycleStatus::Deleted
    }

    pub fn has_receiver(&self, user_id: Uuid) -> bool {
        self.receivers.iter().any(|r| r.user_id == user_id)
    }

    pub fn receiver_ids(&self) -> Vec<Uuid> {
        self.receivers.iter().map(|r| r.user_id).collect()
    }
}

/// Availability of the message a reply points at
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyPreview {
    pub id: Uuid,
    /// false when the referent was never stored or has been soft-deleted
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Participant>,
}

impl ReplyPreview {
    pub fn unavailable(id: Uuid) -> Self {
        Self {
            id,
            available: false,
            message: None,
            sender: None,
        }
    }

    pub fn of(referent: &Message) -> Self {
        if referent.is_deleted() {
            return Self::unavailable(referent.id);
        }
        Self {
            id: referent.id,
            available: true,
            message: Some(referent.body.content.clone()),
            sender: Some(referent.sender.clone()),
        }
    }
}

/// User-facing conversation turn, rebuilt from one or more rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogicalMessage {
    /// Id of the first row seen for this batch
    pub id: Uuid,
    #[serde(rename = "originalIds")]
    pub original_ids: Vec<Uuid>,
    #[serde(rename = "batchId")]
    pub batch_id: Uuid,
    #[serde(rename = "type")]
    pub conversation_type: ConversationType,
    #[serde(rename = "refId")]
    pub reference_id: String,
    pub sender: Participant,
    #[serde(rename = "receiver")]
    pub receivers: Vec<Participant>,
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(rename = "deliverType")]
    pub delivery_state: DeliveryState,
    #[serde(rename = "isForwarded")]
    pub is_forwarded: bool,
    #[serde(rename = "replyTo")]
    pub reply_to: Option<Uuid>,
    #[serde(rename = "replyPreview", skip_serializing_if = "Option::is_none")]
    pub reply_preview: Option<ReplyPreview>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<Message> for LogicalMessage {
    fn from(row: Message) -> Self {
        Self {
            id: row.id,
            original_ids: vec![row.id],
            batch_id: row.batch_id,
            conversation_type: row.conversation_type,
            reference_id: row.reference_id,
            sender: row.sender,
            receivers: row.receivers,
            body: row.body,
            delivery_state: row.delivery_state,
            is_forwarded: row.is_forwarded,
            reply_to: row.reply_to,
            reply_preview: None,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_type_accepts_personal_alias() {
        assert_eq!(ConversationType::from_db("personal"), Some(ConversationType::Direct));
        let parsed: ConversationType = serde_json::from_str("\"personal\"").unwrap();
        assert_eq!(parsed, ConversationType::Direct);
        assert_eq!(ConversationType::Direct.to_db(), "direct");
    }

    #[test]
    fn test_conversation_type_query_defaults_to_direct() {
        assert_eq!(ConversationType::from_query(None), ConversationType::Direct);
        assert_eq!(ConversationType::from_query(Some("weird")), ConversationType::Direct);
        assert_eq!(ConversationType::from_query(Some("group")), ConversationType::Group);
    }

    #[test]
    fn test_delivery_state_pending() {
        assert!(DeliveryState::Sent.is_pending());
        assert!(DeliveryState::Unread.is_pending());
        assert!(!DeliveryState::Delivered.is_pending());
        assert_eq!(DeliveryState::from_db("read"), None);
    }

    #[test]
    fn test_message_wire_shape() {
        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            fanout_index: 3,
            conversation_type: ConversationType::Group,
            reference_id: "group-1".into(),
            sender: Participant {
                user_id: Uuid::new_v4(),
                name: "Ann".into(),
            },
            receivers: vec![],
            body: MessageBody {
                message_type: "text".into(),
                content: "hi".into(),
                image_name: None,
                doc_name1: Some("a.pdf".into()),
                doc_name2: None,
                doc_name3: None,
                doc_icon: None,
                files: vec![FileAttachment {
                    filename: "a.pdf".into(),
                    size: FileSize::Bytes(10),
                }],
            },
            delivery_state: DeliveryState::Sent,
            status: LifecycleStatus::Active,
            is_forwarded: false,
            reply_to: None,
            created_at: now,
            updated_at: now,
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "group");
        assert_eq!(value["refId"], "group-1");
        assert_eq!(value["message"], "hi");
        assert_eq!(value["deliverType"], "sent");
        assert_eq!(value["docname1"], "a.pdf");
        assert_eq!(value["files"][0]["size"], 10);
        assert_eq!(value["status"], "active");
        assert!(value["receiver"].is_array());
        assert!(value.get("fanout_index").is_none());
    }

    #[test]
    fn test_reply_preview_of_deleted_referent() {
        let now = Utc::now();
        let referent = Message {
            id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            fanout_index: 0,
            conversation_type: ConversationType::Direct,
            reference_id: "r".into(),
            sender: Participant {
                user_id: Uuid::new_v4(),
                name: "Bo".into(),
            },
            receivers: vec![],
            body: MessageBody {
                message_type: "text".into(),
                content: "original".into(),
                image_name: None,
                doc_name1: None,
                doc_name2: None,
                doc_name3: None,
                doc_icon: None,
                files: vec![],
            },
            delivery_state: DeliveryState::Delivered,
            status: LifecycleStatus::Deleted,
            is_forwarded: false,
            reply_to: None,
            created_at: now,
            updated_at: now,
        };

        let preview = ReplyPreview::of(&referent);
        assert!(!preview.available);
        assert!(preview.message.is_none());
    }
}
