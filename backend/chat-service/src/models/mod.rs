pub mod membership;
pub mod message;

pub use membership::{Member, MemberRole, BROADCAST_CAPACITY, GROUP_CAPACITY};
pub use message::{
    ConversationType, DeliveryState, FileAttachment, FileSize, LifecycleStatus, LogicalMessage,
    Message, MessageBody, Participant, ReplyPreview,
};
