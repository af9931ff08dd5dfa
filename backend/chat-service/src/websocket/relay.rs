//! Outbound relay queue
//!
//! Request handlers publish into a bounded channel and return immediately; a
//! single dispatcher task resolves each event's audience and writes frames to
//! the session registry. A full queue drops the event.

use crate::metrics;
use crate::models::ConversationType;
use crate::services::membership::MembershipService;
use crate::websocket::events::RelayEvent;
use crate::websocket::SessionRegistry;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Who hears about a deleted message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Every connected session
    Global,
    /// Sender and receiver sessions
    #[default]
    Participants,
    /// Group or broadcast members plus the sender
    Members,
}

impl FromStr for DeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "participants" => Ok(Self::Participants),
            "members" => Ok(Self::Members),
            other => Err(format!(
                "RELAY_DELETE_POLICY must be global, participants or members, got {other}"
            )),
        }
    }
}

/// Handle used by request handlers to enqueue relay events
#[derive(Clone)]
pub struct RelayPublisher {
    tx: mpsc::Sender<RelayEvent>,
}

impl RelayPublisher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RelayEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting. Returns `false` when the event was dropped.
    pub fn publish(&self, event: RelayEvent) -> bool {
        let event_type = event.event_type();
        match self.tx.try_send(event) {
            Ok(()) => {
                metrics::record_relay_event(event_type, "queued");
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(event = event_type, "relay queue full, dropping event");
                metrics::record_relay_event(event_type, "dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(event = event_type, "relay dispatcher stopped, dropping event");
                metrics::record_relay_event(event_type, "dropped");
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    All,
    AllExcept(Uuid),
    Users(Vec<Uuid>),
}

pub struct RelayDispatcher {
    sessions: SessionRegistry,
    membership: Arc<dyn MembershipService>,
    delete_policy: DeletePolicy,
}

impl RelayDispatcher {
    pub fn new(
        sessions: SessionRegistry,
        membership: Arc<dyn MembershipService>,
        delete_policy: DeletePolicy,
    ) -> Self {
        Self {
            sessions,
            membership,
            delete_policy,
        }
    }

    pub async fn audience(&self, event: &RelayEvent) -> Audience {
        match event {
            RelayEvent::MessageSent { message } => Audience::AllExcept(message.sender.user_id),
            RelayEvent::MessageDeleted {
                sender_id,
                receiver_id,
                conversation_type,
                reference_id,
                ..
            } => {
                let participants = || {
                    let mut users = vec![*sender_id];
                    if receiver_id != sender_id {
                        users.push(*receiver_id);
                    }
                    Audience::Users(users)
                };

                match (self.delete_policy, conversation_type) {
                    (DeletePolicy::Global, _) => Audience::All,
                    (DeletePolicy::Participants, _)
                    | (DeletePolicy::Members, ConversationType::Direct) => participants(),
                    (DeletePolicy::Members, kind) => {
                        match self.membership.recipients(*kind, reference_id).await {
                            Ok(mut users) => {
                                if !users.contains(sender_id) {
                                    users.push(*sender_id);
                                }
                                Audience::Users(users)
                            }
                            Err(e) => {
                                tracing::warn!(
                                    conversation_type = %kind,
                                    reference_id = %reference_id,
                                    error = %e,
                                    "member lookup failed, notifying participants"
                                );
                                participants()
                            }
                        }
                    }
                }
            }
        }
    }

    pub async fn dispatch(&self, event: RelayEvent) -> usize {
        let frame = event.to_frame();
        let delivered = match self.audience(&event).await {
            Audience::All => self.sessions.send_to_all(&frame).await,
            Audience::AllExcept(user_id) => {
                self.sessions.send_to_all_except(user_id, &frame).await
            }
            Audience::Users(users) => {
                let mut delivered = 0;
                for user_id in users {
                    delivered += self.sessions.send_to_user(user_id, &frame).await;
                }
                delivered
            }
        };

        metrics::record_relay_event(event.event_type(), "dispatched");
        tracing::debug!(event = event.event_type(), delivered, "relay event dispatched");
        delivered
    }

    /// Drain the queue until every publisher is dropped
    pub async fn run(self, mut rx: mpsc::Receiver<RelayEvent>) {
        while let Some(event) = rx.recv().await {
            self.dispatch(event).await;
        }
        tracing::info!("relay dispatcher stopped");
    }

    pub fn spawn(self, rx: mpsc::Receiver<RelayEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }
}
