use crate::metrics;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod events;
pub mod relay;

/// Unique identifier for one WebSocket connection
///
/// A user may hold several sessions (tabs, devices); the id lets a closing
/// connection remove exactly its own entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

struct Session {
    id: SessionId,
    sender: UnboundedSender<String>,
}

/// Process-wide table of connected sessions keyed by user id
///
/// Only [`register`](Self::register) and [`unregister`](Self::unregister)
/// mutate it. Sends take the read lock and never prune; a closed channel is
/// cleaned up when its session stops.
#[derive(Default, Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Vec<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user_id: Uuid) -> (SessionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let session_id = SessionId::new();

        let mut guard = self.inner.write().await;
        guard.entry(user_id).or_default().push(Session {
            id: session_id,
            sender: tx,
        });
        let total: usize = guard.values().map(Vec::len).sum();
        metrics::set_connected_sessions(total);

        tracing::debug!(%user_id, ?session_id, total, "session registered");
        (session_id, rx)
    }

    pub async fn unregister(&self, user_id: Uuid, session_id: SessionId) {
        let mut guard = self.inner.write().await;

        if let Some(sessions) = guard.get_mut(&user_id) {
            sessions.retain(|s| s.id != session_id);
            if sessions.is_empty() {
                guard.remove(&user_id);
            }
        }
        let total: usize = guard.values().map(Vec::len).sum();
        metrics::set_connected_sessions(total);

        tracing::debug!(%user_id, ?session_id, total, "session unregistered");
    }

    /// Returns how many sessions accepted the frame
    pub async fn send_to_user(&self, user_id: Uuid, frame: &str) -> usize {
        let guard = self.inner.read().await;
        guard
            .get(&user_id)
            .map(|sessions| Self::deliver(sessions, frame))
            .unwrap_or(0)
    }

    pub async fn send_to_all_except(&self, excluded: Uuid, frame: &str) -> usize {
        let guard = self.inner.read().await;
        guard
            .iter()
            .filter(|(user_id, _)| **user_id != excluded)
            .map(|(_, sessions)| Self::deliver(sessions, frame))
            .sum()
    }

    pub async fn send_to_all(&self, frame: &str) -> usize {
        let guard = self.inner.read().await;
        guard
            .values()
            .map(|sessions| Self::deliver(sessions, frame))
            .sum()
    }

    pub async fn session_count(&self) -> usize {
        let guard = self.inner.read().await;
        guard.values().map(Vec::len).sum()
    }

    fn deliver(sessions: &[Session], frame: &str) -> usize {
        sessions
            .iter()
            .filter(|s| s.sender.send(frame.to_string()).is_ok())
            .count()
    }
}
