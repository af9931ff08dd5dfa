#![allow(dead_code)]

use async_trait::async_trait;
use chat_service::config::Config;
use chat_service::error::{AppError, AppResult};
use chat_service::middleware::error_handling;
use chat_service::models::{
    ConversationType, DeliveryState, LifecycleStatus, Member, Message, MessageBody, Participant,
};
use chat_service::routes::configure_routes;
use chat_service::services::identity::{IdentityService, UserIdentity};
use chat_service::services::membership::MembershipService;
use chat_service::services::message_store::{
    DeliveryFilter, HistoryFilter, MessageStore, Page, TransitionOutcome, UnreadSummary,
};
use chat_service::state::AppState;
use chat_service::websocket::events::RelayEvent;
use chat_service::websocket::relay::{DeletePolicy, RelayDispatcher, RelayPublisher};
use chat_service::websocket::SessionRegistry;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

pub const TEST_SECRET: &str = "chat-service-test-secret-32-chars!!";

pub fn init_jwt() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        crypto_core::jwt::initialize_jwt_secret(TEST_SECRET, 3600).unwrap();
    });
}

pub fn bearer(user_id: Uuid) -> (actix_web::http::header::HeaderName, String) {
    init_jwt();
    let token = crypto_core::jwt::generate_token(user_id, "user@example.com", "Test User").unwrap();
    (
        actix_web::http::header::AUTHORIZATION,
        format!("Bearer {token}"),
    )
}

/// Vec-backed store with the same filtering and paging rules as PostgreSQL
#[derive(Default)]
pub struct InMemoryStore {
    rows: Mutex<Vec<Message>>,
    failing_receivers: Mutex<HashSet<Uuid>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts addressed to `receiver` fail with a transient error
    pub async fn fail_for(&self, receiver: Uuid) {
        self.failing_receivers.lock().await.insert(receiver);
    }

    pub async fn all(&self) -> Vec<Message> {
        self.rows.lock().await.clone()
    }

    pub async fn seed(&self, message: Message) {
        self.rows.lock().await.push(message);
    }

    async fn check_failure(&self, message: &Message) -> AppResult<()> {
        let failing = self.failing_receivers.lock().await;
        if message.receivers.iter().any(|r| failing.contains(&r.user_id)) {
            return Err(AppError::Transient("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn insert(&self, message: &Message) -> AppResult<()> {
        self.check_failure(message).await?;
        self.rows.lock().await.push(message.clone());
        Ok(())
    }

    async fn insert_all(&self, messages: &[Message]) -> AppResult<()> {
        for m in messages {
            self.check_failure(m).await?;
        }
        self.rows.lock().await.extend(messages.iter().cloned());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.rows.lock().await.iter().find(|m| m.id == id).cloned())
    }

    async fn find_many(&self, ids: &[Uuid]) -> AppResult<Vec<Message>> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .filter(|m| ids.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn update_content(&self, id: Uuid, content: &str) -> AppResult<Option<Message>> {
        let mut rows = self.rows.lock().await;
        Ok(rows
            .iter_mut()
            .find(|m| m.id == id && !m.is_deleted())
            .map(|m| {
                m.body.content = content.to_string();
                m.updated_at = Utc::now();
                m.clone()
            }))
    }

    async fn history_page(&self, filter: &HistoryFilter, page: Page) -> AppResult<Vec<Message>> {
        let rows = self.rows.lock().await;
        let matching: Vec<&Message> = rows.iter().filter(|m| filter.matches(m)).collect();

        let mut batches: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
        for m in &matching {
            let entry = batches.entry(m.batch_id).or_insert(m.created_at);
            if m.created_at > *entry {
                *entry = m.created_at;
            }
        }
        let mut order: Vec<(Uuid, DateTime<Utc>)> = batches.into_iter().collect();
        order.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));

        let mut out = Vec::new();
        for (batch_id, _) in order
            .into_iter()
            .skip(page.skip as usize)
            .take(page.limit as usize)
        {
            let mut batch: Vec<Message> = matching
                .iter()
                .filter(|m| m.batch_id == batch_id)
                .map(|m| (*m).clone())
                .collect();
            batch.sort_by_key(|m| m.fanout_index);
            out.extend(batch);
        }
        Ok(out)
    }

    async fn transition_delivery(
        &self,
        filter: &DeliveryFilter,
        state: DeliveryState,
    ) -> AppResult<TransitionOutcome> {
        let mut rows = self.rows.lock().await;
        let mut outcome = TransitionOutcome {
            matched: 0,
            modified: 0,
        };
        for m in rows.iter_mut().filter(|m| filter.matches(m)) {
            outcome.matched += 1;
            if m.delivery_state != state {
                m.delivery_state = state;
                m.updated_at = Utc::now();
                outcome.modified += 1;
            }
        }
        Ok(outcome)
    }

    async fn set_delivery_state(&self, id: Uuid, state: DeliveryState) -> AppResult<bool> {
        let mut rows = self.rows.lock().await;
        match rows.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                m.delivery_state = state;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn unread_for(&self, user_id: Uuid, limit: i64) -> AppResult<UnreadSummary> {
        let rows = self.rows.lock().await;
        let mut pending: Vec<Message> = rows
            .iter()
            .filter(|m| {
                !m.is_deleted() && m.delivery_state.is_pending() && m.has_receiver(user_id)
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let count = pending.len() as i64;
        pending.truncate(limit as usize);
        Ok(UnreadSummary {
            count,
            messages: pending,
        })
    }

    async fn soft_delete(&self, id: Uuid) -> AppResult<Option<Message>> {
        let mut rows = self.rows.lock().await;
        Ok(rows.iter_mut().find(|m| m.id == id).map(|m| {
            m.status = LifecycleStatus::Deleted;
            m.updated_at = Utc::now();
            m.clone()
        }))
    }
}

#[derive(Default)]
pub struct InMemoryIdentity {
    users: HashMap<Uuid, String>,
}

impl InMemoryIdentity {
    pub fn with_users(users: &[(Uuid, &str)]) -> Self {
        Self {
            users: users.iter().map(|(id, n)| (*id, n.to_string())).collect(),
        }
    }
}

#[async_trait]
impl IdentityService for InMemoryIdentity {
    async fn find_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<UserIdentity>> {
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.users.get(id).map(|name| UserIdentity {
                    id: *id,
                    name: name.clone(),
                })
            })
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryMembership {
    groups: HashMap<String, Vec<Uuid>>,
}

impl InMemoryMembership {
    pub fn with_group(reference_id: &str, members: &[Uuid]) -> Self {
        let mut groups = HashMap::new();
        groups.insert(reference_id.to_string(), members.to_vec());
        Self { groups }
    }
}

#[async_trait]
impl MembershipService for InMemoryMembership {
    async fn members(&self, kind: ConversationType, reference_id: &str) -> AppResult<Vec<Member>> {
        if kind == ConversationType::Direct {
            return Err(AppError::Validation("direct conversations have no membership".into()));
        }
        self.groups
            .get(reference_id)
            .map(|ids| {
                ids.iter()
                    .map(|id| Member {
                        user_id: *id,
                        role: None,
                    })
                    .collect()
            })
            .ok_or_else(|| AppError::NotFound(format!("{kind} {reference_id} not found")))
    }
}

/// A stored direct row, for seeding the store without going through a send
pub fn direct_row(
    sender: Uuid,
    receiver: Uuid,
    content: &str,
    state: DeliveryState,
    created_at: DateTime<Utc>,
) -> Message {
    Message {
        id: Uuid::new_v4(),
        batch_id: Uuid::new_v4(),
        fanout_index: 0,
        conversation_type: ConversationType::Direct,
        reference_id: format!("{sender}-{receiver}"),
        sender: Participant {
            user_id: sender,
            name: "Sender".into(),
        },
        receivers: vec![Participant {
            user_id: receiver,
            name: "Receiver".into(),
        }],
        body: MessageBody {
            message_type: "text".into(),
            content: content.to_string(),
            image_name: None,
            doc_name1: None,
            doc_name2: None,
            doc_name3: None,
            doc_icon: None,
            files: vec![],
        },
        delivery_state: state,
        status: LifecycleStatus::Active,
        is_forwarded: false,
        reply_to: None,
        created_at,
        updated_at: created_at,
    }
}

pub fn test_config() -> Config {
    Config::with_defaults("postgres://unused", TEST_SECRET)
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub relay_rx: mpsc::Receiver<RelayEvent>,
}

impl Harness {
    pub fn new(config: Config, store: InMemoryStore, identity: InMemoryIdentity) -> Self {
        Self::with_membership(config, store, identity, InMemoryMembership::default())
    }

    pub fn with_membership(
        config: Config,
        store: InMemoryStore,
        identity: InMemoryIdentity,
        membership: InMemoryMembership,
    ) -> Self {
        init_jwt();
        let store = Arc::new(store);
        let (relay, relay_rx) = RelayPublisher::channel(config.relay_queue_capacity);
        let state = AppState::new(
            Arc::new(config),
            store.clone(),
            Arc::new(identity),
            Arc::new(membership),
            SessionRegistry::new(),
            relay,
        );
        Self {
            state,
            store,
            relay_rx,
        }
    }

    /// App configuration matching `main`, minus CORS and server middleware
    pub fn configure(&self) -> impl FnOnce(&mut actix_web::web::ServiceConfig) {
        let state = self.state.clone();
        move |cfg| {
            cfg.app_data(actix_web::web::Data::new(state))
                .app_data(error_handling::json_config())
                .app_data(error_handling::query_config())
                .app_data(error_handling::path_config());
            configure_routes(cfg);
        }
    }

    /// Hand the relay queue to a real dispatcher
    pub fn spawn_dispatcher(&mut self, policy: DeletePolicy) -> tokio::task::JoinHandle<()> {
        let (_, placeholder) = mpsc::channel(1);
        let rx = std::mem::replace(&mut self.relay_rx, placeholder);
        RelayDispatcher::new(
            self.state.sessions.clone(),
            self.state.membership.clone(),
            policy,
        )
        .spawn(rx)
    }

    pub fn drain_events(&mut self) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.relay_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Status of a request whether it was answered by a handler or rejected by middleware
#[macro_export]
macro_rules! status_of {
    ($app:expr, $req:expr) => {
        match actix_web::test::try_call_service($app, $req).await {
            Ok(resp) => resp.status(),
            Err(err) => err.as_response_error().status_code(),
        }
    };
}
