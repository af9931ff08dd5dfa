use crate::{
    config::Config,
    services::{
        delivery::DeliveryService, fanout::FanoutEngine, history::HistoryService,
        identity::IdentityService, lifecycle::LifecycleService, membership::MembershipService,
        message_store::MessageStore,
    },
    websocket::{relay::RelayPublisher, SessionRegistry},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn MessageStore>,
    pub identity: Arc<dyn IdentityService>,
    pub membership: Arc<dyn MembershipService>,
    pub sessions: SessionRegistry,
    pub relay: RelayPublisher,
    pub fanout: Arc<FanoutEngine>,
    pub history: Arc<HistoryService>,
    pub delivery: Arc<DeliveryService>,
    pub lifecycle: Arc<LifecycleService>,
}

impl AppState {
    /// Wire the engine services over the given collaborators
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn MessageStore>,
        identity: Arc<dyn IdentityService>,
        membership: Arc<dyn MembershipService>,
        sessions: SessionRegistry,
        relay: RelayPublisher,
    ) -> Self {
        let fanout = Arc::new(FanoutEngine::new(
            store.clone(),
            identity.clone(),
            config.fanout_transactional,
        ));
        let history = Arc::new(HistoryService::new(store.clone(), config.history_max_limit));
        let delivery = Arc::new(DeliveryService::new(store.clone()));
        let lifecycle = Arc::new(LifecycleService::new(store.clone(), relay.clone()));

        Self {
            config,
            store,
            identity,
            membership,
            sessions,
            relay,
            fanout,
            history,
            delivery,
            lifecycle,
        }
    }
}
