use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpServer};
use chat_service::{
    config, db, error,
    error::AppError,
    logging,
    middleware::error_handling,
    routes,
    services::{
        identity::PgIdentityService, membership::PgMembershipService, pg_store::PgMessageStore,
    },
    state::AppState,
    websocket::{
        relay::{RelayDispatcher, RelayPublisher},
        SessionRegistry,
    },
};
use crypto_core::jwt as core_jwt;
use std::sync::Arc;

fn build_cors(origins: &[String]) -> Cors {
    let cors = if origins.is_empty() {
        Cors::default().allow_any_origin()
    } else {
        origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };

    cors.allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
        .allowed_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    core_jwt::initialize_jwt_secret(&cfg.jwt_secret, cfg.jwt_expires_in_secs)
        .map_err(|e| AppError::StartServer(format!("Failed to initialize JWT keys: {e}")))?;

    let pool = db::init_pool(&cfg.database_url)
        .await
        .map_err(|e| AppError::StartServer(format!("db: {e}")))?;

    let store = Arc::new(PgMessageStore::new(pool.clone(), cfg.store_timeout));
    let identity = Arc::new(PgIdentityService::new(pool.clone(), cfg.store_timeout));
    let membership = Arc::new(PgMembershipService::new(pool.clone(), cfg.store_timeout));

    let sessions = SessionRegistry::new();
    let (relay, relay_rx) = RelayPublisher::channel(cfg.relay_queue_capacity);
    let _dispatcher = RelayDispatcher::new(
        sessions.clone(),
        membership.clone(),
        cfg.relay_delete_policy,
    )
    .spawn(relay_rx);

    let state = AppState::new(cfg.clone(), store, identity, membership, sessions, relay);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(
        %bind_addr,
        delete_policy = ?cfg.relay_delete_policy,
        fanout_transactional = cfg.fanout_transactional,
        "starting chat-service"
    );

    let origins = cfg.cors_allowed_origins.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&origins))
            .wrap(actix_middleware::Logging)
            .wrap(actix_middleware::RequestId::new())
            .app_data(web::Data::new(state.clone()))
            .app_data(error_handling::json_config())
            .app_data(error_handling::query_config())
            .app_data(error_handling::path_config())
            .configure(routes::configure_routes)
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(format!("server: {e}")))?;

    pool.close().await;
    Ok(())
}
