pub mod messages;
pub mod wsroute;

use crate::metrics::metrics_handler;
use actix_middleware::JwtAuthMiddleware;
use actix_web::web;

/// Register every route; shared by `main` and the integration tests
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(|| async { "OK" }))
        .route("/metrics", web::get().to(metrics_handler))
        .service(wsroute::ws_handler)
        .service(
            web::scope("/api/chats")
                .wrap(JwtAuthMiddleware)
                .service(messages::send_message)
                .service(messages::update_message)
                .service(messages::get_messages)
                .service(messages::update_deliver_type)
                .service(messages::deliver_type_update)
                .service(messages::unread_count)
                .service(messages::delete_message),
        );
}
