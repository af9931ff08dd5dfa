//! # Actix Middleware Library
//!
//! Middleware shared by the chat services
//!
//! ## Modules
//! - `jwt_auth`: JWT authentication middleware
//! - `request_id`: `x-request-id` propagation
//! - `logging`: request/response logging via tracing

pub mod jwt_auth;
pub mod logging;
pub mod request_id;

pub use jwt_auth::{bearer_token, AuthError, JwtAuthMiddleware, UserId};
pub use logging::Logging;
pub use request_id::{RequestId, RequestIdValue};
