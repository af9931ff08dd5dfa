use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header, StatusCode},
    Error, HttpMessage, HttpResponse, ResponseError,
};
use error_types::{error_codes, error_types as kinds, ErrorResponse};
use futures::future::{ready, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use uuid::Uuid;

/// User ID extracted from JWT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

/// Authentication failures, rendered as 401 with a uniform error body
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid authorization header format")]
    MalformedHeader,

    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),
}

impl AuthError {
    fn code(&self) -> &'static str {
        match self {
            AuthError::MissingToken | AuthError::MalformedHeader => error_codes::TOKEN_MISSING,
            AuthError::Expired => error_codes::TOKEN_EXPIRED,
            AuthError::Invalid(_) => error_codes::TOKEN_INVALID,
        }
    }

    /// Validate a raw token and return the authenticated user id
    pub fn check(token: &str) -> Result<Uuid, AuthError> {
        let data = crypto_core::jwt::validate_token(token).map_err(|e| {
            if crypto_core::jwt::is_expired_error(&e) {
                AuthError::Expired
            } else {
                AuthError::Invalid(e.to_string())
            }
        })?;
        data.claims.user_uuid().map_err(|e| {
            tracing::error!("Invalid user_id UUID in token: {}", e);
            AuthError::Invalid("malformed user_id".into())
        })
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::Unauthorized().json(ErrorResponse::new(
            ErrorResponse::reason_phrase(401),
            &self.to_string(),
            401,
            kinds::AUTHENTICATION_ERROR,
            self.code(),
        ))
    }
}

/// Pull the token out of an `Authorization: Bearer ...` header value
pub fn bearer_token(headers: &header::HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MalformedHeader)
}

/// JWT Authentication Middleware
pub struct JwtAuthMiddleware;

impl<S, B> Transform<S, ServiceRequest> for JwtAuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtAuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct JwtAuthMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        Box::pin(async move {
            let user_id = bearer_token(req.headers()).and_then(AuthError::check).map_err(|e| {
                tracing::warn!(path = %req.path(), error = %e, "JWT validation failed");
                e
            })?;

            req.extensions_mut().insert(UserId(user_id));

            service.call(req).await
        })
    }
}

/// FromRequest implementation for UserId
impl actix_web::FromRequest for UserId {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(
        req: &actix_web::HttpRequest,
        _payload: &mut actix_web::dev::Payload,
    ) -> Self::Future {
        match req.extensions().get::<UserId>() {
            Some(user_id) => ready(Ok(*user_id)),
            None => ready(Err(AuthError::MissingToken.into())),
        }
    }
}
