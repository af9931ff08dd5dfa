use crate::error::AppError;
use actix_web::{error, http::StatusCode, web, HttpRequest, HttpResponse};
use error_types::{error_codes, error_types as kinds, ErrorResponse};

/// Map domain errors to HTTP responses
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::Validation(_) => (kinds::VALIDATION_ERROR, error_codes::INVALID_REQUEST),
        AppError::Unauthorized => (kinds::AUTHENTICATION_ERROR, error_codes::TOKEN_INVALID),
        AppError::NotFound(_) => (kinds::NOT_FOUND_ERROR, error_codes::MESSAGE_NOT_FOUND),
        AppError::Transient(_) => (
            kinds::SERVICE_UNAVAILABLE_ERROR,
            error_codes::SERVICE_UNAVAILABLE,
        ),
        AppError::Database(_) => (kinds::SERVER_ERROR, error_codes::DATABASE_ERROR),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal(_) => {
            (kinds::SERVER_ERROR, error_codes::INTERNAL_SERVER_ERROR)
        }
    };

    // Server-side details stay in the logs
    let message = match err {
        AppError::Database(_) | AppError::Internal(_) | AppError::Config(_) | AppError::StartServer(_) => {
            tracing::error!(error = %err, "request failed");
            "internal server error".to_string()
        }
        AppError::Transient(_) => {
            tracing::warn!(error = %err, "request failed with transient error");
            err.to_string()
        }
        _ => err.to_string(),
    };

    let response = ErrorResponse::new(
        ErrorResponse::reason_phrase(status.as_u16()),
        &message,
        status.as_u16(),
        error_type,
        code,
    );

    (status, response)
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, response) = map_error(err);
    HttpResponse::build(status).json(response)
}

/// Malformed JSON bodies surface as validation errors with the uniform body
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err: error::JsonPayloadError, _req: &HttpRequest| {
        AppError::Validation(format!("invalid request body: {err}")).into()
    })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err: error::QueryPayloadError, _req: &HttpRequest| {
        AppError::Validation(format!("invalid query string: {err}")).into()
    })
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err: error::PathError, _req: &HttpRequest| {
        AppError::Validation(format!("invalid path parameter: {err}")).into()
    })
}
