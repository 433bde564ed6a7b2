//! # Error Handling
//!
//! Request-level error types and their conversion to HTTP responses.
//!
//! Every error response carries the flat body `{"error": "<message>"}` —
//! the single client consuming this service keys on that exact shape, so the
//! usual nested error envelope is deliberately not used here.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors a request handler can surface to the client.
///
/// - **BadRequest**: the client sent an unusable request (missing audio
///   field, empty body) — 400, never retried.
/// - **Internal**: a fatal failure inside the pipeline — 500, message
///   surfaced verbatim.
///
/// Corrupted audio chunks are NOT an error at this layer; the engine reports
/// them as a successful empty-text outcome so a live session keeps flowing.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (actix_web::http::StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (actix_web::http::StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        HttpResponse::build(status).json(json!({ "error": message }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_mapping() {
        let resp = AppError::BadRequest("No audio file provided".to_string()).error_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = AppError::Internal("model exploded".to_string()).error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_display_includes_message() {
        let err = AppError::BadRequest("No audio data provided".to_string());
        assert!(err.to_string().contains("No audio data provided"));
    }
}
