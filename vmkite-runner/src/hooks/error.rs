//! Hook gateway errors
//!
//! [`ApiError`] is what HTTP handlers return; [`HookError`] covers gateway
//! setup and job registration.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => {
                tracing::debug!("Rejected hook call: {}", msg);
                (StatusCode::UNAUTHORIZED, msg)
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("failed to generate random bytes: {0}")]
    Randomness(#[from] rand::Error),

    #[error("invalid hook secret: {0}")]
    InvalidSecret(#[from] hmac::digest::InvalidLength),

    #[error("job {0} is already registered")]
    AlreadySubscribed(String),

    #[error("failed to bind hook gateway to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no non-loopback local address found")]
    NoLocalAddress,
}
