//! Hook Gateway HTTP handlers

use axum::{
    Json,
    extract::{FromRequestParts, Path, State},
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;
use vmkite_core::domain::hook::HookEvent;

use super::GatewayState;
use super::error::{ApiError, ApiResult};

/// Job ID resolved from the request's bearer token
#[derive(Debug, Clone)]
pub struct AuthenticatedJob(pub String);

impl FromRequestParts<Arc<GatewayState>> for AuthenticatedJob {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

        let token = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Malformed Authorization header".to_string()))?;

        state
            .tokens
            .resolve(token)
            .map(AuthenticatedJob)
            .ok_or_else(|| ApiError::Unauthorized("Unknown token".to_string()))
    }
}

/// GET /
pub async fn health() -> Json<&'static str> {
    Json("OK")
}

/// POST /notify/hook/{hook}
/// Delivers a guest lifecycle hook to the job's waiter and the hook handler
pub async fn notify_hook(
    State(state): State<Arc<GatewayState>>,
    AuthenticatedJob(job_id): AuthenticatedJob,
    Path(hook): Path<String>,
) -> ApiResult<Json<&'static str>> {
    tracing::info!("Job {} reported hook {}", job_id, hook);

    state.publish(HookEvent::now(&job_id, &hook));

    state
        .handler
        .handle_hook(&hook, &job_id)
        .await
        .map_err(|e| ApiError::InternalError(format!("Hook {} failed: {:#}", hook, e)))?;

    Ok(Json("OK"))
}

/// Any method but POST on the hook route
pub async fn bad_method() -> ApiError {
    ApiError::BadRequest("Only POST is allowed".to_string())
}
