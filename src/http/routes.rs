//! HTTP routes served by Gatekeeper.

use axum::extract::{Request, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use super::headers::{apply_rate_limit_headers, format_reset_time};
use super::middleware::{enforce_admission, AdmissionState};

/// Quota report for the calling identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub identity: String,
    pub limit: u32,
    pub remaining: u32,
    pub reset_time: String,
}

/// Wrap `router` so every route in it goes through admission.
pub fn protect(router: Router, state: AdmissionState) -> Router {
    router.layer(axum::middleware::from_fn_with_state(state, enforce_admission))
}

/// Build the full service router.
///
/// `/health` and `/api/usage` are never rate limited; everything under
/// `/api/status` is.
pub fn router(state: AdmissionState) -> Router {
    let protected = protect(
        Router::new()
            .route("/api/status", get(status_handler))
            .with_state(state.clone()),
        state.clone(),
    );

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/usage", get(usage_handler))
        .with_state(state)
        .merge(protected)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Report the caller's quota without consuming any of it.
async fn usage_handler(State(state): State<AdmissionState>, request: Request) -> impl IntoResponse {
    let caller = state.resolve_caller(&request);
    let key = caller.identity_key();
    let policy = state.policies().for_caller(&caller);
    let result = state.tracker().peek(&key, policy, state.clock().now_ms());

    let report = UsageReport {
        identity: key.to_string(),
        limit: result.limit,
        remaining: result.remaining,
        reset_time: format_reset_time(result.reset_at_ms),
    };

    let mut response = Json(report).into_response();
    apply_rate_limit_headers(response.headers_mut(), &result);
    response
}

async fn status_handler(State(state): State<AdmissionState>, request: Request) -> impl IntoResponse {
    let key = state.resolve_caller(&request).identity_key();
    Json(serde_json::json!({
        "status": "ok",
        "identity": key.to_string(),
    }))
}
