//! Admission middleware for axum routers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{trace, warn};

use crate::admission::{Caller, Clock, Policies, RequestAdmissionTracker};

use super::headers::{apply_rate_limit_headers, rejection_response};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const UNKNOWN_ADDR: &str = "unknown";

/// A user id resolved by an upstream authentication layer.
///
/// Authentication middleware inserts this into the request extensions; the
/// admission middleware only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Shared state for the admission middleware.
#[derive(Clone)]
pub struct AdmissionState {
    tracker: Arc<RequestAdmissionTracker>,
    policies: Policies,
    clock: Arc<dyn Clock>,
    user_id_header: Option<HeaderName>,
    trust_forwarded_for: bool,
}

impl AdmissionState {
    pub fn new(
        tracker: Arc<RequestAdmissionTracker>,
        policies: Policies,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tracker,
            policies,
            clock,
            user_id_header: None,
            trust_forwarded_for: false,
        }
    }

    /// Treat this header as a user id set by a trusted gateway.
    pub fn with_user_id_header(mut self, header: HeaderName) -> Self {
        self.user_id_header = Some(header);
        self
    }

    /// Take anonymous caller addresses from `X-Forwarded-For`.
    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub fn tracker(&self) -> &Arc<RequestAdmissionTracker> {
        &self.tracker
    }

    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Work out who is calling.
    pub fn resolve_caller(&self, request: &Request) -> Caller {
        if let Some(AuthenticatedUser(user_id)) = request.extensions().get::<AuthenticatedUser>() {
            if !user_id.is_empty() {
                return Caller::authenticated(user_id.clone());
            }
        }

        if let Some(user_id) = self
            .user_id_header
            .as_ref()
            .and_then(|name| header_str(request.headers(), name))
        {
            return Caller::authenticated(user_id);
        }

        if self.trust_forwarded_for {
            if let Some(addr) = header_str(request.headers(), &X_FORWARDED_FOR)
                .and_then(|value| value.split(',').next().map(str::trim).map(str::to_string))
                .filter(|addr| !addr.is_empty())
            {
                return Caller::anonymous(addr);
            }
        }

        let remote = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_ADDR.to_string());
        Caller::anonymous(remote)
    }
}

/// Non-empty, visible-ASCII header value.
fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Admit or reject a request before it reaches the route handler.
///
/// Admitted responses carry the `X-RateLimit-*` headers; rejected requests
/// get a 429 with a JSON body and never reach the handler.
pub async fn enforce_admission(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let caller = state.resolve_caller(&request);
    let key = caller.identity_key();
    let policy = state.policies.for_caller(&caller);
    let now_ms = state.clock.now_ms();

    let result = state.tracker.check_and_consume(&key, policy, now_ms);

    if !result.admitted {
        warn!(
            identity = %key,
            path = %request.uri().path(),
            limit = result.limit,
            reset_at_ms = result.reset_at_ms,
            "Rate limit exceeded"
        );
        return rejection_response(&result, now_ms);
    }

    trace!(identity = %key, remaining = result.remaining, "Request admitted");

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &result);
    response
}
