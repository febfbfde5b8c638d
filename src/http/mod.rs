//! HTTP surface: admission middleware, quota headers, routes and server.

mod headers;
mod middleware;
mod routes;
mod server;

pub use headers::{
    apply_rate_limit_headers, format_reset_time, rejection_response, RateLimitExceeded,
    X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use middleware::{enforce_admission, AdmissionState, AuthenticatedUser};
pub use routes::{protect, router, UsageReport};
pub use server::HttpServer;
