//! Rendering admission results as HTTP headers and 429 bodies.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::admission::AdmissionResult;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const REJECTION_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// Format epoch milliseconds as an ISO-8601 UTC timestamp, e.g.
/// `2024-05-01T12:00:00.000Z`.
pub fn format_reset_time(epoch_ms: u64) -> String {
    i64::try_from(epoch_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Set the `X-RateLimit-*` headers for `result`.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, result: &AdmissionResult) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    // RFC 3339 output is always a valid header value
    if let Ok(reset) = HeaderValue::from_str(&format_reset_time(result.reset_at_ms)) {
        headers.insert(X_RATELIMIT_RESET, reset);
    }
}

/// JSON body sent with a 429.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitExceeded {
    pub message: String,
    pub limit: u32,
    pub reset_time: String,
    /// Seconds until the window resets
    pub retry_after: u64,
}

impl RateLimitExceeded {
    pub fn new(result: &AdmissionResult, now_ms: u64) -> Self {
        Self {
            message: REJECTION_MESSAGE.to_string(),
            limit: result.limit,
            reset_time: format_reset_time(result.reset_at_ms),
            retry_after: result.retry_after_secs(now_ms),
        }
    }
}

/// Build the full 429 response for a rejected request.
pub fn rejection_response(result: &AdmissionResult, now_ms: u64) -> Response {
    let body = RateLimitExceeded::new(result, now_ms);
    let retry_after = body.retry_after;

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_rate_limit_headers(headers, result);
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(reset_at_ms: u64) -> AdmissionResult {
        AdmissionResult {
            admitted: false,
            limit: 10,
            remaining: 0,
            reset_at_ms,
        }
    }

    #[test]
    fn test_format_reset_time() {
        assert_eq!(format_reset_time(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(format_reset_time(1_000), "1970-01-01T00:00:01.000Z");
        assert_eq!(
            format_reset_time(1_714_564_800_123),
            "2024-05-01T12:00:00.123Z"
        );
    }

    #[test]
    fn test_apply_headers() {
        let result = AdmissionResult {
            admitted: true,
            limit: 50,
            remaining: 49,
            reset_at_ms: 1_000,
        };
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(&mut headers, &result);

        assert_eq!(headers[&X_RATELIMIT_LIMIT], "50");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "49");
        assert_eq!(headers[&X_RATELIMIT_RESET], "1970-01-01T00:00:01.000Z");
    }

    #[test]
    fn test_rejection_body() {
        let body = RateLimitExceeded::new(&rejected(10_000), 2_500);

        assert_eq!(body.limit, 10);
        assert_eq!(body.retry_after, 8);
        assert_eq!(body.reset_time, "1970-01-01T00:00:10.000Z");

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["retryAfter"], 8);
        assert_eq!(json["resetTime"], "1970-01-01T00:00:10.000Z");
        assert_eq!(json["limit"], 10);
        assert!(json["message"].is_string());
    }

    #[test]
    fn test_retry_after_never_negative() {
        let body = RateLimitExceeded::new(&rejected(1_000), 5_000);
        assert_eq!(body.retry_after, 0);
    }

    #[test]
    fn test_rejection_response() {
        let response = rejection_response(&rejected(60_000), 0);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
        assert_eq!(response.headers()[&X_RATELIMIT_REMAINING], "0");
        assert_eq!(response.headers()[&X_RATELIMIT_LIMIT], "10");
    }
}
