//! Rate limit response headers and the rejection response.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::ratelimit::Decision;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_RATELIMIT_POLICY: HeaderName = HeaderName::from_static("x-ratelimit-policy");

/// Algorithm family advertised in `X-RateLimit-Policy`.
pub const POLICY_FAMILY: &str = "sliding-window";

/// `error` field of every rejection body.
pub const RATE_LIMIT_EXCEEDED: &str = "Rate limit exceeded";

/// JSON body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub error: String,
    pub message: String,
    /// Seconds until a slot frees up
    pub retry_after: u64,
    /// ISO-8601 instant matching `X-RateLimit-Reset`
    pub reset_time: String,
}

impl RejectionBody {
    pub fn new(decision: &Decision, now_ms: u64) -> Self {
        let retry_after = decision.retry_after_secs(now_ms);
        Self {
            error: RATE_LIMIT_EXCEEDED.to_string(),
            message: format!(
                "Too many requests. Limit: {} requests. Try again in {} seconds.",
                decision.limit, retry_after
            ),
            retry_after,
            reset_time: iso_timestamp(decision.reset_at_ms),
        }
    }
}

/// Decorate an admitted response with quota headers.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at_ms));
    headers.insert(X_RATELIMIT_POLICY, HeaderValue::from_static(POLICY_FAMILY));
}

/// The 429 response for a rejected request.
pub fn rejection_response(decision: &Decision, now_ms: u64) -> Response {
    let body = RejectionBody::new(decision, now_ms);

    let mut headers = HeaderMap::new();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from_static("0"));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at_ms));
    headers.insert(X_RATELIMIT_POLICY, HeaderValue::from_static(POLICY_FAMILY));
    headers.insert(header::RETRY_AFTER, HeaderValue::from(body.retry_after));

    (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
}

fn iso_timestamp(epoch_ms: u64) -> String {
    let instant = i64::try_from(epoch_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default();
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}
