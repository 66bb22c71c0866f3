//! HTTP gate: rate limit middleware and response shaping.

mod middleware;
mod response;

pub use middleware::{enforce, GateOutcome, RateLimitGate};
pub use response::{
    apply_rate_limit_headers, rejection_response, RejectionBody, POLICY_FAMILY,
    RATE_LIMIT_EXCEEDED, X_RATELIMIT_LIMIT, X_RATELIMIT_POLICY, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
