//! Request gate: per-request admit or reject around a downstream handler.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, error, instrument, warn};

use super::response::{apply_rate_limit_headers, rejection_response};
use crate::error::Result;
use crate::identity::{compose_identifier, resolve_client_address};
use crate::ratelimit::{Decision, RateLimiter};

/// Terminal state of one request passing through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Run the handler. `None` means the limiter failed and the request is
    /// let through without quota headers.
    Admitted(Option<Decision>),
    /// Short-circuit with a 429.
    Rejected(Decision),
}

/// Binds a limiter to one policy for use as axum middleware.
///
/// ```rust,ignore
/// let gate = RateLimitGate::new(limiter, "auth")?;
/// let app = Router::new()
///     .route("/login", post(login))
///     .route_layer(axum::middleware::from_fn_with_state(gate, enforce));
/// ```
#[derive(Clone)]
pub struct RateLimitGate {
    limiter: Arc<RateLimiter>,
    policy: Arc<str>,
}

impl RateLimitGate {
    /// Create a gate for `policy`. Unknown policy names fail here, at wiring
    /// time, instead of on the first request.
    pub fn new(limiter: Arc<RateLimiter>, policy: &str) -> Result<Self> {
        limiter.policy(policy)?;
        Ok(Self {
            limiter,
            policy: Arc::from(policy),
        })
    }

    /// The policy this gate enforces.
    pub fn policy(&self) -> &str {
        &self.policy
    }

    /// The limiter behind this gate.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Decide the fate of a request from its headers.
    ///
    /// Limiter failures fail open: the request is admitted and the failure is
    /// logged. There is no retry.
    #[instrument(skip(self, headers), fields(policy = %self.policy))]
    pub async fn evaluate(&self, headers: &HeaderMap) -> GateOutcome {
        let client = resolve_client_address(headers);
        let identifier = compose_identifier(&client, &self.policy);

        match self.limiter.check(&identifier, &self.policy).await {
            Ok(decision) if decision.allowed => {
                debug!(
                    client = %client,
                    remaining = decision.remaining,
                    "Request admitted"
                );
                GateOutcome::Admitted(Some(decision))
            }
            Ok(decision) => {
                warn!(
                    client = %client,
                    policy = %self.policy,
                    "Rate limit exceeded"
                );
                GateOutcome::Rejected(decision)
            }
            Err(e) if e.is_backend() => {
                error!(
                    error = %e,
                    backend = self.limiter.backend_kind(),
                    "Rate limiter backend failed, admitting request"
                );
                GateOutcome::Admitted(None)
            }
            Err(e) => {
                error!(error = %e, "Rate limiter misconfigured, admitting request");
                GateOutcome::Admitted(None)
            }
        }
    }
}

/// Axum middleware enforcing a [`RateLimitGate`].
pub async fn enforce(State(gate): State<RateLimitGate>, request: Request, next: Next) -> Response {
    let outcome = gate.evaluate(request.headers()).await;
    match outcome {
        GateOutcome::Rejected(decision) => rejection_response(&decision, gate.limiter().now_ms()),
        GateOutcome::Admitted(decision) => {
            let mut response = next.run(request).await;
            if let Some(decision) = decision {
                apply_rate_limit_headers(response.headers_mut(), &decision);
            }
            response
        }
    }
}
