//! Core rate limiter implementation.

use std::sync::Arc;
use tracing::{debug, trace};

use super::backend::WindowCounter;
use super::clock::{Clock, SystemClock};
use super::local::LocalCounter;
use super::policy::{Policy, PolicyRegistry};
use super::window::Decision;
use crate::error::Result;

/// The rate limiter: a policy registry plus the configured window counter.
///
/// This struct holds no mutable state of its own and can be shared across
/// tasks behind an `Arc`.
pub struct RateLimiter {
    /// Policies by name
    registry: Arc<PolicyRegistry>,
    /// The counter backend selected at startup
    counter: Arc<dyn WindowCounter>,
    /// Time source shared with the counter
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter over the preset policies with an in-process counter.
    pub fn new() -> Self {
        Self::with_local_counter(Arc::new(PolicyRegistry::with_presets()))
    }

    /// Create a limiter with an in-process counter.
    pub fn with_local_counter(registry: Arc<PolicyRegistry>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let counter = Arc::new(LocalCounter::with_clock(clock.clone()));
        Self::with_counter(registry, counter, clock)
    }

    /// Create a limiter with an explicit counter backend and clock.
    pub fn with_counter(
        registry: Arc<PolicyRegistry>,
        counter: Arc<dyn WindowCounter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            counter,
            clock,
        }
    }

    /// Check and record one request for `identifier` under `policy_name`.
    ///
    /// Fails with a configuration error if the policy is unknown and with a
    /// backend error if the counter could not complete the operation.
    pub async fn check(&self, identifier: &str, policy_name: &str) -> Result<Decision> {
        let policy = self.registry.get(policy_name)?;

        trace!(
            identifier = %identifier,
            policy = %policy_name,
            "Checking rate limit"
        );

        let decision = self.counter.record(identifier, policy).await?;

        if !decision.allowed {
            debug!(
                identifier = %identifier,
                policy = %policy_name,
                reset_at_ms = decision.reset_at_ms,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Look up a policy, for validating wiring.
    pub fn policy(&self, name: &str) -> Result<&Policy> {
        self.registry.get(name)
    }

    /// The policy registry.
    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Current time according to the limiter's clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Name of the active counter backend.
    pub fn backend_kind(&self) -> &'static str {
        self.counter.kind()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatekeeperError;
    use crate::ratelimit::clock::ManualClock;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const START: u64 = 1_700_000_000_000;

    fn limiter() -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(START));
        let counter = Arc::new(LocalCounter::with_clock(clock.clone()));
        let limiter = RateLimiter::with_counter(
            Arc::new(PolicyRegistry::with_presets()),
            counter,
            clock.clone(),
        );
        (clock, limiter)
    }

    #[tokio::test]
    async fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.backend_kind(), "memory");
        assert_eq!(limiter.registry().len(), 7);
    }

    #[tokio::test]
    async fn test_every_preset_admits_exactly_quota() {
        let (_clock, limiter) = limiter();
        let policies: Vec<(String, u64)> = limiter
            .registry()
            .iter()
            .map(|p| (p.name().to_string(), p.quota()))
            .collect();

        for (name, quota) in policies {
            let identifier = format!("10.0.0.1:{}", name);
            for _ in 0..quota {
                assert!(limiter.check(&identifier, &name).await.unwrap().allowed);
            }
            let denied = limiter.check(&identifier, &name).await.unwrap();
            assert!(!denied.allowed, "{} admitted more than {}", name, quota);
            assert_eq!(denied.limit, quota);
        }
    }

    #[tokio::test]
    async fn test_unknown_policy() {
        let (_clock, limiter) = limiter();
        let err = assert_err!(limiter.check("1.1.1.1:nope", "nope").await);
        assert!(matches!(err, GatekeeperError::Config(_)));
    }

    #[tokio::test]
    async fn test_distinct_policies_do_not_share_quota() {
        let (_clock, limiter) = limiter();

        for _ in 0..60 {
            assert_ok!(limiter.check("1.2.3.4:api", "api").await);
        }
        assert!(!limiter.check("1.2.3.4:api", "api").await.unwrap().allowed);

        let ai = limiter.check("1.2.3.4:ai", "ai").await.unwrap();
        assert!(ai.allowed);
        assert_eq!(ai.remaining, 9);
    }

    #[tokio::test]
    async fn test_recovers_after_window() {
        let (clock, limiter) = limiter();

        for _ in 0..5 {
            limiter.check("2.2.2.2:auth", "auth").await.unwrap();
        }
        assert!(!limiter.check("2.2.2.2:auth", "auth").await.unwrap().allowed);

        clock.advance(Duration::from_millis(60_001));
        assert!(limiter.check("2.2.2.2:auth", "auth").await.unwrap().allowed);
    }
}
