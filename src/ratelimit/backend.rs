//! Window counter trait for abstracting local and shared implementations.

use async_trait::async_trait;

use super::policy::Policy;
use super::window::Decision;
use crate::error::Result;

/// Trait for sliding window counter implementations.
///
/// This trait abstracts over the in-process `LocalCounter` and the
/// store-backed `SharedCounter` so the limiter can work with either. The
/// implementation is chosen once at startup.
#[async_trait]
pub trait WindowCounter: Send + Sync {
    /// Record one request for `identifier` under `policy`.
    ///
    /// Counts live events, admits and records the request if the count is
    /// below quota, and otherwise rejects without recording anything.
    async fn record(&self, identifier: &str, policy: &Policy) -> Result<Decision>;

    /// Short backend name for logs and health output.
    fn kind(&self) -> &'static str;
}
