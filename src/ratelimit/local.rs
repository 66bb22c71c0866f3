//! In-process sliding window counter.
//!
//! Correct only within a single process. Each running instance keeps its own
//! windows, so behind a load balancer the effective quota becomes
//! `quota * instance_count`. Use the shared counter for multi-instance
//! deployments.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::backend::WindowCounter;
use super::clock::{Clock, SystemClock};
use super::policy::Policy;
use super::window::{Decision, WindowState};
use crate::error::Result;

/// Sliding window counter holding per-identifier state in memory.
///
/// Each identifier has its own lock, so concurrent requests for the same
/// identifier serialize while unrelated identifiers proceed in parallel.
pub struct LocalCounter {
    /// Window state indexed by identifier
    windows: DashMap<String, Arc<Mutex<WindowState>>>,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl LocalCounter {
    /// Create a counter using the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a counter with an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    fn window_for(&self, identifier: &str) -> Arc<Mutex<WindowState>> {
        if let Some(existing) = self.windows.get(identifier) {
            return Arc::clone(existing.value());
        }

        let entry = self
            .windows
            .entry(identifier.to_string())
            .or_insert_with(|| {
                debug!(identifier = %identifier, "Creating new window");
                Arc::new(Mutex::new(WindowState::new()))
            });
        Arc::clone(entry.value())
    }

    /// Number of retained events for an identifier.
    ///
    /// Returns `None` if the identifier has never been seen.
    pub fn retained_events(&self, identifier: &str) -> Option<usize> {
        self.windows
            .get(identifier)
            .map(|window| window.value().lock().len())
    }

    /// Number of identifiers with state.
    pub fn identifier_count(&self) -> usize {
        self.windows.len()
    }

    /// Clear all windows.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.windows.clear();
    }
}

impl Default for LocalCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowCounter for LocalCounter {
    async fn record(&self, identifier: &str, policy: &Policy) -> Result<Decision> {
        let window = self.window_for(identifier);

        // Read "now" under the lock so stamps stay ordered per identifier.
        let decision = {
            let mut state = window.lock();
            let now_ms = self.clock.now_ms();
            state.record(now_ms, policy)
        };

        trace!(
            identifier = %identifier,
            policy = %policy.name(),
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Recorded request in local window"
        );

        Ok(decision)
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
