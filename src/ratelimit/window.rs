//! Sliding window state and decisions.
//!
//! Admission is evaluated against the interval `(now - window, now]`. An event
//! stamped exactly `now - window` has already expired.

use std::collections::VecDeque;

use super::policy::Policy;

/// The outcome of recording one request against a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request was admitted
    pub allowed: bool,
    /// The policy quota
    pub limit: u64,
    /// Slots left in the window after this request
    pub remaining: u64,
    /// Epoch milliseconds at which the oldest counted event expires
    pub reset_at_ms: u64,
}

impl Decision {
    /// Build a decision from the window contents observed after admission
    /// (or after refusing admission).
    ///
    /// `count` is the number of live events including any just admitted and
    /// `oldest` is the oldest of them. An empty window resets one full window
    /// from now.
    pub fn from_window(
        allowed: bool,
        quota: u64,
        count: u64,
        oldest: Option<u64>,
        now_ms: u64,
        window_ms: u64,
    ) -> Self {
        let remaining = if allowed {
            quota.saturating_sub(count)
        } else {
            0
        };

        Self {
            allowed,
            limit: quota,
            remaining,
            reset_at_ms: oldest.unwrap_or(now_ms).saturating_add(window_ms),
        }
    }

    /// Whole seconds until a slot frees up, never negative.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000)
    }
}

/// Whether an event stamped `ts` still counts at `now_ms`.
pub fn is_live(ts: u64, now_ms: u64, window_ms: u64) -> bool {
    ts.saturating_add(window_ms) > now_ms
}

/// The suffix of `events` (sorted ascending) that is still inside the window.
pub fn surviving_events(events: &[u64], now_ms: u64, window_ms: u64) -> &[u64] {
    let expired = events.partition_point(|&ts| !is_live(ts, now_ms, window_ms));
    &events[expired..]
}

/// Event timestamps for one identifier, oldest first.
#[derive(Debug, Default, Clone)]
pub struct WindowState {
    events: VecDeque<u64>,
}

impl WindowState {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop events that have aged out of the window.
    pub fn prune(&mut self, now_ms: u64, window_ms: u64) {
        let live = surviving_events(self.events.make_contiguous(), now_ms, window_ms).len();
        let expired = self.events.len() - live;
        self.events.drain(..expired);
    }

    /// Count-then-append for one request.
    ///
    /// A rejected request leaves the window untouched apart from lazy expiry.
    pub fn record(&mut self, now_ms: u64, policy: &Policy) -> Decision {
        let window_ms = policy.window_ms();
        self.prune(now_ms, window_ms);

        let count = self.events.len() as u64;
        let allowed = count < policy.quota();

        if allowed {
            // Keep the sequence ordered if the wall clock steps backwards.
            let stamp = self.events.back().map_or(now_ms, |&last| last.max(now_ms));
            self.events.push_back(stamp);
        }

        Decision::from_window(
            allowed,
            policy.quota(),
            self.events.len() as u64,
            self.events.front().copied(),
            now_ms,
            window_ms,
        )
    }

    /// Number of retained events (live or not yet pruned).
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events are retained.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(quota: u64, window_ms: u64) -> Policy {
        Policy::new("test", quota, window_ms).unwrap()
    }

    #[test]
    fn test_surviving_events_boundary_is_expired() {
        let events = [1_000, 2_000, 3_000];

        // now - window == 1_000 exactly, so the first event is gone
        assert_eq!(surviving_events(&events, 61_000, 60_000), &[2_000, 3_000]);
        assert_eq!(surviving_events(&events, 60_999, 60_000), &events[..]);
        assert!(surviving_events(&events, 63_000, 60_000).is_empty());
    }

    #[test]
    fn test_surviving_events_near_epoch() {
        let events = [0, 5];
        assert_eq!(surviving_events(&events, 10, 60_000), &events[..]);
    }

    #[test]
    fn test_record_counts_down_remaining() {
        let policy = policy(5, 60_000);
        let mut window = WindowState::new();
        let now = 1_700_000_000_000;

        let remaining: Vec<u64> = (0..5).map(|_| window.record(now, &policy).remaining).collect();
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let denied = window.record(now, &policy);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at_ms, now + 60_000);
        assert_eq!(denied.retry_after_secs(now), 60);
    }

    #[test]
    fn test_rejection_does_not_consume() {
        let policy = policy(2, 1_000);
        let mut window = WindowState::new();

        window.record(0, &policy);
        window.record(10, &policy);
        assert_eq!(window.len(), 2);

        let first = window.record(20, &policy);
        let second = window.record(30, &policy);
        assert!(!first.allowed && !second.allowed);
        assert_eq!(first, second);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_partial_recovery() {
        let policy = policy(3, 1_000);
        let mut window = WindowState::new();

        window.record(0, &policy);
        window.record(400, &policy);
        window.record(800, &policy);
        assert!(!window.record(900, &policy).allowed);

        // Only the event at 0 has aged out
        let decision = window.record(1_000, &policy);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at_ms, 1_400);
        assert!(!window.record(1_001, &policy).allowed);
    }

    #[test]
    fn test_empty_window_resets_one_window_out() {
        let decision = Decision::from_window(true, 10, 0, None, 5_000, 60_000);
        assert_eq!(decision.reset_at_ms, 65_000);
        assert_eq!(decision.remaining, 10);
    }

    #[test]
    fn test_retry_after_rounds_up_and_clamps() {
        let decision = Decision {
            allowed: false,
            limit: 1,
            remaining: 0,
            reset_at_ms: 10_001,
        };
        assert_eq!(decision.retry_after_secs(9_000), 2);
        assert_eq!(decision.retry_after_secs(10_001), 0);
        assert_eq!(decision.retry_after_secs(20_000), 0);
    }

    #[test]
    fn test_backwards_clock_keeps_order() {
        let policy = policy(3, 1_000);
        let mut window = WindowState::new();

        window.record(500, &policy);
        window.record(400, &policy);
        assert_eq!(window.events, VecDeque::from(vec![500, 500]));
    }

    #[test]
    fn test_prune_keeps_what_survives() {
        let mut window = WindowState::new();
        window.events = VecDeque::from(vec![2_000, 3_000, 4_000]);
        window.events.push_front(1_000);

        let expected = surviving_events(&[1_000, 2_000, 3_000, 4_000], 62_000, 60_000).to_vec();
        window.prune(62_000, 60_000);
        assert_eq!(window.events, VecDeque::from(expected));
        assert_eq!(window.events, VecDeque::from(vec![3_000, 4_000]));

        window.prune(64_000, 60_000);
        assert!(window.is_empty());
    }
}
