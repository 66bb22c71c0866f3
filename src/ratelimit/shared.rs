//! Shared sliding window counter backed by an external store.
//!
//! This module provides a counter whose state lives outside the process so
//! every instance behind a load balancer enforces one aggregate quota. The
//! store must perform count-and-append as a single atomic operation and
//! expire idle keys on its own; this side never reads then writes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::OnceCell;
use tracing::{debug, info, trace, warn};

use super::backend::WindowCounter;
use super::clock::{Clock, SystemClock};
use super::policy::Policy;
use super::window::Decision;
use crate::error::{GatekeeperError, Result};

/// Default prefix for keys written to the shared store.
pub const DEFAULT_KEY_PREFIX: &str = "gatekeeper:ratelimit:";
/// Default bound on a single store call.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_millis(500);

/// What the store observed while recording one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOutcome {
    /// Whether the event was appended
    pub allowed: bool,
    /// Live events in the window after the operation
    pub count: u64,
    /// Timestamp of the oldest live event, if any
    pub oldest_ms: Option<u64>,
}

/// An external store offering atomic sliding-window append.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// In one atomic step: expire events at or before `now_ms - window_ms`,
    /// count the rest, and append an event at `now_ms` if the count is below
    /// `quota`. The key must expire on its own once the window has passed.
    async fn record_event(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        quota: u64,
    ) -> Result<StoreOutcome>;

    /// Short store name for logs and health output.
    fn kind(&self) -> &'static str;
}

/// Sliding window counter that delegates state to a [`CounterStore`].
pub struct SharedCounter {
    /// The external store
    store: Arc<dyn CounterStore>,
    /// Time source
    clock: Arc<dyn Clock>,
    /// Prepended to every identifier to form the store key
    key_prefix: String,
    /// Upper bound on one store call
    timeout: Duration,
}

impl SharedCounter {
    /// Create a shared counter with the default prefix and timeout.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    /// Use an injected clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Bound each store call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The store key for an identifier.
    pub fn key_for(&self, identifier: &str) -> String {
        format!("{}{}", self.key_prefix, identifier)
    }
}

#[async_trait]
impl WindowCounter for SharedCounter {
    async fn record(&self, identifier: &str, policy: &Policy) -> Result<Decision> {
        let key = self.key_for(identifier);
        let now_ms = self.clock.now_ms();
        let window_ms = policy.window_ms();

        trace!(
            key = %key,
            now_ms = now_ms,
            window_ms = window_ms,
            "Recording request in shared window"
        );

        let outcome = tokio::time::timeout(
            self.timeout,
            self.store.record_event(&key, now_ms, window_ms, policy.quota()),
        )
        .await
        .map_err(|_| {
            warn!(key = %key, timeout = ?self.timeout, "Shared counter store timed out");
            GatekeeperError::BackendTimeout(self.timeout)
        })??;

        if !outcome.allowed {
            debug!(
                key = %key,
                count = outcome.count,
                limit = policy.quota(),
                "Shared rate limit exceeded"
            );
        }

        Ok(Decision::from_window(
            outcome.allowed,
            policy.quota(),
            outcome.count,
            outcome.oldest_ms,
            now_ms,
            window_ms,
        ))
    }

    fn kind(&self) -> &'static str {
        self.store.kind()
    }
}

/// Drops expired members, counts, conditionally adds, and refreshes expiry.
/// Returns `{allowed, count, oldest}` where `oldest` is -1 for an empty set.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local quota = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local allowed = 0

if count < quota then
    redis.call('ZADD', key, now, member)
    redis.call('PEXPIRE', key, window)
    count = count + 1
    allowed = 1
end

local oldest = -1
local head = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if head[2] then
    oldest = tonumber(head[2])
end

return {allowed, count, oldest}
"#;

/// [`CounterStore`] over Redis sorted sets.
///
/// The connection is opened on first use; if that fails the next call tries
/// again rather than failing every request until restart. The connection
/// manager is built with zero connect retries so a down store surfaces as a
/// backend error on the request that found it.
pub struct RedisStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    script: redis::Script,
}

impl RedisStore {
    /// Create a store for `url`. Only validates the URL; no I/O happens here.
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| GatekeeperError::Config(format!("invalid redis url: {}", e)))?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            script: redis::Script::new(SLIDING_WINDOW_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new().set_number_of_retries(0);
                let conn =
                    ConnectionManager::new_with_config(self.client.clone(), config).await?;
                info!("Connected to shared counter store");
                Ok::<_, GatekeeperError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn record_event(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        quota: u64,
    ) -> Result<StoreOutcome> {
        let mut conn = self.connection().await?;

        // Members must be unique or same-millisecond events would collapse.
        let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4());

        let (allowed, count, oldest): (i64, i64, i64) = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(quota)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        Ok(StoreOutcome {
            allowed: allowed == 1,
            count: count.max(0) as u64,
            oldest_ms: u64::try_from(oldest).ok(),
        })
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}
