//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{
    Clock, LocalCounter, PolicyRegistry, PolicySpec, PolicyTable, RateLimiter, RedisStore,
    SharedCounter, SystemClock, WindowCounter, DEFAULT_KEY_PREFIX,
};

/// Prefix for environment overrides, e.g. `GATEKEEPER__SERVER__HTTP_ADDR`.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Shared counter store URL. When unset the in-process counter is used.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix for keys in the shared store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Upper bound on one shared store call, in milliseconds
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,

    /// YAML policy table merged over the built-in presets
    #[serde(default)]
    pub policies_file: Option<String>,

    /// Overrides and additions to the built-in policy presets. These win over
    /// entries from `policies_file`.
    #[serde(default)]
    pub policies: HashMap<String, PolicySpec>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
            backend_timeout_ms: default_backend_timeout_ms(),
            policies_file: None,
            policies: HashMap::new(),
        }
    }
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_backend_timeout_ms() -> u64 {
    500
}

impl RateLimitingConfig {
    /// Validate the policy table into a registry.
    pub fn build_registry(&self) -> Result<PolicyRegistry> {
        let mut specs = match &self.policies_file {
            Some(path) => PolicyTable::from_file(path)?.policies,
            None => HashMap::new(),
        };
        specs.extend(
            self.policies
                .iter()
                .map(|(name, spec)| (name.clone(), spec.clone())),
        );
        PolicyRegistry::from_specs(&specs)
    }

    /// Select the counter backend. Done once at startup.
    pub fn build_counter(&self, clock: Arc<dyn Clock>) -> Result<Arc<dyn WindowCounter>> {
        if self.backend_timeout_ms == 0 {
            return Err(GatekeeperError::Config(
                "backend_timeout_ms must be at least 1".into(),
            ));
        }

        match self.redis_url.as_deref().filter(|url| !url.trim().is_empty()) {
            Some(url) => {
                let store = RedisStore::open(url)?;
                info!(key_prefix = %self.key_prefix, "Using shared counter store");
                Ok(Arc::new(
                    SharedCounter::new(Arc::new(store))
                        .with_clock(clock)
                        .with_key_prefix(self.key_prefix.clone())
                        .with_timeout(Duration::from_millis(self.backend_timeout_ms)),
                ))
            }
            None => {
                warn!(
                    "No shared counter store configured; using in-memory rate limiting. \
                     Limits are enforced per instance and will not hold across replicas"
                );
                Ok(Arc::new(LocalCounter::with_clock(clock)))
            }
        }
    }

    /// Build the limiter: validated registry plus the selected backend.
    pub fn build_limiter(&self) -> Result<RateLimiter> {
        let registry = Arc::new(self.build_registry()?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let counter = self.build_counter(clock.clone())?;
        Ok(RateLimiter::with_counter(registry, counter, clock))
    }
}

impl GatekeeperConfig {
    /// Load configuration from an optional YAML file layered with
    /// `GATEKEEPER__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| GatekeeperError::Config(e.to_string()))
    }
}
