//! Named rate limit policies.
//!
//! Policies are fixed at startup: the built-in presets, optionally overridden
//! or extended from configuration. Every entry is validated before the
//! registry exists, so an unknown or malformed policy is a wiring error and
//! never a per-request one.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GatekeeperError, Result};

/// Built-in presets as `(name, requests, window)`.
pub const PRESETS: &[(&str, u64, &str)] = &[
    ("default", 100, "1h"),
    ("api", 60, "1m"),
    ("templates", 30, "1m"),
    ("snippets", 50, "1m"),
    ("ai", 10, "1m"),
    ("auth", 5, "1m"),
    ("upload", 20, "1m"),
];

/// A validated policy: at most `quota` requests per trailing `window_ms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    name: String,
    quota: u64,
    window_ms: u64,
}

impl Policy {
    /// Create a policy, rejecting a zero quota or zero-length window.
    pub fn new(name: impl Into<String>, quota: u64, window_ms: u64) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(GatekeeperError::Config("policy name must not be empty".into()));
        }
        if quota == 0 {
            return Err(GatekeeperError::Config(format!(
                "policy '{}' must allow at least one request",
                name
            )));
        }
        if window_ms == 0 {
            return Err(GatekeeperError::Config(format!(
                "policy '{}' must have a window of at least 1ms",
                name
            )));
        }

        Ok(Self {
            name,
            quota,
            window_ms,
        })
    }

    /// The policy name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests allowed per window.
    pub fn quota(&self) -> u64 {
        self.quota
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// A policy as written in configuration, e.g. `{ requests: 60, window: "1m" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Number of requests allowed per window
    pub requests: u64,
    /// Window length: an integer followed by `s`, `m`, `h` or `d`
    pub window: String,
}

impl PolicySpec {
    /// Validate into a [`Policy`].
    pub fn build(&self, name: &str) -> Result<Policy> {
        let window = parse_window(&self.window)?;
        let window_ms = u64::try_from(window.as_millis()).map_err(|_| {
            GatekeeperError::Config(format!(
                "Window for policy '{}' is too long: {}",
                name, self.window
            ))
        })?;
        Policy::new(name, self.requests, window_ms)
    }
}

/// Parse a window such as `"30s"`, `"1m"`, `"1 h"` or `"7d"`.
pub fn parse_window(window: &str) -> Result<Duration> {
    let invalid = || GatekeeperError::Config(format!("Invalid window format: {}", window));

    let unit = window.chars().last().ok_or_else(invalid)?;
    let digits = window[..window.len() - unit.len_utf8()].trim_end();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    let unit_secs = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        _ => return Err(invalid()),
    };

    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

/// File format for a standalone policy table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyTable {
    /// Policy name to definition
    #[serde(default)]
    pub policies: HashMap<String, PolicySpec>,
}

impl PolicyTable {
    /// Load a policy table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading policy table");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a policy table from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse policy table: {}", e)))
    }
}

/// Immutable lookup of policies by name.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: BTreeMap<String, Policy>,
}

impl PolicyRegistry {
    /// A registry holding only the built-in presets.
    pub fn with_presets() -> Self {
        let policies = PRESETS
            .iter()
            .map(|&(name, requests, window)| {
                let policy = PolicySpec {
                    requests,
                    window: window.to_string(),
                }
                .build(name)
                .expect("built-in presets are valid");
                (name.to_string(), policy)
            })
            .collect();

        Self { policies }
    }

    /// The presets with `overrides` applied on top.
    ///
    /// Fails on the first invalid entry; nothing is partially registered.
    pub fn from_specs(overrides: &HashMap<String, PolicySpec>) -> Result<Self> {
        let mut registry = Self::with_presets();

        for (name, spec) in overrides {
            let policy = spec.build(name)?;
            info!(
                policy = %name,
                quota = policy.quota(),
                window_ms = policy.window_ms(),
                "Registering policy"
            );
            registry.policies.insert(name.clone(), policy);
        }

        Ok(registry)
    }

    /// A registry built from already validated policies, without presets.
    pub fn from_policies(policies: impl IntoIterator<Item = Policy>) -> Self {
        Self {
            policies: policies
                .into_iter()
                .map(|p| (p.name().to_string(), p))
                .collect(),
        }
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Result<&Policy> {
        self.policies
            .get(name)
            .ok_or_else(|| GatekeeperError::Config(format!("unknown rate limit policy '{}'", name)))
    }

    /// All policies, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.values()
    }

    /// Number of registered policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_presets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_window_units() {
        assert_eq!(parse_window("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_window("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_window("1 h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_window("2d").unwrap(), Duration::from_secs(172_800));
    }

    #[test]
    fn test_parse_window_rejects_garbage() {
        for bad in ["", "m", "1", "1w", "-1m", "1.5m", "one m", "1mm", " 1m", "1m ", "1m\n"] {
            assert!(parse_window(bad).is_err(), "{:?} should not parse", bad);
        }
    }

    #[test]
    fn test_presets() {
        let registry = PolicyRegistry::with_presets();
        assert_eq!(registry.len(), 7);

        let expected = [
            ("default", 100, 3_600_000),
            ("api", 60, 60_000),
            ("templates", 30, 60_000),
            ("snippets", 50, 60_000),
            ("ai", 10, 60_000),
            ("auth", 5, 60_000),
            ("upload", 20, 60_000),
        ];
        for (name, quota, window_ms) in expected {
            let policy = registry.get(name).unwrap();
            assert_eq!(policy.quota(), quota, "{}", name);
            assert_eq!(policy.window_ms(), window_ms, "{}", name);
        }
    }

    #[test]
    fn test_unknown_policy_is_config_error() {
        let registry = PolicyRegistry::with_presets();
        let err = registry.get("nope").unwrap_err();
        assert!(matches!(err, GatekeeperError::Config(_)));
    }

    #[test]
    fn test_invalid_policy_rejected() {
        assert!(Policy::new("zero", 0, 1_000).is_err());
        assert!(Policy::new("instant", 5, 0).is_err());
        assert!(Policy::new("", 5, 1_000).is_err());
    }

    #[test]
    fn test_overrides_from_yaml() {
        let yaml = r#"
policies:
  auth:
    requests: 3
    window: 30s
  webhooks:
    requests: 200
    window: 1m
"#;
        let table = PolicyTable::from_yaml(yaml).unwrap();
        let registry = PolicyRegistry::from_specs(&table.policies).unwrap();

        assert_eq!(registry.len(), 8);
        assert_eq!(registry.get("auth").unwrap().quota(), 3);
        assert_eq!(registry.get("auth").unwrap().window_ms(), 30_000);
        assert_eq!(registry.get("webhooks").unwrap().quota(), 200);
        assert_eq!(registry.get("api").unwrap().quota(), 60);
    }

    #[test]
    fn test_invalid_override_fails_startup() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "broken".to_string(),
            PolicySpec {
                requests: 0,
                window: "1m".into(),
            },
        );
        assert!(PolicyRegistry::from_specs(&overrides).is_err());

        overrides.insert(
            "broken".to_string(),
            PolicySpec {
                requests: 1,
                window: "1 fortnight".into(),
            },
        );
        assert!(PolicyRegistry::from_specs(&overrides).is_err());
    }

    #[test]
    fn test_window_overflowing_millis_is_rejected() {
        // Fits in u64 seconds, not in u64 milliseconds
        let spec = PolicySpec {
            requests: 1,
            window: "200000000000000d".into(),
        };
        assert!(parse_window(&spec.window).is_ok());
        assert!(matches!(spec.build("huge"), Err(GatekeeperError::Config(_))));
    }
}
