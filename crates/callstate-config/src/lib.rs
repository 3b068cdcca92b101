//! Configuration management for callstate
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (CST_* prefix, `__` between section and key)
//! 2. callstate.local.toml (local overrides)
//! 3. callstate.toml (node config)
//! 4. ~/.config/callstate/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use callstate_types::{OverflowPolicy, ReplicationTarget};
use serde::{Deserialize, Serialize};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main callstate configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallstateConfig {
    pub node: NodeConfig,
    pub sessions: SessionsConfig,
    pub billing: BillingConfig,
    pub stats: StatsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name, used in logs and as the `*internal` transport address.
    pub id: String,
    /// Address the JSON-lines RPC server binds to.
    pub listen: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: "callstate-1".to_string(),
            listen: "127.0.0.1:2012".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Ceiling requested when an initiating event carries no usage.
    pub max_call_duration_secs: u64,
    /// Peers receiving passive copies of every active-session change.
    pub replication_targets: Vec<ReplicationTarget>,
    pub replication_timeout_ms: u64,
    pub replication_workers: usize,
    pub replication_queue_capacity: usize,
    pub notify_workers: usize,
    pub notify_queue_capacity: usize,
    pub notify_overflow: OverflowPolicy,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_call_duration_secs: 3 * 3600,
            replication_targets: Vec::new(),
            replication_timeout_ms: 2_000,
            replication_workers: 2,
            replication_queue_capacity: 1024,
            notify_workers: 2,
            notify_queue_capacity: 1024,
            notify_overflow: OverflowPolicy::DropNewest,
        }
    }
}

impl SessionsConfig {
    pub fn max_call_duration(&self) -> Duration {
        Duration::from_secs(self.max_call_duration_secs)
    }

    pub fn replication_timeout(&self) -> Duration {
        Duration::from_millis(self.replication_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Ceiling granted to accounts without an explicit allowance.
    pub default_ceiling_secs: u64,
    pub accounts: Vec<AccountAllowance>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_ceiling_secs: 3 * 3600,
            accounts: Vec::new(),
        }
    }
}

/// Prepaid usage allowance for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAllowance {
    pub tenant: String,
    pub account: String,
    pub balance_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Metric ids fed from terminated sessions (`*asr`, `*acd`).
    pub metrics: Vec<String>,
    pub rounding_decimals: u32,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            metrics: vec!["*asr".to_string(), "*acd".to_string()],
            rounding_decimals: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CallstateConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from a specific base directory
    pub fn load_from_dir(base_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_base_dir(base_dir).load()
    }

    /// Checks cross-field constraints the type system cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.id.trim().is_empty() {
            return Err(ConfigError::MissingNodeId);
        }

        let sessions = &self.sessions;
        for (field, value) in [
            ("sessions.replication_workers", sessions.replication_workers as u64),
            (
                "sessions.replication_queue_capacity",
                sessions.replication_queue_capacity as u64,
            ),
            ("sessions.notify_workers", sessions.notify_workers as u64),
            ("sessions.notify_queue_capacity", sessions.notify_queue_capacity as u64),
            ("sessions.max_call_duration_secs", sessions.max_call_duration_secs),
            ("sessions.replication_timeout_ms", sessions.replication_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroSetting { field });
            }
        }

        let mut seen = HashSet::new();
        for target in &sessions.replication_targets {
            if target.address.trim().is_empty() {
                return Err(ConfigError::EmptyTargetAddress);
            }
            if !seen.insert((target.transport, target.address.as_str())) {
                return Err(ConfigError::DuplicateTarget(target.to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callstate_types::TransportKind;

    #[test]
    fn test_default_config() {
        let config = CallstateConfig::default();
        assert_eq!(config.node.listen, "127.0.0.1:2012");
        assert!(config.sessions.replication_targets.is_empty());
        assert_eq!(config.sessions.replication_timeout(), Duration::from_secs(2));
        assert_eq!(config.sessions.max_call_duration(), Duration::from_secs(10_800));
        assert_eq!(config.sessions.notify_overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.stats.metrics, vec!["*asr", "*acd"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = CallstateConfig::default();
        config.sessions.notify_workers = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("notify_workers"));
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let mut config = CallstateConfig::default();
        let target = ReplicationTarget::new("10.0.0.2:2012", TransportKind::Json);
        config.sessions.replication_targets = vec![target.clone(), target.synchronous(true)];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateTarget(_))
        ));
    }

    #[test]
    fn test_toml_roundtrip_keeps_targets() {
        let mut config = CallstateConfig::default();
        config.sessions.replication_targets =
            vec![ReplicationTarget::new("node-b", TransportKind::Internal).synchronous(true)];

        let text = toml::to_string(&config).unwrap();
        let parsed: CallstateConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
