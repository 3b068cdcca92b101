//! Configuration loader with multi-source merging

use crate::{CallstateConfig, ConfigError, Paths};
use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    base_dir: PathBuf,
    env_prefix: String,
    include_user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader rooted at the current directory
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "CST".to_string(),
            include_user_config: true,
        }
    }

    /// Set the directory searched for `callstate.toml`
    pub fn with_base_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.base_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "CST")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip `~/.config/callstate/config.toml`
    pub fn without_user_config(mut self) -> Self {
        self.include_user_config = false;
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<CallstateConfig> {
        let mut builder = config::Config::builder();

        // 1. Built-in defaults
        let defaults = CallstateConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config
        if self.include_user_config {
            if let Ok(user_config_file) = Paths::new().user_config_file() {
                if user_config_file.exists() {
                    builder = builder.add_source(
                        config::File::from(user_config_file)
                            .required(false)
                            .format(config::FileFormat::Toml),
                    );
                }
            }
        }

        // 3. Node config, then local overrides
        for file in [
            Paths::node_config_file(&self.base_dir),
            Paths::local_config_file(&self.base_dir),
        ] {
            if file.exists() {
                builder = builder.add_source(
                    config::File::from(file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 4. Environment variables (CST_SESSIONS__NOTIFY_WORKERS=4)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let callstate_config: CallstateConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        callstate_config
            .validate()
            .context("Configuration failed validation")?;

        Ok(callstate_config)
    }

    /// Load a single TOML file without merging any other source.
    pub fn from_file(path: impl AsRef<Path>) -> Result<CallstateConfig, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CallstateConfig =
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callstate_types::{OverflowPolicy, TransportKind};
    use tempfile::tempdir;

    fn loader(dir: &Path) -> ConfigLoader {
        ConfigLoader::new()
            .with_base_dir(dir)
            .with_env_prefix("CST_TEST_UNSET")
            .without_user_config()
    }

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = loader(temp_dir.path()).load().expect("Failed to load config");

        assert_eq!(config, CallstateConfig::default());
    }

    #[test]
    fn test_load_node_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let base = temp_dir.path();

        fs::write(
            base.join("callstate.toml"),
            r#"
[node]
id = "master"
listen = "0.0.0.0:2012"

[sessions]
notify_overflow = "drop-oldest"
replication_timeout_ms = 500

[[sessions.replication_targets]]
address = "10.0.0.2:2012"
transport = "*json"
synchronous = true

[[billing.accounts]]
tenant = "cgrates.org"
account = "1001"
balance_secs = 3600
"#,
        )
        .expect("Failed to write config");

        let config = loader(base).load().expect("Failed to load config");

        assert_eq!(config.node.id, "master");
        assert_eq!(config.sessions.notify_overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.sessions.replication_timeout_ms, 500);
        assert_eq!(config.sessions.replication_targets.len(), 1);
        let target = &config.sessions.replication_targets[0];
        assert_eq!(target.transport, TransportKind::Json);
        assert!(target.synchronous);
        assert_eq!(config.billing.accounts[0].balance_secs, 3600);
        // Untouched sections keep their defaults
        assert_eq!(config.stats.rounding_decimals, 2);
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let base = temp_dir.path();

        fs::write(base.join("callstate.toml"), "[node]\nid = \"master\"\n")
            .expect("Failed to write node config");
        fs::write(base.join("callstate.local.toml"), "[node]\nid = \"slave\"\n")
            .expect("Failed to write local config");

        let config = loader(base).load().expect("Failed to load config");
        assert_eq!(config.node.id, "slave");
    }

    #[test]
    fn test_invalid_config_fails_validation() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let base = temp_dir.path();

        fs::write(base.join("callstate.toml"), "[sessions]\nnotify_workers = 0\n")
            .expect("Failed to write config");

        assert!(loader(base).load().is_err());
    }

    #[test]
    fn test_from_file_reports_path() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let missing = temp_dir.path().join("missing.toml");
        assert!(matches!(
            ConfigLoader::from_file(&missing),
            Err(ConfigError::Read { path, .. }) if path == missing
        ));

        let broken = temp_dir.path().join("broken.toml");
        fs::write(&broken, "[node\n").expect("Failed to write config");
        assert!(matches!(
            ConfigLoader::from_file(&broken),
            Err(ConfigError::Parse { .. })
        ));
    }
}
