//! Errors raised while loading or checking node configuration.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("node.id is empty")]
    MissingNodeId,

    #[error("{field} must be greater than zero")]
    ZeroSetting { field: &'static str },

    #[error("replication target with empty address")]
    EmptyTargetAddress,

    #[error("duplicate replication target {0}")]
    DuplicateTarget(String),

    #[error("no home directory to resolve the user config file from")]
    NoConfigDir,
}
