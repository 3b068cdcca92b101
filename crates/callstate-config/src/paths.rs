//! Path utilities and XDG directory discovery

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// XDG-compliant paths for callstate
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    /// Create a new Paths instance with XDG discovery
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("org", "callstate", "callstate"),
        }
    }

    /// Get user config directory (~/.config/callstate/)
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Get user config file path (~/.config/callstate/config.toml)
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// Get node config file path (callstate.toml)
    pub fn node_config_file(base_dir: impl AsRef<Path>) -> PathBuf {
        base_dir.as_ref().join("callstate.toml")
    }

    /// Get local override file path (callstate.local.toml)
    pub fn local_config_file(base_dir: impl AsRef<Path>) -> PathBuf {
        base_dir.as_ref().join("callstate.local.toml")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_xdg_paths() {
        let paths = Paths::new();

        if let Ok(config_file) = paths.user_config_file() {
            assert!(config_file.to_string_lossy().contains("callstate"));
            assert!(config_file.ends_with("config.toml"));
        }
    }

    #[test]
    fn test_node_paths() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let base = temp_dir.path();

        assert_eq!(Paths::node_config_file(base), base.join("callstate.toml"));
        assert_eq!(
            Paths::local_config_file(base),
            base.join("callstate.local.toml")
        );
    }
}
