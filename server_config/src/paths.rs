//! Configuration and data paths.
//!
//! The profile file defaults to `~/.config/ops-core/config.yaml`; the audit
//! log defaults to `~/.local/share/ops-core/audit.log`. Both can be moved
//! with environment variables (`CONFIG_PATH`, `AUDIT_LOG_PATH`).

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

/// Application directory name under the XDG base directories.
pub const APP_DIR: &str = "ops-core";

/// Environment variable overriding the profile file location.
pub const ENV_CONFIG_PATH: &str = "CONFIG_PATH";

/// Environment variable overriding the audit log location.
pub const ENV_AUDIT_LOG_PATH: &str = "AUDIT_LOG_PATH";

/// Environment variable selecting the initial tool scope.
pub const ENV_TOOLS_SCOPE: &str = "TOOLS_SCOPE";

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl ConfigPaths {
    /// Create paths using XDG defaults.
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ConfigError::PathError("Could not determine config directory".into()))?
            .join(APP_DIR);

        let data_dir = dirs::data_dir()
            .ok_or_else(|| ConfigError::PathError("Could not determine data directory".into()))?
            .join(APP_DIR);

        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    /// Create paths rooted at a custom base directory (for testing).
    pub fn with_base(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            config_dir: base.join("config"),
            data_dir: base.join("data"),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Default profile file path (`<config-dir>/config.yaml`).
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.yaml")
    }

    /// Default audit log path (`<data-dir>/audit.log`).
    pub fn audit_log_file(&self) -> PathBuf {
        self.data_dir.join("audit.log")
    }
}

/// Resolve the profile file location: `CONFIG_PATH` if set, XDG default
/// otherwise.
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(ConfigPaths::new()?.config_file())
}

/// Resolve the audit log location: `AUDIT_LOG_PATH`, then the configured
/// path, then the XDG default.
pub fn resolve_audit_path(configured: Option<&Path>) -> Result<PathBuf> {
    if let Ok(path) = std::env::var(ENV_AUDIT_LOG_PATH) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    Ok(ConfigPaths::new()?.audit_log_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_base_keeps_files_under_base() {
        let paths = ConfigPaths::with_base("/tmp/ops-test");
        assert_eq!(
            paths.config_file(),
            PathBuf::from("/tmp/ops-test/config/config.yaml")
        );
        assert_eq!(
            paths.audit_log_file(),
            PathBuf::from("/tmp/ops-test/data/audit.log")
        );
    }
}
