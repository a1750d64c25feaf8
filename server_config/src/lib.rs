//! Server configuration.
//!
//! Loads the declarative profile file and exposes profiles, host entries,
//! cluster entries, docker endpoints, redaction patterns, and audit
//! settings. Environment variables move the file (`CONFIG_PATH`), the audit
//! log (`AUDIT_LOG_PATH`), and select the initial tool scope
//! (`TOOLS_SCOPE`).

pub mod config;
pub mod error;
pub mod paths;
pub mod scope;

pub use config::{
    AuditConfig, DockerDefaults, KubernetesDefaults, OpsConfig, ProfileConfig, Settings,
};
pub use error::{ConfigError, Result};
pub use paths::{
    resolve_audit_path, resolve_config_path, ConfigPaths, ENV_AUDIT_LOG_PATH, ENV_CONFIG_PATH,
    ENV_TOOLS_SCOPE,
};
pub use scope::{scope_from_env, ScopeSpec};
