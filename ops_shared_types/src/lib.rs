use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ProfileName = String;
pub type HostName = String;
pub type ContainerRef = String; // Name or (short) id, resolved by the daemon

/// Classified adapter failure. The sub-kind is part of the wire contract:
/// it appears verbatim in structured error payloads as `error_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    NotFound,
    Unauthorized,
    Unreachable,
    Timeout,
    Cancelled,
    Transient,
    Permanent,
}

impl AdapterErrorKind {
    /// Stable lowercase label used in audit records and structured payloads.
    pub fn label(&self) -> &'static str {
        match self {
            AdapterErrorKind::NotFound => "not_found",
            AdapterErrorKind::Unauthorized => "unauthorized",
            AdapterErrorKind::Unreachable => "unreachable",
            AdapterErrorKind::Timeout => "timeout",
            AdapterErrorKind::Cancelled => "cancelled",
            AdapterErrorKind::Transient => "transient",
            AdapterErrorKind::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Policy refusal: {0}")]
    Policy(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Adapter error ({kind}): {message}")]
    Adapter {
        kind: AdapterErrorKind,
        message: String,
    },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OpsError {
    pub fn adapter(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self::Adapter {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::adapter(AdapterErrorKind::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::adapter(AdapterErrorKind::Unauthorized, message)
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::adapter(AdapterErrorKind::Unreachable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::adapter(AdapterErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::adapter(AdapterErrorKind::Cancelled, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::adapter(AdapterErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::adapter(AdapterErrorKind::Permanent, message)
    }

    /// The adapter sub-kind, if this is an adapter failure.
    pub fn adapter_kind(&self) -> Option<AdapterErrorKind> {
        match self {
            OpsError::Adapter { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Transient faults may be retried once within the remaining deadline.
    /// Timeout and Cancelled are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OpsError::Adapter {
                kind: AdapterErrorKind::Transient,
                ..
            }
        )
    }
}

// Connection material for the backend adapters. Profiles reference these
// records by name; adapters never see profile state.

/// A remote host reachable over SSH.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostEntry {
    pub host: String, // address or DNS name
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

/// A Kubernetes cluster addressed through a kubeconfig context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterEntry {
    pub kubeconfig_path: PathBuf,
    #[serde(default)]
    pub context: Option<String>,
}

/// A Docker daemon endpoint. `host` is a daemon URL (`unix://...`,
/// `ssh://user@host`, `tcp://...`); None means the local daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DockerEndpointEntry {
    #[serde(default)]
    pub host: Option<String>,
}

/// Result of a single remote command execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One container as reported by the container daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
}

/// One pod as reported by the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    pub status: String,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
}

/// Detailed pod view for `k8s_get_pod`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodDetail {
    pub name: String,
    pub namespace: String,
    pub status: String,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub containers: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<PodCondition>,
}

// Generic result type for control-plane operations
pub type Result<T> = std::result::Result<T, OpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_kind_labels_are_stable() {
        assert_eq!(AdapterErrorKind::NotFound.label(), "not_found");
        assert_eq!(AdapterErrorKind::Timeout.label(), "timeout");
        assert_eq!(
            serde_json::to_value(AdapterErrorKind::Unauthorized).unwrap(),
            serde_json::json!("unauthorized")
        );
    }

    #[test]
    fn transient_is_the_only_retryable_kind() {
        assert!(OpsError::transient("flaky").is_retryable());
        assert!(!OpsError::timeout("slow").is_retryable());
        assert!(!OpsError::cancelled("gone").is_retryable());
        assert!(!OpsError::Policy("no".into()).is_retryable());
    }

    #[test]
    fn host_entry_defaults() {
        let entry: HostEntry = serde_json::from_str(r#"{"host":"10.0.0.5"}"#).unwrap();
        assert_eq!(entry.user, "root");
        assert_eq!(entry.port, 22);
        assert!(entry.key_path.is_none());
    }
}
