//! Declarative profile file.
//!
//! One YAML document describes every profile the server can switch between,
//! plus the named host, cluster, and docker endpoint entries the profiles
//! reference. Profiles reference entries by name only; the adapters resolve
//! names through the server context at call time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ops_shared_types::{ClusterEntry, DockerEndpointEntry, HostEntry};

use crate::error::{ConfigError, Result};

/// Complete server configuration, as loaded from the profile file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    #[serde(default = "default_version")]
    pub version: String,

    /// Profile selected at startup when `profile_set` has not been called.
    #[serde(default = "default_profile_name")]
    pub default_profile: String,

    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,

    /// SSH-reachable hosts, by name.
    #[serde(default)]
    pub hosts: BTreeMap<String, HostEntry>,

    /// Kubernetes clusters, by name.
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterEntry>,

    /// Docker daemon endpoints, by name.
    #[serde(default)]
    pub docker_endpoints: BTreeMap<String, DockerEndpointEntry>,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub settings: Settings,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// A named bundle of target infrastructure identifiers and a policy view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Default SSH bastion host (a name in `hosts`).
    #[serde(default)]
    pub bastion: Option<String>,

    #[serde(default)]
    pub kubernetes: KubernetesDefaults,

    #[serde(default)]
    pub docker: DockerDefaults,

    /// Command family -> permitted verbs. The single token `"*"` admits
    /// every verb of that family.
    #[serde(default)]
    pub allowlist: BTreeMap<String, Vec<String>>,

    /// Whether intrinsically destructive flags are admitted.
    #[serde(default)]
    pub dangerous_allowed: bool,

    /// Substrings that mark a flag as destructive. Configuration, not a
    /// built-in constant.
    #[serde(default = "default_dangerous_flags")]
    pub dangerous_flags: Vec<String>,

    /// Extra redaction patterns applied on top of the built-in set.
    #[serde(default)]
    pub redaction_rules: Vec<String>,
}

fn default_dangerous_flags() -> Vec<String> {
    vec![
        "--force".to_string(),
        "--grace-period=0".to_string(),
        "--volumes".to_string(),
    ]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KubernetesDefaults {
    /// Cluster name in `clusters`.
    #[serde(default)]
    pub cluster: Option<String>,
    /// Context override; falls back to the cluster entry's context.
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerDefaults {
    /// Endpoint name in `docker_endpoints`; None means the local daemon.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub compose_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log location; `AUDIT_LOG_PATH` wins over this.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Fallback log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Maximum concurrent leases per backend endpoint.
    #[serde(default = "default_max_leases")]
    pub max_leases_per_endpoint: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            max_leases_per_endpoint: default_max_leases(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_leases() -> usize {
    4
}

impl OpsConfig {
    /// Load and validate a configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse a configuration document and validate its internal references.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: OpsConfig = serde_yaml::from_str(content)?;

        // A file with no profiles still yields a working server with an
        // empty default profile.
        if config.profiles.is_empty() {
            config
                .profiles
                .insert("default".to_string(), ProfileConfig::default());
            config.default_profile = "default".to_string();
        }

        config.validate()?;
        Ok(config)
    }

    /// A minimal configuration for processes launched without a file.
    pub fn minimal() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert("default".to_string(), ProfileConfig::default());
        Self {
            version: default_version(),
            default_profile: "default".to_string(),
            profiles,
            hosts: BTreeMap::new(),
            clusters: BTreeMap::new(),
            docker_endpoints: BTreeMap::new(),
            audit: AuditConfig::default(),
            settings: Settings::default(),
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.profiles.contains_key(&self.default_profile) {
            return Err(ConfigError::validation(format!(
                "default_profile '{}' is not defined",
                self.default_profile
            )));
        }

        for (name, profile) in &self.profiles {
            if let Some(bastion) = &profile.bastion {
                if !self.hosts.contains_key(bastion) {
                    return Err(ConfigError::validation(format!(
                        "profile '{}' references unknown bastion host '{}'",
                        name, bastion
                    )));
                }
            }
            if let Some(cluster) = &profile.kubernetes.cluster {
                if !self.clusters.contains_key(cluster) {
                    return Err(ConfigError::validation(format!(
                        "profile '{}' references unknown cluster '{}'",
                        name, cluster
                    )));
                }
            }
            if let Some(endpoint) = &profile.docker.endpoint {
                if !self.docker_endpoints.contains_key(endpoint) {
                    return Err(ConfigError::validation(format!(
                        "profile '{}' references unknown docker endpoint '{}'",
                        name, endpoint
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&ProfileConfig> {
        self.profiles.get(name)
    }

    pub fn host(&self, name: &str) -> Option<&HostEntry> {
        self.hosts.get(name)
    }

    pub fn cluster(&self, name: &str) -> Option<&ClusterEntry> {
        self.clusters.get(name)
    }

    pub fn docker_endpoint(&self, name: &str) -> Option<&DockerEndpointEntry> {
        self.docker_endpoints.get(name)
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}
