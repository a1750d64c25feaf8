//! kubectl-based Kubernetes adapter.
//!
//! Reads and mutates cluster state through the `kubectl` binary with an
//! explicit kubeconfig and context per cluster entry. Read paths use
//! `-o json` and deserialize the fields the control plane needs; nothing
//! else of the API surface is modeled.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::{RwLock, Semaphore};
use tracing::debug;

use backend_interface::KubernetesBackend;
use ops_shared_types::{
    ClusterEntry, CommandOutput, OpsError, PodCondition, PodDetail, PodSummary, Result,
};

/// Configuration for the kubectl adapter.
#[derive(Debug, Clone)]
pub struct KubectlConfig {
    /// Path to the kubectl binary (default: "kubectl").
    pub kubectl_binary: PathBuf,
    /// Maximum concurrent commands per cluster.
    pub max_leases_per_cluster: usize,
    /// How long a caller waits for a lease.
    pub lease_timeout: Duration,
}

impl Default for KubectlConfig {
    fn default() -> Self {
        Self {
            kubectl_binary: PathBuf::from("kubectl"),
            max_leases_per_cluster: 4,
            lease_timeout: Duration::from_secs(15),
        }
    }
}

// Minimal projections of the Kubernetes API objects.

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodItem>,
}

#[derive(Debug, Deserialize)]
struct PodItem {
    metadata: PodMetadata,
    #[serde(default)]
    spec: PodSpec,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(default)]
    node_name: Option<String>,
    #[serde(default)]
    containers: Vec<PodContainer>,
}

#[derive(Debug, Deserialize)]
struct PodContainer {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    pod_ip: Option<String>,
    #[serde(default)]
    conditions: Vec<PodStatusCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatusCondition {
    #[serde(rename = "type")]
    condition_type: String,
    status: String,
}

impl From<&PodItem> for PodSummary {
    fn from(item: &PodItem) -> Self {
        Self {
            name: item.metadata.name.clone(),
            namespace: item.metadata.namespace.clone(),
            status: item
                .status
                .phase
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            node: item.spec.node_name.clone(),
            ip: item.status.pod_ip.clone(),
        }
    }
}

impl From<&PodItem> for PodDetail {
    fn from(item: &PodItem) -> Self {
        Self {
            name: item.metadata.name.clone(),
            namespace: item.metadata.namespace.clone(),
            status: item
                .status
                .phase
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            node: item.spec.node_name.clone(),
            ip: item.status.pod_ip.clone(),
            containers: item.spec.containers.iter().map(|c| c.name.clone()).collect(),
            conditions: item
                .status
                .conditions
                .iter()
                .map(|c| PodCondition {
                    condition_type: c.condition_type.clone(),
                    status: c.status.clone(),
                })
                .collect(),
        }
    }
}

/// CLI-based Kubernetes backend.
pub struct KubectlBackend {
    config: KubectlConfig,
    leases: RwLock<HashMap<String, Arc<Semaphore>>>,
}

impl KubectlBackend {
    pub fn new(config: KubectlConfig) -> Self {
        Self {
            config,
            leases: RwLock::new(HashMap::new()),
        }
    }

    fn cluster_key(cluster: &ClusterEntry) -> String {
        format!(
            "{}:{}",
            cluster.kubeconfig_path.display(),
            cluster.context.as_deref().unwrap_or("-")
        )
    }

    async fn lease_for(&self, cluster: &ClusterEntry) -> Arc<Semaphore> {
        let key = Self::cluster_key(cluster);
        if let Some(semaphore) = self.leases.read().await.get(&key) {
            return semaphore.clone();
        }
        self.leases
            .write()
            .await
            .entry(key)
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_leases_per_cluster)))
            .clone()
    }

    async fn exec_kubectl(
        &self,
        cluster: &ClusterEntry,
        namespace: Option<&str>,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let semaphore = self.lease_for(cluster).await;
        let _permit = tokio::time::timeout(self.config.lease_timeout, semaphore.acquire_owned())
            .await
            .map_err(|_| OpsError::transient("kubectl lease acquisition timed out"))?
            .map_err(|_| OpsError::unreachable("kubectl lease pool closed"))?;

        let mut command = Command::new(&self.config.kubectl_binary);
        command
            .arg("--kubeconfig")
            .arg(&cluster.kubeconfig_path);
        if let Some(context) = &cluster.context {
            command.arg("--context").arg(context);
        }
        if let Some(namespace) = namespace {
            command.arg("-n").arg(namespace);
        }
        command.args(args);

        debug!(cluster = %Self::cluster_key(cluster), ?args, "kubectl exec");

        let output = tokio::time::timeout(
            timeout,
            command
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| OpsError::timeout(format!("kubectl timed out after {:?}", timeout)))?
        .map_err(|e| OpsError::unreachable(format!("failed to spawn kubectl: {}", e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Map kubectl stderr to a typed condition. Authorization failures MUST
    /// be distinguishable from not-found.
    fn classify_failure(stderr: &str) -> OpsError {
        let lower = stderr.to_ascii_lowercase();
        if lower.contains("forbidden")
            || lower.contains("unauthorized")
            || lower.contains("you must be logged in")
        {
            OpsError::unauthorized(stderr.trim().to_string())
        } else if lower.contains("notfound") || lower.contains("not found") {
            OpsError::not_found(stderr.trim().to_string())
        } else if lower.contains("unable to connect")
            || lower.contains("no such host")
            || lower.contains("connection refused")
            || lower.contains("i/o timeout")
        {
            OpsError::unreachable(stderr.trim().to_string())
        } else {
            OpsError::permanent(stderr.trim().to_string())
        }
    }

    fn check(output: CommandOutput) -> Result<CommandOutput> {
        if output.exit_code != 0 {
            return Err(Self::classify_failure(&output.stderr));
        }
        Ok(output)
    }
}

#[async_trait]
impl KubernetesBackend for KubectlBackend {
    async fn list_pods(
        &self,
        cluster: &ClusterEntry,
        namespace: &str,
        timeout: Duration,
    ) -> Result<Vec<PodSummary>> {
        let output = Self::check(
            self.exec_kubectl(cluster, Some(namespace), &["get", "pods", "-o", "json"], timeout)
                .await?,
        )?;
        let list: PodList = serde_json::from_str(&output.stdout)
            .map_err(|e| OpsError::permanent(format!("unparseable pod list: {}", e)))?;
        Ok(list.items.iter().map(PodSummary::from).collect())
    }

    async fn get_pod(
        &self,
        cluster: &ClusterEntry,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<PodDetail> {
        let output = Self::check(
            self.exec_kubectl(
                cluster,
                Some(namespace),
                &["get", "pod", name, "-o", "json"],
                timeout,
            )
            .await?,
        )?;
        let item: PodItem = serde_json::from_str(&output.stdout)
            .map_err(|e| OpsError::permanent(format!("unparseable pod: {}", e)))?;
        Ok(PodDetail::from(&item))
    }

    async fn pod_logs(
        &self,
        cluster: &ClusterEntry,
        pod: &str,
        namespace: &str,
        container: Option<&str>,
        tail: u32,
        timeout: Duration,
    ) -> Result<String> {
        let tail_arg = format!("--tail={}", tail);
        let mut args = vec!["logs", pod, tail_arg.as_str()];
        if let Some(container) = container {
            args.push("-c");
            args.push(container);
        }
        let output = Self::check(
            self.exec_kubectl(cluster, Some(namespace), &args, timeout)
                .await?,
        )?;
        Ok(output.stdout)
    }

    async fn scale_deployment(
        &self,
        cluster: &ClusterEntry,
        deployment: &str,
        namespace: &str,
        replicas: u32,
        timeout: Duration,
    ) -> Result<()> {
        let target = format!("deployment/{}", deployment);
        let replicas_arg = format!("--replicas={}", replicas);
        Self::check(
            self.exec_kubectl(
                cluster,
                Some(namespace),
                &["scale", target.as_str(), replicas_arg.as_str()],
                timeout,
            )
            .await?,
        )?;
        Ok(())
    }

    async fn restart_deployment(
        &self,
        cluster: &ClusterEntry,
        deployment: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<()> {
        let target = format!("deployment/{}", deployment);
        Self::check(
            self.exec_kubectl(
                cluster,
                Some(namespace),
                &["rollout", "restart", target.as_str()],
                timeout,
            )
            .await?,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ops_shared_types::AdapterErrorKind;

    const POD_LIST_JSON: &str = r#"{
        "items": [
            {
                "metadata": {"name": "api-7d9f", "namespace": "apps"},
                "spec": {"nodeName": "node-1", "containers": [{"name": "api"}, {"name": "sidecar"}]},
                "status": {"phase": "Running", "podIP": "10.42.0.9",
                           "conditions": [{"type": "Ready", "status": "True"}]}
            },
            {
                "metadata": {"name": "batch-x1", "namespace": "apps"},
                "spec": {},
                "status": {"phase": "Pending"}
            }
        ]
    }"#;

    #[test]
    fn pod_list_parses_to_summaries() {
        let list: PodList = serde_json::from_str(POD_LIST_JSON).unwrap();
        let summaries: Vec<PodSummary> = list.items.iter().map(PodSummary::from).collect();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].name, "api-7d9f");
        assert_eq!(summaries[0].status, "Running");
        assert_eq!(summaries[0].node.as_deref(), Some("node-1"));
        assert_eq!(summaries[0].ip.as_deref(), Some("10.42.0.9"));
        assert_eq!(summaries[1].status, "Pending");
        assert!(summaries[1].node.is_none());
    }

    #[test]
    fn pod_item_parses_to_detail() {
        let list: PodList = serde_json::from_str(POD_LIST_JSON).unwrap();
        let detail = PodDetail::from(&list.items[0]);
        assert_eq!(detail.containers, vec!["api", "sidecar"]);
        assert_eq!(detail.conditions[0].condition_type, "Ready");
        assert_eq!(detail.conditions[0].status, "True");
    }

    #[test]
    fn forbidden_is_unauthorized_not_not_found() {
        let err = KubectlBackend::classify_failure(
            r#"Error from server (Forbidden): pods is forbidden: User "ops" cannot list resource"#,
        );
        assert_eq!(err.adapter_kind(), Some(AdapterErrorKind::Unauthorized));
    }

    #[test]
    fn missing_resource_is_not_found() {
        let err = KubectlBackend::classify_failure(
            r#"Error from server (NotFound): deployments.apps "ghost" not found"#,
        );
        assert_eq!(err.adapter_kind(), Some(AdapterErrorKind::NotFound));
    }

    #[test]
    fn apiserver_down_is_unreachable() {
        let err = KubectlBackend::classify_failure(
            "Unable to connect to the server: dial tcp 10.0.0.1:6443: i/o timeout",
        );
        assert_eq!(err.adapter_kind(), Some(AdapterErrorKind::Unreachable));
    }
}
