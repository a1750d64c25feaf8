//! In-memory mock backends for testing and development.
//!
//! These simulate the adapter capabilities without touching a network.
//! Commands and mutations are recorded so tests can assert on them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use ops_shared_types::{
    AdapterErrorKind, ClusterEntry, CommandOutput, ContainerRef, ContainerSummary,
    DockerEndpointEntry, HostEntry, OpsError, PodDetail, PodSummary, Result,
};

use crate::{ContainerBackend, KubernetesBackend, LineStream, LogTailOptions, SshBackend};

/// Mock SSH backend with scripted responses.
///
/// Unscripted `echo <text>` commands succeed with `<text>` on stdout, so
/// simple round-trip tests need no setup. Anything else unscripted succeeds
/// with empty output.
#[derive(Default)]
pub struct MockSshBackend {
    /// command -> scripted output
    responses: Arc<RwLock<HashMap<String, CommandOutput>>>,
    /// host -> forced failure kind
    failures: Arc<RwLock<HashMap<String, AdapterErrorKind>>>,
    /// (host, command) pairs in invocation order
    calls: Arc<RwLock<Vec<(String, String)>>>,
    invalidations: Arc<RwLock<Vec<String>>>,
}

impl MockSshBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the output of a specific command.
    pub async fn script(&self, command: &str, output: CommandOutput) {
        self.responses
            .write()
            .await
            .insert(command.to_string(), output);
    }

    /// Script a plain stdout success.
    pub async fn script_stdout(&self, command: &str, stdout: &str) {
        self.script(
            command,
            CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: 0,
            },
        )
        .await;
    }

    /// Force every call against `host` to fail with `kind`.
    pub async fn fail_host(&self, host: &str, kind: AdapterErrorKind) {
        self.failures.write().await.insert(host.to_string(), kind);
    }

    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.read().await.clone()
    }

    pub async fn invalidated_hosts(&self) -> Vec<String> {
        self.invalidations.read().await.clone()
    }

    async fn resolve(&self, host: &HostEntry, command: &str) -> Result<CommandOutput> {
        if let Some(kind) = self.failures.read().await.get(&host.host) {
            return Err(OpsError::adapter(
                *kind,
                format!("mock failure for host {}", host.host),
            ));
        }

        self.calls
            .write()
            .await
            .push((host.host.clone(), command.to_string()));

        if let Some(output) = self.responses.read().await.get(command) {
            return Ok(output.clone());
        }
        if let Some(rest) = command.strip_prefix("echo ") {
            return Ok(CommandOutput {
                stdout: rest.to_string(),
                stderr: String::new(),
                exit_code: 0,
            });
        }
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        })
    }
}

#[async_trait]
impl SshBackend for MockSshBackend {
    async fn execute(
        &self,
        host: &HostEntry,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput> {
        debug!(host = %host.host, command, "MockSshBackend: execute");
        self.resolve(host, command).await
    }

    async fn stream(&self, host: &HostEntry, command: &str) -> Result<LineStream> {
        let output = self.resolve(host, command).await?;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for line in output.stdout.lines() {
                if tx.send(line.to_string()).await.is_err() {
                    break; // receiver dropped: cancelled
                }
            }
        });
        Ok(LineStream::new(rx))
    }

    async fn tail_file(
        &self,
        host: &HostEntry,
        path: &str,
        options: &LogTailOptions,
        timeout: Duration,
    ) -> Result<String> {
        let mut command = format!("tail -n {} {}", options.tail, path);
        if let Some(filter) = &options.filter {
            command.push_str(&format!(" | grep -F '{}'", filter));
        }
        Ok(self.execute(host, &command, timeout).await?.stdout)
    }

    async fn invalidate(&self, host: &HostEntry) {
        self.invalidations.write().await.push(host.host.clone());
    }

    async fn invalidate_all(&self) {
        self.invalidations.write().await.push("*".to_string());
    }
}

/// Mock container backend over an in-memory container table.
#[derive(Default)]
pub struct MockContainerBackend {
    containers: Arc<RwLock<Vec<ContainerSummary>>>,
    logs: Arc<RwLock<HashMap<String, String>>>,
    /// (operation, container) pairs
    operations: Arc<RwLock<Vec<(String, String)>>>,
}

impl MockContainerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_container(&self, summary: ContainerSummary) {
        self.containers.write().await.push(summary);
    }

    pub async fn set_logs(&self, container: &str, logs: &str) {
        self.logs
            .write()
            .await
            .insert(container.to_string(), logs.to_string());
    }

    pub async fn operations(&self) -> Vec<(String, String)> {
        self.operations.read().await.clone()
    }

    async fn require(&self, container: &str) -> Result<ContainerSummary> {
        self.containers
            .read()
            .await
            .iter()
            .find(|c| c.id == container || c.name == container)
            .cloned()
            .ok_or_else(|| OpsError::not_found(format!("No such container: {}", container)))
    }

    async fn record(&self, op: &str, container: &str) {
        self.operations
            .write()
            .await
            .push((op.to_string(), container.to_string()));
    }
}

#[async_trait]
impl ContainerBackend for MockContainerBackend {
    async fn list_containers(
        &self,
        _endpoint: &DockerEndpointEntry,
        all: bool,
        _timeout: Duration,
    ) -> Result<Vec<ContainerSummary>> {
        let containers = self.containers.read().await;
        Ok(containers
            .iter()
            .filter(|c| all || c.status.starts_with("Up") || c.status == "running")
            .cloned()
            .collect())
    }

    async fn start_container(
        &self,
        _endpoint: &DockerEndpointEntry,
        container: &ContainerRef,
        _timeout: Duration,
    ) -> Result<()> {
        let found = self.require(container).await?;
        self.record("start", container).await;
        let mut containers = self.containers.write().await;
        if let Some(c) = containers.iter_mut().find(|c| c.id == found.id) {
            c.status = "running".to_string();
        }
        Ok(())
    }

    async fn stop_container(
        &self,
        _endpoint: &DockerEndpointEntry,
        container: &ContainerRef,
        _stop_timeout_secs: u32,
        _timeout: Duration,
    ) -> Result<()> {
        let found = self.require(container).await?;
        self.record("stop", container).await;
        let mut containers = self.containers.write().await;
        if let Some(c) = containers.iter_mut().find(|c| c.id == found.id) {
            c.status = "exited".to_string();
        }
        Ok(())
    }

    async fn restart_container(
        &self,
        _endpoint: &DockerEndpointEntry,
        container: &ContainerRef,
        _timeout: Duration,
    ) -> Result<()> {
        self.require(container).await?;
        self.record("restart", container).await;
        Ok(())
    }

    async fn container_logs(
        &self,
        _endpoint: &DockerEndpointEntry,
        container: &ContainerRef,
        options: &LogTailOptions,
        _timeout: Duration,
    ) -> Result<String> {
        self.require(container).await?;
        let logs = self.logs.read().await;
        let content = logs.get(container.as_str()).cloned().unwrap_or_default();
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(options.tail as usize);
        Ok(lines[start..].join("\n"))
    }
}

/// Mock Kubernetes backend over in-memory pod and deployment tables.
#[derive(Default)]
pub struct MockKubernetesBackend {
    pods: Arc<RwLock<Vec<PodSummary>>>,
    pod_logs: Arc<RwLock<HashMap<String, String>>>,
    /// deployment name -> replica count
    deployments: Arc<RwLock<HashMap<String, u32>>>,
    /// Namespaces that reject the caller.
    forbidden_namespaces: Arc<RwLock<Vec<String>>>,
    operations: Arc<RwLock<Vec<String>>>,
}

impl MockKubernetesBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_pod(&self, pod: PodSummary) {
        self.pods.write().await.push(pod);
    }

    pub async fn add_deployment(&self, name: &str, replicas: u32) {
        self.deployments
            .write()
            .await
            .insert(name.to_string(), replicas);
    }

    pub async fn set_pod_logs(&self, pod: &str, logs: &str) {
        self.pod_logs
            .write()
            .await
            .insert(pod.to_string(), logs.to_string());
    }

    pub async fn forbid_namespace(&self, namespace: &str) {
        self.forbidden_namespaces
            .write()
            .await
            .push(namespace.to_string());
    }

    pub async fn replicas(&self, deployment: &str) -> Option<u32> {
        self.deployments.read().await.get(deployment).copied()
    }

    pub async fn operations(&self) -> Vec<String> {
        self.operations.read().await.clone()
    }

    async fn check_namespace(&self, namespace: &str) -> Result<()> {
        if self
            .forbidden_namespaces
            .read()
            .await
            .iter()
            .any(|n| n == namespace)
        {
            return Err(OpsError::unauthorized(format!(
                "pods is forbidden in namespace {}",
                namespace
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KubernetesBackend for MockKubernetesBackend {
    async fn list_pods(
        &self,
        _cluster: &ClusterEntry,
        namespace: &str,
        _timeout: Duration,
    ) -> Result<Vec<PodSummary>> {
        self.check_namespace(namespace).await?;
        Ok(self
            .pods
            .read()
            .await
            .iter()
            .filter(|p| p.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn get_pod(
        &self,
        _cluster: &ClusterEntry,
        name: &str,
        namespace: &str,
        _timeout: Duration,
    ) -> Result<PodDetail> {
        self.check_namespace(namespace).await?;
        let pods = self.pods.read().await;
        let pod = pods
            .iter()
            .find(|p| p.name == name && p.namespace == namespace)
            .ok_or_else(|| {
                OpsError::not_found(format!("pod '{}' not found in '{}'", name, namespace))
            })?;
        Ok(PodDetail {
            name: pod.name.clone(),
            namespace: pod.namespace.clone(),
            status: pod.status.clone(),
            node: pod.node.clone(),
            ip: pod.ip.clone(),
            containers: vec!["main".to_string()],
            conditions: vec![],
        })
    }

    async fn pod_logs(
        &self,
        _cluster: &ClusterEntry,
        pod: &str,
        namespace: &str,
        _container: Option<&str>,
        tail: u32,
        _timeout: Duration,
    ) -> Result<String> {
        self.check_namespace(namespace).await?;
        let logs = self.pod_logs.read().await;
        let content = logs
            .get(pod)
            .ok_or_else(|| OpsError::not_found(format!("pod '{}' not found", pod)))?;
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(tail as usize);
        Ok(lines[start..].join("\n"))
    }

    async fn scale_deployment(
        &self,
        _cluster: &ClusterEntry,
        deployment: &str,
        namespace: &str,
        replicas: u32,
        _timeout: Duration,
    ) -> Result<()> {
        self.check_namespace(namespace).await?;
        let mut deployments = self.deployments.write().await;
        match deployments.get_mut(deployment) {
            Some(current) => {
                *current = replicas;
                self.operations
                    .write()
                    .await
                    .push(format!("scale {} {}", deployment, replicas));
                Ok(())
            }
            None => Err(OpsError::not_found(format!(
                "deployment '{}' not found",
                deployment
            ))),
        }
    }

    async fn restart_deployment(
        &self,
        _cluster: &ClusterEntry,
        deployment: &str,
        namespace: &str,
        _timeout: Duration,
    ) -> Result<()> {
        self.check_namespace(namespace).await?;
        if !self.deployments.read().await.contains_key(deployment) {
            return Err(OpsError::not_found(format!(
                "deployment '{}' not found",
                deployment
            )));
        }
        self.operations
            .write()
            .await
            .push(format!("restart {}", deployment));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostEntry {
        HostEntry {
            host: "10.0.0.1".to_string(),
            user: "ops".to_string(),
            port: 22,
            key_path: None,
        }
    }

    #[tokio::test]
    async fn echo_round_trips_without_scripting() {
        let ssh = MockSshBackend::new();
        let output = ssh
            .execute(&host(), "echo ok", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.stdout, "ok");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn forced_failure_has_kind() {
        let ssh = MockSshBackend::new();
        ssh.fail_host("10.0.0.1", AdapterErrorKind::Unreachable).await;
        let err = ssh
            .execute(&host(), "uptime", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.adapter_kind(), Some(AdapterErrorKind::Unreachable));
    }

    #[tokio::test]
    async fn stream_yields_lines_and_stops_on_drop() {
        let ssh = MockSshBackend::new();
        ssh.script_stdout("tail -f /var/log/app.log", "one\ntwo\nthree")
            .await;
        let mut stream = ssh.stream(&host(), "tail -f /var/log/app.log").await.unwrap();
        assert_eq!(stream.next_line().await.as_deref(), Some("one"));
        assert_eq!(stream.next_line().await.as_deref(), Some("two"));
        drop(stream); // cancellation path: producer observes closed channel
    }

    #[tokio::test]
    async fn container_not_found_is_distinguishable() {
        let docker = MockContainerBackend::new();
        let err = docker
            .start_container(
                &DockerEndpointEntry::default(),
                &"ghost".to_string(),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert_eq!(err.adapter_kind(), Some(AdapterErrorKind::NotFound));
    }

    #[tokio::test]
    async fn forbidden_namespace_is_unauthorized_not_not_found() {
        let k8s = MockKubernetesBackend::new();
        k8s.forbid_namespace("kube-system").await;
        let cluster = ClusterEntry {
            kubeconfig_path: "/tmp/kubeconfig".into(),
            context: None,
        };
        let err = k8s
            .list_pods(&cluster, "kube-system", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.adapter_kind(), Some(AdapterErrorKind::Unauthorized));
    }

    #[tokio::test]
    async fn scale_updates_replicas() {
        let k8s = MockKubernetesBackend::new();
        k8s.add_deployment("api", 2).await;
        let cluster = ClusterEntry {
            kubeconfig_path: "/tmp/kubeconfig".into(),
            context: None,
        };
        k8s.scale_deployment(&cluster, "api", "default", 5, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(k8s.replicas("api").await, Some(5));
    }
}
