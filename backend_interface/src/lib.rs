use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use ops_shared_types::{
    ClusterEntry, CommandOutput, ContainerRef, ContainerSummary, DockerEndpointEntry, HostEntry,
    PodDetail, PodSummary, Result,
};

pub mod mock;

/// Options for retrieving a log tail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTailOptions {
    /// Return only the last N lines.
    pub tail: u32,
    /// Optional substring/grep filter applied server-side.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LogTailOptions {
    fn default() -> Self {
        Self {
            tail: 100,
            filter: None,
        }
    }
}

/// A stream of output lines from a remote process.
///
/// Dropping the stream cancels the remote process: the producing adapter
/// observes the closed channel and tears the subprocess down.
pub struct LineStream {
    rx: mpsc::Receiver<String>,
}

impl LineStream {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Next output line, or None when the remote side finished.
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Capability contract for SSH command execution.
///
/// Connections are pooled per host and reused across calls; a pool entry is
/// discarded on authentication failure or any transport-level error. Lease
/// acquisition is bounded per endpoint and blocks with a timeout.
#[async_trait]
pub trait SshBackend: Send + Sync {
    /// Execute a single command, bounded by `timeout`.
    async fn execute(
        &self,
        host: &HostEntry,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput>;

    /// Start a command and stream its stdout lines until the caller drops
    /// the stream. Cancellation terminates the remote process.
    async fn stream(&self, host: &HostEntry, command: &str) -> Result<LineStream>;

    /// Last N lines of a remote file, optionally filtered.
    async fn tail_file(
        &self,
        host: &HostEntry,
        path: &str,
        options: &LogTailOptions,
        timeout: Duration,
    ) -> Result<String>;

    /// Drop any pooled connection for the host (after auth failures).
    async fn invalidate(&self, host: &HostEntry);

    /// Drop every pooled connection (profile switch).
    async fn invalidate_all(&self);
}

/// Capability contract for Docker container control.
///
/// Implementations MUST surface a distinguishable not-found condition
/// (`AdapterErrorKind::NotFound`).
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    async fn list_containers(
        &self,
        endpoint: &DockerEndpointEntry,
        all: bool,
        timeout: Duration,
    ) -> Result<Vec<ContainerSummary>>;

    async fn start_container(
        &self,
        endpoint: &DockerEndpointEntry,
        container: &ContainerRef,
        timeout: Duration,
    ) -> Result<()>;

    /// Stop with a grace period before the daemon kills the container.
    async fn stop_container(
        &self,
        endpoint: &DockerEndpointEntry,
        container: &ContainerRef,
        stop_timeout_secs: u32,
        timeout: Duration,
    ) -> Result<()>;

    async fn restart_container(
        &self,
        endpoint: &DockerEndpointEntry,
        container: &ContainerRef,
        timeout: Duration,
    ) -> Result<()>;

    async fn container_logs(
        &self,
        endpoint: &DockerEndpointEntry,
        container: &ContainerRef,
        options: &LogTailOptions,
        timeout: Duration,
    ) -> Result<String>;
}

/// Capability contract for Kubernetes resource access.
///
/// Implementations MUST surface authorization failures
/// (`AdapterErrorKind::Unauthorized`) distinctly from not-found.
#[async_trait]
pub trait KubernetesBackend: Send + Sync {
    async fn list_pods(
        &self,
        cluster: &ClusterEntry,
        namespace: &str,
        timeout: Duration,
    ) -> Result<Vec<PodSummary>>;

    async fn get_pod(
        &self,
        cluster: &ClusterEntry,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<PodDetail>;

    async fn pod_logs(
        &self,
        cluster: &ClusterEntry,
        pod: &str,
        namespace: &str,
        container: Option<&str>,
        tail: u32,
        timeout: Duration,
    ) -> Result<String>;

    async fn scale_deployment(
        &self,
        cluster: &ClusterEntry,
        deployment: &str,
        namespace: &str,
        replicas: u32,
        timeout: Duration,
    ) -> Result<()>;

    /// Trigger a rolling restart of a deployment.
    async fn restart_deployment(
        &self,
        cluster: &ClusterEntry,
        deployment: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<()>;
}
