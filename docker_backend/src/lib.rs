//! Docker-CLI container adapter.
//!
//! Drives a Docker daemon through the `docker` binary, optionally against a
//! remote endpoint (`-H ssh://...` or `-H tcp://...`). Output of `docker ps`
//! is consumed in its JSON line format. Concurrency per endpoint is bounded
//! by a semaphore.

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

use backend_interface::{ContainerBackend, LogTailOptions};
use ops_shared_types::{
    CommandOutput, ContainerRef, ContainerSummary, DockerEndpointEntry, OpsError, Result,
};

/// Configuration for the Docker CLI adapter.
#[derive(Debug, Clone)]
pub struct DockerCliConfig {
    /// Path to the docker binary (default: "docker").
    pub docker_binary: PathBuf,
    /// Maximum concurrent commands per endpoint.
    pub max_leases_per_endpoint: usize,
    /// How long a caller waits for a lease.
    pub lease_timeout: Duration,
}

impl Default for DockerCliConfig {
    fn default() -> Self {
        Self {
            docker_binary: PathBuf::from("docker"),
            max_leases_per_endpoint: 4,
            lease_timeout: Duration::from_secs(15),
        }
    }
}

/// One line of `docker ps --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "Image")]
    image: String,
    #[serde(rename = "Status")]
    status: String,
}

impl From<PsLine> for ContainerSummary {
    fn from(line: PsLine) -> Self {
        Self {
            id: line.id,
            name: line.names,
            image: line.image,
            status: line.status,
        }
    }
}

/// CLI-based Docker backend.
pub struct DockerCliBackend {
    config: DockerCliConfig,
    leases: RwLock<HashMap<String, Arc<Semaphore>>>,
}

impl DockerCliBackend {
    pub fn new(config: DockerCliConfig) -> Self {
        Self {
            config,
            leases: RwLock::new(HashMap::new()),
        }
    }

    fn endpoint_key(endpoint: &DockerEndpointEntry) -> String {
        endpoint.host.clone().unwrap_or_else(|| "local".to_string())
    }

    async fn lease_for(&self, endpoint: &DockerEndpointEntry) -> Arc<Semaphore> {
        let key = Self::endpoint_key(endpoint);
        if let Some(semaphore) = self.leases.read().await.get(&key) {
            return semaphore.clone();
        }
        self.leases
            .write()
            .await
            .entry(key)
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_leases_per_endpoint)))
            .clone()
    }

    /// Run one docker command with a lease and a timeout.
    async fn exec_docker(
        &self,
        endpoint: &DockerEndpointEntry,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let semaphore = self.lease_for(endpoint).await;
        let _permit = tokio::time::timeout(self.config.lease_timeout, semaphore.acquire_owned())
            .await
            .map_err(|_| OpsError::transient("docker lease acquisition timed out"))?
            .map_err(|_| OpsError::unreachable("docker lease pool closed"))?;

        let mut command = Command::new(&self.config.docker_binary);
        if let Some(host) = &endpoint.host {
            command.arg("-H").arg(host);
        }
        command.args(args);

        debug!(endpoint = %Self::endpoint_key(endpoint), ?args, "docker exec");

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
        .map_err(|_| OpsError::timeout(format!("docker command timed out after {:?}", timeout)))?
        .map_err(|e| OpsError::unreachable(format!("failed to spawn docker: {}", e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Map a failed docker invocation to a typed adapter condition.
    fn classify_failure(stderr: &str) -> OpsError {
        let lower = stderr.to_ascii_lowercase();
        if lower.contains("no such container") || lower.contains("no such object") {
            OpsError::not_found(stderr.trim().to_string())
        } else if lower.contains("permission denied") {
            OpsError::unauthorized(stderr.trim().to_string())
        } else if lower.contains("cannot connect to the docker daemon")
            || lower.contains("connection refused")
            || lower.contains("error during connect")
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

    fn parse_ps_lines(stdout: &str) -> Result<Vec<ContainerSummary>> {
        let mut containers = Vec::new();
        for line in stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed: PsLine = serde_json::from_str(line).map_err(|e| {
                OpsError::permanent(format!("unparseable docker ps line: {}", e))
            })?;
            containers.push(parsed.into());
        }
        Ok(containers)
    }
}

#[async_trait]
impl ContainerBackend for DockerCliBackend {
    async fn list_containers(
        &self,
        endpoint: &DockerEndpointEntry,
        all: bool,
        timeout: Duration,
    ) -> Result<Vec<ContainerSummary>> {
        let mut args = vec!["ps", "--format", "{{json .}}"];
        if all {
            args.insert(1, "-a");
        }
        let output = Self::check(self.exec_docker(endpoint, &args, timeout).await?)?;
        Self::parse_ps_lines(&output.stdout)
    }

    async fn start_container(
        &self,
        endpoint: &DockerEndpointEntry,
        container: &ContainerRef,
        timeout: Duration,
    ) -> Result<()> {
        Self::check(
            self.exec_docker(endpoint, &["start", container.as_str()], timeout)
                .await?,
        )?;
        Ok(())
    }

    async fn stop_container(
        &self,
        endpoint: &DockerEndpointEntry,
        container: &ContainerRef,
        stop_timeout_secs: u32,
        timeout: Duration,
    ) -> Result<()> {
        let grace = stop_timeout_secs.to_string();
        Self::check(
            self.exec_docker(
                endpoint,
                &["stop", "-t", grace.as_str(), container.as_str()],
                timeout,
            )
            .await?,
        )?;
        Ok(())
    }

    async fn restart_container(
        &self,
        endpoint: &DockerEndpointEntry,
        container: &ContainerRef,
        timeout: Duration,
    ) -> Result<()> {
        Self::check(
            self.exec_docker(endpoint, &["restart", container.as_str()], timeout)
                .await?,
        )?;
        Ok(())
    }

    async fn container_logs(
        &self,
        endpoint: &DockerEndpointEntry,
        container: &ContainerRef,
        options: &LogTailOptions,
        timeout: Duration,
    ) -> Result<String> {
        let tail = options.tail.to_string();
        let output = Self::check(
            self.exec_docker(
                endpoint,
                &["logs", "--tail", tail.as_str(), container.as_str()],
                timeout,
            )
            .await?,
        )?;

        // The daemon splits the container's stdout/stderr across both
        // streams; present them interleaved the way `docker logs` does.
        let mut combined = output.stdout;
        if !output.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&output.stderr);
        }

        match &options.filter {
            Some(filter) => Ok(combined
                .lines()
                .filter(|l| l.contains(filter.as_str()))
                .collect::<Vec<_>>()
                .join("\n")),
            None => Ok(combined),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ops_shared_types::AdapterErrorKind;

    #[test]
    fn ps_json_lines_parse() {
        let stdout = concat!(
            r#"{"ID":"a1b2c3","Names":"web","Image":"nginx:1.25","Status":"Up 3 hours"}"#,
            "\n",
            r#"{"ID":"d4e5f6","Names":"worker","Image":"app:latest","Status":"Exited (0) 2 days ago"}"#,
            "\n",
        );
        let containers = DockerCliBackend::parse_ps_lines(stdout).unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "web");
        assert_eq!(containers[1].status, "Exited (0) 2 days ago");
    }

    #[test]
    fn empty_ps_output_is_empty_list() {
        assert!(DockerCliBackend::parse_ps_lines("\n").unwrap().is_empty());
    }

    #[test]
    fn missing_container_classifies_as_not_found() {
        let err =
            DockerCliBackend::classify_failure("Error response from daemon: No such container: ghost");
        assert_eq!(err.adapter_kind(), Some(AdapterErrorKind::NotFound));
    }

    #[test]
    fn daemon_down_classifies_as_unreachable() {
        let err = DockerCliBackend::classify_failure(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
        );
        assert_eq!(err.adapter_kind(), Some(AdapterErrorKind::Unreachable));
    }

    #[test]
    fn socket_permission_classifies_as_unauthorized() {
        let err = DockerCliBackend::classify_failure(
            "permission denied while trying to connect to the Docker daemon socket",
        );
        assert_eq!(err.adapter_kind(), Some(AdapterErrorKind::Unauthorized));
    }
}
