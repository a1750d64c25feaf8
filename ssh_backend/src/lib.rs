//! OpenSSH-CLI SSH adapter.
//!
//! Executes remote commands through the `ssh` binary. Connections are
//! multiplexed per host with OpenSSH control masters (`ControlMaster=auto`)
//! so repeated calls within a session reuse one transport. Concurrency per
//! host is bounded by a semaphore; lease acquisition blocks with a timeout.
//!
//! # Requirements
//!
//! - `ssh` binary in PATH
//! - key-based or agent authentication (no interactive prompts;
//!   `BatchMode=yes` is forced)

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{debug, warn};

use backend_interface::{LineStream, LogTailOptions, SshBackend};
use ops_shared_types::{CommandOutput, HostEntry, OpsError, Result};

/// Configuration for the SSH adapter.
#[derive(Debug, Clone)]
pub struct SshCliConfig {
    /// Path to the ssh binary (default: "ssh").
    pub ssh_binary: PathBuf,
    /// Directory for control sockets.
    pub control_dir: PathBuf,
    /// TCP connect timeout passed to ssh.
    pub connect_timeout: Duration,
    /// How long the control master lingers after the last session.
    pub control_persist_secs: u32,
    /// Maximum concurrent commands per host.
    pub max_leases_per_host: usize,
    /// How long a caller waits for a lease before giving up.
    pub lease_timeout: Duration,
}

impl Default for SshCliConfig {
    fn default() -> Self {
        Self {
            ssh_binary: PathBuf::from("ssh"),
            control_dir: std::env::temp_dir().join("ops-core-ssh"),
            connect_timeout: Duration::from_secs(10),
            control_persist_secs: 60,
            max_leases_per_host: 4,
            lease_timeout: Duration::from_secs(15),
        }
    }
}

/// Per-host pool entry: a lease semaphore plus the control socket path.
struct HostPool {
    semaphore: Arc<Semaphore>,
    control_path: PathBuf,
}

/// CLI-based SSH backend with per-host connection pooling.
pub struct SshCliBackend {
    config: SshCliConfig,
    pools: RwLock<HashMap<String, Arc<HostPool>>>,
}

impl SshCliBackend {
    pub fn new(config: SshCliConfig) -> Self {
        Self {
            config,
            pools: RwLock::new(HashMap::new()),
        }
    }

    fn pool_key(host: &HostEntry) -> String {
        format!("{}@{}:{}", host.user, host.host, host.port)
    }

    async fn pool_for(&self, host: &HostEntry) -> Arc<HostPool> {
        let key = Self::pool_key(host);
        if let Some(pool) = self.pools.read().await.get(&key) {
            return pool.clone();
        }
        let mut pools = self.pools.write().await;
        pools
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(HostPool {
                    semaphore: Arc::new(Semaphore::new(self.config.max_leases_per_host)),
                    control_path: self
                        .config
                        .control_dir
                        .join(format!("{}.sock", key.replace(['@', ':'], "_"))),
                })
            })
            .clone()
    }

    /// Bounded lease acquisition against the per-host semaphore.
    async fn acquire_lease(
        &self,
        pool: &Arc<HostPool>,
        host: &HostEntry,
    ) -> Result<tokio::sync::OwnedSemaphorePermit> {
        tokio::time::timeout(
            self.config.lease_timeout,
            pool.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            OpsError::transient(format!(
                "lease acquisition timed out for {}",
                Self::pool_key(host)
            ))
        })?
        .map_err(|_| OpsError::unreachable("connection pool closed"))
    }

    fn build_args(&self, host: &HostEntry, control_path: &std::path::Path) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout.as_secs()),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", control_path.display()),
            "-o".to_string(),
            format!("ControlPersist={}", self.config.control_persist_secs),
        ];
        if let Some(key_path) = &host.key_path {
            args.push("-i".to_string());
            args.push(key_path.display().to_string());
        }
        if host.port != 22 {
            args.push("-p".to_string());
            args.push(host.port.to_string());
        }
        args.push(format!("{}@{}", host.user, host.host));
        args
    }

    /// Classify an ssh-level failure (exit code 255) from its stderr.
    fn classify_ssh_failure(stderr: &str) -> OpsError {
        let lower = stderr.to_ascii_lowercase();
        if lower.contains("permission denied") || lower.contains("authentication") {
            OpsError::unauthorized(stderr.trim().to_string())
        } else if lower.contains("connection timed out")
            || lower.contains("connection refused")
            || lower.contains("could not resolve")
            || lower.contains("no route to host")
        {
            OpsError::unreachable(stderr.trim().to_string())
        } else if lower.contains("connection closed") || lower.contains("broken pipe") {
            OpsError::transient(stderr.trim().to_string())
        } else {
            OpsError::unreachable(stderr.trim().to_string())
        }
    }

    /// Tear down the control master for a pool entry, best effort.
    async fn close_master(&self, host: &HostEntry, control_path: &std::path::Path) {
        let status = Command::new(&self.config.ssh_binary)
            .arg("-O")
            .arg("exit")
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .arg(format!("{}@{}", host.user, host.host))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            debug!(host = %host.host, error = %e, "control master teardown failed");
        }
    }
}

#[async_trait]
impl SshBackend for SshCliBackend {
    async fn execute(
        &self,
        host: &HostEntry,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        tokio::fs::create_dir_all(&self.config.control_dir)
            .await
            .map_err(|e| OpsError::Internal(format!("control dir: {}", e)))?;

        let pool = self.pool_for(host).await;
        let _permit = self.acquire_lease(&pool, host).await?;

        debug!(host = %host.host, command, "ssh execute");

        let output = tokio::time::timeout(
            timeout,
            Command::new(&self.config.ssh_binary)
                .args(self.build_args(host, &pool.control_path))
                .arg(command)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| OpsError::timeout(format!("command timed out after {:?}", timeout)))?
        .map_err(|e| OpsError::unreachable(format!("failed to spawn ssh: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        // 255 is ssh's own failure code; anything else is the remote command.
        if exit_code == 255 {
            let err = Self::classify_ssh_failure(&stderr);
            if err.adapter_kind() == Some(ops_shared_types::AdapterErrorKind::Unauthorized) {
                self.invalidate(host).await;
            }
            return Err(err);
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn stream(&self, host: &HostEntry, command: &str) -> Result<LineStream> {
        tokio::fs::create_dir_all(&self.config.control_dir)
            .await
            .map_err(|e| OpsError::Internal(format!("control dir: {}", e)))?;

        let pool = self.pool_for(host).await;
        let permit = self.acquire_lease(&pool, host).await?;

        let mut child = Command::new(&self.config.ssh_binary)
            .args(self.build_args(host, &pool.control_path))
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OpsError::unreachable(format!("failed to spawn ssh: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OpsError::Internal("child stdout not captured".to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        let host_label = host.host.clone();
        tokio::spawn(async move {
            // The permit is held for the lifetime of the stream.
            let _permit = permit;
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            // Receiver dropped: cancellation. Terminate the
                            // remote process rather than letting it run on.
                            if let Err(e) = child.kill().await {
                                warn!(host = %host_label, error = %e, "failed to kill streamed ssh");
                            }
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(host = %host_label, error = %e, "stream read error");
                        break;
                    }
                }
            }
            let _ = child.wait().await;
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
        let mut command = format!("tail -n {} {}", options.tail, shell_quote(path));
        if let Some(filter) = &options.filter {
            command.push_str(&format!(" | grep -F -- {}", shell_quote(filter)));
        }

        let output = self.execute(host, &command, timeout).await?;
        if output.exit_code != 0 && !output.stderr.is_empty() {
            let lower = output.stderr.to_ascii_lowercase();
            if lower.contains("no such file") {
                return Err(OpsError::not_found(output.stderr.trim().to_string()));
            }
            // grep exits 1 on no match with empty stderr; real failures carry
            // a message.
            return Err(OpsError::permanent(output.stderr.trim().to_string()));
        }
        Ok(output.stdout)
    }

    async fn invalidate(&self, host: &HostEntry) {
        let key = Self::pool_key(host);
        let removed = self.pools.write().await.remove(&key);
        if let Some(pool) = removed {
            self.close_master(host, &pool.control_path).await;
            debug!(host = %host.host, "pool entry invalidated");
        }
    }

    async fn invalidate_all(&self) {
        let drained: Vec<(String, Arc<HostPool>)> =
            self.pools.write().await.drain().collect();
        for (key, pool) in drained {
            // Best effort: remove the socket; the master exits on persist
            // timeout if the -O exit path is unavailable.
            let _ = tokio::fs::remove_file(&pool.control_path).await;
            debug!(pool = %key, "pool entry dropped");
        }
    }
}

/// Quote a string for POSIX sh.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ops_shared_types::AdapterErrorKind;

    fn host() -> HostEntry {
        HostEntry {
            host: "10.2.0.7".to_string(),
            user: "deploy".to_string(),
            port: 2222,
            key_path: Some(PathBuf::from("/home/deploy/.ssh/id_ed25519")),
        }
    }

    #[test]
    fn args_carry_identity_port_and_multiplexing() {
        let backend = SshCliBackend::new(SshCliConfig::default());
        let args = backend.build_args(&host(), std::path::Path::new("/tmp/ctl.sock"));

        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ControlMaster=auto".to_string()));
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"-p".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert_eq!(args.last().unwrap(), "deploy@10.2.0.7");
    }

    #[test]
    fn default_port_omits_p_flag() {
        let backend = SshCliBackend::new(SshCliConfig::default());
        let mut entry = host();
        entry.port = 22;
        let args = backend.build_args(&entry, std::path::Path::new("/tmp/ctl.sock"));
        assert!(!args.contains(&"-p".to_string()));
    }

    #[test]
    fn auth_failure_classifies_as_unauthorized() {
        let err =
            SshCliBackend::classify_ssh_failure("deploy@10.2.0.7: Permission denied (publickey).");
        assert_eq!(err.adapter_kind(), Some(AdapterErrorKind::Unauthorized));
    }

    #[test]
    fn network_failures_classify_as_unreachable() {
        for stderr in [
            "ssh: connect to host 10.2.0.7 port 22: Connection timed out",
            "ssh: connect to host 10.2.0.7 port 22: Connection refused",
            "ssh: Could not resolve hostname web9: Name or service not known",
        ] {
            let err = SshCliBackend::classify_ssh_failure(stderr);
            assert_eq!(err.adapter_kind(), Some(AdapterErrorKind::Unreachable));
        }
    }

    #[test]
    fn dropped_connection_classifies_as_transient() {
        let err = SshCliBackend::classify_ssh_failure("Connection closed by remote host");
        assert_eq!(err.adapter_kind(), Some(AdapterErrorKind::Transient));
    }

    #[test]
    fn shell_quote_wraps_and_escapes() {
        assert_eq!(shell_quote("/var/log/app.log"), "'/var/log/app.log'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn pool_entries_are_per_host() {
        let backend = SshCliBackend::new(SshCliConfig::default());
        let a = backend.pool_for(&host()).await;
        let b = backend.pool_for(&host()).await;
        assert!(Arc::ptr_eq(&a, &b));

        let mut other = host();
        other.host = "10.2.0.8".to_string();
        let c = backend.pool_for(&other).await;
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn invalidate_drops_the_pool_entry() {
        let backend = SshCliBackend::new(SshCliConfig::default());
        let _ = backend.pool_for(&host()).await;
        assert_eq!(backend.pools.read().await.len(), 1);
        backend.invalidate_all().await;
        assert!(backend.pools.read().await.is_empty());
    }
}
