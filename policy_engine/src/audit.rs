//! Append-only audit log.
//!
//! One JSON object per line. Writes funnel through a single writer task;
//! callers block on a flush acknowledgement, so the record is durable in
//! the file before the response leaves the server. Rotation and pruning
//! live outside the core.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use ops_shared_types::{OpsError, Result};

/// One audited tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// UTC wall-clock time the call completed.
    pub timestamp: DateTime<Utc>,
    /// Active profile at dispatch time.
    pub profile: String,
    /// Tool name.
    pub tool: String,
    /// Stable fingerprint of the argument object.
    pub args_fingerprint: String,
    /// JSON-RPC request id, if the call carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    /// Target context (host/cluster/namespace/container).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Outcome kind: `ok`, an adapter sub-kind, `policy_refused`, ...
    pub status: String,
    pub bytes_in: usize,
    pub bytes_out: usize,
    pub duration_ms: u64,
}

/// Fingerprint of an argument object: sha256 over its canonical JSON form,
/// truncated to 16 hex chars. Object keys serialize sorted, so the same
/// arguments always hash the same.
pub fn fingerprint_args(args: &Value) -> String {
    let canonical = serde_json::to_string(args).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

enum AuditMessage {
    Write {
        record: Box<AuditRecord>,
        ack: oneshot::Sender<()>,
    },
}

/// Handle to the audit writer task. Cheap to clone.
#[derive(Clone)]
pub struct AuditLog {
    tx: Option<mpsc::Sender<AuditMessage>>,
}

impl AuditLog {
    /// Open the log for appending and spawn the writer task.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| OpsError::Config(format!("audit log dir: {}", e)))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| OpsError::Config(format!("audit log {}: {}", path.display(), e)))?;

        let (tx, mut rx) = mpsc::channel::<AuditMessage>(64);
        tokio::spawn(async move {
            while let Some(AuditMessage::Write { record, ack }) = rx.recv().await {
                let mut line = match serde_json::to_string(&record) {
                    Ok(line) => line,
                    Err(e) => {
                        error!(error = %e, "unserializable audit record");
                        let _ = ack.send(());
                        continue;
                    }
                };
                line.push('\n');
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    error!(error = %e, "audit write failed");
                } else if let Err(e) = file.flush().await {
                    error!(error = %e, "audit flush failed");
                }
                // Ack after the flush so the caller's response never
                // outruns the trail.
                let _ = ack.send(());
            }
        });

        Ok(Self { tx: Some(tx) })
    }

    /// A disabled log: `record` becomes a no-op.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Append one record and wait until it is flushed.
    pub async fn record(&self, record: AuditRecord) -> Result<()> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        let (ack, done) = oneshot::channel();
        tx.send(AuditMessage::Write {
            record: Box::new(record),
            ack,
        })
        .await
        .map_err(|_| OpsError::Internal("audit writer gone".to_string()))?;
        if done.await.is_err() {
            warn!("audit ack dropped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(tool: &str, status: &str) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            profile: "staging".to_string(),
            tool: tool.to_string(),
            args_fingerprint: fingerprint_args(&json!({"server": "h1"})),
            request_id: Some(json!(7)),
            target: Some("h1".to_string()),
            status: status.to_string(),
            bytes_in: 24,
            bytes_out: 120,
            duration_ms: 12,
        }
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = fingerprint_args(&json!({"b": 2, "a": 1}));
        let b = fingerprint_args(&json!({"a": 1, "b": 2}));
        assert_eq!(a, b); // key order does not matter
        assert_eq!(a.len(), 16);
        assert_ne!(a, fingerprint_args(&json!({"a": 1})));
    }

    #[tokio::test]
    async fn records_append_as_json_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::open(&path).await.unwrap();

        log.record(record("ssh_execute", "ok")).await.unwrap();
        log.record(record("k8s_scale_deployment", "policy_refused"))
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.tool, "ssh_execute");
        assert_eq!(first.status, "ok");

        let second: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.status, "policy_refused");
    }

    #[tokio::test]
    async fn disabled_log_accepts_records() {
        let log = AuditLog::disabled();
        log.record(record("ping", "ok")).await.unwrap();
    }
}
