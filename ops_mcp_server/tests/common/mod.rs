//! Shared fixture for the integration tests: a server context wired to
//! mock backends, a temp audit log, and helpers to drive raw frames
//! through the protocol engine.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use backend_interface::mock::{MockContainerBackend, MockKubernetesBackend, MockSshBackend};
use ops_mcp_server::{ProtocolEngine, ServerContext};
use policy_engine::AuditLog;
use server_config::{OpsConfig, ScopeSpec};

/// Staging-flavoured test configuration: kubectl verbs are allowlisted
/// narrowly (`get`, `describe`, `logs`, `scale` but not `delete` or
/// `rollout`), docker is wildcarded.
pub const CONFIG_DOC: &str = r#"
default_profile: staging
profiles:
  staging:
    kubernetes:
      cluster: staging-cluster
      namespace: default
    allowlist:
      kubectl: [get, describe, logs, scale]
      docker: ["*"]
    dangerous_allowed: false
  prod:
    kubernetes:
      cluster: staging-cluster
      namespace: prod
    allowlist:
      kubectl: [get]
hosts:
  h1:
    host: 10.0.0.1
    user: ops
clusters:
  staging-cluster:
    kubeconfig_path: /etc/ops/kubeconfig
    context: staging
"#;

pub struct TestHarness {
    pub ctx: Arc<ServerContext>,
    pub engine: ProtocolEngine,
    pub ssh: Arc<MockSshBackend>,
    pub docker: Arc<MockContainerBackend>,
    pub k8s: Arc<MockKubernetesBackend>,
    pub audit_path: PathBuf,
    _tempdir: TempDir,
}

pub async fn harness(scope: ScopeSpec) -> TestHarness {
    let tempdir = TempDir::new().unwrap();
    let audit_path = tempdir.path().join("audit.log");
    let audit = AuditLog::open(&audit_path).await.unwrap();

    let config = OpsConfig::parse(CONFIG_DOC).unwrap();
    let ssh = Arc::new(MockSshBackend::new());
    let docker = Arc::new(MockContainerBackend::new());
    let k8s = Arc::new(MockKubernetesBackend::new());

    let ctx = ServerContext::new(
        config,
        scope,
        ssh.clone(),
        docker.clone(),
        k8s.clone(),
        audit,
    )
    .unwrap();

    TestHarness {
        engine: ProtocolEngine::new(ctx.clone()),
        ctx,
        ssh,
        docker,
        k8s,
        audit_path,
        _tempdir: tempdir,
    }
}

/// Send a raw frame and parse whatever comes back.
pub async fn rpc(engine: &ProtocolEngine, raw: &str) -> Option<Value> {
    engine
        .process_message(raw)
        .await
        .map(|response| serde_json::from_str(&response).unwrap())
}

/// Send one request envelope.
pub async fn request(engine: &ProtocolEngine, id: Value, method: &str, params: Value) -> Value {
    let frame = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
    .to_string();
    rpc(engine, &frame).await.expect("request got no response")
}

/// Run the `initialize` / `initialized` handshake.
pub async fn handshake(engine: &ProtocolEngine) {
    let response = request(
        engine,
        json!(0),
        "initialize",
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "t", "version": "1" }
        }),
    )
    .await;
    assert!(response.get("error").is_none(), "handshake failed: {response}");

    let note = json!({ "jsonrpc": "2.0", "method": "initialized", "params": {} }).to_string();
    assert!(rpc(engine, &note).await.is_none());
}

/// Call a tool and return the result object.
pub async fn call_tool(engine: &ProtocolEngine, id: i64, name: &str, arguments: Value) -> Value {
    let response = request(
        engine,
        json!(id),
        "tools/call",
        json!({ "name": name, "arguments": arguments }),
    )
    .await;
    assert!(
        response.get("error").is_none(),
        "tools/call returned a protocol error: {response}"
    );
    response["result"].clone()
}

/// First text block of a tool result.
pub fn result_text(result: &Value) -> &str {
    result["content"][0]["text"].as_str().unwrap_or_default()
}

/// Parsed audit records, in write order.
pub async fn read_audit(path: &PathBuf) -> Vec<Value> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect(),
        Err(_) => Vec::new(),
    }
}
