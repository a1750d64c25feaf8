//! Dispatch-level integration tests: tool execution against mock
//! backends, policy admission, redaction, and the audit trail.

mod common;

use serde_json::json;
use server_config::ScopeSpec;

use common::{call_tool, handshake, harness, read_audit, request, result_text};

// ============================================================================
// Successful execution
// ============================================================================

#[tokio::test]
async fn ssh_execute_round_trips_stdout_and_exit_code() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;

    let result = call_tool(
        &h.engine,
        3,
        "ssh_execute",
        json!({ "server": "h1", "command": "echo ok" }),
    )
    .await;

    assert_eq!(result["isError"], false);
    assert!(result_text(&result).contains("ok"));
    assert_eq!(result["structuredContent"]["exit_code"], 0);
    assert_eq!(result["structuredContent"]["stdout"], "ok");

    let records = read_audit(&h.audit_path).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["tool"], "ssh_execute");
    assert_eq!(records[0]["status"], "exit_0");
    assert_eq!(records[0]["profile"], "staging");
    assert_eq!(records[0]["request_id"], 3);
    assert_eq!(records[0]["args_fingerprint"].as_str().unwrap().len(), 16);
}

#[tokio::test]
async fn nonzero_exit_is_an_error_result_not_a_protocol_error() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;
    h.ssh
        .script(
            "false",
            ops_shared_types::CommandOutput {
                stdout: String::new(),
                stderr: "boom".to_string(),
                exit_code: 1,
            },
        )
        .await;

    let result = call_tool(
        &h.engine,
        4,
        "ssh_execute",
        json!({ "server": "h1", "command": "false" }),
    )
    .await;

    assert_eq!(result["isError"], true);
    assert!(result_text(&result).contains("Exit Code: 1"));
    assert_eq!(result["structuredContent"]["exit_code"], 1);

    let records = read_audit(&h.audit_path).await;
    assert_eq!(records[0]["status"], "exit_1");
}

#[tokio::test]
async fn query_logs_tails_through_the_ssh_backend() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;
    h.ssh
        .script_stdout(
            "tail -n 50 /var/log/app.log | grep -F 'ERROR'",
            "ERROR one\nERROR two",
        )
        .await;

    let result = call_tool(
        &h.engine,
        5,
        "query_logs",
        json!({ "server": "h1", "log_path": "/var/log/app.log", "tail": 50, "filter": "ERROR" }),
    )
    .await;

    assert_eq!(result["isError"], false);
    assert!(result_text(&result).contains("ERROR two"));
}

#[tokio::test]
async fn query_logs_follow_collects_streamed_lines() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;
    h.ssh
        .script_stdout("tail -n 5 -F '/var/log/app.log'", "alpha\nbeta")
        .await;

    let result = call_tool(
        &h.engine,
        6,
        "query_logs",
        json!({
            "server": "h1",
            "log_path": "/var/log/app.log",
            "tail": 5,
            "follow": true,
            "timeout": 2
        }),
    )
    .await;

    assert_eq!(result["isError"], false);
    let text = result_text(&result);
    assert!(text.contains("alpha"));
    assert!(text.contains("beta"));
}

#[tokio::test]
async fn system_info_aggregates_host_diagnostics() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;
    h.ssh
        .script_stdout("uptime", "up 12 days, load average: 0.42, 0.40, 0.38")
        .await;
    h.ssh.script_stdout("free -h", "Mem: 64Gi 12Gi").await;
    h.ssh.script_stdout("uname -a", "Linux h1 6.8.0").await;

    let result = call_tool(&h.engine, 7, "system_info", json!({ "server": "h1" })).await;

    assert_eq!(result["isError"], false);
    let text = result_text(&result);
    assert!(text.contains("load average"));
    assert!(text.contains("Mem:"));
    assert!(text.contains("Linux h1"));
}

// ============================================================================
// Redaction
// ============================================================================

#[tokio::test]
async fn adapter_output_is_redacted_in_text_and_structured_payloads() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;
    h.ssh
        .script_stdout("cat /etc/app.env", "API_TOKEN: abc123\nok")
        .await;

    let result = call_tool(
        &h.engine,
        8,
        "ssh_execute",
        json!({ "server": "h1", "command": "cat /etc/app.env" }),
    )
    .await;

    let text = result_text(&result);
    assert!(text.contains("API_TOKEN: [REDACTED]"));
    assert!(!text.contains("abc123"));
    assert!(text.contains("ok"));

    let stdout = result["structuredContent"]["stdout"].as_str().unwrap();
    assert_eq!(stdout, "API_TOKEN: [REDACTED]\nok");
}

#[tokio::test]
async fn error_paths_are_redacted_too() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;
    h.ssh
        .fail_host("10.0.0.1", ops_shared_types::AdapterErrorKind::Unreachable)
        .await;

    let result = call_tool(
        &h.engine,
        9,
        "ssh_execute",
        json!({ "server": "h1", "command": "uptime" }),
    )
    .await;

    assert_eq!(result["isError"], true);
    assert!(result_text(&result).starts_with("Unreachable:"));
    assert_eq!(result["structuredContent"]["error_kind"], "unreachable");

    let records = read_audit(&h.audit_path).await;
    assert_eq!(records[0]["status"], "unreachable");
}

// ============================================================================
// Scope and policy
// ============================================================================

#[tokio::test]
async fn out_of_scope_tool_is_refused_with_audit_but_without_adapter_call() {
    let h = harness(ScopeSpec::Standard).await;
    handshake(&h.engine).await;
    h.k8s.add_deployment("api", 2).await;

    let result = call_tool(
        &h.engine,
        4,
        "k8s_scale_deployment",
        json!({ "deployment": "api", "replicas": 3 }),
    )
    .await;

    assert_eq!(result["isError"], true);
    assert!(result_text(&result).starts_with("PolicyRefusal:"));

    // No adapter side effect, but a policy-refusal audit record.
    assert!(h.k8s.operations().await.is_empty());
    assert_eq!(h.k8s.replicas("api").await, Some(2));
    let records = read_audit(&h.audit_path).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "policy_refused");
    assert_eq!(records[0]["tool"], "k8s_scale_deployment");
}

#[tokio::test]
async fn allowlisted_passthrough_runs_and_unlisted_verb_is_refused() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;

    let allowed = call_tool(
        &h.engine,
        10,
        "ssh_execute",
        json!({ "server": "h1", "command": "kubectl get pods" }),
    )
    .await;
    assert_eq!(allowed["isError"], false);
    assert_eq!(h.ssh.calls().await.len(), 1);

    let refused = call_tool(
        &h.engine,
        11,
        "ssh_execute",
        json!({ "server": "h1", "command": "kubectl delete pod api-1" }),
    )
    .await;
    assert_eq!(refused["isError"], true);
    assert!(result_text(&refused).starts_with("PolicyRefusal:"));
    assert!(result_text(&refused).contains("kubectl delete"));

    // The refusal never reached the backend.
    assert_eq!(h.ssh.calls().await.len(), 1);
}

#[tokio::test]
async fn dangerous_flags_are_refused_unless_profile_opts_in() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;

    let refused = call_tool(
        &h.engine,
        12,
        "ssh_execute",
        json!({ "server": "h1", "command": "kubectl scale deploy/api --force" }),
    )
    .await;
    assert_eq!(refused["isError"], true);
    assert!(result_text(&refused).contains("--force"));
    assert!(h.ssh.calls().await.is_empty());
}

#[tokio::test]
async fn mutation_tool_allowed_by_profile_reaches_the_adapter() {
    let h = harness(ScopeSpec::All).await;
    handshake(&h.engine).await;
    h.k8s.add_deployment("api", 2).await;

    let result = call_tool(
        &h.engine,
        13,
        "k8s_scale_deployment",
        json!({ "deployment": "api", "replicas": 5 }),
    )
    .await;

    assert_eq!(result["isError"], false);
    assert!(result_text(&result).contains("scaled deployment api to 5"));
    assert_eq!(h.k8s.replicas("api").await, Some(5));

    let records = read_audit(&h.audit_path).await;
    assert_eq!(records[0]["status"], "ok");
}

#[tokio::test]
async fn mutation_tool_with_unlisted_verb_is_refused_before_side_effects() {
    // `rollout` is not in the staging kubectl allowlist.
    let h = harness(ScopeSpec::All).await;
    handshake(&h.engine).await;
    h.k8s.add_deployment("api", 2).await;

    let result = call_tool(
        &h.engine,
        14,
        "k8s_restart_deployment",
        json!({ "deployment": "api" }),
    )
    .await;

    assert_eq!(result["isError"], true);
    assert!(result_text(&result).starts_with("PolicyRefusal:"));
    assert!(h.k8s.operations().await.is_empty());
}

// ============================================================================
// Validation and protocol-level failures
// ============================================================================

#[tokio::test]
async fn missing_required_argument_is_invalid_params_with_path() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;

    let response = request(
        &h.engine,
        json!(15),
        "tools/call",
        json!({ "name": "ssh_execute", "arguments": { "server": "h1" } }),
    )
    .await;

    assert_eq!(response["error"]["code"], -32602);
    assert_eq!(response["error"]["data"]["path"], "command");
}

#[tokio::test]
async fn unknown_tool_name_is_method_not_found() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;

    let response = request(
        &h.engine,
        json!(16),
        "tools/call",
        json!({ "name": "no_such_tool", "arguments": {} }),
    )
    .await;
    assert_eq!(response["error"]["code"], -32601);
}

#[tokio::test]
async fn absent_arguments_default_to_empty_object() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;

    let response = request(
        &h.engine,
        json!(17),
        "tools/call",
        json!({ "name": "context_show" }),
    )
    .await;
    assert!(response.get("error").is_none());
    assert!(result_text(&response["result"]).contains("Profile: staging"));
}

#[tokio::test]
async fn oversized_timeout_is_clamped_not_rejected() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;

    let result = call_tool(
        &h.engine,
        18,
        "ssh_execute",
        json!({ "server": "h1", "command": "echo ok", "timeout": 10000 }),
    )
    .await;
    assert_eq!(result["isError"], false);
    assert!(result_text(&result).contains("ok"));
}

#[tokio::test]
async fn unknown_server_is_a_validation_error_result() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;

    let result = call_tool(
        &h.engine,
        19,
        "ssh_execute",
        json!({ "server": "ghost", "command": "uptime" }),
    )
    .await;
    assert_eq!(result["isError"], true);
    assert!(result_text(&result).starts_with("Validation:"));
    assert!(result_text(&result).contains("ghost"));
}

// ============================================================================
// Docker and Kubernetes flows
// ============================================================================

#[tokio::test]
async fn docker_lifecycle_lists_stops_and_reports_not_found() {
    let h = harness(ScopeSpec::All).await;
    handshake(&h.engine).await;
    h.docker
        .add_container(ops_shared_types::ContainerSummary {
            id: "a1b2c3".to_string(),
            name: "web".to_string(),
            image: "nginx:1.25".to_string(),
            status: "running".to_string(),
        })
        .await;

    let listed = call_tool(&h.engine, 20, "docker_list_containers", json!({})).await;
    assert!(result_text(&listed).contains("web"));
    assert_eq!(listed["structuredContent"][0]["id"], "a1b2c3");

    let stopped = call_tool(
        &h.engine,
        21,
        "docker_stop_container",
        json!({ "container": "web", "timeout": 5 }),
    )
    .await;
    assert_eq!(stopped["isError"], false);
    assert!(result_text(&stopped).contains("stopped container: web"));
    assert_eq!(
        h.docker.operations().await,
        vec![("stop".to_string(), "web".to_string())]
    );

    let missing = call_tool(
        &h.engine,
        22,
        "docker_start_container",
        json!({ "container": "ghost" }),
    )
    .await;
    assert_eq!(missing["isError"], true);
    assert!(result_text(&missing).starts_with("NotFound:"));
    assert_eq!(missing["structuredContent"]["error_kind"], "not_found");
}

#[tokio::test]
async fn k8s_listing_and_unauthorized_namespaces_are_distinct() {
    let h = harness(ScopeSpec::Standard).await;
    handshake(&h.engine).await;
    h.k8s
        .add_pod(ops_shared_types::PodSummary {
            name: "api-1".to_string(),
            namespace: "default".to_string(),
            status: "Running".to_string(),
            node: Some("node-1".to_string()),
            ip: Some("10.42.0.9".to_string()),
        })
        .await;
    h.k8s.forbid_namespace("kube-system").await;

    let listed = call_tool(&h.engine, 23, "k8s_list_pods", json!({})).await;
    assert_eq!(listed["isError"], false);
    assert!(result_text(&listed).contains("api-1"));

    let forbidden = call_tool(
        &h.engine,
        24,
        "k8s_list_pods",
        json!({ "namespace": "kube-system" }),
    )
    .await;
    assert_eq!(forbidden["isError"], true);
    assert!(result_text(&forbidden).starts_with("Unauthorized:"));
    assert_eq!(forbidden["structuredContent"]["error_kind"], "unauthorized");
}

#[tokio::test]
async fn follow_mode_is_refused_for_container_and_pod_logs() {
    let h = harness(ScopeSpec::Standard).await;
    handshake(&h.engine).await;
    h.k8s.set_pod_logs("api-1", "line").await;

    let result = call_tool(
        &h.engine,
        25,
        "k8s_logs",
        json!({ "pod": "api-1", "follow": true }),
    )
    .await;
    assert_eq!(result["isError"], true);
    assert!(result_text(&result).starts_with("Validation:"));
}

// ============================================================================
// Profile switching
// ============================================================================

#[tokio::test]
async fn context_show_reflects_profile_set_immediately() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;

    let before = call_tool(&h.engine, 26, "context_show", json!({})).await;
    assert!(result_text(&before).contains("Profile: staging"));

    let switched = call_tool(&h.engine, 27, "profile_set", json!({ "name": "prod" })).await;
    assert_eq!(switched["isError"], false);
    assert!(result_text(&switched).contains("Active profile set to: prod"));

    let after = call_tool(&h.engine, 28, "context_show", json!({})).await;
    assert!(result_text(&after).contains("Profile: prod"));
    assert!(result_text(&after).contains("Namespace: prod"));

    // The switch released pooled backend connections.
    assert!(h.ssh.invalidated_hosts().await.contains(&"*".to_string()));
}

#[tokio::test]
async fn switching_profiles_swaps_the_policy_view() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;

    // staging allows `kubectl scale`; prod allows only `kubectl get`.
    let _ = call_tool(&h.engine, 29, "profile_set", json!({ "name": "prod" })).await;
    let refused = call_tool(
        &h.engine,
        30,
        "ssh_execute",
        json!({ "server": "h1", "command": "kubectl scale deploy/api" }),
    )
    .await;
    assert_eq!(refused["isError"], true);
    assert!(result_text(&refused).starts_with("PolicyRefusal:"));
}

#[tokio::test]
async fn unknown_profile_is_a_validation_error() {
    let h = harness(ScopeSpec::Core).await;
    handshake(&h.engine).await;

    let result = call_tool(&h.engine, 31, "profile_set", json!({ "name": "nowhere" })).await;
    assert_eq!(result["isError"], true);
    assert!(result_text(&result).contains("Profile not found: nowhere"));

    let still = call_tool(&h.engine, 32, "context_show", json!({})).await;
    assert!(result_text(&still).contains("Profile: staging"));
}
