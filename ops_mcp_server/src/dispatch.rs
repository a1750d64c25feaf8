//! Tool dispatch: the `tools/call` flow.
//!
//! Order is normative: resolve, scope check, schema validation, policy
//! pre-check, handler invocation under a deadline, redaction, shaping,
//! audit. The audit record is flushed before the result is returned to the
//! protocol engine, so a crash between the two leaves the trail consistent
//! with what the client saw.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use ops_shared_types::{AdapterErrorKind, OpsError};
use policy_engine::{fingerprint_args, AuditRecord, PolicyDecision};

use crate::context::{ProfileView, ServerContext};
use crate::protocol::{JsonRpcError, INVALID_PARAMS, METHOD_NOT_FOUND};
use crate::registry::ToolDescriptor;
use crate::schema;

/// Hard bounds on the effective per-call deadline, seconds.
pub const TIMEOUT_MIN_SECS: u64 = 1;
pub const TIMEOUT_MAX_SECS: u64 = 600;

/// Backoff before the single retry of a transient adapter fault.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Execute one `tools/call`. Protocol-level failures (unknown name, schema
/// violations) surface as `Err`; everything else is a well-formed tool
/// result, `isError` included.
pub async fn call_tool(
    ctx: &Arc<ServerContext>,
    request_id: Option<Value>,
    params: Value,
) -> Result<Value, JsonRpcError> {
    let name = match params.get("name").and_then(Value::as_str) {
        Some(name) => name.to_string(),
        None => {
            return Err(
                JsonRpcError::new(INVALID_PARAMS, "Invalid params: missing tool name")
                    .with_data(json!({ "path": "name" })),
            )
        }
    };

    // 1. Resolve the tool. A well-formed but unknown name is a protocol
    //    error, same as an unknown method.
    let Some(descriptor) = ctx.registry.get(&name) else {
        return Err(JsonRpcError::new(
            METHOD_NOT_FOUND,
            format!("Unknown tool: {}", name),
        ));
    };

    // Empty arguments are treated as {} when the schema allows them.
    let args = match params.get("arguments") {
        None | Some(Value::Null) => json!({}),
        Some(value) if value.is_object() => value.clone(),
        Some(_) => {
            return Err(
                JsonRpcError::new(INVALID_PARAMS, "Invalid params: arguments must be an object")
                    .with_data(json!({ "path": "arguments" })),
            )
        }
    };

    let turn = ctx.session.write().await.next_turn();
    let profile = ctx.profile().await;
    let started = Instant::now();

    debug!(tool = %name, profile = %profile.name, turn, "dispatching tool call");

    // 2. Scope check. The name is well-formed, so this is a policy result,
    //    not a protocol error.
    if !ctx.scope_filter.read().await.contains(&name) {
        let refusal = OpsError::Policy(format!(
            "tool '{}' is not in the session's scope",
            name
        ));
        let result = shape_error(&profile, &refusal);
        audit_call(
            ctx,
            &profile,
            &name,
            &args,
            &request_id,
            target_hint(&args),
            "policy_refused",
            &result,
            started,
        )
        .await;
        return Ok(result);
    }

    // 3. Schema validation.
    if let Err(violation) = schema::validate(&descriptor.input_schema, &args) {
        return Err(JsonRpcError::new(
            INVALID_PARAMS,
            format!("Invalid params: {}", violation),
        )
        .with_data(json!({ "path": violation.path })));
    }

    // 5. Policy pre-check for pass-through and mutation-flagged tools,
    //    before any adapter work. (Backend leases are acquired inside the
    //    adapters, bounded per endpoint.)
    if let PolicyDecision::Refused(reason) = policy_precheck(descriptor, &profile, &args) {
        let refusal = OpsError::Policy(reason);
        let result = shape_error(&profile, &refusal);
        audit_call(
            ctx,
            &profile,
            &name,
            &args,
            &request_id,
            target_hint(&args),
            "policy_refused",
            &result,
            started,
        )
        .await;
        return Ok(result);
    }

    // 6. Invoke under the effective deadline.
    let deadline = effective_timeout(descriptor, &args);
    let mut outcome = match tokio::time::timeout(
        deadline,
        (descriptor.handler)(ctx.clone(), args.clone(), deadline),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(OpsError::timeout(format!(
            "deadline of {}s exceeded",
            deadline.as_secs()
        ))),
    };

    // Transient faults get one retry inside what remains of the deadline.
    if let Err(fault) = &outcome {
        if fault.is_retryable() {
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining > RETRY_BACKOFF * 2 {
                warn!(tool = %name, "transient adapter fault, retrying once");
                tokio::time::sleep(RETRY_BACKOFF).await;
                let budget = deadline.saturating_sub(started.elapsed());
                outcome = match tokio::time::timeout(
                    budget,
                    (descriptor.handler)(ctx.clone(), args.clone(), budget),
                )
                .await
                {
                    Ok(retried) => retried,
                    Err(_) => Err(OpsError::timeout(format!(
                        "deadline of {}s exceeded",
                        deadline.as_secs()
                    ))),
                };
            }
        }
    }

    // 7.-8. Redact and shape.
    let (result, status, target) = match outcome {
        Ok(out) => {
            let (text, _) = profile.redactor.redact_text(&out.text);
            let mut shaped = json!({
                "content": [ { "type": "text", "text": text } ],
                "isError": out.is_error,
            });
            if let Some(mut structured) = out.structured {
                profile.redactor.redact_json(&mut structured);
                shaped["structuredContent"] = structured;
            }
            (shaped, out.status, out.target.or_else(|| target_hint(&args)))
        }
        Err(fault) => {
            let status = audit_status(&fault);
            (shape_error(&profile, &fault), status, target_hint(&args))
        }
    };

    // 9. Audit, flushed before the response leaves.
    audit_call(
        ctx,
        &profile,
        &name,
        &args,
        &request_id,
        target,
        &status,
        &result,
        started,
    )
    .await;

    Ok(result)
}

/// Effective deadline: the `timeout` argument clamped to [1, 600] seconds,
/// or the per-tool default. Out-of-range values are clamped with a log
/// note, never rejected.
fn effective_timeout(descriptor: &ToolDescriptor, args: &Value) -> Duration {
    // For `docker_stop_container` the `timeout` argument is the daemon-side
    // stop grace period, not the call deadline; give the call the default
    // deadline plus that grace.
    if descriptor.name == "docker_stop_container" {
        let grace = args
            .get("timeout")
            .and_then(Value::as_i64)
            .unwrap_or(10)
            .clamp(0, TIMEOUT_MAX_SECS as i64) as u64;
        return descriptor.default_timeout + Duration::from_secs(grace);
    }

    let Some(requested) = args.get("timeout").and_then(Value::as_i64) else {
        return descriptor.default_timeout;
    };
    let clamped = requested.clamp(TIMEOUT_MIN_SECS as i64, TIMEOUT_MAX_SECS as i64);
    if clamped != requested {
        warn!(
            tool = descriptor.name,
            requested, clamped, "timeout outside [1, 600], clamped"
        );
    }
    Duration::from_secs(clamped as u64)
}

/// Map mutation-flagged tools onto the (family, verb) pairs the allowlist
/// speaks, then run the admission check. `ssh_execute` forwards a free-form
/// command line and is checked token-wise.
fn policy_precheck(
    descriptor: &ToolDescriptor,
    profile: &ProfileView,
    args: &Value,
) -> PolicyDecision {
    if descriptor.name == "ssh_execute" {
        if let Some(command) = args.get("command").and_then(Value::as_str) {
            return profile.allowlist.check_command(command);
        }
        return PolicyDecision::Allowed; // schema already required it
    }

    if !descriptor.mutating {
        return PolicyDecision::Allowed;
    }

    match descriptor.name {
        "docker_start_container" => profile.allowlist.check_tool("docker", "start", &[]),
        "docker_stop_container" => profile.allowlist.check_tool("docker", "stop", &[]),
        "docker_restart_container" => profile.allowlist.check_tool("docker", "restart", &[]),
        "k8s_scale_deployment" => {
            let replicas = args.get("replicas").and_then(Value::as_i64).unwrap_or(0);
            let flag = format!("--replicas={}", replicas);
            profile.allowlist.check_tool("kubectl", "scale", &[flag.as_str()])
        }
        "k8s_restart_deployment" => {
            profile.allowlist.check_tool("kubectl", "rollout", &["restart"])
        }
        other => {
            // A mutation tool without a gate mapping would bypass the
            // allowlist; refuse instead.
            PolicyDecision::Refused(format!("no policy mapping for mutation tool '{}'", other))
        }
    }
}

/// Title-case label for the leading line of error results.
fn kind_title(kind: AdapterErrorKind) -> &'static str {
    match kind {
        AdapterErrorKind::NotFound => "NotFound",
        AdapterErrorKind::Unauthorized => "Unauthorized",
        AdapterErrorKind::Unreachable => "Unreachable",
        AdapterErrorKind::Timeout => "Timeout",
        AdapterErrorKind::Cancelled => "Cancelled",
        AdapterErrorKind::Transient => "Transient",
        AdapterErrorKind::Permanent => "Permanent",
    }
}

fn audit_status(fault: &OpsError) -> String {
    match fault {
        OpsError::Policy(_) => "policy_refused".to_string(),
        OpsError::Validation(_) => "validation_error".to_string(),
        OpsError::Adapter { kind, .. } => kind.label().to_string(),
        OpsError::Config(_) | OpsError::Internal(_) => "internal_error".to_string(),
    }
}

/// Shape a fault as an `isError` tool result. The first line starts with
/// the error sub-kind; structured content carries a stable `error_kind`.
/// Redaction runs on error text too.
fn shape_error(profile: &ProfileView, fault: &OpsError) -> Value {
    let (title, error_kind, message) = match fault {
        OpsError::Policy(message) => ("PolicyRefusal", "policy_refused".to_string(), message.clone()),
        OpsError::Validation(message) => {
            ("Validation", "validation_error".to_string(), message.clone())
        }
        OpsError::Adapter { kind, message } => {
            (kind_title(*kind), kind.label().to_string(), message.clone())
        }
        OpsError::Config(message) => ("Internal", "internal_error".to_string(), message.clone()),
        OpsError::Internal(message) => {
            // No internals reach the client; the token correlates with the
            // server log and audit trail.
            let token = Uuid::new_v4();
            error!(%token, fault = %message, "internal fault in tool handler");
            (
                "Internal",
                "internal_error".to_string(),
                format!("unexpected fault (correlation {})", token),
            )
        }
    };

    let (text, _) = profile
        .redactor
        .redact_text(&format!("{}: {}", title, message));
    json!({
        "content": [ { "type": "text", "text": text } ],
        "structuredContent": { "error_kind": error_kind },
        "isError": true,
    })
}

/// Best-effort target context from common argument names.
fn target_hint(args: &Value) -> Option<String> {
    for key in ["server", "container", "pod", "deployment", "name", "cluster"] {
        if let Some(value) = args.get(key).and_then(Value::as_str) {
            return Some(value.to_string());
        }
    }
    None
}

#[allow(clippy::too_many_arguments)]
async fn audit_call(
    ctx: &Arc<ServerContext>,
    profile: &ProfileView,
    tool: &str,
    args: &Value,
    request_id: &Option<Value>,
    target: Option<String>,
    status: &str,
    result: &Value,
    started: Instant,
) {
    let bytes_out = result["content"][0]["text"]
        .as_str()
        .map(str::len)
        .unwrap_or(0);
    let record = AuditRecord {
        timestamp: Utc::now(),
        profile: profile.name.clone(),
        tool: tool.to_string(),
        args_fingerprint: fingerprint_args(args),
        request_id: request_id.clone(),
        target,
        status: status.to_string(),
        bytes_in: args.to_string().len(),
        bytes_out,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    if let Err(e) = ctx.audit.record(record).await {
        error!(error = %e, tool, "audit write failed");
    }
}
