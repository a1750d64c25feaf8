//! Kubernetes tools.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use ops_shared_types::{OpsError, Result};

use crate::context::ServerContext;
use crate::registry::{HandlerFuture, ToolDescriptor, ToolOutcome, ToolScope};

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "k8s_list_pods",
            description: "List Kubernetes pods in a namespace".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cluster": {
                        "type": "string",
                        "description": "Cluster name from configuration (defaults to the profile's cluster)"
                    },
                    "namespace": {
                        "type": "string",
                        "description": "Kubernetes namespace",
                        "default": "default"
                    }
                }
            }),
            output_schema: Some(json!({
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "namespace": { "type": "string" },
                        "status": { "type": "string" },
                        "node": { "type": "string" },
                        "ip": { "type": "string" }
                    }
                }
            })),
            scope: ToolScope::Standard,
            mutating: false,
            default_timeout: Duration::from_secs(30),
            handler: k8s_list_pods,
        },
        ToolDescriptor {
            name: "k8s_get_pod",
            description: "Get detailed information about a Kubernetes pod".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Pod name"
                    },
                    "namespace": {
                        "type": "string",
                        "description": "Kubernetes namespace",
                        "default": "default"
                    }
                },
                "required": ["name"]
            }),
            output_schema: None,
            scope: ToolScope::Standard,
            mutating: false,
            default_timeout: Duration::from_secs(30),
            handler: k8s_get_pod,
        },
        ToolDescriptor {
            name: "k8s_logs",
            description: "Fetch logs from a Kubernetes pod".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pod": {
                        "type": "string",
                        "description": "Pod name"
                    },
                    "namespace": {
                        "type": "string",
                        "description": "Kubernetes namespace",
                        "default": "default"
                    },
                    "container": {
                        "type": "string",
                        "description": "Container name (for multi-container pods)"
                    },
                    "tail": {
                        "type": "integer",
                        "description": "Number of lines to retrieve",
                        "minimum": 1,
                        "default": 100
                    },
                    "follow": {
                        "type": "boolean",
                        "description": "Stream logs in real-time",
                        "default": false
                    }
                },
                "required": ["pod"]
            }),
            output_schema: None,
            scope: ToolScope::Standard,
            mutating: false,
            default_timeout: Duration::from_secs(60),
            handler: k8s_logs,
        },
        ToolDescriptor {
            name: "k8s_scale_deployment",
            description: "Scale a Kubernetes deployment to a replica count".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "deployment": {
                        "type": "string",
                        "description": "Deployment name"
                    },
                    "replicas": {
                        "type": "integer",
                        "description": "Desired number of replicas",
                        "minimum": 0
                    },
                    "namespace": {
                        "type": "string",
                        "description": "Kubernetes namespace",
                        "default": "default"
                    }
                },
                "required": ["deployment", "replicas"]
            }),
            output_schema: None,
            scope: ToolScope::All,
            mutating: true,
            default_timeout: Duration::from_secs(120),
            handler: k8s_scale_deployment,
        },
        ToolDescriptor {
            name: "k8s_restart_deployment",
            description: "Trigger a rolling restart of a Kubernetes deployment".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "deployment": {
                        "type": "string",
                        "description": "Deployment name"
                    },
                    "namespace": {
                        "type": "string",
                        "description": "Kubernetes namespace",
                        "default": "default"
                    }
                },
                "required": ["deployment"]
            }),
            output_schema: None,
            scope: ToolScope::All,
            mutating: true,
            default_timeout: Duration::from_secs(120),
            handler: k8s_restart_deployment,
        },
    ]
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| OpsError::Validation(e.to_string()))
}

fn namespace_for(ctx_namespace: &str, explicit: Option<String>) -> String {
    explicit.unwrap_or_else(|| ctx_namespace.to_string())
}

fn k8s_list_pods(ctx: Arc<ServerContext>, args: Value, deadline: Duration) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            #[serde(default)]
            cluster: Option<String>,
            #[serde(default)]
            namespace: Option<String>,
        }
        let input: Input = parse_args(args)?;
        let profile = ctx.profile().await;
        let cluster = ctx.resolve_cluster(&profile, input.cluster.as_deref())?;
        let namespace = namespace_for(&profile.config.kubernetes.namespace, input.namespace);

        let pods = ctx.k8s.list_pods(&cluster, &namespace, deadline).await?;

        let mut text = format!(
            "Pods in namespace '{}' ({} found):\n\n",
            namespace,
            pods.len()
        );
        for pod in &pods {
            text.push_str(&format!(
                "- {}\n  Status: {}\n  Node: {}\n  IP: {}\n\n",
                pod.name,
                pod.status,
                pod.node.as_deref().unwrap_or("N/A"),
                pod.ip.as_deref().unwrap_or("N/A"),
            ));
        }

        Ok(ToolOutcome::text_only(text)
            .with_structured(serde_json::to_value(&pods).unwrap_or_default())
            .with_target(namespace))
    })
}

fn k8s_get_pod(ctx: Arc<ServerContext>, args: Value, deadline: Duration) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            name: String,
            #[serde(default)]
            namespace: Option<String>,
        }
        let input: Input = parse_args(args)?;
        let profile = ctx.profile().await;
        let cluster = ctx.resolve_cluster(&profile, None)?;
        let namespace = namespace_for(&profile.config.kubernetes.namespace, input.namespace);

        let pod = ctx
            .k8s
            .get_pod(&cluster, &input.name, &namespace, deadline)
            .await?;

        let mut text = format!(
            "Pod: {}\nNamespace: {}\nStatus: {}\nNode: {}\nIP: {}\nContainers: {}\n",
            pod.name,
            pod.namespace,
            pod.status,
            pod.node.as_deref().unwrap_or("N/A"),
            pod.ip.as_deref().unwrap_or("N/A"),
            pod.containers.join(", "),
        );
        if !pod.conditions.is_empty() {
            text.push_str("\nConditions:\n");
            for condition in &pod.conditions {
                text.push_str(&format!(
                    "  - {}: {}\n",
                    condition.condition_type, condition.status
                ));
            }
        }

        Ok(ToolOutcome::text_only(text)
            .with_structured(serde_json::to_value(&pod).unwrap_or_default())
            .with_target(format!("{}/{}", namespace, input.name)))
    })
}

fn k8s_logs(ctx: Arc<ServerContext>, args: Value, deadline: Duration) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            pod: String,
            #[serde(default)]
            namespace: Option<String>,
            #[serde(default)]
            container: Option<String>,
            #[serde(default = "default_tail")]
            tail: u32,
            #[serde(default)]
            follow: bool,
        }
        let input: Input = parse_args(args)?;
        if input.follow {
            return Err(OpsError::Validation(
                "streaming is not supported for pod logs; use tail".to_string(),
            ));
        }

        let profile = ctx.profile().await;
        let cluster = ctx.resolve_cluster(&profile, None)?;
        let namespace = namespace_for(&profile.config.kubernetes.namespace, input.namespace);

        let logs = ctx
            .k8s
            .pod_logs(
                &cluster,
                &input.pod,
                &namespace,
                input.container.as_deref(),
                input.tail,
                deadline,
            )
            .await?;

        Ok(ToolOutcome::text_only(format!(
            "Logs for pod {}:\n\n{}",
            input.pod, logs
        ))
        .with_target(format!("{}/{}", namespace, input.pod)))
    })
}

fn default_tail() -> u32 {
    100
}

fn k8s_scale_deployment(ctx: Arc<ServerContext>, args: Value, deadline: Duration) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            deployment: String,
            replicas: u32,
            #[serde(default)]
            namespace: Option<String>,
        }
        let input: Input = parse_args(args)?;
        let profile = ctx.profile().await;
        let cluster = ctx.resolve_cluster(&profile, None)?;
        let namespace = namespace_for(&profile.config.kubernetes.namespace, input.namespace);

        ctx.k8s
            .scale_deployment(&cluster, &input.deployment, &namespace, input.replicas, deadline)
            .await?;

        Ok(ToolOutcome::text_only(format!(
            "Successfully scaled deployment {} to {} replicas",
            input.deployment, input.replicas
        ))
        .with_structured(json!({
            "deployment": input.deployment,
            "namespace": namespace,
            "replicas": input.replicas,
        }))
        .with_target(format!("{}/{}", namespace, input.deployment)))
    })
}

fn k8s_restart_deployment(
    ctx: Arc<ServerContext>,
    args: Value,
    deadline: Duration,
) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            deployment: String,
            #[serde(default)]
            namespace: Option<String>,
        }
        let input: Input = parse_args(args)?;
        let profile = ctx.profile().await;
        let cluster = ctx.resolve_cluster(&profile, None)?;
        let namespace = namespace_for(&profile.config.kubernetes.namespace, input.namespace);

        ctx.k8s
            .restart_deployment(&cluster, &input.deployment, &namespace, deadline)
            .await?;

        Ok(ToolOutcome::text_only(format!(
            "Successfully restarted deployment: {}",
            input.deployment
        ))
        .with_target(format!("{}/{}", namespace, input.deployment)))
    })
}
