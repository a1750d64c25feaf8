//! Docker container tools.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use backend_interface::LogTailOptions;
use ops_shared_types::{OpsError, Result};

use crate::context::ServerContext;
use crate::registry::{HandlerFuture, ToolDescriptor, ToolOutcome, ToolScope};

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "docker_list_containers",
            description: "List Docker containers and their status".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "all": {
                        "type": "boolean",
                        "description": "Include stopped containers",
                        "default": false
                    }
                }
            }),
            output_schema: Some(json!({
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "name": { "type": "string" },
                        "status": { "type": "string" },
                        "image": { "type": "string" }
                    }
                }
            })),
            scope: ToolScope::Standard,
            mutating: false,
            default_timeout: Duration::from_secs(30),
            handler: docker_list_containers,
        },
        ToolDescriptor {
            name: "docker_logs",
            description: "Fetch logs from a Docker container".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "container": {
                        "type": "string",
                        "description": "Container name or ID"
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
                "required": ["container"]
            }),
            output_schema: None,
            scope: ToolScope::Standard,
            mutating: false,
            default_timeout: Duration::from_secs(60),
            handler: docker_logs,
        },
        ToolDescriptor {
            name: "docker_start_container",
            description: "Start a Docker container".to_string(),
            input_schema: container_only_schema(),
            output_schema: None,
            scope: ToolScope::All,
            mutating: true,
            default_timeout: Duration::from_secs(30),
            handler: docker_start_container,
        },
        ToolDescriptor {
            name: "docker_stop_container",
            description: "Stop a Docker container".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "container": {
                        "type": "string",
                        "description": "Container name or ID"
                    },
                    "timeout": {
                        "type": "integer",
                        "description": "Stop grace period in seconds",
                        "default": 10
                    }
                },
                "required": ["container"]
            }),
            output_schema: None,
            scope: ToolScope::All,
            mutating: true,
            default_timeout: Duration::from_secs(30),
            handler: docker_stop_container,
        },
        ToolDescriptor {
            name: "docker_restart_container",
            description: "Restart a Docker container".to_string(),
            input_schema: container_only_schema(),
            output_schema: None,
            scope: ToolScope::All,
            mutating: true,
            default_timeout: Duration::from_secs(30),
            handler: docker_restart_container,
        },
    ]
}

fn container_only_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "container": {
                "type": "string",
                "description": "Container name or ID"
            }
        },
        "required": ["container"]
    })
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| OpsError::Validation(e.to_string()))
}

fn docker_list_containers(ctx: Arc<ServerContext>, args: Value, deadline: Duration) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            #[serde(default)]
            all: bool,
        }
        let input: Input = parse_args(args)?;
        let profile = ctx.profile().await;
        let endpoint = ctx.resolve_docker_endpoint(&profile)?;

        let containers = ctx
            .docker
            .list_containers(&endpoint, input.all, deadline)
            .await?;

        let mut text = format!("Docker Containers ({} found):\n\n", containers.len());
        for container in &containers {
            text.push_str(&format!(
                "- {} ({})\n  Status: {}\n  Image: {}\n\n",
                container.name, container.id, container.status, container.image
            ));
        }

        let target = profile
            .config
            .docker
            .endpoint
            .clone()
            .unwrap_or_else(|| "local".to_string());
        Ok(ToolOutcome::text_only(text)
            .with_structured(serde_json::to_value(&containers).unwrap_or_default())
            .with_target(target))
    })
}

fn docker_logs(ctx: Arc<ServerContext>, args: Value, deadline: Duration) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            container: String,
            #[serde(default = "default_tail")]
            tail: u32,
            #[serde(default)]
            follow: bool,
        }
        let input: Input = parse_args(args)?;
        if input.follow {
            return Err(OpsError::Validation(
                "streaming is not supported for container logs; use tail".to_string(),
            ));
        }

        let profile = ctx.profile().await;
        let endpoint = ctx.resolve_docker_endpoint(&profile)?;
        let options = LogTailOptions {
            tail: input.tail,
            filter: None,
        };
        let logs = ctx
            .docker
            .container_logs(&endpoint, &input.container, &options, deadline)
            .await?;

        Ok(ToolOutcome::text_only(format!(
            "Logs for {} (last {} lines):\n\n{}",
            input.container, input.tail, logs
        ))
        .with_target(input.container))
    })
}

fn default_tail() -> u32 {
    100
}

fn docker_start_container(ctx: Arc<ServerContext>, args: Value, deadline: Duration) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            container: String,
        }
        let input: Input = parse_args(args)?;
        let profile = ctx.profile().await;
        let endpoint = ctx.resolve_docker_endpoint(&profile)?;

        ctx.docker
            .start_container(&endpoint, &input.container, deadline)
            .await?;
        Ok(
            ToolOutcome::text_only(format!("Successfully started container: {}", input.container))
                .with_target(input.container),
        )
    })
}

fn docker_stop_container(ctx: Arc<ServerContext>, args: Value, deadline: Duration) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            container: String,
            #[serde(default = "default_stop_timeout")]
            timeout: u32,
        }
        let input: Input = parse_args(args)?;
        let profile = ctx.profile().await;
        let endpoint = ctx.resolve_docker_endpoint(&profile)?;

        ctx.docker
            .stop_container(&endpoint, &input.container, input.timeout, deadline)
            .await?;
        Ok(
            ToolOutcome::text_only(format!("Successfully stopped container: {}", input.container))
                .with_target(input.container),
        )
    })
}

fn default_stop_timeout() -> u32 {
    10
}

fn docker_restart_container(
    ctx: Arc<ServerContext>,
    args: Value,
    deadline: Duration,
) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            container: String,
        }
        let input: Input = parse_args(args)?;
        let profile = ctx.profile().await;
        let endpoint = ctx.resolve_docker_endpoint(&profile)?;

        ctx.docker
            .restart_container(&endpoint, &input.container, deadline)
            .await?;
        Ok(ToolOutcome::text_only(format!(
            "Successfully restarted container: {}",
            input.container
        ))
        .with_target(input.container))
    })
}
