//! SSH tools: remote command execution, log queries, host diagnostics.

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
            name: "ssh_execute",
            description: "Execute a shell command on a remote server via SSH".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "server": {
                        "type": "string",
                        "description": "Server name from configuration"
                    },
                    "command": {
                        "type": "string",
                        "description": "Shell command to execute",
                        "minLength": 1
                    },
                    "timeout": {
                        "type": "integer",
                        "description": "Command timeout in seconds (clamped to 1..600)",
                        "default": 30
                    }
                },
                "required": ["server", "command"]
            }),
            output_schema: Some(json!({
                "type": "object",
                "properties": {
                    "stdout": { "type": "string" },
                    "stderr": { "type": "string" },
                    "exit_code": { "type": "integer" }
                }
            })),
            scope: ToolScope::Core,
            mutating: false,
            default_timeout: Duration::from_secs(30),
            handler: ssh_execute,
        },
        ToolDescriptor {
            name: "query_logs",
            description: "Query and filter log files from a remote server".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "server": {
                        "type": "string",
                        "description": "Server name from configuration"
                    },
                    "log_path": {
                        "type": "string",
                        "description": "Path to log file"
                    },
                    "filter": {
                        "type": "string",
                        "description": "Filter pattern (grep)"
                    },
                    "tail": {
                        "type": "integer",
                        "description": "Number of lines to retrieve",
                        "minimum": 1,
                        "default": 100
                    },
                    "follow": {
                        "type": "boolean",
                        "description": "Stream new lines until the call deadline",
                        "default": false
                    }
                },
                "required": ["server", "log_path"]
            }),
            output_schema: None,
            scope: ToolScope::Core,
            mutating: false,
            default_timeout: Duration::from_secs(60),
            handler: query_logs,
        },
        ToolDescriptor {
            name: "system_info",
            description: "Get uptime, load, and memory summary from a remote server".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "server": {
                        "type": "string",
                        "description": "Server name from configuration"
                    }
                },
                "required": ["server"]
            }),
            output_schema: None,
            scope: ToolScope::Core,
            mutating: false,
            default_timeout: Duration::from_secs(30),
            handler: system_info,
        },
        ToolDescriptor {
            name: "disk_usage",
            description: "Get filesystem usage from a remote server".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "server": {
                        "type": "string",
                        "description": "Server name from configuration"
                    }
                },
                "required": ["server"]
            }),
            output_schema: None,
            scope: ToolScope::Core,
            mutating: false,
            default_timeout: Duration::from_secs(30),
            handler: disk_usage,
        },
    ]
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| OpsError::Validation(e.to_string()))
}

fn ssh_execute(ctx: Arc<ServerContext>, args: Value, deadline: Duration) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            server: String,
            command: String,
        }
        let input: Input = parse_args(args)?;
        let host = ctx.resolve_host(&input.server)?;

        let output = ctx.ssh.execute(&host, &input.command, deadline).await?;

        let mut text = format!("Exit Code: {}\n\n", output.exit_code);
        if !output.stdout.is_empty() {
            text.push_str(&format!("STDOUT:\n{}\n", output.stdout));
        }
        if !output.stderr.is_empty() {
            text.push_str(&format!("STDERR:\n{}\n", output.stderr));
        }

        let is_error = !output.success();
        let status = format!("exit_{}", output.exit_code);
        Ok(ToolOutcome {
            text,
            structured: Some(json!({
                "stdout": output.stdout,
                "stderr": output.stderr,
                "exit_code": output.exit_code,
            })),
            is_error,
            status,
            target: Some(input.server),
        })
    })
}

fn query_logs(ctx: Arc<ServerContext>, args: Value, deadline: Duration) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            server: String,
            log_path: String,
            #[serde(default)]
            filter: Option<String>,
            #[serde(default = "default_tail")]
            tail: u32,
            #[serde(default)]
            follow: bool,
        }
        let input: Input = parse_args(args)?;
        let host = ctx.resolve_host(&input.server)?;

        if input.follow {
            // Stream new lines until just before the call deadline, then
            // cancel; dropping the stream terminates the remote tail.
            let command = format!(
                "tail -n {} -F '{}'",
                input.tail,
                input.log_path.replace('\'', r"'\''")
            );
            let budget = deadline
                .checked_sub(Duration::from_millis(500))
                .unwrap_or(Duration::from_millis(500));
            let mut stream = ctx.ssh.stream(&host, &command).await?;
            let end = tokio::time::Instant::now() + budget;
            let mut lines = Vec::new();
            loop {
                match tokio::time::timeout_at(end, stream.next_line()).await {
                    Ok(Some(line)) => lines.push(line),
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
            drop(stream);

            if let Some(filter) = &input.filter {
                lines.retain(|l| l.contains(filter.as_str()));
            }
            let text = format!(
                "Logs from {} (followed for {}s):\n\n{}",
                input.log_path,
                budget.as_secs(),
                lines.join("\n")
            );
            return Ok(ToolOutcome {
                text,
                structured: None,
                is_error: false,
                status: "ok".to_string(),
                target: Some(input.server),
            });
        }

        let options = LogTailOptions {
            tail: input.tail,
            filter: input.filter,
        };
        let content = ctx
            .ssh
            .tail_file(&host, &input.log_path, &options, deadline)
            .await?;
        Ok(ToolOutcome {
            text: format!("Logs from {}:\n\n{}", input.log_path, content),
            structured: None,
            is_error: false,
            status: "ok".to_string(),
            target: Some(input.server),
        })
    })
}

fn default_tail() -> u32 {
    100
}

fn system_info(ctx: Arc<ServerContext>, args: Value, deadline: Duration) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            server: String,
        }
        let input: Input = parse_args(args)?;
        let host = ctx.resolve_host(&input.server)?;

        let uptime = ctx.ssh.execute(&host, "uptime", deadline).await?;
        let memory = ctx.ssh.execute(&host, "free -h", deadline).await?;
        let kernel = ctx.ssh.execute(&host, "uname -a", deadline).await?;

        let failed = !uptime.success() || !memory.success() || !kernel.success();
        let text = format!(
            "System Information for {}:\n\nUptime: {}\nMemory:\n{}\nKernel: {}\n",
            input.server,
            uptime.stdout.trim(),
            memory.stdout.trim_end(),
            kernel.stdout.trim(),
        );
        Ok(ToolOutcome {
            text,
            structured: Some(json!({
                "uptime": uptime.stdout.trim(),
                "memory": memory.stdout.trim_end(),
                "kernel": kernel.stdout.trim(),
            })),
            is_error: failed,
            status: if failed { "error" } else { "ok" }.to_string(),
            target: Some(input.server),
        })
    })
}

fn disk_usage(ctx: Arc<ServerContext>, args: Value, deadline: Duration) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            server: String,
        }
        let input: Input = parse_args(args)?;
        let host = ctx.resolve_host(&input.server)?;

        let output = ctx.ssh.execute(&host, "df -h", deadline).await?;
        if !output.success() {
            return Ok(ToolOutcome {
                text: format!("Failed to get disk usage:\n{}", output.stderr),
                structured: None,
                is_error: true,
                status: format!("exit_{}", output.exit_code),
                target: Some(input.server),
            });
        }
        Ok(ToolOutcome {
            text: format!("Disk Usage for {}:\n\n{}", input.server, output.stdout),
            structured: None,
            is_error: false,
            status: "ok".to_string(),
            target: Some(input.server),
        })
    })
}
