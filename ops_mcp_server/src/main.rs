//! Server binary.
//!
//! Runs the control plane on stdio (the default, for assistant launchers)
//! or HTTP (`--http`, with an optional `--bind addr:port`). Configuration
//! comes from the profile file (`CONFIG_PATH`, default
//! `~/.config/ops-core/config.yaml`); the initial tool scope from
//! `TOOLS_SCOPE`; the audit log location from `AUDIT_LOG_PATH`.

use std::process::exit;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use backend_interface::{ContainerBackend, KubernetesBackend, SshBackend};
use docker_backend::{DockerCliBackend, DockerCliConfig};
use k8s_backend::{KubectlBackend, KubectlConfig};
use ops_mcp_server::transport::{serve_http, serve_stdio, HttpServerConfig};
use ops_mcp_server::ServerContext;
use policy_engine::AuditLog;
use server_config::{resolve_audit_path, resolve_config_path, scope_from_env, ConfigError, OpsConfig};
use ssh_backend::{SshCliBackend, SshCliConfig};

// sysexits-style process exit codes
const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 64;
const EXIT_BIND: i32 = 69;
const EXIT_INTERNAL: i32 = 70;

#[tokio::main]
async fn main() {
    exit(run().await);
}

async fn run() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let use_http = args.iter().any(|a| a == "--http");
    let bind_override = args
        .iter()
        .position(|a| a == "--bind")
        .and_then(|i| args.get(i + 1))
        .cloned();

    // Configuration is loaded before tracing so the configured log level
    // can seed the filter; failures this early go straight to stderr.
    let config_path = match resolve_config_path() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("cannot resolve configuration path: {}", e);
            return EXIT_CONFIG;
        }
    };

    let (config, config_missing) = match OpsConfig::load(&config_path).await {
        Ok(config) => (config, false),
        Err(ConfigError::NotFound(_)) => (OpsConfig::minimal(), true),
        Err(e) => {
            eprintln!("configuration rejected ({}): {}", config_path.display(), e);
            return EXIT_CONFIG;
        }
    };

    // Logging goes to stderr only; stdout belongs to the protocol.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(config.settings.log_level.clone())
        }))
        .with_writer(std::io::stderr)
        .init();

    if config_missing {
        warn!(path = %config_path.display(), "no configuration file, starting with an empty default profile");
    }

    let scope = match scope_from_env() {
        Ok(scope) => scope,
        Err(e) => {
            error!(error = %e, "invalid TOOLS_SCOPE");
            return EXIT_CONFIG;
        }
    };

    let audit = if config.audit.enabled {
        let audit_path = match resolve_audit_path(config.audit.path.as_deref()) {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "cannot resolve audit log path");
                return EXIT_CONFIG;
            }
        };
        match AuditLog::open(&audit_path).await {
            Ok(log) => {
                info!(path = %audit_path.display(), "audit log open");
                log
            }
            Err(e) => {
                error!(error = %e, "cannot open audit log");
                return EXIT_CONFIG;
            }
        }
    } else {
        warn!("audit log disabled by configuration");
        AuditLog::disabled()
    };

    let max_leases = config.settings.max_leases_per_endpoint;
    let ssh: Arc<dyn SshBackend> = Arc::new(SshCliBackend::new(SshCliConfig {
        max_leases_per_host: max_leases,
        ..SshCliConfig::default()
    }));
    let docker: Arc<dyn ContainerBackend> = Arc::new(DockerCliBackend::new(DockerCliConfig {
        max_leases_per_endpoint: max_leases,
        ..DockerCliConfig::default()
    }));
    let k8s: Arc<dyn KubernetesBackend> = Arc::new(KubectlBackend::new(KubectlConfig {
        max_leases_per_cluster: max_leases,
        ..KubectlConfig::default()
    }));

    let ctx = match ServerContext::new(config, scope, ssh, docker, k8s, audit) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "cannot build server context");
            return EXIT_CONFIG;
        }
    };

    if use_http {
        let mut http_config = HttpServerConfig::default();
        if let Some(bind) = bind_override {
            match bind.parse() {
                Ok(addr) => http_config.bind_addr = addr,
                Err(e) => {
                    error!(bind = %bind, error = %e, "invalid --bind address");
                    return EXIT_CONFIG;
                }
            }
        }
        let listener = match tokio::net::TcpListener::bind(http_config.bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %http_config.bind_addr, error = %e, "bind failed");
                return EXIT_BIND;
            }
        };
        if let Err(e) = serve_http(ctx, http_config, listener).await {
            error!(error = %e, "http transport failed");
            return EXIT_INTERNAL;
        }
    } else if let Err(e) = serve_stdio(ctx).await {
        error!(error = %e, "stdio transport failed");
        return EXIT_INTERNAL;
    }

    EXIT_OK
}
