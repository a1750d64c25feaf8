//! Profile and context tools.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use ops_shared_types::OpsError;

use crate::context::{ProfileView, ServerContext};
use crate::registry::{HandlerFuture, ToolDescriptor, ToolOutcome, ToolScope};

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "profile_set",
            description: "Switch the active profile; rebuilds the policy view atomically"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Profile name from configuration"
                    }
                },
                "required": ["name"]
            }),
            output_schema: None,
            scope: ToolScope::Core,
            mutating: false,
            default_timeout: Duration::from_secs(30),
            handler: profile_set,
        },
        ToolDescriptor {
            name: "context_show",
            description: "Show the active profile, cluster context, namespace, and docker endpoint"
                .to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
            output_schema: None,
            scope: ToolScope::Core,
            mutating: false,
            default_timeout: Duration::from_secs(30),
            handler: context_show,
        },
    ]
}

fn summary(view: &ProfileView) -> (String, Value) {
    let kubernetes = &view.config.kubernetes;
    let docker_endpoint = view
        .config
        .docker
        .endpoint
        .clone()
        .unwrap_or_else(|| "local".to_string());

    let text = format!(
        "Profile: {}\nBastion: {}\nCluster: {}\nContext: {}\nNamespace: {}\nDocker endpoint: {}\n",
        view.name,
        view.config.bastion.as_deref().unwrap_or("none"),
        kubernetes.cluster.as_deref().unwrap_or("none"),
        kubernetes.context.as_deref().unwrap_or("none"),
        kubernetes.namespace,
        docker_endpoint,
    );
    let structured = json!({
        "profile": view.name,
        "bastion": view.config.bastion,
        "cluster": kubernetes.cluster,
        "context": kubernetes.context,
        "namespace": kubernetes.namespace,
        "docker_endpoint": docker_endpoint,
    });
    (text, structured)
}

fn profile_set(ctx: Arc<ServerContext>, args: Value, _deadline: Duration) -> HandlerFuture {
    Box::pin(async move {
        #[derive(Deserialize)]
        struct Input {
            name: String,
        }
        let input: Input =
            serde_json::from_value(args).map_err(|e| OpsError::Validation(e.to_string()))?;

        let view = ctx.switch_profile(&input.name).await?;
        ctx.events.notify(
            "notifications/profile_changed",
            json!({ "profile": view.name }),
        );

        let (context_text, structured) = summary(&view);
        Ok(ToolOutcome::text_only(format!(
            "Active profile set to: {}\n\n{}",
            input.name, context_text
        ))
        .with_structured(structured)
        .with_target(input.name))
    })
}

fn context_show(ctx: Arc<ServerContext>, _args: Value, _deadline: Duration) -> HandlerFuture {
    Box::pin(async move {
        let view = ctx.profile().await;
        let (text, structured) = summary(&view);
        Ok(ToolOutcome::text_only(text)
            .with_structured(structured)
            .with_target(view.name.clone()))
    })
}
