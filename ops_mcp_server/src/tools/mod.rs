//! The tool catalog.
//!
//! Each module contributes descriptors for one backend domain: SSH command
//! execution and host diagnostics, Docker container control, Kubernetes
//! resources, and the profile/context tools. Names, schemas, and scope
//! tags are wire contracts; handlers are bound here at startup.

pub mod context_tools;
pub mod docker;
pub mod k8s;
pub mod ssh;

use crate::registry::ToolDescriptor;

/// Every tool the server exposes, in catalog order.
pub fn catalog() -> Vec<ToolDescriptor> {
    let mut tools = Vec::new();
    tools.extend(ssh::descriptors());
    tools.extend(docker::descriptors());
    tools.extend(k8s::descriptors());
    tools.extend(context_tools::descriptors());
    tools
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolScope;

    #[test]
    fn catalog_carries_the_contracted_names() {
        let names: Vec<&str> = catalog().iter().map(|t| t.name).collect();
        for expected in [
            "ssh_execute",
            "query_logs",
            "system_info",
            "disk_usage",
            "docker_list_containers",
            "docker_logs",
            "docker_start_container",
            "docker_stop_container",
            "docker_restart_container",
            "k8s_list_pods",
            "k8s_get_pod",
            "k8s_logs",
            "k8s_scale_deployment",
            "k8s_restart_deployment",
            "profile_set",
            "context_show",
        ] {
            assert!(names.contains(&expected), "catalog misses {}", expected);
        }
        assert_eq!(names.len(), 16);
    }

    #[test]
    fn all_scoped_tools_are_mutation_flagged() {
        for tool in catalog() {
            assert_eq!(
                tool.mutating,
                tool.scope == ToolScope::All,
                "scope/mutation mismatch on {}",
                tool.name
            );
        }
    }

    #[test]
    fn every_schema_is_an_object_schema() {
        for tool in catalog() {
            assert_eq!(
                tool.input_schema["type"], "object",
                "{} has a non-object input schema",
                tool.name
            );
        }
    }
}
