//! Server context: the explicit value threaded through every handler.
//!
//! Holds the loaded configuration, the tool registry, the ambient session,
//! the active profile view, the backend adapters, the audit log, and the
//! outbound event bus. There are no globals; tests build a context with
//! mock backends and a temp audit file.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use backend_interface::{ContainerBackend, KubernetesBackend, SshBackend};
use ops_shared_types::{ClusterEntry, DockerEndpointEntry, HostEntry, OpsError, Result};
use policy_engine::{Allowlist, AuditLog, Redactor};
use server_config::{OpsConfig, ProfileConfig, ScopeSpec};

use crate::registry::ToolRegistry;
use crate::session::Session;

/// Immutable snapshot of the active profile and its policy view.
///
/// Calls take an `Arc` of this at entry; a concurrent `profile_set` swaps
/// the context's pointer without disturbing them.
pub struct ProfileView {
    pub name: String,
    pub config: ProfileConfig,
    pub allowlist: Allowlist,
    pub redactor: Arc<Redactor>,
}

impl ProfileView {
    fn build(name: &str, config: &ProfileConfig) -> Self {
        Self {
            name: name.to_string(),
            config: config.clone(),
            allowlist: Allowlist::from_profile(config),
            redactor: Arc::new(Redactor::new(&config.redaction_rules)),
        }
    }
}

/// One server-initiated event on the `/events` channel.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub id: u64,
    pub name: String,
    pub data: String,
}

/// Fan-out bus for server-initiated events, with a bounded replay buffer
/// for reconnecting subscribers.
pub struct EventBus {
    tx: broadcast::Sender<OutboundEvent>,
    history: Mutex<VecDeque<OutboundEvent>>,
    history_capacity: usize,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Publish one event; returns its id.
    pub fn publish(&self, name: &str, data: impl Into<String>) -> u64 {
        let event = OutboundEvent {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            data: data.into(),
        };
        {
            let mut history = self.history.lock().expect("event history poisoned");
            if history.len() == self.history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        let id = event.id;
        let _ = self.tx.send(event); // no subscribers is fine
        id
    }

    /// Publish a JSON-RPC notification as a `notification` event.
    pub fn notify(&self, method: &str, params: Value) -> u64 {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.publish("notification", payload.to_string())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.tx.subscribe()
    }

    /// Events after `last_id`, if that id is still in the buffer. None
    /// means the id was evicted and the caller must not be fed stale data.
    pub fn replay_after(&self, last_id: u64) -> Option<Vec<OutboundEvent>> {
        let history = self.history.lock().expect("event history poisoned");
        let known = history.iter().any(|e| e.id == last_id);
        if !known {
            return None;
        }
        Some(history.iter().filter(|e| e.id > last_id).cloned().collect())
    }

    /// Current high-water mark; live subscriptions start after it.
    pub fn latest_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst).saturating_sub(1)
    }
}

/// Everything a handler invocation needs, threaded explicitly.
pub struct ServerContext {
    pub config: OpsConfig,
    pub registry: ToolRegistry,
    pub scope_spec: ScopeSpec,
    pub session: RwLock<Session>,
    pub scope_filter: RwLock<BTreeSet<String>>,
    active_profile: RwLock<Arc<ProfileView>>,
    pub ssh: Arc<dyn SshBackend>,
    pub docker: Arc<dyn ContainerBackend>,
    pub k8s: Arc<dyn KubernetesBackend>,
    pub audit: AuditLog,
    pub events: EventBus,
}

impl ServerContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OpsConfig,
        scope_spec: ScopeSpec,
        ssh: Arc<dyn SshBackend>,
        docker: Arc<dyn ContainerBackend>,
        k8s: Arc<dyn KubernetesBackend>,
        audit: AuditLog,
    ) -> Result<Arc<Self>> {
        let registry = ToolRegistry::standard_catalog()?;
        let scope_filter = registry.scope_filter(&scope_spec)?;

        let profile_name = config.default_profile.clone();
        let profile_config = config
            .profile(&profile_name)
            .ok_or_else(|| OpsError::Config(format!("default profile '{}' missing", profile_name)))?;
        let view = Arc::new(ProfileView::build(&profile_name, profile_config));

        info!(profile = %profile_name, tools = registry.len(), "server context ready");

        Ok(Arc::new(Self {
            config,
            registry,
            scope_spec,
            session: RwLock::new(Session::new()),
            scope_filter: RwLock::new(scope_filter),
            active_profile: RwLock::new(view),
            ssh,
            docker,
            k8s,
            audit,
            events: EventBus::new(64),
        }))
    }

    /// Consistent snapshot of the active profile.
    pub async fn profile(&self) -> Arc<ProfileView> {
        self.active_profile.read().await.clone()
    }

    /// Switch the active profile atomically: build the new view, release
    /// leases held for the old one, then swap the pointer and rebuild the
    /// scope filter. Calls entering after this returns see only the new
    /// profile.
    pub async fn switch_profile(&self, name: &str) -> Result<Arc<ProfileView>> {
        let profile_config = self
            .config
            .profile(name)
            .ok_or_else(|| OpsError::Validation(format!("Profile not found: {}", name)))?;
        let view = Arc::new(ProfileView::build(name, profile_config));

        self.ssh.invalidate_all().await;

        let new_filter = self.registry.scope_filter(&self.scope_spec)?;
        {
            let mut active = self.active_profile.write().await;
            let mut filter = self.scope_filter.write().await;
            *active = view.clone();
            *filter = new_filter;
        }

        debug!(profile = %name, "active profile switched");
        Ok(view)
    }

    /// Release per-session resources on transport close.
    pub async fn shutdown(&self) {
        self.session.write().await.close();
        self.ssh.invalidate_all().await;
    }

    // ===== Named-entry resolution =====

    pub fn resolve_host(&self, name: &str) -> Result<HostEntry> {
        self.config.host(name).cloned().ok_or_else(|| {
            OpsError::Validation(format!("Server not found in configuration: {}", name))
        })
    }

    /// Resolve the cluster for a call: explicit argument first, then the
    /// profile default. The profile's context override wins over the
    /// entry's own context.
    pub fn resolve_cluster(
        &self,
        profile: &ProfileView,
        explicit: Option<&str>,
    ) -> Result<ClusterEntry> {
        let name = explicit
            .map(str::to_string)
            .or_else(|| profile.config.kubernetes.cluster.clone())
            .ok_or_else(|| {
                OpsError::Validation(format!(
                    "no cluster configured for profile '{}'",
                    profile.name
                ))
            })?;
        let mut entry = self
            .config
            .cluster(&name)
            .cloned()
            .ok_or_else(|| OpsError::Validation(format!("Cluster not found: {}", name)))?;
        if let Some(context) = &profile.config.kubernetes.context {
            entry.context = Some(context.clone());
        }
        Ok(entry)
    }

    pub fn resolve_docker_endpoint(&self, profile: &ProfileView) -> Result<DockerEndpointEntry> {
        match &profile.config.docker.endpoint {
            Some(name) => self.config.docker_endpoint(name).cloned().ok_or_else(|| {
                OpsError::Validation(format!("Docker endpoint not found: {}", name))
            }),
            None => Ok(DockerEndpointEntry::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_bus_replays_from_known_ids_only() {
        let bus = EventBus::new(4);
        let first = bus.publish("notification", "a");
        let _second = bus.publish("notification", "b");
        let third = bus.publish("ping", "{}");

        let replay = bus.replay_after(first).unwrap();
        assert_eq!(replay.len(), 2);
        assert_eq!(replay.last().unwrap().id, third);

        // Unknown id: the caller must get a clean refusal, not stale data.
        assert!(bus.replay_after(999).is_none());
    }

    #[test]
    fn event_bus_evicts_old_history() {
        let bus = EventBus::new(2);
        let first = bus.publish("notification", "a");
        bus.publish("notification", "b");
        bus.publish("notification", "c");
        assert!(bus.replay_after(first).is_none()); // evicted
    }

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.notify("tools/progress", serde_json::json!({"pct": 50}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "notification");
        assert!(event.data.contains("tools/progress"));
    }
}
