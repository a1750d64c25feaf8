//! Tool registry.
//!
//! Populated once at startup with immutable descriptors; colliding names
//! fail startup. The session's scope filter selects the subset `tools/list`
//! exposes: the named tiers are strict supersets (core ⊂ standard ⊂ all),
//! and an explicit list resolves against the registered names.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

use ops_shared_types::{OpsError, Result};
use server_config::ScopeSpec;

use crate::context::ServerContext;

/// Scope tier of a tool. `all`-scoped tools are the mutating ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ToolScope {
    Core,
    Standard,
    All,
}

impl ToolScope {
    /// Whether a tool of this scope is visible under the given tier.
    fn visible_under(&self, tier: &ScopeSpec) -> bool {
        match tier {
            ScopeSpec::Core => *self == ToolScope::Core,
            ScopeSpec::Standard => *self <= ToolScope::Standard,
            ScopeSpec::All => true,
            ScopeSpec::Explicit(_) => false, // resolved by name instead
        }
    }
}

/// What a handler produced, before redaction and shaping.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Human-readable summary; becomes the first text content block.
    pub text: String,
    /// Machine-readable payload mirroring the tool's output schema.
    pub structured: Option<Value>,
    /// Adapter-reported failure with a well-formed result (e.g. non-zero
    /// remote exit).
    pub is_error: bool,
    /// Status kind for the audit record (`ok`, `exit_2`, ...).
    pub status: String,
    /// Target context (host/cluster/namespace/container) for the audit.
    pub target: Option<String>,
}

impl ToolOutcome {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
            is_error: false,
            status: "ok".to_string(),
            target: None,
        }
    }

    pub fn with_structured(mut self, structured: Value) -> Self {
        self.structured = Some(structured);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<ToolOutcome>> + Send>>;

/// Handler reference bound at startup. The `Duration` is the effective
/// deadline the dispatcher computed for this call.
pub type HandlerFn = fn(Arc<ServerContext>, Value, Duration) -> HandlerFuture;

/// Immutable tool descriptor.
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
    pub scope: ToolScope,
    /// Whether the tool may change external state; gates the policy
    /// pre-check.
    pub mutating: bool,
    /// Per-tool default deadline when the call carries no `timeout`.
    pub default_timeout: Duration,
    pub handler: HandlerFn,
}

/// Catalog of tools, keyed by name.
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    by_name: BTreeMap<&'static str, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            by_name: BTreeMap::new(),
        }
    }

    /// The full catalog the server ships with.
    pub fn standard_catalog() -> Result<Self> {
        let mut registry = Self::new();
        for descriptor in crate::tools::catalog() {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        if self.by_name.contains_key(descriptor.name) {
            return Err(OpsError::Config(format!(
                "duplicate tool name '{}'",
                descriptor.name
            )));
        }
        self.by_name.insert(descriptor.name, self.tools.len());
        self.tools.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.by_name.get(name).map(|&index| &self.tools[index])
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Compute the scope filter for a session. An explicit list that
    /// resolves to nothing is a configuration error.
    pub fn scope_filter(&self, spec: &ScopeSpec) -> Result<BTreeSet<String>> {
        match spec {
            ScopeSpec::Explicit(names) => {
                let mut filter = BTreeSet::new();
                for name in names {
                    if self.by_name.contains_key(name.as_str()) {
                        filter.insert(name.clone());
                    } else {
                        warn!(tool = %name, "scope names an unregistered tool");
                    }
                }
                if filter.is_empty() {
                    return Err(OpsError::Config(
                        "explicit tool scope resolves to no registered tools".to_string(),
                    ));
                }
                Ok(filter)
            }
            tier => Ok(self
                .tools
                .iter()
                .filter(|t| t.scope.visible_under(tier))
                .map(|t| t.name.to_string())
                .collect()),
        }
    }

    /// Client-facing descriptor list for `tools/list`. Exposes name,
    /// description, and input schema; handler internals stay private.
    pub fn list_for(&self, filter: &BTreeSet<String>) -> Vec<Value> {
        self.tools
            .iter()
            .filter(|t| filter.contains(t.name))
            .map(|t| {
                let mut entry = json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                });
                if let Some(output_schema) = &t.output_schema {
                    entry["outputSchema"] = output_schema.clone();
                }
                entry
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_handler(
        _ctx: Arc<ServerContext>,
        _args: Value,
        _deadline: Duration,
    ) -> HandlerFuture {
        Box::pin(async { Ok(ToolOutcome::text_only("ok")) })
    }

    fn descriptor(name: &'static str, scope: ToolScope) -> ToolDescriptor {
        ToolDescriptor {
            name,
            description: format!("test tool {}", name),
            input_schema: json!({"type": "object"}),
            output_schema: None,
            scope,
            mutating: scope == ToolScope::All,
            default_timeout: Duration::from_secs(30),
            handler: dummy_handler,
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("alpha", ToolScope::Core)).unwrap();
        registry
            .register(descriptor("beta", ToolScope::Standard))
            .unwrap();
        registry.register(descriptor("gamma", ToolScope::All)).unwrap();
        registry
    }

    #[test]
    fn duplicate_names_fail_registration() {
        let mut registry = registry();
        let err = registry
            .register(descriptor("alpha", ToolScope::Core))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn tiers_are_strict_supersets() {
        let registry = registry();
        let core = registry.scope_filter(&ScopeSpec::Core).unwrap();
        let standard = registry.scope_filter(&ScopeSpec::Standard).unwrap();
        let all = registry.scope_filter(&ScopeSpec::All).unwrap();

        assert!(core.is_subset(&standard));
        assert!(standard.is_subset(&all));
        assert!(core.len() < standard.len());
        assert!(standard.len() < all.len());
        assert_eq!(all.len(), registry.len());
    }

    #[test]
    fn explicit_scope_resolves_by_name() {
        let registry = registry();
        let filter = registry
            .scope_filter(&ScopeSpec::Explicit(vec![
                "alpha".to_string(),
                "gamma".to_string(),
                "missing".to_string(),
            ]))
            .unwrap();
        assert_eq!(filter.len(), 2);
        assert!(filter.contains("alpha"));
        assert!(filter.contains("gamma"));
    }

    #[test]
    fn explicit_scope_with_no_matches_is_an_error() {
        let registry = registry();
        let err = registry
            .scope_filter(&ScopeSpec::Explicit(vec!["nope".to_string()]))
            .unwrap_err();
        assert!(matches!(err, OpsError::Config(_)));
    }

    #[test]
    fn listing_respects_the_filter_and_hides_internals() {
        let registry = registry();
        let filter = registry.scope_filter(&ScopeSpec::Core).unwrap();
        let listed = registry.list_for(&filter);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["name"], "alpha");
        assert!(listed[0].get("handler").is_none());
        assert!(listed[0].get("scope").is_none());
    }
}
