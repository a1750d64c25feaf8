//! Tool scope selection.
//!
//! `TOOLS_SCOPE` is either one of the named tiers (`core`, `standard`,
//! `all`) or an explicit comma-separated list of tool names. The named
//! tiers are strict supersets: core ⊂ standard ⊂ all.

use std::str::FromStr;

use crate::error::{ConfigError, Result};
use crate::paths::ENV_TOOLS_SCOPE;

/// The scope a session is granted at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeSpec {
    Core,
    Standard,
    All,
    /// An explicit, non-empty list of tool names.
    Explicit(Vec<String>),
}

impl Default for ScopeSpec {
    fn default() -> Self {
        ScopeSpec::Standard
    }
}

impl FromStr for ScopeSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" => Err(ConfigError::InvalidScope("empty scope".to_string())),
            "core" => Ok(ScopeSpec::Core),
            "standard" => Ok(ScopeSpec::Standard),
            "all" => Ok(ScopeSpec::All),
            _ => {
                let names: Vec<String> = trimmed
                    .split(',')
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect();
                if names.is_empty() {
                    return Err(ConfigError::InvalidScope(format!(
                        "'{}' names no tools",
                        s
                    )));
                }
                Ok(ScopeSpec::Explicit(names))
            }
        }
    }
}

/// Read the scope from the environment; unset means `standard`.
pub fn scope_from_env() -> Result<ScopeSpec> {
    match std::env::var(ENV_TOOLS_SCOPE) {
        Ok(value) => value.parse(),
        Err(_) => Ok(ScopeSpec::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_tiers_parse() {
        assert_eq!("core".parse::<ScopeSpec>().unwrap(), ScopeSpec::Core);
        assert_eq!("Standard".parse::<ScopeSpec>().unwrap(), ScopeSpec::Standard);
        assert_eq!(" all ".parse::<ScopeSpec>().unwrap(), ScopeSpec::All);
    }

    #[test]
    fn explicit_list_parses() {
        let spec = "ssh_execute, context_show".parse::<ScopeSpec>().unwrap();
        assert_eq!(
            spec,
            ScopeSpec::Explicit(vec!["ssh_execute".into(), "context_show".into()])
        );
    }

    #[test]
    fn empty_scope_is_rejected() {
        assert!("".parse::<ScopeSpec>().is_err());
        assert!(" , ,".parse::<ScopeSpec>().is_err());
    }
}
