//! Command allowlist for pass-through tools.
//!
//! A profile maps command families (`kubectl`, `docker`, `compose`) to
//! permitted verbs. The first token of a forwarded command names the
//! family; the second names the verb. A family absent from the map is not a
//! pass-through family and is admitted as-is. The single token `*` admits
//! every verb of its family. A secondary scan refuses intrinsically
//! destructive flags unless the profile opts in.

use std::collections::{BTreeMap, BTreeSet};

use server_config::ProfileConfig;

/// Wildcard token admitting every verb of a family.
pub const WILDCARD: &str = "*";

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed,
    /// Refused; the reason is safe to show to the client.
    Refused(String),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allowed)
    }
}

#[derive(Debug, Clone)]
enum VerbSet {
    Wildcard,
    Verbs(BTreeSet<String>),
}

/// Compiled allowlist view for one profile.
#[derive(Debug, Clone)]
pub struct Allowlist {
    families: BTreeMap<String, VerbSet>,
    dangerous_flags: Vec<String>,
    dangerous_allowed: bool,
}

impl Allowlist {
    pub fn from_profile(profile: &ProfileConfig) -> Self {
        let mut families = BTreeMap::new();
        for (family, verbs) in &profile.allowlist {
            let set = if verbs.iter().any(|v| v == WILDCARD) {
                VerbSet::Wildcard
            } else {
                VerbSet::Verbs(verbs.iter().cloned().collect())
            };
            families.insert(family.clone(), set);
        }
        Self {
            families,
            dangerous_flags: profile.dangerous_flags.clone(),
            dangerous_allowed: profile.dangerous_allowed,
        }
    }

    /// Check a free-form command line forwarded to a remote shell.
    pub fn check_command(&self, command: &str) -> PolicyDecision {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        let Some(family) = tokens.first() else {
            return PolicyDecision::Allowed; // empty command fails later
        };

        if let Some(verbs) = self.families.get(*family) {
            let Some(verb) = tokens.get(1) else {
                return PolicyDecision::Refused(format!(
                    "'{}' requires a verb and none was given",
                    family
                ));
            };
            if let VerbSet::Verbs(allowed) = verbs {
                if !allowed.contains(*verb) {
                    return PolicyDecision::Refused(format!(
                        "'{} {}' is not in the profile allowlist",
                        family, verb
                    ));
                }
            }
            if let Some(flag) = self.dangerous_flag_in(&tokens[2..]) {
                return PolicyDecision::Refused(format!(
                    "'{}' carries the destructive flag '{}'",
                    family, flag
                ));
            }
        }

        PolicyDecision::Allowed
    }

    /// Check a catalog tool mapped to a (family, verb) pair, with any extra
    /// argv-like tokens it forwards.
    pub fn check_tool(&self, family: &str, verb: &str, extra: &[&str]) -> PolicyDecision {
        match self.families.get(family) {
            None => PolicyDecision::Refused(format!(
                "family '{}' is not allowed by the active profile",
                family
            )),
            Some(VerbSet::Wildcard) => self.check_dangerous(family, extra),
            Some(VerbSet::Verbs(allowed)) => {
                if !allowed.contains(verb) {
                    return PolicyDecision::Refused(format!(
                        "'{} {}' is not in the profile allowlist",
                        family, verb
                    ));
                }
                self.check_dangerous(family, extra)
            }
        }
    }

    fn check_dangerous(&self, family: &str, extra: &[&str]) -> PolicyDecision {
        if let Some(flag) = self.dangerous_flag_in(extra) {
            return PolicyDecision::Refused(format!(
                "'{}' carries the destructive flag '{}'",
                family, flag
            ));
        }
        PolicyDecision::Allowed
    }

    fn dangerous_flag_in(&self, tokens: &[&str]) -> Option<String> {
        if self.dangerous_allowed {
            return None;
        }
        for token in tokens {
            for flag in &self.dangerous_flags {
                if token.contains(flag.as_str()) {
                    return Some(flag.clone());
                }
            }
        }
        None
    }
}
