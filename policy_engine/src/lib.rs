//! Policy layer: command allowlists, secret redaction, and the audit log.
//!
//! Sits between the tool dispatcher and the backend adapters. The
//! allowlist refuses disallowed pass-through commands before any side
//! effect; the redactor masks secrets on every outbound path; the audit
//! log records every call that reached (or was refused before) an adapter.

pub mod allowlist;
pub mod audit;
pub mod redaction;

pub use allowlist::{Allowlist, PolicyDecision, WILDCARD};
pub use audit::{fingerprint_args, AuditLog, AuditRecord};
pub use redaction::{Redactor, SENTINEL};
