//! Per-connection session state.
//!
//! One session per transport connection. The lifecycle is strict:
//! `PreInit -> Initializing -> Ready -> Closed`. Tool methods outside
//! `Ready` fail with an invalid-request protocol error; a second
//! `initialize` on the same session is likewise refused.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    PreInit,
    Initializing,
    Ready,
    Closed,
}

#[derive(Debug)]
pub struct Session {
    phase: SessionPhase,
    client_info: Option<Value>,
    negotiated_protocol_version: Option<&'static str>,
    /// Monotone counter used only for logging correlation.
    conversation_counter: u64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::PreInit,
            client_info: None,
            negotiated_protocol_version: None,
            conversation_counter: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == SessionPhase::Ready
    }

    /// Record the handshake. Fails when the session already left `PreInit`
    /// (a second `initialize` is a protocol violation).
    pub fn begin_initialize(
        &mut self,
        client_info: Option<Value>,
        protocol_version: &'static str,
    ) -> Result<(), &'static str> {
        if self.phase != SessionPhase::PreInit {
            return Err("Session already initialized");
        }
        self.client_info = client_info;
        self.negotiated_protocol_version = Some(protocol_version);
        self.phase = SessionPhase::Initializing;
        Ok(())
    }

    /// Commit the session on the `initialized` notification. Returns false
    /// when the notification arrived outside the handshake.
    pub fn mark_ready(&mut self) -> bool {
        if self.phase == SessionPhase::Initializing {
            self.phase = SessionPhase::Ready;
            true
        } else {
            false
        }
    }

    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
    }

    pub fn client_info(&self) -> Option<&Value> {
        self.client_info.as_ref()
    }

    pub fn negotiated_protocol_version(&self) -> Option<&'static str> {
        self.negotiated_protocol_version
    }

    /// Next conversation turn id, for log correlation.
    pub fn next_turn(&mut self) -> u64 {
        self.conversation_counter += 1;
        self.conversation_counter
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
