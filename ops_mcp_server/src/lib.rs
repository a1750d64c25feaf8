//! Operations control-plane server.
//!
//! Bridges a JSON-RPC 2.0 client (an AI assistant, a test harness, or
//! anything that speaks the protocol) to SSH hosts, container daemons, and
//! Kubernetes clusters, under per-profile policy. The protocol engine and
//! session live here; backends are consumed through the capability traits
//! in `backend_interface`.

pub mod context;
pub mod dispatch;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod session;
pub mod tools;
pub mod transport;

pub use context::{EventBus, OutboundEvent, ProfileView, ServerContext};
pub use protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ProtocolEngine, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
};
pub use registry::{ToolDescriptor, ToolRegistry, ToolScope};
pub use session::{Session, SessionPhase};
