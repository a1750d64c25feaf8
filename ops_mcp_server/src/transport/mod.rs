//! Transports: newline-delimited JSON over stdio, and HTTP POST with a
//! server-sent-events channel. Transports move opaque JSON bytes; they
//! never inspect method names or results.

pub mod http;
pub mod stdio;

pub use http::{serve_http, HttpServerConfig};
pub use stdio::serve_stdio;
