//! JSON-RPC 2.0 protocol engine.
//!
//! Parses and validates envelopes, routes methods, and formats results and
//! errors. Batches are processed element-wise with notification slots
//! omitted from the response array. Transports hand raw JSON in and take
//! raw JSON out; they never see method names.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::context::ServerContext;
use crate::dispatch;

/// Protocol version advertised in `initialize.result.protocolVersion`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server identity reported during the handshake.
pub const SERVER_NAME: &str = "ops-mcp-server";

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID; absent for notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name
    pub method: String,
    /// Parameters (optional)
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Mirrors the request ID (null when it could not be read)
    pub id: Option<Value>,
    /// Result (on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError::new(code, message)),
        }
    }

    /// Create an error response carrying structured data.
    pub fn error_with_data(
        id: Option<Value>,
        code: i32,
        message: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError::new(code, message).with_data(data)),
        }
    }

    fn from_rpc_error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// The protocol engine bound to one server context.
#[derive(Clone)]
pub struct ProtocolEngine {
    ctx: Arc<ServerContext>,
}

impl ProtocolEngine {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Process one raw frame. Returns the serialized response, or None for
    /// notifications (and all-notification batches).
    pub async fn process_message(&self, raw: &str) -> Option<String> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                let response =
                    JsonRpcResponse::error(None, PARSE_ERROR, format!("Parse error: {}", e));
                return serde_json::to_string(&response).ok();
            }
        };

        // An empty batch answers with a single error object, not an array.
        let is_batch = value.as_array().map(|a| !a.is_empty()).unwrap_or(false);
        let responses = self.process_value(value).await;
        if responses.is_empty() {
            return None;
        }
        if is_batch {
            serde_json::to_string(&responses).ok()
        } else {
            serde_json::to_string(&responses[0]).ok()
        }
    }

    /// Process a parsed envelope or batch. The returned vector omits
    /// notification slots; it is empty when every element was a
    /// notification.
    pub async fn process_value(&self, value: Value) -> Vec<JsonRpcResponse> {
        match value {
            Value::Array(elements) => {
                if elements.is_empty() {
                    return vec![JsonRpcResponse::error(
                        None,
                        INVALID_REQUEST,
                        "Empty batch",
                    )];
                }
                let mut responses = Vec::new();
                for element in elements {
                    if !element.is_object() {
                        // A primitive slot in a batch was never a request.
                        responses.push(JsonRpcResponse::error(
                            None,
                            PARSE_ERROR,
                            "Batch element is not a request object",
                        ));
                        continue;
                    }
                    if let Some(response) = self.handle_envelope(element).await {
                        responses.push(response);
                    }
                }
                responses
            }
            Value::Object(_) => match self.handle_envelope(value).await {
                Some(response) => vec![response],
                None => vec![],
            },
            _ => vec![JsonRpcResponse::error(
                None,
                INVALID_REQUEST,
                "Request is not an object",
            )],
        }
    }

    /// Validate one envelope and route it. Returns None for notifications;
    /// their errors are logged only.
    async fn handle_envelope(&self, value: Value) -> Option<JsonRpcResponse> {
        let id = value.get("id").cloned();
        let is_notification = id.is_none();

        // `id: null` is not a notification, it is a malformed request.
        let id = match id {
            Some(Value::Null) => {
                return Some(JsonRpcResponse::error(
                    None,
                    INVALID_REQUEST,
                    "Request id must be a string or a number",
                ));
            }
            Some(other) if !other.is_string() && !other.is_number() => {
                return Some(JsonRpcResponse::error(
                    None,
                    INVALID_REQUEST,
                    "Request id must be a string or a number",
                ));
            }
            other => other,
        };

        let envelope_error = |reason: &str| {
            if is_notification {
                warn!(reason, "dropping malformed notification");
                None
            } else {
                Some(JsonRpcResponse::error(id.clone(), INVALID_REQUEST, reason))
            }
        };

        if value.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return envelope_error("Missing or invalid jsonrpc version");
        }
        let Some(method) = value.get("method").and_then(Value::as_str) else {
            return envelope_error("Missing method field");
        };

        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params: value.get("params").cloned().unwrap_or(Value::Null),
        };

        let response = self.handle_request(request).await;
        if is_notification {
            if let Some(response) = &response {
                if let Some(error) = &response.error {
                    warn!(code = error.code, message = %error.message, "error for notification suppressed");
                }
            }
            return None;
        }
        response
    }

    /// Route a validated request to its method handler.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, "handling request");

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id, request.params).await),
            "initialized" | "notifications/initialized" => {
                self.handle_initialized().await;
                // Always a notification; any response would be dropped.
                Some(JsonRpcResponse::success(request.id, json!({})))
            }
            "ping" => Some(JsonRpcResponse::success(request.id, json!({}))),
            "tools/list" => Some(self.handle_tools_list(request.id).await),
            "tools/call" => Some(self.handle_tools_call(request.id, request.params).await),
            _ => {
                warn!(method = %request.method, "unknown method");
                Some(JsonRpcResponse::error(
                    request.id,
                    METHOD_NOT_FOUND,
                    format!("Method not found: {}", request.method),
                ))
            }
        }
    }

    async fn handle_initialize(&self, id: Option<Value>, params: Value) -> JsonRpcResponse {
        #[derive(Debug, Deserialize)]
        struct InitializeParams {
            #[serde(default, rename = "protocolVersion")]
            protocol_version: Option<String>,
            #[serde(default, rename = "clientInfo")]
            client_info: Option<Value>,
            #[serde(default)]
            #[allow(dead_code)] // Client capabilities are accepted, not negotiated on.
            capabilities: Option<Value>,
        }

        // Absent params are an empty object.
        let params = if params.is_null() { json!({}) } else { params };
        let params: InitializeParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {}", e))
            }
        };

        if let Some(requested) = &params.protocol_version {
            if requested != PROTOCOL_VERSION {
                warn!(requested = %requested, "client requested unsupported protocol version");
            }
        }

        let mut session = self.ctx.session.write().await;
        if let Err(message) = session.begin_initialize(params.client_info, PROTOCOL_VERSION) {
            return JsonRpcResponse::error(id, INVALID_REQUEST, message);
        }

        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": { "listChanged": false }
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    async fn handle_initialized(&self) {
        let mut session = self.ctx.session.write().await;
        if session.mark_ready() {
            debug!("session ready");
        } else {
            warn!("initialized notification outside handshake");
        }
    }

    async fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        if !self.ctx.session.read().await.is_ready() {
            return JsonRpcResponse::error(id, INVALID_REQUEST, "Server not initialized");
        }
        let filter = self.ctx.scope_filter.read().await.clone();
        let tools = self.ctx.registry.list_for(&filter);
        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Value) -> JsonRpcResponse {
        if !self.ctx.session.read().await.is_ready() {
            return JsonRpcResponse::error(id, INVALID_REQUEST, "Server not initialized");
        }
        match dispatch::call_tool(&self.ctx, id.clone(), params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::from_rpc_error(id, error),
        }
    }
}
