use std::collections::HashSet;
use std::sync::Arc;

use mandoline_client::ClientFactory;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::protocol::{JsonRpcRequest, JsonRpcResponse, INVALID_REQUEST, METHOD_NOT_FOUND};
use crate::resources::DocsFetcher;

pub const DEFAULT_MCP_PROTOCOL_VERSION: &str = "2025-06-18";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub title: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "mandoline-mcp-server".to_string(),
            title: "Mandoline".to_string(),
            version: "0.2.0".to_string(),
        }
    }
}

/// Protocol handler shared by every session's transport.
pub struct McpServer {
    info: ServerInfo,
    pub(crate) clients: Arc<dyn ClientFactory>,
    pub(crate) docs: DocsFetcher,
    attached: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
}

impl McpServer {
    pub fn new(info: ServerInfo, clients: Arc<dyn ClientFactory>, docs: DocsFetcher) -> Self {
        Self {
            info,
            clients,
            docs,
            attached: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Registers a session's transport. Refused once shutdown has begun.
    pub fn attach(&self, session_id: &str) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        self.attached.lock().insert(session_id.to_string());
        true
    }

    pub fn detach(&self, session_id: &str) {
        self.attached.lock().remove(session_id);
    }

    pub fn attached_count(&self) -> usize {
        self.attached.lock().len()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                "invalid jsonrpc version",
            ));
        }

        if request.is_notification() {
            debug!(method = %request.method, "notification ignored");
            return None;
        }
        let id = request.id.unwrap_or(Value::Null);

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.initialize_result(&request.params)),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, self.tools_list_result()),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "resources/list" => JsonRpcResponse::success(id, self.resources_list_result()),
            "resources/read" => self.handle_resources_read(id, request.params).await,
            _ => JsonRpcResponse::error(id, METHOD_NOT_FOUND, "method not found"),
        };
        Some(response)
    }

    fn initialize_result(&self, params: &Value) -> Value {
        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MCP_PROTOCOL_VERSION);
        json!({
            "protocolVersion": protocol_version,
            "serverInfo": {
                "name": self.info.name,
                "title": self.info.title,
                "version": self.info.version
            },
            "capabilities": {
                "tools": {"listChanged": false},
                "resources": {"subscribe": false, "listChanged": false}
            }
        })
    }
}
