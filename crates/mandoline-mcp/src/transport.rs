//! Per-session streamable HTTP transport.
//!
//! A transport is bound once to the shared [`McpServer`]; after that it frames
//! JSON-RPC over POST, keeps a server-sent event stream open on GET and
//! terminates the session on DELETE.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::http::{HttpRequest, ResponseSink};
use crate::protocol::{error_body, JsonRpcRequest, JsonRpcResponse, INVALID_REQUEST, PARSE_ERROR};
use crate::server::McpServer;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport for session {0} is already bound")]
    AlreadyBound(String),

    #[error("protocol handler is shutting down")]
    HandlerClosed,

    #[error("transport for session {0} is closed")]
    Closed(String),

    #[error("transport is not bound")]
    NotBound,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn session_id(&self) -> &str;

    /// Attaches the transport to the protocol handler. Must not block.
    fn bind(&self) -> Result<(), TransportError>;

    /// Serves one HTTP exchange. `payload` is the parsed body, or `None` when
    /// the body was empty or not valid JSON.
    async fn handle_request(
        &self,
        request: &HttpRequest,
        payload: Option<&Value>,
        sink: &mut ResponseSink<'_>,
    ) -> Result<(), TransportError>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

pub trait TransportFactory: Send + Sync {
    fn create(&self, session_id: &str) -> Arc<dyn Transport>;
}

pub struct StreamableHttpTransport {
    session_id: String,
    server: Arc<McpServer>,
    keep_alive: Duration,
    bound: AtomicBool,
    closed: CancellationToken,
}

impl StreamableHttpTransport {
    pub fn new(session_id: impl Into<String>, server: Arc<McpServer>, keep_alive: Duration) -> Self {
        Self {
            session_id: session_id.into(),
            server,
            keep_alive,
            bound: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    async fn handle_post(
        &self,
        request: &HttpRequest,
        payload: Option<&Value>,
        sink: &mut ResponseSink<'_>,
    ) -> Result<(), TransportError> {
        let Some(payload) = payload else {
            let message = if request.body.is_empty() {
                "Parse error: empty body"
            } else {
                "Parse error: invalid JSON"
            };
            sink.send_json(400, &error_body(PARSE_ERROR, message)).await?;
            return Ok(());
        };

        match payload {
            Value::Array(items) if items.is_empty() => {
                sink.send_json(400, &error_body(INVALID_REQUEST, "Invalid Request: empty batch"))
                    .await?;
            }
            Value::Array(items) => {
                let mut responses = Vec::new();
                for item in items {
                    if let Some(response) = self.handle_message(item).await {
                        responses.push(response);
                    }
                }
                if responses.is_empty() {
                    sink.send_empty(202).await?;
                } else {
                    sink.send_json(200, &serde_json::to_value(&responses)?).await?;
                }
            }
            single => match self.handle_message(single).await {
                Some(response) => {
                    sink.send_json(200, &serde_json::to_value(&response)?).await?;
                }
                None => sink.send_empty(202).await?,
            },
        }
        Ok(())
    }

    async fn handle_message(&self, message: &Value) -> Option<JsonRpcResponse> {
        match serde_json::from_value::<JsonRpcRequest>(message.clone()) {
            Ok(request) => self.server.handle_request(request).await,
            Err(err) => {
                let id = message.get("id").cloned().unwrap_or(Value::Null);
                Some(JsonRpcResponse::error(
                    id,
                    INVALID_REQUEST,
                    format!("Invalid Request: {err}"),
                ))
            }
        }
    }

    async fn handle_stream(&self, sink: &mut ResponseSink<'_>) -> Result<(), TransportError> {
        let shutdown = self.server.shutdown_token();
        sink.set_header("Cache-Control", "no-cache");
        sink.start_stream(200, "text/event-stream").await?;
        sink.write_chunk(b": stream open\n\n").await?;

        loop {
            tokio::select! {
                () = self.closed.cancelled() => break,
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.keep_alive) => {
                    if let Err(err) = sink.write_chunk(b": keep-alive\n\n").await {
                        debug!(sid = %self.session_id, error = %err, "event stream peer went away");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn bind(&self) -> Result<(), TransportError> {
        if self
            .bound
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TransportError::AlreadyBound(self.session_id.clone()));
        }
        if !self.server.attach(&self.session_id) {
            self.bound.store(false, Ordering::Release);
            return Err(TransportError::HandlerClosed);
        }
        Ok(())
    }

    async fn handle_request(
        &self,
        request: &HttpRequest,
        payload: Option<&Value>,
        sink: &mut ResponseSink<'_>,
    ) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed(self.session_id.clone()));
        }
        if !self.bound.load(Ordering::Acquire) {
            return Err(TransportError::NotBound);
        }

        match request.method.as_str() {
            "POST" => self.handle_post(request, payload, sink).await,
            "GET" => self.handle_stream(sink).await,
            "DELETE" => {
                self.close();
                sink.send_empty(200).await?;
                Ok(())
            }
            _ => {
                sink.set_header("Allow", "GET, POST, DELETE");
                sink.send_json(405, &error_body(-32000, "Method not allowed."))
                    .await?;
                Ok(())
            }
        }
    }

    fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        if self.bound.load(Ordering::Acquire) {
            self.server.detach(&self.session_id);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Builds [`StreamableHttpTransport`]s wired to one shared server.
pub struct StreamableHttpFactory {
    server: Arc<McpServer>,
    keep_alive: Duration,
}

impl StreamableHttpFactory {
    pub fn new(server: Arc<McpServer>, keep_alive: Duration) -> Self {
        Self { server, keep_alive }
    }
}

impl TransportFactory for StreamableHttpFactory {
    fn create(&self, session_id: &str) -> Arc<dyn Transport> {
        Arc::new(StreamableHttpTransport::new(
            session_id,
            Arc::clone(&self.server),
            self.keep_alive,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::test_server;
    use serde_json::json;

    fn transport(server: &Arc<McpServer>) -> StreamableHttpTransport {
        StreamableHttpTransport::new("s-1", Arc::clone(server), Duration::from_millis(20))
    }

    async fn exchange(
        transport: &StreamableHttpTransport,
        request: &HttpRequest,
    ) -> (Result<(), TransportError>, String) {
        let payload = serde_json::from_slice::<Value>(&request.body).ok();
        let mut out: Vec<u8> = Vec::new();
        let result = {
            let mut sink = ResponseSink::new(&mut out);
            transport
                .handle_request(request, payload.as_ref(), &mut sink)
                .await
        };
        (result, String::from_utf8_lossy(&out).into_owned())
    }

    #[test]
    fn binds_once_and_not_after_shutdown() {
        let server = test_server();
        let t = transport(&server);
        t.bind().expect("bind");
        assert!(matches!(t.bind(), Err(TransportError::AlreadyBound(_))));
        assert_eq!(server.attached_count(), 1);

        server.shutdown();
        let late = StreamableHttpTransport::new("s-2", Arc::clone(&server), Duration::from_secs(1));
        assert!(matches!(late.bind(), Err(TransportError::HandlerClosed)));
    }

    #[tokio::test]
    async fn unbound_transport_refuses_requests() {
        let server = test_server();
        let t = transport(&server);
        let req = HttpRequest::new("POST", "/mcp").with_json(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}));
        let (result, out) = exchange(&t, &req).await;
        assert!(matches!(result, Err(TransportError::NotBound)));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn post_request_gets_json_response() {
        let server = test_server();
        let t = transport(&server);
        t.bind().expect("bind");
        let req = HttpRequest::new("POST", "/mcp").with_json(&json!({"jsonrpc": "2.0", "id": 7, "method": "ping"}));
        let (result, out) = exchange(&t, &req).await;
        result.expect("handled");
        assert!(out.starts_with("HTTP/1.1 200 OK"));
        assert!(out.contains("\"id\":7"));
        assert!(out.contains("\"result\":{}"));
    }

    #[tokio::test]
    async fn notifications_only_get_accepted() {
        let server = test_server();
        let t = transport(&server);
        t.bind().expect("bind");
        let req = HttpRequest::new("POST", "/mcp")
            .with_json(&json!([{"jsonrpc": "2.0", "method": "notifications/initialized"}]));
        let (result, out) = exchange(&t, &req).await;
        result.expect("handled");
        assert!(out.starts_with("HTTP/1.1 202 Accepted"));
    }

    #[tokio::test]
    async fn batch_mixes_results_and_invalid_entries() {
        let server = test_server();
        let t = transport(&server);
        t.bind().expect("bind");
        let req = HttpRequest::new("POST", "/mcp").with_json(&json!([
            {"jsonrpc": "2.0", "id": 1, "method": "ping"},
            {"id": 2},
            {"jsonrpc": "2.0", "method": "notifications/initialized"}
        ]));
        let (result, out) = exchange(&t, &req).await;
        result.expect("handled");
        let body = out.split("\r\n\r\n").nth(1).unwrap_or_default();
        let parsed: Value = serde_json::from_str(body).expect("json");
        let items = parsed.as_array().expect("array");
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["error"]["code"], json!(INVALID_REQUEST));
        assert_eq!(items[1]["id"], json!(2));
    }

    #[tokio::test]
    async fn invalid_json_is_a_parse_error() {
        let server = test_server();
        let t = transport(&server);
        t.bind().expect("bind");
        let mut req = HttpRequest::new("POST", "/mcp");
        req.body = b"{not json".to_vec();
        let (result, out) = exchange(&t, &req).await;
        result.expect("handled");
        assert!(out.starts_with("HTTP/1.1 400"));
        assert!(out.contains("-32700"));
    }

    #[tokio::test]
    async fn delete_closes_and_detaches() {
        let server = test_server();
        let t = transport(&server);
        t.bind().expect("bind");
        let (result, out) = exchange(&t, &HttpRequest::new("DELETE", "/mcp")).await;
        result.expect("handled");
        assert!(out.starts_with("HTTP/1.1 200 OK"));
        assert!(t.is_closed());
        assert_eq!(server.attached_count(), 0);

        let (again, _) = exchange(&t, &HttpRequest::new("POST", "/mcp")).await;
        assert!(matches!(again, Err(TransportError::Closed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn event_stream_sends_keep_alives_until_closed() {
        let server = test_server();
        let t = Arc::new(transport(&server));
        t.bind().expect("bind");

        let closer = Arc::clone(&t);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            closer.close();
        });

        let req = HttpRequest::new("GET", "/mcp").with_header("Accept", "text/event-stream");
        let (result, out) = exchange(&t, &req).await;
        result.expect("handled");
        assert!(out.contains("Content-Type: text/event-stream"));
        assert!(out.contains(": stream open"));
        assert_eq!(out.matches(": keep-alive").count(), 2);
    }
}
