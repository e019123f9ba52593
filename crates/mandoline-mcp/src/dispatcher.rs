use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::context::{self, RequestContext};
use crate::credentials::extract_api_key;
use crate::error::DispatchError;
use crate::http::{HttpRequest, ResponseSink};
use crate::session::{ClientInfo, SessionRegistry};

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Whether a route may open a new session when no id is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPolicy {
    CreateIfMissing,
    RequireExisting,
}

impl SessionPolicy {
    pub const fn allows_create(self) -> bool {
        matches!(self, Self::CreateIfMissing)
    }
}

/// What one dispatched call touched, for the access log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub session_id: Option<String>,
    pub rpc_method: Option<String>,
    pub tool: Option<String>,
}

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Serves one `/mcp` call. Every failure is answered here; nothing
    /// propagates to the connection handler.
    pub async fn dispatch(
        &self,
        request: &HttpRequest,
        request_id: &str,
        policy: SessionPolicy,
        sink: &mut ResponseSink<'_>,
    ) -> DispatchSummary {
        let payload = if request.body.is_empty() {
            None
        } else {
            serde_json::from_slice::<Value>(&request.body).ok()
        };
        let mut summary = summarize(payload.as_ref());

        let Some(api_key) = extract_api_key(&request.headers) else {
            warn!(request_id, "missing or malformed api key");
            respond_error(sink, &DispatchError::AuthenticationMissing).await;
            return summary;
        };

        let incoming = request.headers.get(SESSION_HEADER);
        let resolved = match self
            .registry
            .resolve_or_create(incoming, policy.allows_create())
        {
            Ok(resolved) => resolved,
            Err(err) => {
                let err = DispatchError::from(err);
                if err.status() >= 500 {
                    error!(request_id, error = %err, "session setup failed");
                } else {
                    warn!(request_id, incoming_sid = ?incoming, error = %err, "session rejected");
                }
                respond_error(sink, &err).await;
                return summary;
            }
        };

        let sid = resolved.id.clone();
        summary.session_id = Some(sid.clone());
        sink.set_header(SESSION_HEADER, sid.clone());
        if resolved.is_new {
            info!(sid = %sid, request_id, "new session");
        } else {
            debug!(sid = %sid, request_id, "re-using session");
        }

        if let Some(info) = payload.as_ref().and_then(ClientInfo::from_initialize) {
            let client = info.name.clone();
            if self.registry.set_client_info_once(&sid, info) {
                debug!(sid = %sid, client = ?client, "client info recorded");
            }
        }

        let ctx = RequestContext {
            api_key,
            client_info: self.registry.client_info(&sid),
            request_id: request_id.to_string(),
            session_id: Some(sid.clone()),
        };
        let transport = Arc::clone(&resolved.transport);
        let outcome = context::scope(
            ctx,
            transport.handle_request(request, payload.as_ref(), sink),
        )
        .await;

        if let Err(source) = outcome {
            let err = DispatchError::TransportDelivery {
                session_id: sid.clone(),
                source,
            };
            error!(sid = %sid, request_id, error = %err, "transport request failed");
            if !sink.headers_sent() {
                respond_error(sink, &err).await;
            }
        }

        if transport.is_closed() && self.registry.remove(&sid) {
            info!(sid = %sid, request_id, "session terminated");
        }
        summary
    }
}

async fn respond_error(sink: &mut ResponseSink<'_>, err: &DispatchError) {
    if let Err(write_err) = sink.send_json(err.status(), &err.body()).await {
        debug!(error = %write_err, "failed to write error response");
    }
}

fn summarize(payload: Option<&Value>) -> DispatchSummary {
    let first = match payload {
        Some(Value::Array(items)) => items.first(),
        other => other,
    };
    let rpc_method = first
        .and_then(|v| v.get("method"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let tool = first
        .filter(|_| rpc_method.as_deref() == Some("tools/call"))
        .and_then(|v| v.get("params"))
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    DispatchSummary {
        session_id: None,
        rpc_method,
        tool,
    }
}
