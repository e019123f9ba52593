//! Origin allow-list for browser clients.
//!
//! Allowed origins are echoed back with credentials enabled; any other origin
//! gets no `Access-Control-*` headers and the browser blocks the response.

use crate::dispatcher::SESSION_HEADER;
use crate::http::{HttpRequest, ResponseSink};

const ALLOWED_METHODS: &str = "GET, POST, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str =
    "Content-Type, Authorization, X-API-KEY, MCP-Protocol-Version, MCP-Session-Id";
const PREFLIGHT_MAX_AGE_SECS: &str = "600";

#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(origins: Vec<String>) -> Self {
        Self { origins }
    }

    /// The request's `Origin` if it is on the allow-list.
    pub fn allowed_origin<'r>(&self, request: &'r HttpRequest) -> Option<&'r str> {
        let origin = request.headers.get("origin")?.trim();
        self.origins
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(origin))
            .then_some(origin)
    }

    /// Queues the CORS headers for a regular response.
    pub fn apply(&self, request: &HttpRequest, sink: &mut ResponseSink<'_>) {
        if request.headers.get("origin").is_none() {
            return;
        }
        sink.set_header("Vary", "Origin");
        if let Some(origin) = self.allowed_origin(request) {
            sink.set_header("Access-Control-Allow-Origin", origin);
            sink.set_header("Access-Control-Allow-Credentials", "true");
            sink.set_header("Access-Control-Expose-Headers", SESSION_HEADER);
        }
    }

    /// Answers an `OPTIONS` preflight with 204.
    pub async fn preflight(
        &self,
        request: &HttpRequest,
        sink: &mut ResponseSink<'_>,
    ) -> std::io::Result<()> {
        self.apply(request, sink);
        if self.allowed_origin(request).is_some() {
            sink.set_header("Access-Control-Allow-Methods", ALLOWED_METHODS);
            sink.set_header("Access-Control-Allow-Headers", ALLOWED_HEADERS);
            sink.set_header("Access-Control-Max-Age", PREFLIGHT_MAX_AGE_SECS);
        }
        sink.send_empty(204).await
    }
}
