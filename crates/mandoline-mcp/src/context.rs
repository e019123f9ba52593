//! Per-request ambient state.
//!
//! The dispatcher wraps each transport delegation in [`scope`]; tool handlers
//! read the caller's credential back with [`require_api_key`] without it
//! being threaded through the protocol layer.

use std::fmt;
use std::future::Future;

use thiserror::Error;

use crate::session::ClientInfo;

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Mandoline API key missing.")]
    MissingApiKey,
}

#[derive(Clone)]
pub struct RequestContext {
    pub api_key: String,
    pub client_info: Option<ClientInfo>,
    pub request_id: String,
    pub session_id: Option<String>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("api_key", &"<redacted>")
            .field("client_info", &self.client_info)
            .field("request_id", &self.request_id)
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Runs `fut` with `context` visible to everything it awaits.
pub async fn scope<F>(context: RequestContext, fut: F) -> F::Output
where
    F: Future,
{
    REQUEST_CONTEXT.scope(context, fut).await
}

/// Snapshot of the active context; `None` outside any scope.
pub fn current() -> Option<RequestContext> {
    REQUEST_CONTEXT.try_with(Clone::clone).ok()
}

pub fn require_api_key() -> Result<String, ContextError> {
    current()
        .map(|ctx| ctx.api_key)
        .filter(|key| !key.is_empty())
        .ok_or(ContextError::MissingApiKey)
}
