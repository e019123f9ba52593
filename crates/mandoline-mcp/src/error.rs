use std::io;

use mandoline_client::ClientError;
use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::{error_body, MISSING_SESSION_ID, SESSION_NOT_FOUND};
use crate::session::SessionError;
use crate::transport::TransportError;

/// Errors that stop the daemon from starting or serving.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("client setup failed: {0}")]
    Client(#[from] ClientError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Failures of a single inbound MCP call. All of them end at the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("missing or malformed api key")]
    AuthenticationMissing,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("request failed for session {session_id}: {source}")]
    TransportDelivery {
        session_id: String,
        #[source]
        source: TransportError,
    },
}

impl DispatchError {
    pub const fn status(&self) -> u16 {
        match self {
            Self::AuthenticationMissing => 401,
            Self::Session(SessionError::NotFound(_)) => 404,
            Self::Session(SessionError::MissingId) => 400,
            Self::Session(SessionError::Bind { .. }) | Self::TransportDelivery { .. } => 500,
        }
    }

    pub fn body(&self) -> Value {
        match self {
            Self::AuthenticationMissing => json!({"error": "Unauthorized"}),
            Self::Session(SessionError::NotFound(_)) => {
                error_body(SESSION_NOT_FOUND, "Session not found")
            }
            Self::Session(SessionError::MissingId) => error_body(
                MISSING_SESSION_ID,
                "Bad Request: Mcp-Session-Id header is required",
            ),
            Self::Session(SessionError::Bind { .. }) | Self::TransportDelivery { .. } => {
                internal_error_body()
            }
        }
    }
}

pub fn internal_error_body() -> Value {
    json!({"error": "Internal server error"})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_map_to_structured_bodies() {
        let not_found = DispatchError::from(SessionError::NotFound("abc".to_string()));
        assert_eq!(not_found.status(), 404);
        assert_eq!(not_found.body()["error"]["code"], json!(-32001));
        assert_eq!(not_found.body()["id"], Value::Null);

        let missing = DispatchError::from(SessionError::MissingId);
        assert_eq!(missing.status(), 400);
        assert_eq!(missing.body()["error"]["code"], json!(-32000));
    }

    #[test]
    fn auth_and_bind_failures_use_plain_bodies() {
        assert_eq!(DispatchError::AuthenticationMissing.status(), 401);
        assert_eq!(
            DispatchError::AuthenticationMissing.body(),
            json!({"error": "Unauthorized"})
        );

        let bind = DispatchError::from(SessionError::Bind {
            session_id: "s1".to_string(),
            source: TransportError::HandlerClosed,
        });
        assert_eq!(bind.status(), 500);
        assert_eq!(bind.body(), internal_error_body());
    }
}
