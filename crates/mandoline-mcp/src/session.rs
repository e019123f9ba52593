//! Session registry: maps client-visible ids to live transports.
//!
//! All per-session data sits behind one mutex. Each public operation takes the
//! lock once, never across an `.await`, so creation, touch and eviction stay
//! atomic with respect to each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::transport::{Transport, TransportError, TransportFactory};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("missing session id")]
    MissingId,

    #[error("failed to bind transport for session {session_id}: {source}")]
    Bind {
        session_id: String,
        #[source]
        source: TransportError,
    },
}

/// `clientInfo` from an `initialize` request. Unknown fields are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClientInfo {
    /// Returns the client info carried by an `initialize` payload, if any.
    pub fn from_initialize(payload: &Value) -> Option<Self> {
        if payload.get("method").and_then(Value::as_str) != Some("initialize") {
            return None;
        }
        let info = payload.get("params")?.get("clientInfo")?;
        if !info.is_object() {
            return None;
        }
        serde_json::from_value(info.clone()).ok()
    }
}

/// Millisecond clock for idle tracking, injectable for tests.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Milliseconds since the registry was built. Monotonic, so wall-clock
/// steps never expire sessions, and it follows tokio's paused clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

struct SessionEntry {
    transport: Arc<dyn Transport>,
    client_info: Option<ClientInfo>,
    last_used_ms: u64,
}

pub struct ResolvedSession {
    pub id: String,
    pub transport: Arc<dyn Transport>,
    pub is_new: bool,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    factory: Arc<dyn TransportFactory>,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self::with_clock(factory, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(factory: Arc<dyn TransportFactory>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            factory,
            clock,
        }
    }

    pub fn resolve_or_create(
        &self,
        incoming: Option<&str>,
        allow_create: bool,
    ) -> Result<ResolvedSession, SessionError> {
        self.resolve_or_create_at(incoming, allow_create, self.clock.now_ms())
    }

    /// Looks up `incoming`, or creates and binds a new session when allowed.
    /// An empty id counts as absent. Unknown ids never fall back to creation,
    /// and a session whose transport already closed counts as unknown.
    pub fn resolve_or_create_at(
        &self,
        incoming: Option<&str>,
        allow_create: bool,
        now_ms: u64,
    ) -> Result<ResolvedSession, SessionError> {
        let incoming = incoming.map(str::trim).filter(|id| !id.is_empty());
        let mut sessions = self.sessions.lock();

        if let Some(id) = incoming {
            if sessions
                .get(id)
                .is_some_and(|entry| entry.transport.is_closed())
            {
                sessions.remove(id);
                debug!(sid = %id, "dropped closed session");
            }
            let entry = sessions
                .get_mut(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            entry.last_used_ms = entry.last_used_ms.max(now_ms);
            return Ok(ResolvedSession {
                id: id.to_string(),
                transport: Arc::clone(&entry.transport),
                is_new: false,
            });
        }

        if !allow_create {
            return Err(SessionError::MissingId);
        }

        let id = Uuid::new_v4().to_string();
        let transport = self.factory.create(&id);
        transport.bind().map_err(|source| SessionError::Bind {
            session_id: id.clone(),
            source,
        })?;
        sessions.insert(
            id.clone(),
            SessionEntry {
                transport: Arc::clone(&transport),
                client_info: None,
                last_used_ms: now_ms,
            },
        );
        debug!(sid = %id, active = sessions.len(), "session created");
        Ok(ResolvedSession {
            id,
            transport,
            is_new: true,
        })
    }

    /// Stores `info` unless the session already has client info.
    /// Returns whether it was stored.
    pub fn set_client_info_once(&self, session_id: &str, info: ClientInfo) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(entry) if entry.client_info.is_none() => {
                entry.client_info = Some(info);
                true
            }
            _ => false,
        }
    }

    pub fn client_info(&self, session_id: &str) -> Option<ClientInfo> {
        self.sessions
            .lock()
            .get(session_id)
            .and_then(|entry| entry.client_info.clone())
    }

    pub fn last_used_ms(&self, session_id: &str) -> Option<u64> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|entry| entry.last_used_ms)
    }

    /// Removes every session idle for more than `timeout_ms` and closes its
    /// transport. Returns how many were removed.
    pub fn evict_expired(&self, now_ms: u64, timeout_ms: u64) -> usize {
        let evicted = {
            let mut sessions = self.sessions.lock();
            let expired = sessions
                .iter()
                .filter(|(_, entry)| now_ms.saturating_sub(entry.last_used_ms) > timeout_ms)
                .map(|(id, _)| id.clone())
                .collect::<Vec<_>>();
            expired
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|entry| (id, entry.transport)))
                .collect::<Vec<_>>()
        };

        for (id, transport) in &evicted {
            transport.close();
            debug!(sid = %id, "session expired");
        }
        evicted.len()
    }

    pub fn evict_idle(&self, idle_timeout: Duration) -> usize {
        let timeout_ms = u64::try_from(idle_timeout.as_millis()).unwrap_or(u64::MAX);
        self.evict_expired(self.clock.now_ms(), timeout_ms)
    }

    /// Drops a session and closes its transport. Returns whether it existed.
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().remove(session_id);
        match removed {
            Some(entry) => {
                entry.transport.close();
                true
            }
            None => false,
        }
    }

    /// Closes every transport; used on shutdown.
    pub fn clear(&self) -> usize {
        let drained = self
            .sessions
            .lock()
            .drain()
            .map(|(_, entry)| entry.transport)
            .collect::<Vec<_>>();
        for transport in &drained {
            transport.close();
        }
        drained.len()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
