//! Connection registry: session id → live connector handle.
//!
//! One entry per session at most. Only the session's own task writes its
//! entry; the status endpoint reads the count. The lock is never held across
//! an `.await`, so teardown of a removed handle happens outside it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::connector::ConnectorHandle;

/// Identifier of one browser session (one WebSocket).
pub type SessionId = String;

/// Generate a fresh session id.
pub fn new_session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string()
}

/// Shared map from session to its registered connector.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<SessionId, ConnectorHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connector` for `session`.
    ///
    /// Returns the handle it displaced, which the caller must tear down.
    pub fn put(&self, session: &str, connector: ConnectorHandle) -> Option<ConnectorHandle> {
        self.inner
            .lock()
            .ok()
            .and_then(|mut guard| guard.insert(session.to_string(), connector))
    }

    pub fn get(&self, session: &str) -> Option<ConnectorHandle> {
        self.inner.lock().ok()?.get(session).cloned()
    }

    /// Remove and return the session's connector, if any.
    pub fn remove(&self, session: &str) -> Option<ConnectorHandle> {
        self.inner.lock().ok()?.remove(session)
    }

    pub fn contains(&self, session: &str) -> bool {
        self.inner
            .lock()
            .map(|guard| guard.contains_key(session))
            .unwrap_or(false)
    }

    /// Number of sessions with a registered connector.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .finish()
    }
}
