// Directory of live sessions keyed by client id.
use std::collections::HashMap;

use courier_transport::ConnectionId;
use tokio::sync::{RwLock, watch};

struct SessionEntry {
    connection: ConnectionId,
    cancel: watch::Sender<bool>,
}

/// Tracks which principal is bound to which live session so shutdown can
/// close every session. A reconnect under the same client id replaces the
/// directory entry; the older session keeps running until its transport
/// drops, and its teardown only removes the entry it still owns.
#[derive(Default)]
pub struct SessionDirectory {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        client_id: &str,
        connection: ConnectionId,
        cancel: watch::Sender<bool>,
    ) {
        let replaced = self.sessions.write().await.insert(
            client_id.to_string(),
            SessionEntry { connection, cancel },
        );
        if replaced.is_some() {
            tracing::info!(client_id = %client_id, "replaced directory entry for reconnect");
        }
        metrics::gauge!("courier_sessions_active").increment(1.0);
    }

    /// Remove the entry, but only if this session still owns it.
    pub async fn remove(&self, client_id: &str, connection: ConnectionId) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(client_id)
            .is_some_and(|entry| entry.connection == connection)
        {
            sessions.remove(client_id);
        }
        metrics::gauge!("courier_sessions_active").decrement(1.0);
    }

    /// Signal every live session to tear down. Used on service stop.
    pub async fn shutdown_all(&self) {
        let sessions = self.sessions.read().await;
        for (client_id, entry) in sessions.iter() {
            if entry.cancel.send(true).is_err() {
                tracing::debug!(client_id = %client_id, "session already gone at shutdown");
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
