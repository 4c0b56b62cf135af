//! Connection registry implementation
//!
//! O(1) lookup from session identifier to the live control-channel handle.
//! Registration happens when a control channel opens; removal happens when
//! it closes, force-finalizing any transfer streams still open.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::error::RegistryError;
use super::session::Session;

/// Registry of live sessions
///
/// Passed by handle into both the HTTP layer and the control-channel relay;
/// thread-safe via `RwLock` for the read-heavy lookup path.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session on control-channel open
    pub async fn register(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(RegistryError::SessionExists(session.id.clone()));
        }

        tracing::info!(
            session_id = %session.id,
            protocol = session.settings.protocol.as_str(),
            recording = session.settings.recording.is_some(),
            "Session registered"
        );
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    /// Look up a session by identifier
    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Remove a session on control-channel close
    ///
    /// Every transfer stream still open on the session is force-finalized as
    /// failed before the handle is returned; a closed session never leaves a
    /// dangling stream.
    pub async fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.write().await.remove(session_id)?;

        let open = session.open_streams();
        session.close().await;

        tracing::info!(
            session_id = %session_id,
            aborted_streams = open,
            "Session removed"
        );
        Some(session)
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::registry::session::ConnectionSettings;
    use crate::registry::stream::TransferStream;

    fn make_session(id: &str) -> Arc<Session> {
        let (tx, _rx) = mpsc::channel(8);
        let settings = ConnectionSettings {
            protocol: crate::registry::ProtocolFamily::Vnc,
            params: Default::default(),
            recording: None,
        };
        let session = Arc::new(Session::new(id, settings, tx));
        // Keep the writer side alive for the duration of the test
        std::mem::forget(_rx);
        session
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        registry.register(make_session("s-1")).await.unwrap();

        assert!(registry.get("s-1").await.is_some());
        assert!(registry.get("s-2").await.is_none());
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_session_rejected() {
        let registry = ConnectionRegistry::new();
        registry.register(make_session("s-1")).await.unwrap();
        let err = registry.register(make_session("s-1")).await.unwrap_err();
        assert!(matches!(err, RegistryError::SessionExists(_)));
    }

    #[tokio::test]
    async fn test_remove_finalizes_all_streams() {
        let registry = ConnectionRegistry::new();
        let session = make_session("s-1");
        registry.register(Arc::clone(&session)).await.unwrap();

        let (sink_a, mut rx_a) = mpsc::channel(2);
        let (sink_b, mut rx_b) = mpsc::channel(2);
        session
            .register_stream("1", TransferStream::download("a", sink_a))
            .unwrap();
        session
            .register_stream("2", TransferStream::download("b", sink_b))
            .unwrap();
        session
            .register_stream("3", TransferStream::upload("c"))
            .unwrap();

        let removed = registry.remove("s-1").await.unwrap();

        assert_eq!(removed.open_streams(), 0);
        assert_eq!(registry.session_count().await, 0);
        assert!(matches!(rx_a.recv().await, Some(Err(_))));
        assert!(matches!(rx_b.recv().await, Some(Err(_))));
        assert!(removed.is_closed());
    }

    #[tokio::test]
    async fn test_remove_unknown_session() {
        let registry = ConnectionRegistry::new();
        assert!(registry.remove("nope").await.is_none());
    }
}
