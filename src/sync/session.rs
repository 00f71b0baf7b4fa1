//! Connected-client sessions and the process-wide session registry.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::protocol::ServerEvent;
use super::{DocId, SessionId, SyncError, SyncResult};
use crate::auth::AuthUser;

/// Outbound queue depth per session. A session whose queue fills is slow and
/// gets disconnected rather than blocking its peers.
pub const OUTBOUND_QUEUE: usize = 256;

/// One authenticated client connection.
pub struct Session {
    pub id: SessionId,
    pub user_id: String,
    pub username: String,
    pub email: String,
    outbound: mpsc::Sender<ServerEvent>,
    joined: Mutex<HashSet<DocId>>,
    last_active: RwLock<i64>,
}

impl Session {
    pub fn new(id: impl Into<String>, user: &AuthUser, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: id.into(),
            user_id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            outbound,
            joined: Mutex::new(HashSet::new()),
            last_active: RwLock::new(chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Enqueue an event without blocking. `Connection` errors mean the
    /// session is slow or already gone; the caller disconnects it.
    pub fn send(&self, event: ServerEvent) -> SyncResult<()> {
        self.outbound.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SyncError::Connection("outbound queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                SyncError::Connection("outbound channel closed".to_string())
            }
        })
    }

    pub fn touch(&self) {
        *self.last_active.write() = chrono::Utc::now().timestamp_millis();
    }

    pub fn last_active(&self) -> i64 {
        *self.last_active.read()
    }

    pub fn track_join(&self, doc_id: &str) {
        self.joined.lock().insert(doc_id.to_string());
    }

    pub fn track_leave(&self, doc_id: &str) {
        self.joined.lock().remove(doc_id);
    }

    pub fn joined_documents(&self) -> Vec<DocId> {
        self.joined.lock().iter().cloned().collect()
    }
}

/// All live sessions, keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(session_id).map(|(_, s)| s)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> AuthUser {
        AuthUser {
            id: "user-1".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
        }
    }

    #[test]
    fn test_send_and_receive() {
        let (tx, mut rx) = mpsc::channel(4);
        let session = Session::new("s1", &test_user(), tx);

        session
            .send(ServerEvent::Error {
                message: "boom".to_string(),
            })
            .unwrap();

        match rx.try_recv().unwrap() {
            ServerEvent::Error { message } => assert_eq!(message, "boom"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_full_queue_is_connection_error() {
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new("s1", &test_user(), tx);

        session
            .send(ServerEvent::Error {
                message: "one".to_string(),
            })
            .unwrap();
        let result = session.send(ServerEvent::Error {
            message: "two".to_string(),
        });

        assert!(matches!(result, Err(SyncError::Connection(_))));
    }

    #[test]
    fn test_touch_refreshes_last_active() {
        let (tx, _rx) = mpsc::channel(4);
        let session = Session::new("s1", &test_user(), tx);

        let before = session.last_active();
        session.touch();
        assert!(session.last_active() >= before);
    }

    #[test]
    fn test_join_tracking() {
        let (tx, _rx) = mpsc::channel(4);
        let session = Session::new("s1", &test_user(), tx);

        session.track_join("doc-1");
        session.track_join("doc-2");
        session.track_leave("doc-1");

        assert_eq!(session.joined_documents(), vec!["doc-2".to_string()]);
    }

    #[test]
    fn test_registry() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        registry.insert(Arc::new(Session::new("s1", &test_user(), tx)));

        assert_eq!(registry.len(), 1);
        assert!(registry.get("s1").is_some());
        assert!(registry.remove("s1").is_some());
        assert!(registry.is_empty());
    }
}
