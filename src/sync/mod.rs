//! Differential synchronization for collaborative text documents.
//!
//! This module implements the core synchronization logic:
//! - Typed JSON WebSocket protocol for edit and presence traffic
//! - Per-document server shadows guarded by a per-document lock
//! - Room membership with best-effort fan-out to peers
//! - Offline edit buffering and ordered replay

pub mod engine;
pub mod offline;
pub mod protocol;
pub mod rooms;
pub mod session;
pub mod shadow;

pub use engine::{SyncEngine, SyncEngineConfig};

/// Unique identifier for a document (and its room)
pub type DocId = String;

/// Unique identifier for a user
pub type UserId = String;

/// Unique identifier for one connected session
pub type SessionId = String;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while handling client traffic.
///
/// Every variant carries a human-readable detail; the kind decides who the
/// error is surfaced to and how (socket `error` event vs HTTP status).
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    /// Token validation failed at handshake
    #[error("Authentication error")]
    Auth(String),

    /// Document or version does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Sender is neither owner nor collaborator
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A patch bundle could not be applied against the shadow.
    /// Never surfaced as an `error` event; answered with `sync-required`.
    #[error("Patch failed: {0}")]
    PatchFailed(String),

    /// The persistence layer rejected a write
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// A session's outbound channel is gone or full
    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<crate::storage::StorageError> for SyncError {
    fn from(err: crate::storage::StorageError) -> Self {
        match err {
            crate::storage::StorageError::NotFound(id) => {
                SyncError::NotFound(format!("document {}", id))
            }
            other => SyncError::Persistence(other.to_string()),
        }
    }
}
