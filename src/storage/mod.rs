//! Persistent document and version storage backed by Sled.
//!
//! Documents are bincode-encoded records; version history lives in its own
//! tree under zero-padded per-document keys so a prefix scan yields entries
//! oldest first. Versions are append-only and never rewritten.

mod sled_store;

pub use sled_store::{DocumentStore, StorageError, StorageResult};

use serde::{Deserialize, Serialize};

/// A document record as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    /// Opaque stable identifier
    pub id: String,
    /// Human-readable name
    pub title: String,
    /// Current authoritative text
    pub content: String,
    /// Owning user
    pub owner_id: String,
    /// Users granted edit access
    pub collaborator_ids: Vec<String>,
    /// Index of the last committed snapshot; `None` until the first append
    pub current_version: Option<u64>,
    /// Unix milliseconds of the last head write
    pub last_modified: i64,
    /// Unix milliseconds of creation
    pub created_at: i64,
}

impl StoredDocument {
    pub fn new(id: impl Into<String>, title: impl Into<String>, owner_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: id.into(),
            title: title.into(),
            content: String::new(),
            owner_id: owner_id.into(),
            collaborator_ids: Vec::new(),
            current_version: None,
            last_modified: now,
            created_at: now,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Owner and collaborators may read and edit.
    pub fn can_edit(&self, user_id: &str) -> bool {
        self.owner_id == user_id || self.collaborator_ids.iter().any(|c| c == user_id)
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}

/// An immutable content snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub content: String,
    pub author_id: String,
    pub change_description: String,
    /// Unix milliseconds
    pub timestamp: i64,
}

impl Version {
    pub fn new(
        content: impl Into<String>,
        author_id: impl Into<String>,
        change_description: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            author_id: author_id.into(),
            change_description: change_description.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Configuration for the storage layer.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path to the Sled database directory
    pub path: String,
    /// Cache size in bytes
    pub cache_size: u64,
    /// Flush interval in milliseconds (0 = flush on every write)
    pub flush_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data/syncpad.sled".to_string(),
            cache_size: 256 * 1024 * 1024,
            flush_interval_ms: 500,
        }
    }
}

impl StorageConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }
}
