//! Sled-backed implementation of the persistence contract.

use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::{StorageConfig, StoredDocument, Version};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Sled database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    #[error("Version index out of range: {0}")]
    VersionOutOfRange(u64),

    #[error("Storage initialization failed: {0}")]
    InitFailed(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

const TREE_DOCUMENTS: &str = "documents";
const TREE_VERSIONS: &str = "versions";

/// Width of the zero-padded version index in keys; keeps prefix scans ordered.
const VERSION_KEY_WIDTH: usize = 10;

/// Sled-based store for documents and their version history.
#[derive(Clone)]
pub struct DocumentStore {
    db: Arc<Db>,
    documents: Tree,
    versions: Tree,
}

impl DocumentStore {
    /// Open or create a store at the configured path.
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        let path = Path::new(&config.path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::InitFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_size)
            .flush_every_ms(if config.flush_interval_ms > 0 {
                Some(config.flush_interval_ms)
            } else {
                None
            })
            .open()?;

        let documents = db.open_tree(TREE_DOCUMENTS)?;
        let versions = db.open_tree(TREE_VERSIONS)?;

        Ok(Self {
            db: Arc::new(db),
            documents,
            versions,
        })
    }

    /// Insert a new document; fails if the id is taken.
    pub fn create_document(&self, doc: &StoredDocument) -> StorageResult<()> {
        if self.documents.contains_key(doc.id.as_bytes())? {
            return Err(StorageError::AlreadyExists(doc.id.clone()));
        }
        self.put_document(doc)
    }

    /// Upsert a full document record.
    pub fn put_document(&self, doc: &StoredDocument) -> StorageResult<()> {
        let bytes = bincode::serialize(doc)?;
        self.documents.insert(doc.id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Load a document record.
    pub fn get_document(&self, id: &str) -> StorageResult<Option<StoredDocument>> {
        match self.documents.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load a document record, failing if absent.
    pub fn require_document(&self, id: &str) -> StorageResult<StoredDocument> {
        self.get_document(id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    /// Write the authoritative head text.
    pub fn save_document_head(
        &self,
        id: &str,
        content: &str,
        last_modified: i64,
    ) -> StorageResult<()> {
        let mut doc = self.require_document(id)?;
        doc.content = content.to_string();
        doc.last_modified = last_modified;
        self.put_document(&doc)
    }

    /// Delete a document and its entire version history.
    pub fn delete_document(&self, id: &str) -> StorageResult<()> {
        self.documents.remove(id.as_bytes())?;

        let prefix = format!("{}:", id);
        let mut to_remove = Vec::new();
        for item in self.versions.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item?;
            to_remove.push(key);
        }
        for key in to_remove {
            self.versions.remove(key)?;
        }
        Ok(())
    }

    /// Append a version snapshot and return its index. Updates the
    /// document's `current_version` so it always equals the last index.
    pub fn append_version(&self, id: &str, version: &Version) -> StorageResult<u64> {
        let mut doc = self.require_document(id)?;
        let index = doc.current_version.map(|v| v + 1).unwrap_or(0);

        let key = version_key(id, index);
        let bytes = bincode::serialize(version)?;
        self.versions.insert(key.as_bytes(), bytes)?;

        doc.current_version = Some(index);
        doc.last_modified = version.timestamp;
        self.put_document(&doc)?;

        Ok(index)
    }

    /// Load one version by index.
    pub fn get_version(&self, id: &str, index: u64) -> StorageResult<Option<Version>> {
        let key = version_key(id, index);
        match self.versions.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All versions for a document, oldest first.
    pub fn get_versions(&self, id: &str) -> StorageResult<Vec<Version>> {
        let prefix = format!("{}:", id);
        let mut versions = Vec::new();
        for item in self.versions.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = item?;
            versions.push(bincode::deserialize(&bytes)?);
        }
        Ok(versions)
    }

    /// The most recent version, if any.
    pub fn last_version(&self, id: &str) -> StorageResult<Option<Version>> {
        let doc = self.require_document(id)?;
        match doc.current_version {
            Some(index) => self.get_version(id, index),
            None => Ok(None),
        }
    }

    /// Number of stored versions.
    pub fn version_count(&self, id: &str) -> StorageResult<u64> {
        let doc = self.require_document(id)?;
        Ok(doc.current_version.map(|v| v + 1).unwrap_or(0))
    }

    /// All documents the user owns or collaborates on.
    pub fn list_documents_for_user(&self, user_id: &str) -> StorageResult<Vec<StoredDocument>> {
        let mut docs = Vec::new();
        for item in self.documents.iter() {
            let (_, bytes) = item?;
            let doc: StoredDocument = bincode::deserialize(&bytes)?;
            if doc.can_edit(user_id) {
                docs.push(doc);
            }
        }
        docs.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(docs)
    }

    /// Force flush all pending writes to disk.
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn version_key(id: &str, index: u64) -> String {
    format!("{}:{:0width$}", id, index, width = VERSION_KEY_WIDTH)
}

impl Drop for DocumentStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
