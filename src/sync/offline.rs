//! Server-side buffer for edits made while a client was disconnected.
//!
//! Bundles queue per (user, document) in arrival order and replay sorted by
//! the client's own timestamps: the offline client produced them sequentially
//! against successively updated local shadows, so that order maximizes the
//! chance of clean fuzzy application.

use dashmap::DashMap;

use super::{DocId, UserId};
use crate::patch::PatchBundle;

/// One buffered edit.
#[derive(Debug, Clone)]
pub struct OfflineEdit {
    pub patches: PatchBundle,
    pub client_timestamp: i64,
    pub user_id: UserId,
    pub username: String,
}

type Key = (UserId, DocId);

/// FIFO queues of offline edits keyed by (user, document).
#[derive(Default)]
pub struct OfflineBuffer {
    queues: DashMap<Key, Vec<OfflineEdit>>,
}

impl OfflineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an edit for the given document; returns the queue length.
    pub fn push_for(&self, doc_id: &str, edit: OfflineEdit) -> usize {
        let key = (edit.user_id.clone(), doc_id.to_string());
        let mut queue = self.queues.entry(key).or_default();
        queue.push(edit);
        queue.len()
    }

    /// Number of buffered edits for (user, document).
    pub fn count(&self, user_id: &str, doc_id: &str) -> usize {
        self.queues
            .get(&(user_id.to_string(), doc_id.to_string()))
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Remove and return all buffered edits for (user, document), sorted
    /// ascending by client timestamp.
    pub fn drain(&self, user_id: &str, doc_id: &str) -> Vec<OfflineEdit> {
        let mut edits = self
            .queues
            .remove(&(user_id.to_string(), doc_id.to_string()))
            .map(|(_, q)| q)
            .unwrap_or_default();
        edits.sort_by_key(|e| e.client_timestamp);
        edits
    }
}
