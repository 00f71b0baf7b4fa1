//! Per-document server shadows.
//!
//! The shadow is the text the engine most recently told all connected clients
//! about; incoming patches are applied against it. Each shadow sits behind an
//! async mutex that also serializes head persistence and broadcasting for its
//! document, so commit order equals broadcast order. Shadows hydrate lazily
//! from persisted content and may be evicted when a room empties.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::DocId;

/// Shadow text plus a counter bumped on every successful mutation; clients
/// see the counter as `serverShadowVersion` in `sync-required`.
#[derive(Debug)]
pub struct ShadowState {
    pub text: String,
    pub version: u64,
}

impl ShadowState {
    fn new(text: String) -> Self {
        Self { text, version: 0 }
    }

    pub fn replace(&mut self, text: String) {
        self.text = text;
        self.version += 1;
    }
}

/// Process-wide shadow map.
#[derive(Default)]
pub struct ShadowStore {
    shadows: DashMap<DocId, Arc<Mutex<ShadowState>>>,
}

impl ShadowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the shadow handle for a document, installing `hydrate()` as the
    /// initial text on first touch. Callers lock the returned mutex for the
    /// whole critical section of their operation.
    pub fn acquire<F>(&self, doc_id: &str, hydrate: F) -> Arc<Mutex<ShadowState>>
    where
        F: FnOnce() -> String,
    {
        self.shadows
            .entry(doc_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ShadowState::new(hydrate()))))
            .clone()
    }

    /// Drop a shadow; the next touch re-reads persisted content.
    pub fn evict(&self, doc_id: &str) {
        self.shadows.remove(doc_id);
    }

    pub fn len(&self) -> usize {
        self.shadows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shadows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hydrates_once() {
        let store = ShadowStore::new();

        let handle = store.acquire("doc-1", || "initial".to_string());
        assert_eq!(handle.lock().await.text, "initial");

        // Second acquire must not re-hydrate.
        let handle = store.acquire("doc-1", || panic!("re-hydrated"));
        assert_eq!(handle.lock().await.text, "initial");
    }

    #[tokio::test]
    async fn test_replace_bumps_version() {
        let store = ShadowStore::new();
        let handle = store.acquire("doc-1", String::new);

        {
            let mut shadow = handle.lock().await;
            assert_eq!(shadow.version, 0);
            shadow.replace("hello".to_string());
            assert_eq!(shadow.version, 1);
            assert_eq!(shadow.text, "hello");
        }
    }

    #[tokio::test]
    async fn test_evict_forces_rehydration() {
        let store = ShadowStore::new();
        store.acquire("doc-1", || "old".to_string());
        store.evict("doc-1");

        let handle = store.acquire("doc-1", || "fresh".to_string());
        assert_eq!(handle.lock().await.text, "fresh");
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn test_lock_serializes_access() {
        let store = Arc::new(ShadowStore::new());
        let handle = store.acquire("doc-1", String::new);

        let guard = handle.lock().await;
        assert!(handle.try_lock().is_err());
        drop(guard);
        assert!(handle.try_lock().is_ok());
    }
}
