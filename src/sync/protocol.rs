//! Typed JSON wire protocol between clients and the server.
//!
//! Every frame is an envelope `{"event": "<name>", "data": {...}}` with
//! kebab-case event names and camelCase payload keys. Frames are validated at
//! ingress; handlers only ever see these enums, never free-form JSON.

use serde::{Deserialize, Serialize};

use super::{DocId, UserId};
use crate::patch::PatchBundle;
use crate::storage::{StoredDocument, Version};

/// A selection range in character offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

/// Ephemeral per-user state inside one room. Cursor offsets are advisory:
/// they reflect the content as that client last saw it and are never rebased.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: UserId,
    pub username: String,
    pub cursor_position: usize,
    pub selection: Selection,
    pub last_active: i64,
}

/// Document snapshot as sent to clients in `document-data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPayload {
    pub id: DocId,
    pub title: String,
    pub content: String,
    pub owner_id: UserId,
    pub collaborator_ids: Vec<UserId>,
    pub versions: Vec<VersionPayload>,
    pub current_version: Option<u64>,
    pub last_modified: i64,
}

impl DocumentPayload {
    pub fn from_stored(doc: StoredDocument, versions: Vec<Version>) -> Self {
        Self {
            id: doc.id,
            title: doc.title,
            content: doc.content,
            owner_id: doc.owner_id,
            collaborator_ids: doc.collaborator_ids,
            versions: versions.into_iter().map(VersionPayload::from).collect(),
            current_version: doc.current_version,
            last_modified: doc.last_modified,
        }
    }
}

/// One immutable history entry as serialized for clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionPayload {
    pub content: String,
    pub author_id: UserId,
    pub change_description: String,
    pub timestamp: i64,
}

impl From<Version> for VersionPayload {
    fn from(v: Version) -> Self {
        Self {
            content: v.content,
            author_id: v.author_id,
            change_description: v.change_description,
            timestamp: v.timestamp,
        }
    }
}

/// First frame on a fresh socket: bearer token under `auth.token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeFrame {
    pub auth: HandshakeAuth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeAuth {
    pub token: String,
}

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Join a document's room
    #[serde(rename_all = "camelCase")]
    JoinDocument { document_id: DocId },

    /// Leave a document's room
    #[serde(rename_all = "camelCase")]
    LeaveDocument { document_id: DocId },

    /// A patch bundle produced against the client's shadow
    #[serde(rename_all = "camelCase")]
    DocumentChange {
        document_id: DocId,
        patches: PatchBundle,
        /// Accepted and carried for future staleness checks; unused today.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_shadow_version: Option<u64>,
    },

    /// Cursor/selection moved
    #[serde(rename_all = "camelCase")]
    CursorPosition {
        document_id: DocId,
        cursor_position: usize,
        selection: Selection,
    },

    /// Buffer an edit made while disconnected
    #[serde(rename_all = "camelCase")]
    SaveOfflineEdit {
        document_id: DocId,
        patches: PatchBundle,
        timestamp: i64,
    },

    /// Replay all buffered edits for this (user, document)
    #[serde(rename_all = "camelCase")]
    SyncOfflineEdits { document_id: DocId },
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full document state + roster, sent to a joiner
    #[serde(rename_all = "camelCase")]
    DocumentData {
        document: DocumentPayload,
        active_editors: Vec<Presence>,
    },

    /// A peer's patch, relayed for fuzzy application against local copies
    #[serde(rename_all = "camelCase")]
    DocumentChange {
        patches: PatchBundle,
        user_id: UserId,
        username: String,
    },

    /// A peer's cursor moved
    #[serde(rename_all = "camelCase")]
    CursorPosition {
        user_id: UserId,
        username: String,
        cursor_position: usize,
        selection: Selection,
    },

    /// A peer joined the room
    #[serde(rename_all = "camelCase")]
    EditorJoined {
        user_id: UserId,
        username: String,
        active_editors: Vec<Presence>,
    },

    /// A peer left the room; roster is post-removal
    #[serde(rename_all = "camelCase")]
    EditorLeft {
        user_id: UserId,
        username: String,
        active_editors: Vec<Presence>,
    },

    /// A history snapshot was appended
    #[serde(rename_all = "camelCase")]
    VersionCreated {
        version_index: u64,
        user_id: UserId,
        username: String,
        timestamp: i64,
    },

    /// Directed resync: discard the local base and restart from `content`
    #[serde(rename_all = "camelCase")]
    SyncRequired {
        content: String,
        server_shadow_version: u64,
    },

    /// Full-text replacement (offline replay, revert, manual save)
    #[serde(rename_all = "camelCase")]
    DocumentUpdated {
        content: String,
        user_id: UserId,
        username: String,
    },

    /// Buffered edits exist for the joining (user, document)
    #[serde(rename_all = "camelCase")]
    OfflineEditsAvailable { count: usize },

    /// Ack for `save-offline-edit`; count is the queue length after the push
    #[serde(rename_all = "camelCase")]
    OfflineEditSaved { count: usize },

    /// Replay finished; count is how many bundles applied cleanly
    #[serde(rename_all = "camelCase")]
    OfflineEditsSynced { success: bool, count: usize },

    /// Per-message failure, local to the receiving session
    #[serde(rename_all = "camelCase")]
    Error { message: String },
}
