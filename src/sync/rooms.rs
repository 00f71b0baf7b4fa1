//! Rooms: the set of sessions joined to one document, plus their presence.
//!
//! Rooms are created on first join and destroyed when the last session
//! leaves. Fan-out is best-effort: a member whose outbound queue is full is
//! reported back to the caller for disconnection instead of blocking peers.

use dashmap::DashMap;
use std::sync::Arc;

use super::protocol::{Presence, Selection, ServerEvent};
use super::session::Session;
use super::{DocId, SessionId, UserId};

/// One document's connected sessions and presence roster.
pub struct Room {
    pub document_id: DocId,
    members: DashMap<SessionId, Arc<Session>>,
    presence: DashMap<UserId, Presence>,
}

impl Room {
    fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            members: DashMap::new(),
            presence: DashMap::new(),
        }
    }

    pub fn insert_member(&self, session: Arc<Session>) {
        self.members.insert(session.id.clone(), session);
    }

    pub fn remove_member(&self, session_id: &str) -> Option<Arc<Session>> {
        self.members.remove(session_id).map(|(_, s)| s)
    }

    pub fn contains_member(&self, session_id: &str) -> bool {
        self.members.contains_key(session_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether any remaining member belongs to this user.
    pub fn has_user(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    /// Enqueue `event` on every member's sink except `exclude`. Returns the
    /// session ids whose queue was full or closed so the engine can
    /// disconnect them.
    pub fn broadcast(&self, event: &ServerEvent, exclude: Option<&str>) -> Vec<SessionId> {
        let mut slow = Vec::new();
        for member in self.members.iter() {
            if exclude == Some(member.id.as_str()) {
                continue;
            }
            if member.send(event.clone()).is_err() {
                slow.push(member.id.clone());
            }
        }
        slow
    }

    /// Insert or refresh a presence record.
    pub fn upsert_presence(
        &self,
        user_id: &str,
        username: &str,
        cursor_position: usize,
        selection: Selection,
    ) {
        self.presence.insert(
            user_id.to_string(),
            Presence {
                user_id: user_id.to_string(),
                username: username.to_string(),
                cursor_position,
                selection,
                last_active: chrono::Utc::now().timestamp_millis(),
            },
        );
    }

    pub fn remove_presence(&self, user_id: &str) -> Option<Presence> {
        self.presence.remove(user_id).map(|(_, p)| p)
    }

    /// Current roster, ordered by user id for stable payloads.
    pub fn active_editors(&self) -> Vec<Presence> {
        let mut editors: Vec<Presence> = self.presence.iter().map(|e| e.value().clone()).collect();
        editors.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        editors
    }
}

/// Process-wide map of document id to room.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<DocId, Arc<Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the session into the document's room, creating it if needed.
    pub fn join(&self, doc_id: &str, session: Arc<Session>) -> Arc<Room> {
        let room = self
            .rooms
            .entry(doc_id.to_string())
            .or_insert_with(|| Arc::new(Room::new(doc_id)))
            .clone();
        room.insert_member(session);
        room
    }

    /// Remove the session from the room. Returns the room if it still exists
    /// after removal, and whether this removal emptied it (in which case the
    /// room is dropped from the registry).
    pub fn leave(&self, doc_id: &str, session_id: &str) -> Option<(Arc<Room>, bool)> {
        let room = self.rooms.get(doc_id).map(|r| r.clone())?;
        room.remove_member(session_id)?;
        let emptied = room.is_empty();
        if emptied {
            self.rooms
                .remove_if(doc_id, |_, candidate| candidate.is_empty());
        }
        Some((room, emptied))
    }

    pub fn get(&self, doc_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(doc_id).map(|r| r.clone())
    }

    /// Drop a room outright (document deletion).
    pub fn remove(&self, doc_id: &str) -> Option<Arc<Room>> {
        self.rooms.remove(doc_id).map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Document ids of rooms with no members left. The engine's sweeper
    /// removes these if a crash skipped the normal leave path.
    pub fn empty_rooms(&self) -> Vec<DocId> {
        self.rooms
            .iter()
            .filter(|r| r.is_empty())
            .map(|r| r.key().clone())
            .collect()
    }
}
