//! Room registry — membership and per-room journals.
//!
//! DESIGN
//! ======
//! A room exists exactly while it has members: `join` creates it on first
//! use and `leave` destroys it (journal included) when the last member goes.
//! Each member is a connection id bound to a `User` and the sender half of
//! that connection's outbound queue.
//!
//! The registry is plain data. Callers own the locking; see `AppState`.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::message::ServerMessage;
use crate::services::journal::Journal;
use crate::state::{User, now_ms};

pub type ConnectionId = Uuid;

/// One joined connection.
#[derive(Debug, Clone)]
pub struct Member {
    pub user: User,
    pub tx: mpsc::Sender<ServerMessage>,
    /// Milliseconds since Unix epoch.
    pub joined_at: i64,
}

/// A named collaboration session: its journal plus current members.
#[derive(Debug, Default)]
pub struct Room {
    pub journal: Journal,
    members: HashMap<ConnectionId, Member>,
}

impl Room {
    pub fn members(&self) -> impl Iterator<Item = (&ConnectionId, &Member)> {
        self.members.iter()
    }

    pub fn member_mut(&mut self, connection_id: ConnectionId) -> Option<&mut Member> {
        self.members.get_mut(&connection_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection_id` as `user` in `room_id`, creating the room if
    /// absent. Joining again with the same connection replaces its binding.
    pub fn join(
        &mut self,
        room_id: &str,
        connection_id: ConnectionId,
        user: User,
        tx: mpsc::Sender<ServerMessage>,
    ) -> &mut Room {
        let room = self.rooms.entry(room_id.to_owned()).or_insert_with(|| {
            info!(%room_id, "room created");
            Room::default()
        });
        room.members
            .insert(connection_id, Member { user, tx, joined_at: now_ms() });
        info!(%room_id, %connection_id, members = room.members.len(), "connection joined room");
        room
    }

    /// Remove `connection_id` from `room_id`. Destroys the room when it
    /// becomes empty. Returns the removed membership, if any.
    pub fn leave(&mut self, room_id: &str, connection_id: ConnectionId) -> Option<Member> {
        let room = self.rooms.get_mut(room_id)?;
        let member = room.members.remove(&connection_id);
        let connected_ms = member.as_ref().map(|m| now_ms() - m.joined_at);
        info!(%room_id, %connection_id, remaining = room.len(), ?connected_ms, "connection left room");

        if room.is_empty() {
            self.rooms.remove(room_id);
            info!(%room_id, "room destroyed");
        }
        member
    }

    /// Current `(connection, user)` pairs; empty if the room does not exist.
    #[must_use]
    pub fn members_of(&self, room_id: &str) -> Vec<(ConnectionId, User)> {
        self.rooms.get(room_id).map_or_else(Vec::new, |room| {
            room.members
                .iter()
                .map(|(id, member)| (*id, member.user.clone()))
                .collect()
        })
    }

    #[must_use]
    pub fn count_of(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, Room::len)
    }

    #[must_use]
    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn room_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Connected members across all rooms.
    #[must_use]
    pub fn total_members(&self) -> usize {
        self.rooms.values().map(Room::len).sum()
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
