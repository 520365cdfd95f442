//! Session dispatcher — per-connection protocol state machine.
//!
//! DESIGN
//! ======
//! A `Session` binds one transport connection to at most one room and one
//! user: `Unjoined -> Joined -> Closed`. Each inbound message runs to
//! completion against a `&mut RoomRegistry` the caller has locked.
//!
//! Handler functions are pure business logic: they validate, mutate the
//! journal or registry, and return an `Outcome`. The apply step owns all
//! outbound concerns (reply to sender, broadcast to peers or to everyone).
//! A handler that fails returns before touching any state, so an inbound
//! message is never partially applied.
//!
//! LIFECYCLE
//! =========
//! 1. `join-room` -> register in room, reply `canvas-state`, peers get `user-joined`
//! 2. strokes / cursor -> broadcast to peers; undo / redo / clear -> broadcast to all
//! 3. `close` -> leave room, remaining members get `user-left`

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::message::{
    Action, ClientMessage, DrawInput, ErrorCode, FailureReason, Notice, ProtocolError, ServerMessage,
};
use crate::services::broadcast::broadcast;
use crate::services::journal::JournalError;
use crate::services::room::{ConnectionId, Room, RoomRegistry};
use crate::state::{OperationDraft, OperationKind, Position, User, now_ms};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unjoined,
    Joined { room_id: String, user: User },
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error("{0} requires joining a room first")]
    NotJoined(Action),
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
    #[error("room {0} no longer exists")]
    RoomGone(String),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Protocol(e) => e.error_code(),
            Self::Journal(e) => e.error_code(),
            Self::NotJoined(_) => "E_NOT_JOINED",
            Self::NothingToUndo => "E_NOTHING_TO_UNDO",
            Self::NothingToRedo => "E_NOTHING_TO_REDO",
            Self::RoomGone(_) => "E_ROOM_GONE",
        }
    }
}

impl SessionError {
    /// The message sent back to the requester.
    fn into_reply(self) -> ServerMessage {
        match self {
            Self::NotJoined(action) => ServerMessage::failed(action, FailureReason::NotJoined),
            Self::NothingToUndo => ServerMessage::failed(Action::Undo, FailureReason::NoOperations),
            Self::NothingToRedo => ServerMessage::failed(Action::Redo, FailureReason::NoOperations),
            other => ServerMessage::error(&other),
        }
    }
}

/// What a handler wants delivered. Handlers never send directly.
#[derive(Debug)]
enum Outcome {
    /// Send to the requester only.
    Reply(ServerMessage),
    /// Send to every room member except the requester.
    BroadcastOthers(ServerMessage),
    /// Send to every room member, requester included.
    BroadcastAll(ServerMessage),
    /// Reply to the requester, broadcast a different message to peers.
    ReplyAndBroadcast { reply: ServerMessage, broadcast: ServerMessage },
    /// Nothing to deliver.
    Ignore,
}

// =============================================================================
// SESSION
// =============================================================================

pub struct Session {
    connection_id: ConnectionId,
    /// Outbound queue of this connection; cloned into the registry on join.
    tx: mpsc::Sender<ServerMessage>,
    default_room: String,
    state: SessionState,
}

impl Session {
    #[must_use]
    pub fn new(connection_id: ConnectionId, tx: mpsc::Sender<ServerMessage>, default_room: impl Into<String>) -> Self {
        Self { connection_id, tx, default_room: default_room.into(), state: SessionState::Unjoined }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    fn joined(&self) -> Option<(&str, &User)> {
        match &self.state {
            SessionState::Joined { room_id, user } => Some((room_id.as_str(), user)),
            SessionState::Unjoined | SessionState::Closed => None,
        }
    }

    /// Parse and handle one inbound text frame. Returns the messages for the
    /// requester; everything for other members has already been queued.
    pub fn handle_text(&mut self, rooms: &mut RoomRegistry, text: &str) -> Vec<ServerMessage> {
        if self.is_closed() {
            return Vec::new();
        }
        match ClientMessage::parse(text) {
            Ok(message) => self.handle(rooms, message),
            Err(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "session: rejected inbound message");
                vec![ServerMessage::error(&e)]
            }
        }
    }

    /// Handle one parsed inbound message.
    pub fn handle(&mut self, rooms: &mut RoomRegistry, message: ClientMessage) -> Vec<ServerMessage> {
        if self.is_closed() {
            return Vec::new();
        }
        if !matches!(message, ClientMessage::CursorMove { .. }) {
            debug!(connection_id = %self.connection_id, kind = message.kind(), "session: recv");
        }

        let result = match message {
            ClientMessage::JoinRoom { room_id, user_id, user_name, color } => {
                self.join(rooms, room_id, User { id: user_id, name: user_name, color })
            }
            ClientMessage::DrawStart(input) => self.draw(rooms, OperationKind::DrawStart, input),
            ClientMessage::DrawMove(input) => self.draw(rooms, OperationKind::DrawMove, input),
            ClientMessage::DrawEnd(input) => self.draw(rooms, OperationKind::DrawEnd, input),
            ClientMessage::CursorMove { position } => self.cursor(position),
            ClientMessage::Undo => self.undo(rooms),
            ClientMessage::Redo => self.redo(rooms),
            ClientMessage::ClearCanvas => self.clear(rooms),
            ClientMessage::UpdateUser { user_name, color } => self.update_user(rooms, user_name, color),
            ClientMessage::DebugState => self.debug_state(rooms),
        };

        match result {
            Ok(outcome) => self.apply(rooms, outcome),
            Err(e) => {
                debug!(connection_id = %self.connection_id, code = e.error_code(), error = %e, "session: request failed");
                vec![e.into_reply()]
            }
        }
    }

    /// Transport reported the connection gone. Terminal.
    pub fn close(&mut self, rooms: &mut RoomRegistry) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Joined { room_id, user } = previous {
            info!(%room_id, connection_id = %self.connection_id, user_id = %user.id, "session: closed while joined");
            self.leave_room(rooms, &room_id, user);
        }
    }

    // =========================================================================
    // APPLY
    // =========================================================================

    fn apply(&self, rooms: &RoomRegistry, outcome: Outcome) -> Vec<ServerMessage> {
        let Some((room_id, _)) = self.joined() else {
            return match outcome {
                Outcome::Reply(reply) | Outcome::ReplyAndBroadcast { reply, .. } => vec![reply],
                Outcome::BroadcastOthers(_) | Outcome::BroadcastAll(_) | Outcome::Ignore => Vec::new(),
            };
        };

        match outcome {
            Outcome::Reply(reply) => vec![reply],
            Outcome::BroadcastOthers(message) => {
                self.fan_out(rooms, room_id, &message, Some(self.connection_id));
                Vec::new()
            }
            Outcome::BroadcastAll(message) => {
                self.fan_out(rooms, room_id, &message, None);
                Vec::new()
            }
            Outcome::ReplyAndBroadcast { reply, broadcast } => {
                self.fan_out(rooms, room_id, &broadcast, Some(self.connection_id));
                vec![reply]
            }
            Outcome::Ignore => Vec::new(),
        }
    }

    fn leave_room(&self, rooms: &mut RoomRegistry, room_id: &str, user: User) {
        rooms.leave(room_id, self.connection_id);
        let notice = Notice::UserLeft { user_id: user.id.clone(), user }.into();
        self.fan_out(rooms, room_id, &notice, None);
    }

    /// Broadcast on behalf of this connection and log the delivery tally.
    fn fan_out(&self, rooms: &RoomRegistry, room_id: &str, message: &ServerMessage, exclude: Option<ConnectionId>) {
        let tally = broadcast(rooms, room_id, message, exclude);
        if tally.failed > 0 {
            warn!(
                %room_id,
                connection_id = %self.connection_id,
                kind = message.kind(),
                delivered = tally.delivered,
                failed = tally.failed,
                "session: broadcast partially delivered"
            );
        } else if !message.is_ephemeral() {
            debug!(
                %room_id,
                connection_id = %self.connection_id,
                kind = message.kind(),
                delivered = tally.delivered,
                skipped = tally.skipped,
                "session: broadcast"
            );
        }
    }

    // =========================================================================
    // HANDLERS
    // =========================================================================

    fn join(&mut self, rooms: &mut RoomRegistry, room_id: Option<String>, user: User) -> Result<Outcome, SessionError> {
        if user.id.trim().is_empty() {
            return Err(ProtocolError::Malformed("join-room: userId required".into()).into());
        }
        let room_id = room_id
            .map(|r| r.trim().to_owned())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.default_room.clone());

        // Switching rooms leaves the old one first. Rejoining the same room
        // only rebinds, so a sole member does not destroy its own journal.
        if let SessionState::Joined { room_id: previous, user: previous_user } =
            std::mem::replace(&mut self.state, SessionState::Unjoined)
        {
            if previous != room_id {
                self.leave_room(rooms, &previous, previous_user);
            }
        }

        let room = rooms.join(&room_id, self.connection_id, user.clone(), self.tx.clone());
        let operations = room.journal.snapshot();
        info!(
            %room_id,
            connection_id = %self.connection_id,
            user_id = %user.id,
            operations = operations.len(),
            "session: joined room"
        );

        self.state = SessionState::Joined { room_id, user: user.clone() };
        Ok(Outcome::ReplyAndBroadcast {
            reply: Notice::CanvasState { operations }.into(),
            broadcast: Notice::UserJoined { user }.into(),
        })
    }

    fn draw(&self, rooms: &mut RoomRegistry, kind: OperationKind, input: DrawInput) -> Result<Outcome, SessionError> {
        input.stroke.validate(kind).map_err(ProtocolError::Malformed)?;
        let Some((room_id, user)) = self.joined() else {
            debug!(connection_id = %self.connection_id, kind = kind.as_str(), "session: stroke ignored before join");
            return Ok(Outcome::Ignore);
        };

        let room = room_mut(rooms, room_id)?;
        let operation = room.journal.record(OperationDraft {
            kind,
            stroke: input.stroke,
            operation_id: input.operation_id,
            timestamp: input.timestamp,
            user_id: user.id.clone(),
            user_name: user.name.clone(),
        })?;
        debug!(
            %room_id,
            user_id = %user.id,
            operation_id = %operation.operation_id,
            kind = kind.as_str(),
            total = room.journal.len(),
            "journal: recorded"
        );

        Ok(Outcome::BroadcastOthers(operation.into()))
    }

    fn cursor(&self, position: Position) -> Result<Outcome, SessionError> {
        if !position.is_finite() {
            return Err(ProtocolError::Malformed("cursor-move: position must be finite".into()).into());
        }
        let Some((_, user)) = self.joined() else {
            return Ok(Outcome::Ignore);
        };
        Ok(Outcome::BroadcastOthers(
            Notice::CursorUpdate { user_id: user.id.clone(), position, user: user.clone() }.into(),
        ))
    }

    fn undo(&self, rooms: &mut RoomRegistry) -> Result<Outcome, SessionError> {
        let (room_id, user) = self.joined().ok_or(SessionError::NotJoined(Action::Undo))?;
        let room = room_mut(rooms, room_id)?;
        let operation = room
            .journal
            .undo(&user.id)
            .ok_or(SessionError::NothingToUndo)?;
        info!(%room_id, user_id = %user.id, operation_id = %operation.operation_id, "journal: undo");

        Ok(Outcome::BroadcastAll(
            Notice::OperationUndo {
                operation_id: operation.operation_id,
                user_id: user.id.clone(),
                user_name: operation.user_name,
                timestamp: now_ms(),
            }
            .into(),
        ))
    }

    fn redo(&self, rooms: &mut RoomRegistry) -> Result<Outcome, SessionError> {
        let (room_id, user) = self.joined().ok_or(SessionError::NotJoined(Action::Redo))?;
        let room = room_mut(rooms, room_id)?;
        let operation = room
            .journal
            .redo(&user.id)
            .ok_or(SessionError::NothingToRedo)?;
        info!(%room_id, user_id = %user.id, operation_id = %operation.operation_id, "journal: redo");

        let user_name = operation.user_name.clone();
        Ok(Outcome::BroadcastAll(
            Notice::OperationRedo { operation, user_id: user.id.clone(), user_name, timestamp: now_ms() }.into(),
        ))
    }

    fn clear(&self, rooms: &mut RoomRegistry) -> Result<Outcome, SessionError> {
        let (room_id, user) = self
            .joined()
            .ok_or(SessionError::NotJoined(Action::ClearCanvas))?;
        let room = room_mut(rooms, room_id)?;
        let removed = room.journal.clear();
        info!(%room_id, user_id = %user.id, removed, "journal: cleared");

        Ok(Outcome::BroadcastAll(
            Notice::CanvasCleared { user_id: user.id.clone(), user_name: user.name.clone() }.into(),
        ))
    }

    fn update_user(
        &mut self,
        rooms: &mut RoomRegistry,
        user_name: Option<String>,
        color: Option<String>,
    ) -> Result<Outcome, SessionError> {
        let trimmed = |v: Option<String>| v.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty());
        let (user_name, color) = (trimmed(user_name), trimmed(color));
        if user_name.is_none() && color.is_none() {
            return Err(ProtocolError::Malformed("update-user: userName or color required".into()).into());
        }

        let SessionState::Joined { room_id, user } = &mut self.state else {
            return Err(SessionError::NotJoined(Action::UpdateUser));
        };
        let room = room_mut(rooms, room_id)?;
        if let Some(name) = user_name {
            user.name = name;
        }
        if let Some(color) = color {
            user.color = color;
        }
        if let Some(member) = room.member_mut(self.connection_id) {
            member.user = user.clone();
        }
        info!(%room_id, user_id = %user.id, "session: user updated");

        Ok(Outcome::BroadcastAll(Notice::UserUpdated { user: user.clone() }.into()))
    }

    fn debug_state(&self, rooms: &RoomRegistry) -> Result<Outcome, SessionError> {
        let (room_id, user) = self
            .joined()
            .ok_or(SessionError::NotJoined(Action::DebugState))?;
        let room = rooms
            .room(room_id)
            .ok_or_else(|| SessionError::RoomGone(room_id.to_owned()))?;
        let members: Vec<String> = rooms
            .members_of(room_id)
            .into_iter()
            .map(|(_, member)| member.id)
            .collect();
        info!(
            %room_id,
            ?members,
            operations = room.journal.len(),
            undone = room.journal.undone_total(),
            "session: debug state"
        );

        Ok(Outcome::Reply(
            Notice::DebugResponse {
                room: room_id.to_owned(),
                user_count: rooms.count_of(room_id),
                operation_count: room.journal.len(),
                undone_count: room.journal.undone_len(&user.id),
            }
            .into(),
        ))
    }
}

fn room_mut<'r>(rooms: &'r mut RoomRegistry, room_id: &str) -> Result<&'r mut Room, SessionError> {
    rooms
        .room_mut(room_id)
        .ok_or_else(|| SessionError::RoomGone(room_id.to_owned()))
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
