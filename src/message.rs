//! Wire protocol: the closed set of messages exchanged over a canvas socket.
//!
//! ARCHITECTURE
//! ============
//! Every message is a JSON object tagged by a `type` field. Inbound messages
//! parse into `ClientMessage`, one variant per accepted `type`; outbound
//! messages are `ServerMessage`. The dispatcher matches exhaustively on these
//! enums and never inspects raw JSON.
//!
//! DESIGN
//! ======
//! - Stroke echoes are the recorded `Operation` itself, tagged by its own kind,
//!   so `ServerMessage` is an untagged union of `Operation` and `Notice`.
//! - Parsing is two-phase: the `type` tag is checked against the known set
//!   first, so an unknown type and a malformed payload are distinguishable.
//! - Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{Operation, Position, Stroke, User};

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code carried by `error` notices.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid message format: {0}")]
    Malformed(String),
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

impl ErrorCode for ProtocolError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "E_MALFORMED_MESSAGE",
            Self::UnknownType(_) => "E_UNKNOWN_MESSAGE_TYPE",
        }
    }
}

// =============================================================================
// INBOUND
// =============================================================================

/// Payload of an inbound `draw-*` message. Id and timestamp are optional; the
/// journal assigns them when absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawInput {
    #[serde(default)]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub stroke: Stroke,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        #[serde(default)]
        room_id: Option<String>,
        user_id: String,
        user_name: String,
        color: String,
    },
    DrawStart(DrawInput),
    DrawMove(DrawInput),
    DrawEnd(DrawInput),
    CursorMove {
        position: Position,
    },
    Undo,
    Redo,
    ClearCanvas,
    #[serde(rename_all = "camelCase")]
    UpdateUser {
        #[serde(default)]
        user_name: Option<String>,
        #[serde(default)]
        color: Option<String>,
    },
    DebugState,
}

impl ClientMessage {
    /// Every accepted value of the `type` tag.
    pub const TYPES: [&'static str; 10] = [
        "join-room",
        "draw-start",
        "draw-move",
        "draw-end",
        "cursor-move",
        "undo",
        "redo",
        "clear-canvas",
        "update-user",
        "debug-state",
    ];

    /// Parse one inbound text frame.
    ///
    /// # Errors
    ///
    /// `UnknownType` when the `type` tag is not one of [`Self::TYPES`],
    /// `Malformed` for anything else that does not fit the schema.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) else {
            return Err(ProtocolError::Malformed("missing string field `type`".into()));
        };
        if !Self::TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_owned()));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// The wire `type` of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::DrawStart(_) => "draw-start",
            Self::DrawMove(_) => "draw-move",
            Self::DrawEnd(_) => "draw-end",
            Self::CursorMove { .. } => "cursor-move",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::ClearCanvas => "clear-canvas",
            Self::UpdateUser { .. } => "update-user",
            Self::DebugState => "debug-state",
        }
    }
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Request named in an `operation-failed` notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Undo,
    Redo,
    ClearCanvas,
    UpdateUser,
    DebugState,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::ClearCanvas => "clear-canvas",
            Self::UpdateUser => "update-user",
            Self::DebugState => "debug-state",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NotJoined,
    NoOperations,
}

/// Every outbound message other than a stroke echo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Notice {
    #[serde(rename_all = "camelCase")]
    Welcome {
        message: String,
        connection_id: Uuid,
        timestamp: i64,
    },
    CanvasState {
        operations: Vec<Operation>,
    },
    #[serde(rename_all = "camelCase")]
    CursorUpdate {
        user_id: String,
        position: Position,
        user: User,
    },
    UserJoined {
        user: User,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft {
        user_id: String,
        user: User,
    },
    UserUpdated {
        user: User,
    },
    #[serde(rename_all = "camelCase")]
    OperationUndo {
        operation_id: String,
        user_id: String,
        user_name: String,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    OperationRedo {
        operation: Operation,
        user_id: String,
        user_name: String,
        timestamp: i64,
    },
    OperationFailed {
        action: Action,
        reason: FailureReason,
    },
    #[serde(rename_all = "camelCase")]
    CanvasCleared {
        user_id: String,
        user_name: String,
    },
    #[serde(rename_all = "camelCase")]
    DebugResponse {
        room: String,
        user_count: usize,
        operation_count: usize,
        undone_count: usize,
    },
    Error {
        message: String,
        code: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// A recorded stroke event, echoed to peers as-is.
    Operation(Operation),
    Notice(Notice),
}

impl From<Notice> for ServerMessage {
    fn from(notice: Notice) -> Self {
        Self::Notice(notice)
    }
}

impl From<Operation> for ServerMessage {
    fn from(operation: Operation) -> Self {
        Self::Operation(operation)
    }
}

impl ServerMessage {
    /// Structured `error` notice from a typed error.
    #[must_use]
    pub fn error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Notice::Error { message: err.to_string(), code: err.error_code().to_owned() }.into()
    }

    #[must_use]
    pub fn failed(action: Action, reason: FailureReason) -> Self {
        Notice::OperationFailed { action, reason }.into()
    }

    /// The wire `type` of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Operation(op) => op.kind.as_str(),
            Self::Notice(notice) => match notice {
                Notice::Welcome { .. } => "welcome",
                Notice::CanvasState { .. } => "canvas-state",
                Notice::CursorUpdate { .. } => "cursor-update",
                Notice::UserJoined { .. } => "user-joined",
                Notice::UserLeft { .. } => "user-left",
                Notice::UserUpdated { .. } => "user-updated",
                Notice::OperationUndo { .. } => "operation-undo",
                Notice::OperationRedo { .. } => "operation-redo",
                Notice::OperationFailed { .. } => "operation-failed",
                Notice::CanvasCleared { .. } => "canvas-cleared",
                Notice::DebugResponse { .. } => "debug-response",
                Notice::Error { .. } => "error",
            },
        }
    }

    /// Ephemeral traffic is kept out of info-level logs.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Notice(Notice::CursorUpdate { .. }))
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
