//! Shared application state and the canvas domain records.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the server config and the room registry. Every room owns its
//! operation journal and its connected members, so the registry lock is the
//! single critical section for journal mutation and broadcast fan-out.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::ServerConfig;
use crate::services::room::RoomRegistry;

// =============================================================================
// USER
// =============================================================================

/// Identity bound to one connection. `id` is fixed for the session; name and
/// color may be changed by the owning connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub color: String,
}

// =============================================================================
// OPERATION
// =============================================================================

/// Kind of a recorded drawing event. Doubles as the wire `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    DrawStart,
    DrawMove,
    DrawEnd,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DrawStart => "draw-start",
            Self::DrawMove => "draw-move",
            Self::DrawEnd => "draw-end",
        }
    }

    /// Start and move events carry a point; end events carry none.
    #[must_use]
    pub fn requires_point(self) -> bool {
        matches!(self, Self::DrawStart | Self::DrawMove)
    }
}

/// Geometry and style payload of a drawing event. Which fields are present
/// depends on the kind: a stroke starts with point + style, moves carry a
/// point, and ends carry nothing. Any other client field (pressure, point
/// batches, ...) is kept verbatim in `extra` and travels with the operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Stroke {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brush_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Keys owned by `Operation` itself; pass-through fields may not shadow them.
const RESERVED_KEYS: [&str; 5] = ["type", "operationId", "userId", "userName", "timestamp"];

impl Stroke {
    /// Drop pass-through fields that would collide with operation identity.
    pub fn drop_reserved(&mut self) {
        self.extra.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));
    }

    /// Check the fields this kind depends on.
    ///
    /// # Errors
    ///
    /// Returns a description of the first missing or non-finite field.
    pub fn validate(&self, kind: OperationKind) -> Result<(), String> {
        if kind.requires_point() {
            for (name, value) in [("x", self.x), ("y", self.y)] {
                match value {
                    Some(v) if v.is_finite() => {}
                    Some(_) => return Err(format!("{}: {name} must be finite", kind.as_str())),
                    None => return Err(format!("{}: {name} required", kind.as_str())),
                }
            }
        }
        if let Some(size) = self.brush_size {
            if !size.is_finite() || size < 0.0 {
                return Err(format!("{}: brushSize must be a non-negative number", kind.as_str()));
            }
        }
        Ok(())
    }
}

/// An atomic drawing event as recorded in a room journal. Immutable once
/// recorded; identity is `operation_id`, never its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub operation_id: String,
    pub user_id: String,
    pub user_name: String,
    /// Milliseconds since Unix epoch.
    pub timestamp: i64,
    #[serde(flatten)]
    pub stroke: Stroke,
}

/// An operation before the journal has assigned its id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDraft {
    pub kind: OperationKind,
    pub stroke: Stroke,
    pub operation_id: Option<String>,
    pub timestamp: Option<i64>,
    pub user_id: String,
    pub user_name: String,
}

/// Pointer position in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Current time as milliseconds since Unix epoch.
pub(crate) fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub rooms: Arc<RwLock<RoomRegistry>>,
}

impl AppState {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self { config: Arc::new(config), rooms: Arc::new(RwLock::new(RoomRegistry::new())) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
