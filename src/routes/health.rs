//! Health probe with live room counters.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::state::{AppState, now_ms};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub timestamp: i64,
    pub rooms: usize,
    pub total_users: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let rooms = state.rooms.read().await;
    Json(HealthReport {
        status: "ok".into(),
        timestamp: now_ms(),
        rooms: rooms.room_count(),
        total_users: rooms.total_members(),
    })
}

#[cfg(test)]
#[path = "health_test.rs"]
mod tests;
