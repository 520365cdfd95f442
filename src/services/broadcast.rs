//! Broadcast fan-out to the members of one room.
//!
//! DESIGN
//! ======
//! Delivery is fire-and-forget per member: a non-blocking `try_send` onto the
//! member's bounded outbound queue. A closed or full queue is counted and
//! logged, never retried, and never stops delivery to the remaining members.
//! Callers hold the registry lock while broadcasting, so fan-out always sees
//! the state left by the mutation that triggered it.

use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::message::ServerMessage;
use crate::services::room::{ConnectionId, RoomRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// Per-broadcast delivery tally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Members whose connection was already gone.
    pub skipped: usize,
    pub failed: usize,
}

/// Deliver `message` to every member of `room_id` except `exclude`. Returns
/// the tally for the caller to log with its own context.
pub fn broadcast(
    rooms: &RoomRegistry,
    room_id: &str,
    message: &ServerMessage,
    exclude: Option<ConnectionId>,
) -> Delivery {
    let mut tally = Delivery::default();
    let Some(room) = rooms.room(room_id) else {
        return tally;
    };

    for (connection_id, member) in room.members() {
        if exclude == Some(*connection_id) {
            continue;
        }
        if member.tx.is_closed() {
            tally.skipped += 1;
            continue;
        }
        match member.tx.try_send(message.clone()) {
            Ok(()) => tally.delivered += 1,
            Err(e) => {
                let err = match e {
                    TrySendError::Full(_) => DeliveryError::Full,
                    TrySendError::Closed(_) => DeliveryError::Closed,
                };
                warn!(%room_id, %connection_id, kind = message.kind(), error = %err, "broadcast delivery failed");
                tally.failed += 1;
            }
        }
    }

    tally
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
