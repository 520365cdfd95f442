//! Domain services used by the websocket transport.
//!
//! ARCHITECTURE
//! ============
//! Service modules own journal, membership, and dispatch logic so the route
//! layer can stay focused on socket plumbing. None of them lock: callers hold
//! the registry guard for the full handling of one inbound message.

pub mod broadcast;
pub mod journal;
pub mod room;
pub mod session;
