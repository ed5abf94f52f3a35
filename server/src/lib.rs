//! 8-ball server library.
//!
//! Room authority, lobby and WebSocket transport, exposed for tests and binaries.

pub mod config;
pub mod lobby;
pub mod room;
pub mod room_id;
pub mod ws;
