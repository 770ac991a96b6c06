//! # parley-shared
//!
//! Types shared between the Parley server and its clients: domain id
//! newtypes, the WebSocket event vocabulary, and the signed session-token
//! routine used by both the HTTP auth middleware and the socket handshake.

pub mod constants;
pub mod error;
pub mod events;
pub mod token;
pub mod types;

