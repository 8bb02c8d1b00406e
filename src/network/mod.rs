//! Network Layer
//!
//! WebSocket transport, wire protocol, and the command router. All game
//! logic runs through `game/`; this layer binds connections to player
//! identities and serializes every mutation through the server lock.

pub mod client;
pub mod matchmaking;
pub mod protocol;
pub mod server;

pub use client::{Client, PING_PERIOD, PONG_WAIT, SEND_BUFFER_SIZE, WRITE_WAIT};
pub use protocol::{ClientCommand, ServerMessage};
pub use server::{GameServer, ServerConfig, ServerError};
