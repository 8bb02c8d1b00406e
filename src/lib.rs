//! # Connect Four Game Server
//!
//! Authoritative server for a multiplayer Connect-Four service over
//! long-lived JSON WebSocket channels.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CONNECT FOUR SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/            - Game logic (no I/O)                      │
//! │  ├── direction.rs - 8-way board graph directions             │
//! │  ├── node.rs      - Cells as graph nodes, win detection      │
//! │  ├── board.rs     - 6×7 grid, gravity, column heights        │
//! │  ├── player.rs    - Identity tokens, sender attachment       │
//! │  ├── state.rs     - Lifecycle, turns, chess clocks, replay   │
//! │  └── error.rs     - Client-visible error taxonomy            │
//! │                                                              │
//! │  network/         - Transport and routing                    │
//! │  ├── protocol.rs  - JSON wire messages                       │
//! │  ├── client.rs    - Bounded send queue, write pump, pings    │
//! │  ├── server.rs    - Registry, command router, reaper         │
//! │  └── matchmaking.rs - FIFO pairing, throttled queue updates  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency model
//!
//! One `RwLock` serializes every command handler, timer expiry, and
//! reaper sweep. Handlers never do I/O under the lock: all outbound
//! traffic is a non-blocking enqueue into a per-connection queue, and a
//! client that cannot drain its queue is closed rather than allowed to
//! stall the router. Chess clocks are one-shot tasks that report expiry
//! through a channel; a stale expiry racing a completed move is
//! neutralized by the game's status guard.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::{Board, Cell, Game, GameCode, GameError, GameResult, GameStatus, Player, PlayerId};
pub use network::{Client, ClientCommand, GameServer, ServerConfig, ServerMessage};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
