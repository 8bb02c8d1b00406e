//! Game Logic Module
//!
//! The board, the players, and the per-game state machine. No I/O: the
//! network layer drives these types under the server lock, and the only
//! thing that escapes is the timer expiry channel.
//!
//! ## Module Structure
//!
//! - `direction`: the 8 neighbor directions of the board graph
//! - `node`: board cells as graph nodes, local-walk win detection
//! - `board`: the 6×7 grid, gravity, win/draw queries
//! - `player`: identity tokens and sender attachment
//! - `state`: game lifecycle, turn ownership, chess clocks, replay
//! - `error`: the client-visible error taxonomy

pub mod board;
pub mod direction;
pub mod error;
pub mod node;
pub mod player;
pub mod state;

// Re-export key types
pub use board::{Board, COLS, ROWS, WIN_LENGTH};
pub use direction::Direction;
pub use error::GameError;
pub use node::Cell;
pub use player::{Player, PlayerId};
pub use state::{Game, GameCode, GameResult, GameStatus, LastMove, TimeoutEvent};
