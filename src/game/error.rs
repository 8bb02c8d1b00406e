//! Game Errors
//!
//! Recoverable errors surfaced to clients. The display strings are the
//! wire contract: they are sent verbatim in `error` frames, so changing
//! them breaks deployed clients.

use thiserror::Error;

/// Errors a command handler can surface to the offending client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GameError {
    /// The referenced game does not exist (or no longer exists).
    #[error("game not found")]
    GameNotFound,

    /// The action requires a game in the playing state.
    #[error("game is not in playing state")]
    GameNotPlaying,

    /// A move was attempted out of turn.
    #[error("not your turn")]
    NotYourTurn,

    /// Column out of range or already full.
    #[error("invalid move")]
    InvalidMove,

    /// The game already holds two players.
    #[error("game is full")]
    GameFull,

    /// The command requires a bound player the server no longer knows.
    #[error("player not found")]
    PlayerNotFound,

    /// The caller is not a member of the resolved game.
    #[error("player not in game")]
    PlayerNotInGame,

    /// The caller already holds an unfinished game.
    #[error("player already in game")]
    PlayerAlreadyInGame,

    /// Username trims to the empty string.
    #[error("invalid username")]
    InvalidUsername,
}
