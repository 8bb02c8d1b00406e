//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket. Every
//! frame is a JSON object `{"type": <string>, "data": <object|null>}`.
//! Outbound messages are an adjacently tagged enum so the envelope falls
//! out of serde; inbound frames are decoded in two steps so unknown
//! types are ignored and malformed payloads are dropped without a reply.

use serde::{Deserialize, Serialize};

use crate::game::board::{COLS, ROWS};
use crate::game::error::GameError;
use crate::game::player::PlayerId;
use crate::game::state::LastMove;

/// The board as it travels on the wire: 6 rows × 7 columns of cell
/// values (0 empty, 1 player 0, 2 player 1), row 0 on top.
pub type WireBoard = [[u8; COLS]; ROWS];

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Commands sent from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Log in, optionally reclaiming a prior identity.
    Login(LoginData),
    /// Create a private game.
    CreateGame,
    /// Join (or reconnect to) a game by code.
    JoinGame(JoinGameData),
    /// Drop a token.
    Play(PlayData),
    /// Ask for a rematch.
    Replay,
    /// Concede the current game.
    Forfeit,
    /// Leave the current game and return to the lobby.
    LeaveLobby,
    /// Enter the anonymous pairing queue.
    JoinMatchmaking,
    /// Leave the pairing queue.
    LeaveMatchmaking,
}

/// Login credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginData {
    /// Display name, trimmed server-side.
    pub username: String,
    /// Prior session token, for reconnection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
}

/// Game join request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinGameData {
    /// Room code as typed by the user; normalized server-side.
    pub code: String,
}

/// A move request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayData {
    /// Target column. Signed so an out-of-range value reaches the move
    /// validator instead of failing decode.
    pub column: i64,
}

// The raw frame envelope.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ClientCommand {
    /// Decode one inbound frame.
    ///
    /// Returns `None` for unparseable frames, unknown types, and
    /// malformed payloads of known types; the caller drops those
    /// silently.
    pub fn decode(text: &str) -> Option<ClientCommand> {
        let envelope: Envelope = serde_json::from_str(text).ok()?;
        let data = envelope.data;

        match envelope.msg_type.as_str() {
            "login" => serde_json::from_value(data).ok().map(ClientCommand::Login),
            "create_game" => Some(ClientCommand::CreateGame),
            "join_game" => serde_json::from_value(data).ok().map(ClientCommand::JoinGame),
            "play" => serde_json::from_value(data).ok().map(ClientCommand::Play),
            "replay" => Some(ClientCommand::Replay),
            "forfeit" => Some(ClientCommand::Forfeit),
            "leave_lobby" => Some(ClientCommand::LeaveLobby),
            "join_matchmaking" => Some(ClientCommand::JoinMatchmaking),
            "leave_matchmaking" => Some(ClientCommand::LeaveMatchmaking),
            _ => None,
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Login confirmation carrying the session token.
    Welcome(WelcomeData),
    /// A private game was created.
    GameCreated(GameCreatedData),
    /// Both seats are taken; clocks are running.
    GameStart(GameStartData),
    /// Full snapshot for a (re)joining client.
    GameState(GameStateData),
    /// A move was applied.
    Move(MoveData),
    /// The game is decided.
    GameOver(GameOverData),
    /// The opponent asked for a rematch.
    ReplayRequest(ReplayRequestData),
    /// Queued for anonymous pairing.
    MatchmakingSearching,
    /// Pairing queue size changed.
    QueueUpdate(QueueUpdateData),
    /// A command failed; the game state did not change.
    Error(ErrorData),
}

/// Sent after successful login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeData {
    /// Session token to present on reconnect.
    pub player_id: PlayerId,
    /// Accepted display name.
    pub username: String,
}

/// Sent when a game is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameCreatedData {
    /// Room code to share with the opponent.
    pub code: String,
}

/// Public player information. Empty seats serialize as the zero value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    /// Session token, empty for a vacant seat.
    pub id: String,
    /// Display name.
    pub username: String,
    /// Whether a transport is currently attached.
    pub connected: bool,
}

/// Sent to both players when the game starts (or restarts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStartData {
    /// Room code.
    pub code: String,
    /// Slot that moves first.
    pub current_turn: usize,
    /// Both seats.
    pub players: [PlayerInfo; 2],
    /// Clocks in milliseconds.
    pub time_remaining: [i64; 2],
}

/// Full game snapshot, built per recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateData {
    /// Room code.
    pub code: String,
    /// Lifecycle state (0 waiting, 1 playing, 2 finished).
    pub status: u8,
    /// Outcome (0 none, 1 player-0 win, 2 player-1 win, 3 draw).
    pub result: u8,
    /// Current board.
    pub board: WireBoard,
    /// Both seats.
    pub players: [PlayerInfo; 2],
    /// The recipient's seat, -1 if they are not seated.
    pub player_idx: i32,
    /// Slot to move.
    pub current_turn: usize,
    /// Tokens on the board.
    pub move_count: usize,
    /// Clocks in milliseconds.
    pub time_remaining: [i64; 2],
    /// Rematch agreement flags.
    pub replay_requests: [bool; 2],
    /// Most recent move, when one was played.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_move: Option<LastMove>,
}

/// Broadcast after every applied move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveData {
    /// Slot that moved.
    pub player_idx: usize,
    /// Column played.
    pub column: usize,
    /// Row the token landed on.
    pub row: usize,
    /// Board after the move.
    pub board: WireBoard,
    /// Slot to move next.
    pub next_turn: usize,
    /// Clocks in milliseconds.
    pub time_remaining: [i64; 2],
}

/// Broadcast when the game is decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameOverData {
    /// Outcome.
    pub result: u8,
    /// Final board.
    pub board: WireBoard,
}

/// Broadcast when a player asks for a rematch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayRequestData {
    /// Slot that asked.
    pub player_idx: usize,
}

/// Broadcast to the lobby when the pairing queue changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueUpdateData {
    /// Players currently queued.
    pub players_in_queue: usize,
}

/// Error reply to the offending client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Human-readable message, stable per [`GameError`].
    pub message: String,
}

impl From<GameError> for ServerMessage {
    fn from(err: GameError) -> Self {
        ServerMessage::Error(ErrorData {
            message: err.to_string(),
        })
    }
}

impl ServerMessage {
    /// Serialize to a JSON frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON frame.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
