//! Game State Machine
//!
//! A game session: two player slots, the board, the per-player chess
//! clocks, and the Waiting → Playing → Finished lifecycle. All methods
//! run under the server lock; the only concurrency that leaks out of
//! this module is the armed timer task, which reports expiry through a
//! channel and never touches game state itself.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::game::board::Board;
use crate::game::error::GameError;
use crate::game::node::Cell;
use crate::game::player::{Player, PlayerId};

/// Length of a game code.
pub const CODE_LENGTH: usize = 5;

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 5-character uppercase alphanumeric room identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GameCode(String);

impl GameCode {
    /// Generate a random code. Uniqueness over live games is the
    /// registry's responsibility.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..CODE_LENGTH)
            .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
            .collect();
        Self(code)
    }

    /// Normalize client input: keep the first 5 characters, uppercase.
    pub fn normalize(raw: &str) -> Self {
        Self(raw.chars().take(CODE_LENGTH).collect::<String>().to_uppercase())
    }

    /// View the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GameCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a game. The discriminants are the wire encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum GameStatus {
    /// One player (or none) seated, waiting for an opponent.
    Waiting = 0,
    /// Both players seated, clocks running.
    Playing = 1,
    /// Decided; kept around for replays and late reconnects.
    Finished = 2,
}

impl GameStatus {
    /// Wire encoding.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Outcome of a finished game. The discriminants are the wire encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum GameResult {
    /// Not decided yet.
    None = 0,
    /// Slot 0 won.
    Player0Win = 1,
    /// Slot 1 won.
    Player1Win = 2,
    /// Board filled without a winner.
    Draw = 3,
}

impl GameResult {
    /// The winning result for the given player slot.
    pub fn win_for(player_idx: usize) -> GameResult {
        if player_idx == 0 {
            GameResult::Player0Win
        } else {
            GameResult::Player1Win
        }
    }

    /// Wire encoding.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Coordinates of the most recent move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMove {
    /// Column the token was dropped in.
    pub col: usize,
    /// Row the token landed on.
    pub row: usize,
}

/// Expiry notice delivered when a chess clock runs out.
#[derive(Clone, Debug)]
pub struct TimeoutEvent {
    /// Code of the game whose clock expired.
    pub code: GameCode,
    /// Slot whose clock expired; they lose unless the game already ended.
    pub loser_idx: usize,
}

/// Sending half of the server's timeout channel, cloned into every game.
pub type TimeoutSender = mpsc::UnboundedSender<TimeoutEvent>;

/// A Connect-Four game session.
pub struct Game {
    /// Room identifier, unique over live games.
    pub code: GameCode,
    /// The board.
    pub board: Board,
    /// Lifecycle state.
    pub status: GameStatus,
    /// Outcome, None until decided.
    pub result: GameResult,
    /// Player slots. Slot 1 empty while Waiting.
    pub players: [Option<Arc<Player>>; 2],
    /// Slot whose turn it is.
    pub current_turn: usize,
    /// Number of tokens on the board.
    pub move_count: usize,
    /// When the game was created.
    pub created_at: Instant,
    /// When the last move was played (or the game started).
    pub last_played_at: Instant,
    /// Most recent move, for late-joining clients.
    pub last_move: Option<LastMove>,
    /// Replay agreement flags, one per slot.
    pub replay_requests: [bool; 2],

    initial_clock: Duration,
    time_remaining: [Duration; 2],
    turn_started_at: Instant,
    timer: Option<JoinHandle<()>>,
    timeout_tx: TimeoutSender,
}

impl Game {
    /// Create a new waiting game.
    pub fn new(code: GameCode, initial_clock: Duration, timeout_tx: TimeoutSender) -> Self {
        Self {
            code,
            board: Board::new(),
            status: GameStatus::Waiting,
            result: GameResult::None,
            players: [None, None],
            current_turn: 0,
            move_count: 0,
            created_at: Instant::now(),
            last_played_at: Instant::now(),
            last_move: None,
            replay_requests: [false, false],
            initial_clock,
            time_remaining: [initial_clock; 2],
            turn_started_at: Instant::now(),
            timer: None,
            timeout_tx,
        }
    }

    /// Seat a player. Returns false when the game is not waiting or has
    /// no free slot. Filling slot 1 starts the game.
    pub fn add_player(&mut self, player: Arc<Player>) -> bool {
        if self.status != GameStatus::Waiting {
            return false;
        }

        for i in 0..self.players.len() {
            if self.players[i].is_none() {
                self.players[i] = Some(player);
                if i == 1 {
                    self.start();
                }
                return true;
            }
        }

        false
    }

    // Begins the game once both players are seated.
    fn start(&mut self) {
        self.current_turn = rand::thread_rng().gen_range(0..2);
        self.status = GameStatus::Playing;
        self.turn_started_at = Instant::now();
        self.last_played_at = Instant::now();
        self.arm_timer();
    }

    // Arms the clock of the player to move. Any previously armed timer is
    // aborted first, so at most one is live per game.
    fn arm_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }

        let remaining = self.time_remaining[self.current_turn];
        let code = self.code.clone();
        let loser_idx = self.current_turn;
        let tx = self.timeout_tx.clone();

        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            // The receiver resolves the code under the server lock; a
            // stale expiry for a finished or deleted game is a no-op there.
            let _ = tx.send(TimeoutEvent { code, loser_idx });
        }));
    }

    // Stops the armed timer and debits the elapsed turn time, floored at
    // zero, from the clock of the player to move.
    fn stop_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
            let elapsed = self.turn_started_at.elapsed();
            self.time_remaining[self.current_turn] =
                self.time_remaining[self.current_turn].saturating_sub(elapsed);
        }
    }

    /// Attempt to play a move in the given column.
    pub fn play(&mut self, player_idx: usize, col: usize) -> Result<(), GameError> {
        if self.status != GameStatus::Playing {
            return Err(GameError::GameNotPlaying);
        }
        if player_idx != self.current_turn {
            return Err(GameError::NotYourTurn);
        }

        self.stop_timer();

        let placed = match self.board.play(col, Cell::for_player(player_idx)) {
            Ok(id) => id,
            Err(err) => {
                // Rejected move: the offender keeps the clock they have
                // left and stays on the move, timer re-armed.
                self.turn_started_at = Instant::now();
                self.arm_timer();
                return Err(err);
            }
        };

        self.move_count += 1;
        self.last_played_at = Instant::now();
        let node = self.board.node(placed);
        self.last_move = Some(LastMove {
            col: node.col,
            row: node.row,
        });

        if self.board.check_win(placed) {
            self.status = GameStatus::Finished;
            self.result = GameResult::win_for(player_idx);
            return Ok(());
        }

        if self.board.is_full() {
            self.status = GameStatus::Finished;
            self.result = GameResult::Draw;
            return Ok(());
        }

        self.current_turn = 1 - self.current_turn;
        self.turn_started_at = Instant::now();
        self.arm_timer();

        Ok(())
    }

    /// End the game with the given slot losing. No-op unless playing, so
    /// a clock expiry racing a completed move loses the race cleanly.
    pub fn forfeit(&mut self, loser_idx: usize) {
        if self.status != GameStatus::Playing {
            return;
        }

        if let Some(handle) = self.timer.take() {
            handle.abort();
        }

        self.status = GameStatus::Finished;
        self.result = GameResult::win_for(1 - loser_idx);
    }

    /// Record a player's wish to replay. When both slots agree the game
    /// restarts with swapped slots and fresh clocks; returns whether the
    /// restart happened.
    pub fn request_replay(&mut self, player_idx: usize) -> bool {
        if self.status != GameStatus::Finished {
            return false;
        }

        self.replay_requests[player_idx] = true;

        if self.replay_requests[0] && self.replay_requests[1] {
            // The previous responder moves first in the rematch.
            self.players.swap(0, 1);
            self.reset();
            return true;
        }

        false
    }

    // Resets the game for a new round between the same players.
    fn reset(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }

        self.board.reset();
        self.status = GameStatus::Playing;
        self.result = GameResult::None;
        self.current_turn = 0;
        self.move_count = 0;
        self.replay_requests = [false, false];
        self.turn_started_at = Instant::now();
        self.last_played_at = Instant::now();
        self.last_move = None;
        self.time_remaining = [self.initial_clock; 2];

        self.arm_timer();
    }

    /// Stop the timer and drop the handle. Idempotent; called before the
    /// game is removed from the registry.
    pub fn cleanup(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }

    /// Remaining clock for both players. The player to move is charged
    /// for the running turn, floored at zero.
    pub fn time_remaining_snapshot(&self) -> [Duration; 2] {
        let mut times = self.time_remaining;
        if self.status == GameStatus::Playing {
            times[self.current_turn] =
                times[self.current_turn].saturating_sub(self.turn_started_at.elapsed());
        }
        times
    }

    /// Remaining clock for both players in wire milliseconds.
    pub fn time_remaining_ms(&self) -> [i64; 2] {
        let times = self.time_remaining_snapshot();
        [times[0].as_millis() as i64, times[1].as_millis() as i64]
    }

    /// Slot of the given player, if they are seated here.
    pub fn player_index(&self, id: &PlayerId) -> Option<usize> {
        self.players
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|p| &p.id == id))
    }

    /// Check whether a player is seated in this game.
    pub fn has_player(&self, id: &PlayerId) -> bool {
        self.player_index(id).is_some()
    }

    /// Check whether both slots are taken.
    pub fn is_full(&self) -> bool {
        self.players.iter().all(|slot| slot.is_some())
    }

    /// Whether a timer task is currently armed.
    pub fn timer_armed(&self) -> bool {
        self.timer.is_some()
    }
}

impl Drop for Game {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_game(clock: Duration) -> (Game, UnboundedReceiver<TimeoutEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Game::new(GameCode::random(), clock, tx), rx)
    }

    fn seated_game(clock: Duration) -> (Game, UnboundedReceiver<TimeoutEvent>) {
        let (mut game, rx) = test_game(clock);
        assert!(game.add_player(Player::new("Alice").unwrap()));
        assert_eq!(game.status, GameStatus::Waiting);
        assert!(game.add_player(Player::new("Bob").unwrap()));
        assert_eq!(game.status, GameStatus::Playing);
        (game, rx)
    }

    #[test]
    fn test_code_normalization() {
        assert_eq!(GameCode::normalize("abcde").as_str(), "ABCDE");
        assert_eq!(GameCode::normalize(" abcdef").as_str(), " ABCD");
        assert_eq!(GameCode::normalize("xy").as_str(), "XY");
    }

    #[test]
    fn test_random_code_shape() {
        for _ in 0..32 {
            let code = GameCode::random();
            assert_eq!(code.as_str().len(), CODE_LENGTH);
            assert!(code.as_str().bytes().all(|b| CODE_CHARSET.contains(&b)));
        }
    }

    #[tokio::test]
    async fn test_add_player_fills_slots_in_order() {
        let (mut game, _rx) = test_game(Duration::from_secs(150));
        let alice = Player::new("Alice").unwrap();
        assert!(game.add_player(alice.clone()));
        assert_eq!(game.player_index(&alice.id), Some(0));
        assert_eq!(game.status, GameStatus::Waiting);
        assert!(!game.timer_armed());

        let bob = Player::new("Bob").unwrap();
        assert!(game.add_player(bob.clone()));
        assert_eq!(game.player_index(&bob.id), Some(1));
        assert_eq!(game.status, GameStatus::Playing);
        assert!(game.timer_armed());

        // No third seat.
        assert!(!game.add_player(Player::new("Carol").unwrap()));
    }

    #[tokio::test]
    async fn test_valid_move_switches_turn() {
        let (mut game, _rx) = seated_game(Duration::from_secs(150));
        let first = game.current_turn;

        game.play(first, 0).unwrap();

        assert_eq!(game.move_count, 1);
        assert_eq!(game.current_turn, 1 - first);
        assert_eq!(game.last_move, Some(LastMove { col: 0, row: 5 }));
        assert!(game.timer_armed());
    }

    #[tokio::test]
    async fn test_play_out_of_turn() {
        let (mut game, _rx) = seated_game(Duration::from_secs(150));
        let wrong = 1 - game.current_turn;

        assert_eq!(game.play(wrong, 0), Err(GameError::NotYourTurn));
        assert_eq!(game.move_count, 0);
    }

    #[tokio::test]
    async fn test_play_before_game_starts() {
        let (mut game, _rx) = test_game(Duration::from_secs(150));
        game.add_player(Player::new("Alice").unwrap());

        assert_eq!(game.play(0, 0), Err(GameError::GameNotPlaying));
    }

    #[tokio::test]
    async fn test_invalid_column_leaves_state_unchanged() {
        let (mut game, _rx) = seated_game(Duration::from_secs(150));
        let turn = game.current_turn;

        assert_eq!(game.play(turn, 99), Err(GameError::InvalidMove));

        assert_eq!(game.move_count, 0);
        assert_eq!(game.current_turn, turn);
        assert_eq!(game.status, GameStatus::Playing);
        // The offender stays on the clock.
        assert!(game.timer_armed());
    }

    #[tokio::test]
    async fn test_full_column_rejected() {
        let (mut game, _rx) = seated_game(Duration::from_secs(150));

        for _ in 0..6 {
            let turn = game.current_turn;
            game.play(turn, 0).unwrap();
        }

        let turn = game.current_turn;
        assert_eq!(game.play(turn, 0), Err(GameError::InvalidMove));
        assert_eq!(game.move_count, 6);
        assert!(game.timer_armed());
    }

    #[tokio::test]
    async fn test_horizontal_win_finishes_game() {
        let (mut game, _rx) = seated_game(Duration::from_secs(150));
        game.current_turn = 0;

        // P0 builds row 5 across columns 0..3, P1 stacks on top.
        game.play(0, 0).unwrap();
        game.play(1, 0).unwrap();
        game.play(0, 1).unwrap();
        game.play(1, 1).unwrap();
        game.play(0, 2).unwrap();
        game.play(1, 2).unwrap();
        game.play(0, 3).unwrap();

        assert_eq!(game.status, GameStatus::Finished);
        assert_eq!(game.result, GameResult::Player0Win);
        assert!(!game.timer_armed());

        // The board is frozen once decided.
        assert_eq!(game.play(1, 4), Err(GameError::GameNotPlaying));
    }

    #[tokio::test]
    async fn test_draw_on_full_board() {
        let (mut game, _rx) = seated_game(Duration::from_secs(150));
        game.current_turn = 0;

        // Fill every cell except the top of column 6 with a pattern that
        // contains no four-in-a-row: cell(r, c) is Player0 iff
        // (c + r/2) is even.
        for col in 0..7 {
            for row in (0..6).rev() {
                if row == 0 && col == 6 {
                    continue;
                }
                let cell = if (col + row / 2) % 2 == 0 {
                    Cell::Player0
                } else {
                    Cell::Player1
                };
                game.board.play(col, cell).unwrap();
            }
        }
        game.move_count = 41;

        game.play(0, 6).unwrap();

        assert_eq!(game.status, GameStatus::Finished);
        assert_eq!(game.result, GameResult::Draw);
        assert_eq!(game.move_count, 42);
        assert!(game.board.is_full());
        assert!(!game.timer_armed());
    }

    #[tokio::test]
    async fn test_forfeit_awards_opponent() {
        let (mut game, _rx) = seated_game(Duration::from_secs(150));

        game.forfeit(0);
        assert_eq!(game.status, GameStatus::Finished);
        assert_eq!(game.result, GameResult::Player1Win);
        assert!(!game.timer_armed());
    }

    #[tokio::test]
    async fn test_forfeit_is_noop_after_finish() {
        let (mut game, _rx) = seated_game(Duration::from_secs(150));

        game.forfeit(1);
        assert_eq!(game.result, GameResult::Player0Win);

        // A late clock expiry maps to a second forfeit; it must not
        // overturn the decided result.
        game.forfeit(0);
        assert_eq!(game.result, GameResult::Player0Win);
    }

    #[tokio::test]
    async fn test_replay_requires_both_players() {
        let (mut game, _rx) = seated_game(Duration::from_secs(150));
        game.forfeit(0);

        assert!(!game.request_replay(0));
        assert_eq!(game.status, GameStatus::Finished);
        assert!(game.replay_requests[0]);

        assert!(game.request_replay(1));
        assert_eq!(game.status, GameStatus::Playing);
    }

    #[tokio::test]
    async fn test_replay_rejected_while_playing() {
        let (mut game, _rx) = seated_game(Duration::from_secs(150));
        assert!(!game.request_replay(0));
        assert!(!game.replay_requests[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_resets_board_clocks_and_swaps_slots() {
        let (mut game, _rx) = seated_game(Duration::from_secs(150));
        game.current_turn = 0;
        let previous = [
            game.players[0].as_ref().unwrap().id.clone(),
            game.players[1].as_ref().unwrap().id.clone(),
        ];

        game.play(0, 0).unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        game.play(1, 1).unwrap();
        game.forfeit(0);

        assert!(!game.request_replay(1));
        assert!(game.request_replay(0));

        assert_eq!(game.status, GameStatus::Playing);
        assert_eq!(game.result, GameResult::None);
        assert_eq!(game.move_count, 0);
        assert_eq!(game.board.token_count(), 0);
        assert_eq!(game.last_move, None);
        assert_eq!(game.replay_requests, [false, false]);
        assert_eq!(game.current_turn, 0);
        assert_eq!(
            game.time_remaining_snapshot(),
            [Duration::from_secs(150); 2]
        );
        assert!(game.timer_armed());

        // Slots swapped: the previous responder moves first.
        assert_eq!(game.players[0].as_ref().unwrap().id, previous[1]);
        assert_eq!(game.players[1].as_ref().unwrap().id, previous[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_debits_elapsed_turn_time() {
        let (mut game, _rx) = seated_game(Duration::from_secs(150));
        game.current_turn = 0;

        tokio::time::advance(Duration::from_secs(10)).await;
        let snapshot = game.time_remaining_snapshot();
        assert_eq!(snapshot[0], Duration::from_secs(140));
        assert_eq!(snapshot[1], Duration::from_secs(150));

        game.play(0, 0).unwrap();
        let ms = game.time_remaining_ms();
        assert_eq!(ms[0], 140_000);
        assert_eq!(ms[1], 150_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_expiry_sends_timeout_event() {
        let (mut game, mut rx) = seated_game(Duration::from_millis(1000));
        let turn = game.current_turn;

        // Auto-advancing paused time runs the armed timer to completion.
        let event = rx.recv().await.expect("timeout event");
        assert_eq!(event.code, game.code);
        assert_eq!(event.loser_idx, turn);

        // The state machine itself is untouched until the server routes
        // the event into forfeit.
        assert_eq!(game.status, GameStatus::Playing);
        game.forfeit(event.loser_idx);
        assert_eq!(game.result, GameResult::win_for(1 - turn));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timeout_after_finish_is_harmless() {
        let (mut game, mut rx) = seated_game(Duration::from_millis(500));
        let turn = game.current_turn;

        // Let the clock run out, then decide the game before the expiry
        // is routed: the forfeit guard must not fire.
        let event = rx.recv().await.expect("timeout event");

        game.forfeit(1 - turn);
        assert_eq!(game.result, GameResult::win_for(turn));
        game.forfeit(event.loser_idx);
        assert_eq!(game.result, GameResult::win_for(turn));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_move_keeps_debited_clock_running() {
        let (mut game, _rx) = seated_game(Duration::from_secs(150));
        game.current_turn = 0;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(game.play(0, 99), Err(GameError::InvalidMove));

        // The thinking time is gone and the clock keeps running for the
        // same player.
        let snapshot = game.time_remaining_snapshot();
        assert_eq!(snapshot[0], Duration::from_secs(120));
        assert_eq!(game.current_turn, 0);
        assert!(game.timer_armed());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let (mut game, _rx) = seated_game(Duration::from_secs(150));
        assert!(game.timer_armed());
        game.cleanup();
        assert!(!game.timer_armed());
        game.cleanup();
    }
}
