//! Matchmaking
//!
//! FIFO pairing of anonymous players. The queue lives under the server
//! lock next to the registry; queue-size broadcasts are throttled so a
//! burst of joins and leaves collapses into one `queue_update`.

use std::sync::Arc;

use tracing::{debug, info};

use crate::game::error::GameError;
use crate::game::state::Game;
use crate::network::client::Client;
use crate::network::protocol::{QueueUpdateData, ServerMessage};
use crate::network::server::{GameServer, ServerState};

impl GameServer {
    /// Enter the pairing queue. A second join while queued is absorbed.
    pub(crate) async fn handle_join_matchmaking(&self, client: &Arc<Client>) {
        let mut state = self.state.write().await;

        let Some(player) = client
            .player_id()
            .and_then(|id| state.lobby.get(&id).cloned())
        else {
            Self::send_error(client, GameError::PlayerNotFound);
            return;
        };

        if state.matchmaking_queue.contains(&player.id) {
            return;
        }

        state.matchmaking_queue.push(player.id.clone());
        debug!(player = %player.id, queued = state.matchmaking_queue.len(), "joined matchmaking");

        player.send(&ServerMessage::MatchmakingSearching);
        self.schedule_queue_update(&mut state);
        self.try_match(&mut state);
    }

    /// Leave the pairing queue.
    pub(crate) async fn handle_leave_matchmaking(&self, client: &Arc<Client>) {
        let mut state = self.state.write().await;

        let Some(player_id) = client.player_id() else {
            return;
        };

        if let Some(pos) = state.matchmaking_queue.iter().position(|id| id == &player_id) {
            state.matchmaking_queue.remove(pos);
            debug!(player = %player_id, "left matchmaking");
        }

        self.schedule_queue_update(&mut state);
    }

    /// Pair queued players two at a time. A popped player that vanished
    /// or disconnected forfeits their spot; the connected survivor goes
    /// back to the head and pairing stops until the queue changes again.
    pub(crate) fn try_match(&self, state: &mut ServerState) {
        while state.matchmaking_queue.len() >= 2 {
            let first_id = state.matchmaking_queue.remove(0);
            let second_id = state.matchmaking_queue.remove(0);

            let first = state
                .lobby
                .get(&first_id)
                .cloned()
                .filter(|p| p.is_connected());
            let second = state
                .lobby
                .get(&second_id)
                .cloned()
                .filter(|p| p.is_connected());

            let (Some(first), Some(second)) = (first, second) else {
                if let Some(survivor) = state
                    .lobby
                    .get(&first_id)
                    .filter(|p| p.is_connected())
                {
                    state.matchmaking_queue.insert(0, survivor.id.clone());
                } else if let Some(survivor) = state
                    .lobby
                    .get(&second_id)
                    .filter(|p| p.is_connected())
                {
                    state.matchmaking_queue.insert(0, survivor.id.clone());
                }
                self.schedule_queue_update(state);
                return;
            };

            let code = state.fresh_code();
            let mut game = Game::new(
                code.clone(),
                self.config.initial_clock,
                self.timeout_tx.clone(),
            );
            game.add_player(Arc::clone(&first));
            game.add_player(Arc::clone(&second));

            info!(code = %code, p0 = %first.id, p1 = %second.id, "matchmade game starting");

            let start = ServerMessage::GameStart(Self::build_game_start(&game));
            Self::broadcast_to_game(&game, &start);

            state.games_by_code.insert(code, game);
            self.schedule_queue_update(state);
        }
    }

    /// Schedule a throttled `queue_update` fan-out to the lobby. At most
    /// one broadcast is in flight per throttle window; the one that
    /// fires reports the queue size at fire time.
    pub(crate) fn schedule_queue_update(&self, state: &mut ServerState) {
        if state.queue_update_pending {
            return;
        }
        state.queue_update_pending = true;

        let shared = Arc::clone(&self.state);
        let delay = self.config.queue_update_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let mut state = shared.write().await;
            state.queue_update_pending = false;

            let msg = ServerMessage::QueueUpdate(QueueUpdateData {
                players_in_queue: state.matchmaking_queue.len(),
            });
            for player in state.lobby.values() {
                if player.is_connected() {
                    player.send(&msg);
                }
            }
        });
    }
}
