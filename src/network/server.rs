//! WebSocket Game Server
//!
//! Owns the registry of games and players and routes every inbound
//! command, timer expiry, and reaper sweep through one write lock.
//! Handlers never block while holding it: outbound traffic is a
//! non-blocking enqueue into each player's send queue.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{interval, timeout, Instant};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::game::error::GameError;
use crate::game::player::{Player, PlayerId};
use crate::game::state::{Game, GameCode, GameStatus, TimeoutEvent, TimeoutSender};
use crate::network::client::{self, Client, PONG_WAIT};
use crate::network::protocol::{
    ClientCommand, GameCreatedData, GameStartData, GameStateData, GameOverData, JoinGameData,
    LoginData, MoveData, PlayData, PlayerInfo, ReplayRequestData, ServerMessage, WelcomeData,
};

/// Starting chess clock per player.
pub const INITIAL_CLOCK: Duration = Duration::from_secs(150);
/// How long disconnected players and decided games are kept alive.
pub const RECONNECT_GRACE_PERIOD: Duration = Duration::from_secs(120);
/// Reaper sweep interval.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);
/// Throttle window for queue-size broadcasts.
pub const QUEUE_UPDATE_DELAY: Duration = Duration::from_millis(500);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Starting chess clock per player.
    pub initial_clock: Duration,
    /// Grace window for reconnects before the reaper collects.
    pub reconnect_grace_period: Duration,
    /// Reaper sweep interval.
    pub cleanup_interval: Duration,
    /// Queue-update broadcast throttle.
    pub queue_update_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static bind address"),
            initial_clock: INITIAL_CLOCK,
            reconnect_grace_period: RECONNECT_GRACE_PERIOD,
            cleanup_interval: CLEANUP_INTERVAL,
            queue_update_delay: QUEUE_UPDATE_DELAY,
        }
    }
}

/// Fatal server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listener.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Everything behind the server lock.
pub(crate) struct ServerState {
    /// Live games, keyed by room code.
    pub games_by_code: BTreeMap<GameCode, Game>,
    /// Known players, connected or within their grace window.
    pub lobby: BTreeMap<PlayerId, Arc<Player>>,
    /// FIFO pairing queue; no duplicates.
    pub matchmaking_queue: Vec<PlayerId>,
    /// Whether a queue-update broadcast is already scheduled.
    pub queue_update_pending: bool,
}

impl ServerState {
    fn new() -> Self {
        Self {
            games_by_code: BTreeMap::new(),
            lobby: BTreeMap::new(),
            matchmaking_queue: Vec::new(),
            queue_update_pending: false,
        }
    }

    /// A code no live game is using.
    pub(crate) fn fresh_code(&self) -> GameCode {
        loop {
            let code = GameCode::random();
            if !self.games_by_code.contains_key(&code) {
                return code;
            }
        }
    }

    /// The game the client is playing in: the cached code when it still
    /// resolves, otherwise a registry scan (which refreshes the cache).
    fn resolve_game_code(&self, client: &Client) -> Option<GameCode> {
        if let Some(code) = client.game_code() {
            if self.games_by_code.contains_key(&code) {
                return Some(code);
            }
        }

        let player_id = client.player_id()?;
        for (code, game) in &self.games_by_code {
            if game.has_player(&player_id) {
                client.set_game_code(Some(code.clone()));
                return Some(code.clone());
            }
        }

        None
    }

    /// Reaper sweep: collect stale games and orphaned players.
    pub(crate) fn cleanup_stale_games(&mut self, grace: Duration) {
        let now = Instant::now();

        let stale: Vec<GameCode> = self
            .games_by_code
            .iter()
            .filter(|(_, game)| match game.status {
                GameStatus::Finished => now.duration_since(game.last_played_at) > grace,
                GameStatus::Waiting => {
                    game.players[0].is_none() || now.duration_since(game.created_at) > grace
                }
                GameStatus::Playing => {
                    let both_disconnected =
                        game.players.iter().flatten().all(|p| !p.is_connected());
                    both_disconnected && now.duration_since(game.last_played_at) > grace
                }
            })
            .map(|(code, _)| code.clone())
            .collect();

        for code in stale {
            if let Some(mut game) = self.games_by_code.remove(&code) {
                game.cleanup();
                info!(code = %code, "reaped stale game");
            }
        }

        let orphaned: Vec<PlayerId> = self
            .lobby
            .iter()
            .filter(|(id, player)| {
                !player.is_connected()
                    && !self.games_by_code.values().any(|g| g.has_player(id))
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in orphaned {
            self.lobby.remove(&id);
            debug!(player = %id, "reaped orphaned player");
        }
    }
}

/// The game server.
pub struct GameServer {
    pub(crate) config: ServerConfig,
    pub(crate) state: Arc<RwLock<ServerState>>,
    pub(crate) timeout_tx: TimeoutSender,
    timeout_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<TimeoutEvent>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            config,
            state: Arc::new(RwLock::new(ServerState::new())),
            timeout_tx,
            timeout_rx: std::sync::Mutex::new(Some(timeout_rx)),
            shutdown_tx,
        })
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.run_on(listener).await
    }

    /// Serve on an already-bound listener until shutdown.
    pub async fn run_on(self: Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        info!(addr = %listener.local_addr()?, "game server listening");

        // Clock expiries from every game funnel through one channel into
        // the server lock.
        let timeout_rx = self
            .timeout_rx
            .lock()
            .expect("timeout receiver lock poisoned")
            .take();
        if let Some(mut rx) = timeout_rx {
            let server = Arc::clone(&self);
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = rx.recv() => match event {
                            Some(event) => server.handle_timeout(event).await,
                            None => break,
                        },
                        _ = shutdown_rx.recv() => break,
                    }
                }
            });
        }

        // Periodic reaper.
        {
            let server = Arc::clone(&self);
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut ticker = interval(server.config.cleanup_interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let mut state = server.state.write().await;
                            state.cleanup_stale_games(server.config.reconnect_grace_period);
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            });
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                server.handle_connection(stream, addr).await;
                            });
                        }
                        Err(err) => error!(%err, "accept failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Signal every background task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    // ---------------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------------

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        // Only the upgrade endpoint lives here; static assets are an
        // external collaborator.
        let callback = |request: &Request, response: Response| {
            if request.uri().path() == "/ws" {
                Ok(response)
            } else {
                let mut not_found = ErrorResponse::new(Some("not found".to_string()));
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Err(not_found)
            }
        };

        let ws_stream = match accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(err) => {
                debug!(%addr, %err, "websocket handshake failed");
                return;
            }
        };

        let (sink, mut ws_receiver) = ws_stream.split();
        let (client, outbound_rx) = Client::new();
        tokio::spawn(client::write_pump(Arc::clone(&client), outbound_rx, sink));

        info!(%addr, session_id = client.session_id, "client connected");

        loop {
            // The peer must produce a frame (pong included) within the
            // pong budget or the connection is considered dead.
            let msg = match timeout(PONG_WAIT, ws_receiver.next()).await {
                Err(_) => {
                    debug!(%addr, "read timed out");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    debug!(%addr, %err, "read failed");
                    break;
                }
                Ok(Some(Ok(msg))) => msg,
            };

            match msg {
                WsMessage::Text(text) => match ClientCommand::decode(&text) {
                    Some(cmd) => self.dispatch(&client, cmd).await,
                    None => debug!(%addr, "dropping undecodable frame"),
                },
                WsMessage::Close(_) => break,
                // Pings are answered by the protocol layer; pongs only
                // matter as read activity.
                _ => {}
            }
        }

        self.disconnect(&client).await;
        client.close();
        info!(%addr, session_id = client.session_id, "client disconnected");
    }

    /// Route one decoded command to its handler.
    async fn dispatch(&self, client: &Arc<Client>, cmd: ClientCommand) {
        match cmd {
            ClientCommand::Login(data) => self.handle_login(client, data).await,
            ClientCommand::CreateGame => self.handle_create_game(client).await,
            ClientCommand::JoinGame(data) => self.handle_join_game(client, data).await,
            ClientCommand::Play(data) => self.handle_play(client, data).await,
            ClientCommand::Replay => self.handle_replay(client).await,
            ClientCommand::Forfeit => self.handle_forfeit(client).await,
            ClientCommand::LeaveLobby => self.handle_leave_lobby(client).await,
            ClientCommand::JoinMatchmaking => self.handle_join_matchmaking(client).await,
            ClientCommand::LeaveMatchmaking => self.handle_leave_matchmaking(client).await,
        }
    }

    /// Tear down a connection's bindings: detach the sender (unless a
    /// newer connection already replaced it), leave the pairing queue,
    /// and sweep.
    pub(crate) async fn disconnect(&self, client: &Arc<Client>) {
        let mut state = self.state.write().await;

        if let Some(player_id) = client.player_id() {
            if let Some(player) = state.lobby.get(&player_id) {
                let still_bound = player
                    .sender()
                    .is_some_and(|sender| sender.session_id == client.session_id);
                if still_bound {
                    player.set_sender(None);
                }
            }

            let before = state.matchmaking_queue.len();
            state.matchmaking_queue.retain(|id| id != &player_id);
            if state.matchmaking_queue.len() != before {
                self.schedule_queue_update(&mut state);
            }
        }

        state.cleanup_stale_games(self.config.reconnect_grace_period);
    }

    // ---------------------------------------------------------------------
    // Command handlers. Each takes the write lock for its whole duration.
    // ---------------------------------------------------------------------

    pub(crate) async fn handle_login(&self, client: &Arc<Client>, data: LoginData) {
        let mut state = self.state.write().await;

        let mut existing: Option<Arc<Player>> = None;
        let mut game_code: Option<GameCode> = None;

        // Reconnection attempt: a known token reclaims the identity.
        if let Some(prior) = &data.player_id {
            if let Some(player) = state.lobby.get(prior) {
                player.set_username(&data.username);
                existing = Some(Arc::clone(player));

                for (code, game) in &state.games_by_code {
                    if game.has_player(prior) {
                        game_code = Some(code.clone());
                        break;
                    }
                }
            }
        }

        let player = match existing {
            Some(player) => player,
            None => match Player::new(&data.username) {
                Ok(player) => {
                    state.lobby.insert(player.id.clone(), Arc::clone(&player));
                    player
                }
                Err(err) => {
                    Self::send_error(client, err);
                    return;
                }
            },
        };

        client.set_player_id(player.id.clone());
        if let Some(code) = &game_code {
            client.set_game_code(Some(code.clone()));
        }
        // A reconnect replaces whatever sender the player had; the stale
        // connection's cleanup sees the mismatch and leaves it alone.
        player.set_sender(Some(Arc::clone(client)));

        info!(player = %player.id, username = %player.username(), "player logged in");

        player.send(&ServerMessage::Welcome(WelcomeData {
            player_id: player.id.clone(),
            username: player.username(),
        }));

        if let Some(code) = game_code {
            if let Some(game) = state.games_by_code.get(&code) {
                player.send(&ServerMessage::GameState(Self::build_game_state(
                    game, &player.id,
                )));
            }
        }
    }

    pub(crate) async fn handle_create_game(&self, client: &Arc<Client>) {
        let mut state = self.state.write().await;

        let Some(player) = Self::bound_player(&state, client) else {
            Self::send_error(client, GameError::PlayerNotFound);
            return;
        };

        // One unfinished game at a time.
        if let Some(code) = client.game_code() {
            if let Some(game) = state.games_by_code.get(&code) {
                if game.status != GameStatus::Finished {
                    Self::send_error(client, GameError::PlayerAlreadyInGame);
                    return;
                }
            }
        }

        let code = state.fresh_code();
        let mut game = Game::new(
            code.clone(),
            self.config.initial_clock,
            self.timeout_tx.clone(),
        );
        game.add_player(Arc::clone(&player));
        client.set_game_code(Some(code.clone()));

        info!(code = %code, player = %player.id, "game created");

        player.send(&ServerMessage::GameCreated(GameCreatedData {
            code: code.to_string(),
        }));
        player.send(&ServerMessage::GameState(Self::build_game_state(
            &game, &player.id,
        )));

        state.games_by_code.insert(code, game);
    }

    pub(crate) async fn handle_join_game(&self, client: &Arc<Client>, data: JoinGameData) {
        let code = GameCode::normalize(&data.code);
        let mut state = self.state.write().await;

        if !state.games_by_code.contains_key(&code) {
            Self::send_error(client, GameError::GameNotFound);
            return;
        }

        let Some(player) = Self::bound_player(&state, client) else {
            Self::send_error(client, GameError::PlayerNotFound);
            return;
        };

        let Some(game) = state.games_by_code.get_mut(&code) else {
            Self::send_error(client, GameError::GameNotFound);
            return;
        };

        // Already seated: this is a reconnect, not a join. Everyone gets
        // a fresh snapshot built for their own seat.
        if game.has_player(&player.id) {
            client.set_game_code(Some(code.clone()));
            for member in game.players.iter().flatten() {
                member.send(&ServerMessage::GameState(Self::build_game_state(
                    game, &member.id,
                )));
            }
            return;
        }

        if !game.add_player(Arc::clone(&player)) {
            Self::send_error(client, GameError::GameFull);
            return;
        }

        client.set_game_code(Some(code.clone()));
        info!(code = %code, player = %player.id, "player joined, game starting");

        let start = ServerMessage::GameStart(Self::build_game_start(game));
        Self::broadcast_to_game(game, &start);
    }

    pub(crate) async fn handle_play(&self, client: &Arc<Client>, data: PlayData) {
        let mut state = self.state.write().await;

        let Some(code) = state.resolve_game_code(client) else {
            Self::send_error(client, GameError::GameNotFound);
            return;
        };
        let Some(game) = state.games_by_code.get_mut(&code) else {
            Self::send_error(client, GameError::GameNotFound);
            return;
        };

        let Some(player_idx) = client.player_id().and_then(|id| game.player_index(&id)) else {
            Self::send_error(client, GameError::PlayerNotInGame);
            return;
        };

        // Negative columns reach the validator as out-of-range.
        let col = usize::try_from(data.column).unwrap_or(usize::MAX);
        if let Err(err) = game.play(player_idx, col) {
            Self::send_error(client, err);
            return;
        }

        let Some(last) = game.last_move else {
            return;
        };

        let moved = ServerMessage::Move(MoveData {
            player_idx,
            column: last.col,
            row: last.row,
            board: game.board.to_array(),
            next_turn: game.current_turn,
            time_remaining: game.time_remaining_ms(),
        });
        Self::broadcast_to_game(game, &moved);

        if game.status == GameStatus::Finished {
            info!(code = %game.code, result = ?game.result, "game finished");
            let over = ServerMessage::GameOver(GameOverData {
                result: game.result.as_u8(),
                board: game.board.to_array(),
            });
            Self::broadcast_to_game(game, &over);
        }
    }

    pub(crate) async fn handle_replay(&self, client: &Arc<Client>) {
        let mut state = self.state.write().await;

        let Some(code) = state.resolve_game_code(client) else {
            Self::send_error(client, GameError::GameNotFound);
            return;
        };
        let Some(game) = state.games_by_code.get_mut(&code) else {
            Self::send_error(client, GameError::GameNotFound);
            return;
        };

        let Some(player_idx) = client.player_id().and_then(|id| game.player_index(&id)) else {
            Self::send_error(client, GameError::PlayerNotInGame);
            return;
        };

        let request = ServerMessage::ReplayRequest(ReplayRequestData { player_idx });
        Self::broadcast_to_game(game, &request);

        if game.request_replay(player_idx) {
            info!(code = %game.code, "replay agreed, game restarting");
            let start = ServerMessage::GameStart(Self::build_game_start(game));
            Self::broadcast_to_game(game, &start);
        }
    }

    pub(crate) async fn handle_forfeit(&self, client: &Arc<Client>) {
        let mut state = self.state.write().await;

        let Some(code) = state.resolve_game_code(client) else {
            Self::send_error(client, GameError::GameNotFound);
            return;
        };
        let Some(game) = state.games_by_code.get_mut(&code) else {
            Self::send_error(client, GameError::GameNotFound);
            return;
        };

        let Some(player_idx) = client.player_id().and_then(|id| game.player_index(&id)) else {
            Self::send_error(client, GameError::PlayerNotInGame);
            return;
        };

        game.forfeit(player_idx);
        info!(code = %game.code, player_idx, "player forfeited");

        let over = ServerMessage::GameOver(GameOverData {
            result: game.result.as_u8(),
            board: game.board.to_array(),
        });
        Self::broadcast_to_game(game, &over);
    }

    pub(crate) async fn handle_leave_lobby(&self, client: &Arc<Client>) {
        let mut state = self.state.write().await;

        if let Some(code) = client.game_code() {
            let mut delete = false;
            if let Some(game) = state.games_by_code.get_mut(&code) {
                match game.status {
                    // Alone in a waiting room: tear it down.
                    GameStatus::Waiting => {
                        game.cleanup();
                        delete = true;
                    }
                    // Walking out of a live game concedes it.
                    GameStatus::Playing => {
                        if let Some(player_idx) =
                            client.player_id().and_then(|id| game.player_index(&id))
                        {
                            game.forfeit(player_idx);
                            let over = ServerMessage::GameOver(GameOverData {
                                result: game.result.as_u8(),
                                board: game.board.to_array(),
                            });
                            Self::broadcast_to_game(game, &over);
                        }
                    }
                    GameStatus::Finished => {}
                }
            }
            if delete {
                state.games_by_code.remove(&code);
                info!(code = %code, "waiting game abandoned");
            }
        }

        client.set_game_code(None);

        if let Some(player) = client.player_id().and_then(|id| state.lobby.get(&id)) {
            player.send(&ServerMessage::Welcome(WelcomeData {
                player_id: player.id.clone(),
                username: player.username(),
            }));
        }
    }

    /// A chess clock ran out. The game may have been decided or deleted
    /// while the expiry was in flight; both cases fall through silently.
    pub(crate) async fn handle_timeout(&self, event: TimeoutEvent) {
        let mut state = self.state.write().await;

        let Some(game) = state.games_by_code.get_mut(&event.code) else {
            return;
        };

        let was_playing = game.status == GameStatus::Playing;
        game.forfeit(event.loser_idx);

        if was_playing && game.status == GameStatus::Finished {
            info!(code = %game.code, loser_idx = event.loser_idx, "game lost on time");
            let over = ServerMessage::GameOver(GameOverData {
                result: game.result.as_u8(),
                board: game.board.to_array(),
            });
            Self::broadcast_to_game(game, &over);
        }
    }

    // ---------------------------------------------------------------------
    // Shared helpers
    // ---------------------------------------------------------------------

    /// The lobby player this client is logged in as.
    fn bound_player(state: &ServerState, client: &Client) -> Option<Arc<Player>> {
        client
            .player_id()
            .and_then(|id| state.lobby.get(&id).cloned())
    }

    pub(crate) fn send_error(client: &Client, err: GameError) {
        warn!(session_id = client.session_id, %err, "rejecting command");
        client.send(&ServerMessage::from(err));
    }

    pub(crate) fn broadcast_to_game(game: &Game, msg: &ServerMessage) {
        for player in game.players.iter().flatten() {
            player.send(msg);
        }
    }

    fn player_infos(game: &Game) -> [PlayerInfo; 2] {
        let mut infos: [PlayerInfo; 2] = Default::default();
        for (i, slot) in game.players.iter().enumerate() {
            if let Some(player) = slot {
                infos[i] = PlayerInfo {
                    id: player.id.to_string(),
                    username: player.username(),
                    connected: player.is_connected(),
                };
            }
        }
        infos
    }

    pub(crate) fn build_game_start(game: &Game) -> GameStartData {
        GameStartData {
            code: game.code.to_string(),
            current_turn: game.current_turn,
            players: Self::player_infos(game),
            time_remaining: game.time_remaining_ms(),
        }
    }

    /// A full snapshot as seen from one player's seat.
    pub(crate) fn build_game_state(game: &Game, viewer: &PlayerId) -> GameStateData {
        GameStateData {
            code: game.code.to_string(),
            status: game.status.as_u8(),
            result: game.result.as_u8(),
            board: game.board.to_array(),
            players: Self::player_infos(game),
            player_idx: game
                .player_index(viewer)
                .map(|idx| idx as i32)
                .unwrap_or(-1),
            current_turn: game.current_turn,
            move_count: game.move_count,
            time_remaining: game.time_remaining_ms(),
            replay_requests: game.replay_requests,
            last_move: game.last_move,
        }
    }
}
