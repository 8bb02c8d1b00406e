//! Client Connection
//!
//! The outbound half of a connection: a bounded message queue drained by
//! a dedicated write pump. Enqueueing never blocks, so handlers can send
//! while holding the server lock; a client that cannot keep up overflows
//! the queue and is closed with a policy code instead of stalling the
//! router.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Notify;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, warn};

use crate::game::player::PlayerId;
use crate::game::state::GameCode;
use crate::network::protocol::ServerMessage;

/// Outbound queue capacity per connection.
pub const SEND_BUFFER_SIZE: usize = 256;
/// Per-write timeout.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Read inactivity budget; the peer must answer pings within this window.
pub const PONG_WAIT: Duration = Duration::from_secs(60);
/// Liveness ping interval (0.9 × the pong budget).
pub const PING_PERIOD: Duration = Duration::from_secs(54);

// Session ids tag each connection so a stale disconnect cannot detach a
// sender that a newer connection already replaced.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// One WebSocket connection: identity bindings plus the sending side of
/// the outbound queue.
pub struct Client {
    /// Monotonic connection id.
    pub session_id: u64,
    tx: Mutex<Option<mpsc::Sender<ServerMessage>>>,
    overflow: Notify,
    player_id: Mutex<Option<PlayerId>>,
    game_code: Mutex<Option<GameCode>>,
}

impl Client {
    /// Create a client and the receiving half of its outbound queue,
    /// which the write pump drains.
    pub fn new() -> (Arc<Client>, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(SEND_BUFFER_SIZE);
        let client = Arc::new(Client {
            session_id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            tx: Mutex::new(Some(tx)),
            overflow: Notify::new(),
            player_id: Mutex::new(None),
            game_code: Mutex::new(None),
        });
        (client, rx)
    }

    /// Enqueue a message without blocking.
    ///
    /// A full queue drops the message and schedules a policy-violation
    /// close; a closed queue drops it silently.
    pub fn send(&self, msg: &ServerMessage) {
        let guard = self.tx.lock().expect("sender lock poisoned");
        let Some(tx) = guard.as_ref() else {
            return;
        };

        match tx.try_send(msg.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(session_id = self.session_id, "outbound queue full, closing connection");
                self.overflow.notify_one();
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Close the outbound queue, terminating the write pump once drained.
    /// Subsequent sends are dropped.
    pub fn close(&self) {
        self.tx.lock().expect("sender lock poisoned").take();
    }

    /// The player this connection is logged in as.
    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id.lock().expect("player id lock poisoned").clone()
    }

    /// Bind the connection to a player.
    pub fn set_player_id(&self, id: PlayerId) {
        *self.player_id.lock().expect("player id lock poisoned") = Some(id);
    }

    /// Cached code of the game this connection is playing in.
    pub fn game_code(&self) -> Option<GameCode> {
        self.game_code.lock().expect("game code lock poisoned").clone()
    }

    /// Update (or clear) the cached game code.
    pub fn set_game_code(&self, code: Option<GameCode>) {
        *self.game_code.lock().expect("game code lock poisoned") = code;
    }
}

/// Pump messages from the outbound queue to the WebSocket.
///
/// Runs as its own task per connection. Terminates, closing the
/// transport, on the first write error or timeout, when the queue is
/// closed, or when [`Client::send`] signals an overflow.
pub async fn write_pump(
    client: Arc<Client>,
    mut rx: mpsc::Receiver<ServerMessage>,
    mut sink: SplitSink<WebSocketStream<TcpStream>, WsMessage>,
) {
    let mut ping = interval(PING_PERIOD);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Intervals fire immediately; the first ping is due one period in.
    ping.tick().await;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else {
                    // Queue closed: orderly shutdown.
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                };

                let text = match msg.to_json() {
                    Ok(text) => text,
                    Err(err) => {
                        error!(session_id = client.session_id, %err, "failed to serialize message");
                        continue;
                    }
                };

                match timeout(WRITE_WAIT, sink.send(WsMessage::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        debug!(session_id = client.session_id, %err, "write failed");
                        break;
                    }
                    Err(_) => {
                        warn!(session_id = client.session_id, "write timed out");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                match timeout(WRITE_WAIT, sink.send(WsMessage::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => {
                        debug!(session_id = client.session_id, "ping failed");
                        break;
                    }
                }
            }
            _ = client.overflow.notified() => {
                let _ = sink.send(WsMessage::Close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: "connection too slow".into(),
                }))).await;
                break;
            }
        }
    }
}
