//! Player Identity
//!
//! A player is an identity issued at first login plus, while connected,
//! an attached outbound channel. The identity survives disconnects; the
//! channel is replaced on every reconnect.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::game::error::GameError;
use crate::network::client::Client;
use crate::network::protocol::ServerMessage;

/// Token length in random bytes (32 uppercase hex chars on the wire).
pub const TOKEN_LENGTH: usize = 16;

/// Opaque session token uniquely identifying a player.
///
/// Issued on first login and presented again by the client to reclaim
/// its identity after a reconnect.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(String);

impl PlayerId {
    /// Generate a fresh token: 16 random bytes, uppercase hex.
    pub fn generate() -> Self {
        let bytes = uuid::Uuid::new_v4().into_bytes();
        debug_assert_eq!(bytes.len(), TOKEN_LENGTH);
        Self(hex::encode_upper(bytes))
    }

    /// View the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A connected (or reconnectable) player.
pub struct Player {
    /// Stable identity token.
    pub id: PlayerId,
    username: RwLock<String>,
    sender: Mutex<Option<Arc<Client>>>,
}

impl Player {
    /// Create a new player with a unique id.
    ///
    /// The username is trimmed; an empty result is rejected.
    pub fn new(username: &str) -> Result<Arc<Player>, GameError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(GameError::InvalidUsername);
        }

        Ok(Arc::new(Player {
            id: PlayerId::generate(),
            username: RwLock::new(username.to_string()),
            sender: Mutex::new(None),
        }))
    }

    /// Current username.
    pub fn username(&self) -> String {
        self.username.read().expect("username lock poisoned").clone()
    }

    /// Replace the username (a reconnect may carry a new one).
    pub fn set_username(&self, username: &str) {
        let username = username.trim();
        if !username.is_empty() {
            *self.username.write().expect("username lock poisoned") = username.to_string();
        }
    }

    /// Attach or detach the outbound channel.
    pub fn set_sender(&self, sender: Option<Arc<Client>>) {
        *self.sender.lock().expect("sender lock poisoned") = sender;
    }

    /// The currently attached client, if any.
    pub fn sender(&self) -> Option<Arc<Client>> {
        self.sender.lock().expect("sender lock poisoned").clone()
    }

    /// A player is connected exactly when a sender is attached.
    pub fn is_connected(&self) -> bool {
        self.sender.lock().expect("sender lock poisoned").is_some()
    }

    /// Enqueue a message towards this player, if connected.
    pub fn send(&self, msg: &ServerMessage) {
        if let Some(sender) = self.sender() {
            sender.send(msg);
        }
    }
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("username", &self.username())
            .field("connected", &self.is_connected())
            .finish()
    }
}
