use super::App;
use multisocket::{Connection, Error};
use saurus_events::EventEmitter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Public identity of a player as reported by its game server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub name: String,
    pub uuid: String,
}

struct PlayerInner {
    info: PlayerInfo,
    server: Connection,
    request_timeout: Duration,
    ended: EventEmitter<()>,
    has_ended: AtomicBool,
    authorized: EventEmitter<App>,
}

/// A player currently online on one game server.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("name", &self.inner.info.name)
            .field("uuid", &self.inner.info.uuid)
            .field("ended", &self.is_ended())
            .finish()
    }
}

impl Player {
    pub(crate) fn new(info: PlayerInfo, server: Connection, request_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                info,
                server,
                request_timeout,
                ended: EventEmitter::new(),
                has_ended: AtomicBool::new(false),
                authorized: EventEmitter::new(),
            }),
        }
    }

    pub fn info(&self) -> &PlayerInfo {
        &self.inner.info
    }

    pub fn name(&self) -> &str {
        &self.inner.info.name
    }

    pub fn uuid(&self) -> &str {
        &self.inner.info.uuid
    }

    /// Fires once when the player quits or its server goes away.
    pub fn ended(&self) -> &EventEmitter<()> {
        &self.inner.ended
    }

    pub fn is_ended(&self) -> bool {
        self.inner.has_ended.load(Ordering::Acquire)
    }

    /// Fires with every companion app authorized for this player.
    pub fn authorized(&self) -> &EventEmitter<App> {
        &self.inner.authorized
    }

    /// Ends the session. Only the first call notifies.
    pub(crate) fn end(&self) {
        if !self.inner.has_ended.swap(true, Ordering::AcqRel) {
            debug!("👋 Player {} ({}) ended", self.inner.info.name, self.inner.info.uuid);
            self.inner.ended.emit(&());
        }
    }

    /// Sends a chat message to the player in game.
    pub async fn msg(&self, message: &str) -> Result<(), Error> {
        self.request("/player/message", json!({ "message": message }))
            .await
            .map(|_| ())
    }

    /// Sends a request about this player to its game server. The player's
    /// identity is merged into `data` under `player`.
    async fn request(&self, path: &str, mut data: serde_json::Value) -> Result<serde_json::Value, Error> {
        if let Some(fields) = data.as_object_mut() {
            fields.insert("player".into(), json!(self.inner.info));
        }
        self.inner
            .server
            .request_timeout(path, data, self.inner.request_timeout)
            .await
    }
}
