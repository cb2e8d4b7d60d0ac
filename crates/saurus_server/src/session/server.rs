use super::Players;
use crate::config::HandlerConfig;
use crate::events::{GameEvent, EVENTS_PATH};
use crate::heartbeat;
use crate::hello::ServerHello;
use multisocket::{Connection, Error, Received};
use saurus_events::EventEmitter;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

struct ServerInner {
    uuid: String,
    name: String,
    platform: String,
    password: String,
    conn: Connection,
    players: Players,
    events: EventEmitter<GameEvent>,
    config: HandlerConfig,
}

/// A registered game-server session.
///
/// Created from a server hello. Once [`start`](Self::start)ed it keeps the
/// connection alive with a heartbeat and streams game events from the
/// `/events` channel it opens on the game server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("uuid", &self.inner.uuid)
            .field("name", &self.inner.name)
            .field("platform", &self.inner.platform)
            .field("players", &self.inner.players.len())
            .finish()
    }
}

impl Server {
    pub fn new(conn: Connection, hello: ServerHello, config: &HandlerConfig) -> Self {
        let ServerHello {
            name,
            platform,
            password,
        } = hello;

        Self {
            inner: Arc::new(ServerInner {
                uuid: Uuid::new_v4().to_string(),
                name,
                platform,
                password,
                conn,
                players: Players::new(),
                events: EventEmitter::new(),
                config: config.clone(),
            }),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.inner.uuid
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn platform(&self) -> &str {
        &self.inner.platform
    }

    /// The password the server presented. Verification is left to the
    /// embedding application.
    pub fn password(&self) -> &str {
        &self.inner.password
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.conn
    }

    pub fn players(&self) -> &Players {
        &self.inner.players
    }

    /// Every event record received from the game server.
    pub fn events(&self) -> &EventEmitter<GameEvent> {
        &self.inner.events
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.inner.config.request_timeout
    }

    /// Starts the heartbeat and the event stream.
    pub fn start(&self) {
        let players = self.inner.players.clone();
        self.inner
            .conn
            .on_close()
            .once(move |_| players.end_all())
            .detach();

        heartbeat::spawn(
            self.inner.conn.clone(),
            self.inner.config.heartbeat_interval,
            self.inner.config.heartbeat_timeout,
        );

        let server = self.clone();
        tokio::spawn(async move {
            if let Err(e) = server.stream_events().await {
                debug!("Event stream of server {} ended: {}", server.inner.name, e);
            }
        });
    }

    /// Runs a console command on the game server.
    pub async fn execute(&self, command: &str) -> Result<bool, Error> {
        let value = self
            .inner
            .conn
            .request_timeout("/execute", json!(command), self.inner.config.request_timeout)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn close(&self, reason: &str) {
        self.inner.conn.close(Some(reason));
    }

    pub async fn closed(&self) -> Option<String> {
        self.inner.conn.closed().await
    }

    async fn stream_events(&self) -> Result<(), Error> {
        let channel = self.inner.conn.open(EVENTS_PATH, Value::Null)?;
        loop {
            match channel.read().await? {
                Received::Data(value) => {
                    let event = GameEvent::from_value(value);
                    self.apply(&event);
                    self.inner.events.emit(&event);
                }
                Received::Close(_) => {
                    warn!("⚠️ Server {} closed its event stream", self.inner.name);
                    return Ok(());
                }
            }
        }
    }

    /// Keeps the player registry in step with join/quit events.
    fn apply(&self, event: &GameEvent) {
        match event {
            GameEvent::PlayerJoin { player } => {
                self.inner
                    .players
                    .join(player.clone(), &self.inner.conn, self.inner.config.request_timeout);
            }
            GameEvent::PlayerQuit { player } => {
                if self.inner.players.quit(player).is_none() {
                    debug!("Quit for unknown player {} on {}", player.name, self.inner.name);
                }
            }
            _ => {}
        }
    }
}
