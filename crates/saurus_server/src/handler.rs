//! Pairing and authorization of freshly accepted connections.
//!
//! Every accepted connection must open `/hello` first. Game servers become a
//! [`Server`] session right away. Companion apps either resume with a session
//! token or get a six-character pairing code, which a player confirms in game
//! by running `authorize <code>`.
//!
//! # App pairing on the wire
//!
//! ```text
//! app  -> {uuid: h, type: "open", path: "/hello", data: {type: "app"}}
//! app  <- {uuid: h, data: "a1b2c3"}
//!         ... player runs `authorize a1b2c3` on a registered server ...
//! app  <- {uuid: h, type: "close", data: {uuid, player: {name, uuid}, token}}
//! ```
//!
//! If nobody authorizes the code in time the app instead receives
//! `{uuid: h, type: "error", reason: "Timed out"}` and the connection is
//! closed. An app that closes its hello channel while waiting is disconnected
//! with `"Hello closed"` and its code withdrawn. A resume hello
//! (`{type: "app", token}`) is answered with the welcome close directly, or
//! `"Invalid token"` followed by a connection close.

use crate::config::HandlerConfig;
use crate::events::GameEvent;
use crate::hello::{AppHello, AppWelcome, Hello, ServerHello, ServerWelcome, HELLO_PATH};
use crate::session::{App, Player, Server};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use multisocket::{Channel, CloseReason, Connection, Error, Listener, Opened, TIMED_OUT};
use saurus_events::{race, EventEmitter, RaceError, Subscription};
use serde_json::json;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Length of a pairing code.
pub const CODE_LENGTH: usize = 6;

pub const INVALID_HELLO: &str = "Invalid hello";
pub const HELLO_CLOSED: &str = "Hello closed";
pub const INVALID_TOKEN: &str = "Invalid token";
pub const INVALID_CODE: &str = "Invalid code";
pub const EXPIRED_CODE: &str = "This code has expired";
pub const AUTHORIZE_USAGE: &str = "Usage: authorize <code>";

/// A player paired with the server it is playing on.
#[derive(Debug, Clone)]
pub struct Grant {
    pub player: Player,
    pub server: Server,
}

/// Published when a player redeems an outstanding code.
#[derive(Debug, Clone)]
pub struct CodeRequest {
    pub code: String,
    pub player: Player,
    pub server: Server,
}

/// Published when a companion app is authorized for a player.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub player: Player,
    pub app: App,
    pub token: String,
}

struct HandlerInner {
    config: HandlerConfig,
    /// Outstanding pairing codes. Whoever removes an entry owns its outcome.
    codes: DashMap<String, oneshot::Sender<Grant>>,
    tokens: DashMap<String, Grant>,
    servers: DashMap<String, Server>,
    server_events: EventEmitter<Server>,
    code_events: EventEmitter<CodeRequest>,
    authorization_events: EventEmitter<Authorization>,
}

/// Turns accepted connections into game-server or companion-app sessions.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerInner>,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("servers", &self.inner.servers.len())
            .field("codes", &self.inner.codes.len())
            .field("tokens", &self.inner.tokens.len())
            .finish()
    }
}

impl Handler {
    pub fn new(config: HandlerConfig) -> Self {
        Self {
            inner: Arc::new(HandlerInner {
                config,
                codes: DashMap::new(),
                tokens: DashMap::new(),
                servers: DashMap::new(),
                server_events: EventEmitter::new(),
                code_events: EventEmitter::new(),
                authorization_events: EventEmitter::new(),
            }),
        }
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.inner.config
    }

    /// Fires with every registered game server.
    pub fn servers(&self) -> &EventEmitter<Server> {
        &self.inner.server_events
    }

    /// Fires with every redeemed pairing code.
    pub fn codes(&self) -> &EventEmitter<CodeRequest> {
        &self.inner.code_events
    }

    /// Fires with every authorized companion app.
    pub fn authorizations(&self) -> &EventEmitter<Authorization> {
        &self.inner.authorization_events
    }

    pub fn server(&self, uuid: &str) -> Option<Server> {
        self.inner.servers.get(uuid).map(|s| s.clone())
    }

    pub fn server_count(&self) -> usize {
        self.inner.servers.len()
    }

    pub fn pending_codes(&self) -> usize {
        self.inner.codes.len()
    }

    pub fn token_count(&self) -> usize {
        self.inner.tokens.len()
    }

    /// Handles every connection the listener accepts from now on.
    pub fn attach(&self, listener: &Listener) -> Subscription {
        let handler = self.clone();
        listener.accepted().on(move |conn: &Connection| handler.accept(conn))
    }

    /// Starts the hello exchange on `conn`.
    ///
    /// Must be called before the connection starts reading (see
    /// [`Connection::deferred`]) so the hello cannot slip past.
    pub fn accept(&self, conn: &Connection) {
        let hello = conn.wait_open(HELLO_PATH).boxed();
        tokio::spawn(self.clone().serve(conn.clone(), hello));
    }

    async fn serve(self, conn: Connection, hello: BoxFuture<'static, Result<Opened, Error>>) {
        match hello.await {
            Ok(opened) => self.setup(opened).await,
            Err(e) => debug!("Connection {} left before saying hello: {}", conn.id(), e),
        }
    }

    /// Handles the one hello a connection gets.
    ///
    /// Nothing consumes `/hello` afterwards, so any later hello on the same
    /// connection is thrown with [`Error::NoRoute`] as soon as it arrives,
    /// whether this hello failed or is still pairing.
    pub async fn setup(&self, opened: Opened) {
        let hello: Hello = match opened.data_as() {
            Ok(hello) => hello,
            Err(e) => {
                warn!("❌ Invalid hello on connection {}: {}", opened.channel.connection().id(), e);
                let _ = opened.channel.throw(Some(INVALID_HELLO.into()));
                return;
            }
        };

        let result = match hello {
            Hello::Server(hello) => self.handle_server(&opened.channel, hello),
            Hello::App(hello) => self.handle_app(&opened.channel, hello).await,
        };
        if let Err(e) = result {
            opened.channel.catch(e);
        }
    }

    fn handle_server(&self, channel: &Channel, hello: ServerHello) -> Result<(), Error> {
        let conn = channel.connection().clone();
        let server = Server::new(conn.clone(), hello, &self.inner.config);

        self.inner.servers.insert(server.uuid().to_string(), server.clone());
        let handler = Arc::downgrade(&self.inner);
        let uuid = server.uuid().to_string();
        conn.on_close()
            .once(move |reason| {
                if let Some(handler) = handler.upgrade() {
                    handler.servers.remove(&uuid);
                }
                info!(
                    "🔌 Server {} disconnected: {}",
                    uuid,
                    reason.as_deref().unwrap_or("no reason given")
                );
            })
            .detach();

        let handler = Arc::downgrade(&self.inner);
        let source = server.clone();
        server
            .events()
            .on(move |event: &GameEvent| {
                if let Some(inner) = handler.upgrade() {
                    Handler { inner }.on_event(&source, event);
                }
            })
            .dispose_on(conn.on_close())
            .detach();
        if conn.is_closed() {
            self.inner.servers.remove(server.uuid());
            return Ok(());
        }

        let welcome = ServerWelcome {
            uuid: server.uuid().to_string(),
        };
        channel.close(serde_json::to_value(&welcome)?)?;
        server.start();

        info!(
            "🖥️ Server {} ({}) registered as {}",
            server.name(),
            server.platform(),
            server.uuid()
        );
        self.inner.server_events.emit(&server);
        Ok(())
    }

    async fn handle_app(&self, channel: &Channel, hello: AppHello) -> Result<(), Error> {
        let app = App::new(channel.connection().clone());

        let (grant, token) = match hello.token {
            Some(token) => {
                let grant = self.inner.tokens.get(&token).map(|g| g.clone());
                let Some(grant) = grant else {
                    warn!("🔑 App {} presented an unknown token", app.uuid());
                    let _ = channel.throw(Some(INVALID_TOKEN.into()));
                    app.close(INVALID_TOKEN);
                    return Ok(());
                };
                debug!("🔑 App {} resumed as {}", app.uuid(), grant.player.name());
                (grant, token)
            }
            None => match self.pair(channel, &app).await? {
                Some(grant) => {
                    let token = self.mint_token(&grant);
                    (grant, token)
                }
                None => return Ok(()),
            },
        };

        self.authorize(channel, grant, app, token)
    }

    /// Issues a code and waits for it to be redeemed, for the hello channel
    /// to close, or for the code to expire.
    async fn pair(&self, channel: &Channel, app: &App) -> Result<Option<Grant>, Error> {
        enum Waited {
            Matched(Result<Grant, oneshot::error::RecvError>),
            HelloClosed(CloseReason),
        }

        let (code, mut matched) = self.issue_code();
        if let Err(e) = channel.send(json!(code)) {
            self.inner.codes.remove(&code);
            return Err(e);
        }
        info!("🔢 Issued pairing code {} to app {}", code, app.uuid());

        let cancel = app.connection().cancellation();
        let outcome = race(
            vec![
                (&mut matched).map(Waited::Matched).boxed(),
                channel.closed().map(Waited::HelloClosed).boxed(),
            ],
            Some(self.inner.config.code_timeout),
            &cancel,
        )
        .await;

        let grant = match outcome {
            Ok(Waited::Matched(result)) => result.ok(),
            lost => {
                if self.inner.codes.remove(&code).is_some() {
                    match lost {
                        Err(RaceError::TimedOut(limit)) => {
                            info!("⏱️ Pairing code {} expired after {:?}", code, limit);
                            let _ = channel.throw(Some(TIMED_OUT.into()));
                            app.close(TIMED_OUT);
                        }
                        _ => {
                            debug!("App {} left before code {} was used", app.uuid(), code);
                            app.close(HELLO_CLOSED);
                        }
                    }
                    None
                } else {
                    // The player redeemed the code as we gave up; the match wins.
                    matched.await.ok()
                }
            }
        };

        match grant {
            Some(grant) if channel.is_closed() => {
                debug!("App {} left while code {} was being redeemed", app.uuid(), code);
                app.close(HELLO_CLOSED);
                let player = grant.player.clone();
                tokio::spawn(async move {
                    let _ = player.msg(EXPIRED_CODE).await;
                });
                Ok(None)
            }
            grant => Ok(grant),
        }
    }

    /// Registers a fresh code that is not currently outstanding.
    pub(crate) fn issue_code(&self) -> (String, oneshot::Receiver<Grant>) {
        let (sender, receiver) = oneshot::channel();
        loop {
            let code = generate_code();
            if let Entry::Vacant(slot) = self.inner.codes.entry(code.clone()) {
                slot.insert(sender);
                return (code, receiver);
            }
        }
    }

    fn mint_token(&self, grant: &Grant) -> String {
        let token = Uuid::new_v4().to_string();
        self.inner.tokens.insert(token.clone(), grant.clone());

        let handler = Arc::downgrade(&self.inner);
        let minted = token.clone();
        grant
            .player
            .ended()
            .once(move |_| forget_token(&handler, &minted))
            .detach();
        if grant.player.is_ended() {
            self.inner.tokens.remove(&token);
        }
        token
    }

    /// Wires an authorized app to its player, then welcomes it on `hello`.
    ///
    /// The app may list the players of the player's server, and it is closed
    /// with `"Quit"` when the player's session ends. Both hooks go away with
    /// whichever side ends first.
    fn authorize(&self, hello: &Channel, grant: Grant, app: App, token: String) -> Result<(), Error> {
        let Grant { player, server } = grant;
        let app_closed = app.connection().on_close();

        let players = server.players().clone();
        app.connection()
            .route("/server/list", move |opened: Opened| {
                let list = players.list();
                async move { opened.channel.close(json!(list)) }
            })
            .dispose_on(player.ended())
            .dispose_on(app_closed)
            .detach();

        let quitting = app.clone();
        player
            .ended()
            .once(move |_| quitting.close("Quit"))
            .dispose_on(app_closed)
            .detach();
        if player.is_ended() {
            app.close("Quit");
            return Ok(());
        }

        let welcome = AppWelcome {
            uuid: app.uuid().to_string(),
            player: player.info().clone(),
            token: token.clone(),
        };
        hello.close(serde_json::to_value(&welcome)?)?;

        info!("✅ App {} authorized for player {}", app.uuid(), player.name());
        player.authorized().emit(&app);
        self.inner.authorization_events.emit(&Authorization { player, app, token });
        Ok(())
    }

    fn on_event(&self, server: &Server, event: &GameEvent) {
        let GameEvent::PlayerCommand { player, command } = event else {
            return;
        };
        let Some(reply) = parse_authorize(command) else {
            return;
        };

        let player = server.players().get_or_join(player, server.connection(), server.request_timeout());
        let reply = match reply {
            Ok(code) => self.redeem(&code, server, &player),
            Err(usage) => Some(usage),
        };

        if let Some(message) = reply {
            tokio::spawn(async move {
                if let Err(e) = player.msg(message).await {
                    debug!("Could not message player {}: {}", player.name(), e);
                }
            });
        }
    }

    /// Hands `player` to the app waiting on `code`. Returns the in-game reply
    /// when there is nothing to hand over.
    fn redeem(&self, code: &str, server: &Server, player: &Player) -> Option<&'static str> {
        let Some((code, waiting)) = self.inner.codes.remove(code) else {
            debug!("Player {} tried unknown code {}", player.name(), code);
            return Some(INVALID_CODE);
        };

        self.inner.code_events.emit(&CodeRequest {
            code: code.clone(),
            player: player.clone(),
            server: server.clone(),
        });

        let grant = Grant {
            player: player.clone(),
            server: server.clone(),
        };
        if waiting.send(grant).is_err() {
            debug!("Code {} was redeemed after its app left", code);
            return Some(EXPIRED_CODE);
        }
        None
    }
}

fn forget_token(handler: &Weak<HandlerInner>, token: &str) {
    if let Some(handler) = handler.upgrade() {
        handler.tokens.remove(token);
        debug!("🔑 Token revoked with its player session");
    }
}

/// Six lowercase hex characters.
fn generate_code() -> String {
    let mut code = Uuid::new_v4().simple().to_string();
    code.truncate(CODE_LENGTH);
    code
}

/// `None` for commands other than `authorize`, otherwise the code or the
/// usage message.
fn parse_authorize(command: &str) -> Option<Result<String, &'static str>> {
    let mut words = command.trim().trim_start_matches('/').split_whitespace();
    if words.next() != Some("authorize") {
        return None;
    }
    match (words.next(), words.next()) {
        (Some(code), None) => Some(Ok(code.to_ascii_lowercase())),
        _ => Some(Err(AUTHORIZE_USAGE)),
    }
}
