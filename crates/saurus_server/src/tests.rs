//! End-to-end pairing flows with in-memory game servers and apps.

use crate::handler::HELLO_CLOSED;
use crate::{
    AppWelcome, Handler, HandlerConfig, PlayerInfo, Relay, ServerWelcome, EVENTS_PATH, HELLO_PATH,
    SHUTTING_DOWN,
};
use futures_util::SinkExt;
use multisocket::{Channel, Connection, Error, Frame, ListenOptions, Opened};
use saurus_events::ShutdownState;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Connects a peer to `handler`. Returns the relay's end and the peer's end.
async fn connect(handler: &Handler) -> (Connection, Connection) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let (relay_side, start) =
        Connection::deferred(WebSocketStream::from_raw_socket(a, Role::Server, None).await);
    handler.accept(&relay_side);
    start.start();
    let peer = Connection::new(WebSocketStream::from_raw_socket(b, Role::Client, None).await);
    (relay_side, peer)
}

/// A registered game server as seen from the plugin side.
struct Game {
    relay_side: Connection,
    conn: Connection,
    events: Channel,
    messages: mpsc::UnboundedReceiver<String>,
    welcome: ServerWelcome,
}

impl Game {
    async fn register(handler: &Handler) -> Self {
        let (relay_side, conn) = connect(handler).await;
        let events = conn.wait_open(EVENTS_PATH);

        let (tx, messages) = mpsc::unbounded_channel();
        conn.route("/player/message", move |opened: Opened| {
            let text = opened.data["message"].as_str().unwrap_or_default().to_string();
            let _ = tx.send(text);
            async move { opened.channel.close(Value::Null) }
        })
        .detach();

        let welcome: ServerWelcome = conn
            .request_as(
                HELLO_PATH,
                json!({"type": "server", "name": "Lobby", "platform": "paper", "password": "hunter2"}),
            )
            .await
            .unwrap();
        let events = events.await.unwrap().channel;

        Self {
            relay_side,
            conn,
            events,
            messages,
            welcome,
        }
    }

    fn emit(&self, event: Value) {
        self.events.send(event).unwrap();
    }

    fn join(&self, player: &PlayerInfo) {
        self.emit(json!({"event": "player.join", "player": player}));
    }

    fn command(&self, player: &PlayerInfo, command: &str) {
        self.emit(json!({"event": "player.command", "player": player, "command": command}));
    }

    async fn next_message(&mut self) -> String {
        self.messages.recv().await.unwrap()
    }
}

fn steve() -> PlayerInfo {
    PlayerInfo {
        name: "Steve".into(),
        uuid: "069a79f4-44e9-4726-a5be-fca90e38aaf5".into(),
    }
}

/// Runs the full code exchange for `player`. Returns the app and its welcome.
async fn pair(handler: &Handler, game: &Game, player: &PlayerInfo) -> (Connection, AppWelcome) {
    let (_, app) = connect(handler).await;
    let hello = app.open(HELLO_PATH, json!({"type": "app"})).unwrap();
    let code: String = hello.read_as().await.unwrap();

    game.command(player, &format!("authorize {}", code.to_uppercase()));
    let welcome: AppWelcome = hello.final_as(None).await.unwrap();
    (app, welcome)
}

#[tokio::test]
async fn server_registers_and_is_forgotten_on_disconnect() {
    let handler = Handler::new(HandlerConfig::default());
    let registered = handler.servers().next();
    let game = Game::register(&handler).await;

    let server = registered.await.unwrap();
    assert_eq!(server.uuid(), game.welcome.uuid);
    assert_eq!(server.name(), "Lobby");
    assert_eq!(server.password(), "hunter2");
    assert_eq!(handler.server_count(), 1);

    game.conn.close(Some("Restarting"));
    assert_eq!(game.relay_side.closed().await.as_deref(), Some("Restarting"));
    assert_eq!(handler.server_count(), 0);
}

#[tokio::test]
async fn app_pairs_and_resumes_with_token() {
    let handler = Handler::new(HandlerConfig::default());
    let game = Game::register(&handler).await;
    game.join(&steve());

    let matched = handler.codes().next();
    let authorized = handler.authorizations().next();
    let (app, welcome) = pair(&handler, &game, &steve()).await;

    assert_eq!(welcome.player, steve());
    assert_eq!(matched.await.unwrap().player.info(), &steve());
    let authorization = authorized.await.unwrap();
    assert_eq!(authorization.token, welcome.token);
    assert_eq!(authorization.app.uuid(), welcome.uuid);
    assert_eq!(handler.pending_codes(), 0);
    assert_eq!(handler.token_count(), 1);

    let players: Vec<PlayerInfo> = app.request_as("/server/list", Value::Null).await.unwrap();
    assert_eq!(players, vec![steve()]);

    // A second app resumes without a code.
    let (_, resumed) = connect(&handler).await;
    let again: AppWelcome = resumed
        .request_as(HELLO_PATH, json!({"type": "app", "token": welcome.token}))
        .await
        .unwrap();
    assert_eq!(again.player, steve());
    assert_eq!(again.token, welcome.token);
    assert_ne!(again.uuid, welcome.uuid);
    assert_eq!(handler.pending_codes(), 0);
    assert_eq!(handler.token_count(), 1);

    // Presenting the same token again is just as good.
    let (_, third) = connect(&handler).await;
    let once_more: AppWelcome = third
        .request_as(HELLO_PATH, json!({"type": "app", "token": welcome.token}))
        .await
        .unwrap();
    assert_eq!(once_more.player, again.player);
    assert_eq!(once_more.token, welcome.token);
    assert_eq!(handler.pending_codes(), 0);
    assert_eq!(handler.token_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unused_code_expires_after_a_minute() {
    let handler = Handler::new(HandlerConfig::default());
    let mut game = Game::register(&handler).await;
    game.join(&steve());

    let (_, app) = connect(&handler).await;
    let hello = app.open(HELLO_PATH, json!({"type": "app"})).unwrap();
    let code: String = hello.read_as().await.unwrap();
    assert_eq!(code.len(), 6);
    assert_eq!(handler.pending_codes(), 1);

    let issued = Instant::now();
    let err = hello.final_response(None).await.unwrap_err();
    assert!(matches!(err, Error::ChannelClosed { reason: Some(ref r) } if r == "Timed out"), "{err}");
    assert!(issued.elapsed() >= Duration::from_secs(60));
    assert_eq!(app.closed().await.as_deref(), Some("Timed out"));
    assert_eq!(handler.pending_codes(), 0);

    game.command(&steve(), &format!("authorize {code}"));
    assert_eq!(game.next_message().await, "Invalid code");
}

#[tokio::test(start_paused = true)]
async fn silent_game_server_times_out() {
    let handler = Handler::new(HandlerConfig::default());
    let (a, b) = tokio::io::duplex(64 * 1024);
    let (relay_side, start) =
        Connection::deferred(WebSocketStream::from_raw_socket(a, Role::Server, None).await);
    handler.accept(&relay_side);
    start.start();

    let registered = handler.servers().next();
    // A raw peer that says hello and then never reads, so never pongs.
    let mut peer = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
    let hello = Frame::open(
        "h1",
        HELLO_PATH,
        json!({"type": "server", "name": "Frozen", "platform": "paper", "password": ""}),
    );
    peer.send(Message::Text(hello.encode().unwrap().into())).await.unwrap();

    registered.await.unwrap();
    let since = Instant::now();
    assert_eq!(relay_side.closed().await.as_deref(), Some("Timed out"));
    assert!(since.elapsed() <= Duration::from_secs(7));
    assert_eq!(handler.server_count(), 0);
}

#[tokio::test]
async fn unknown_token_is_rejected_and_disconnected() {
    let handler = Handler::new(HandlerConfig::default());
    let (_, app) = connect(&handler).await;

    let err = app
        .request(HELLO_PATH, json!({"type": "app", "token": "not-a-token"}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChannelClosed { reason: Some(ref r) } if r == "Invalid token"), "{err}");
    assert_eq!(app.closed().await.as_deref(), Some("Invalid token"));
}

#[tokio::test]
async fn invalid_hello_ends_the_hello_exchange() {
    let handler = Handler::new(HandlerConfig::default());
    let (_, peer) = connect(&handler).await;

    let err = peer.request(HELLO_PATH, json!({"type": "app", "token": 7})).await.unwrap_err();
    assert!(matches!(err, Error::ChannelClosed { reason: Some(ref r) } if r == "Invalid hello"), "{err}");

    // A valid hello afterwards finds nobody listening.
    let err = peer
        .request(
            HELLO_PATH,
            json!({"type": "server", "name": "Edge", "platform": "velocity", "password": ""}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChannelClosed { reason: Some(ref r) } if r.contains("No route")), "{err}");
    assert_eq!(handler.server_count(), 0);
}

#[tokio::test]
async fn proxy_registers_like_a_server() {
    let handler = Handler::new(HandlerConfig::default());
    let (_, peer) = connect(&handler).await;

    let welcome: ServerWelcome = peer
        .request_as(
            HELLO_PATH,
            json!({"type": "proxy", "name": "Edge", "platform": "velocity", "password": ""}),
        )
        .await
        .unwrap();
    assert_eq!(handler.server(&welcome.uuid).unwrap().platform(), "velocity");
}

#[tokio::test]
async fn second_hello_while_pairing_is_rejected_at_once() {
    let handler = Handler::new(HandlerConfig::default());
    let (_, app) = connect(&handler).await;
    let hello = app.open(HELLO_PATH, json!({"type": "app"})).unwrap();
    let _code: String = hello.read_as().await.unwrap();

    let err = app.request(HELLO_PATH, json!({"type": "app"})).await.unwrap_err();
    assert!(matches!(err, Error::ChannelClosed { reason: Some(ref r) } if r.contains("No route")), "{err}");
    assert!(!hello.is_closed());
    assert_eq!(handler.pending_codes(), 1);
}

#[tokio::test]
async fn closing_the_hello_withdraws_the_code() {
    let handler = Handler::new(HandlerConfig::default());
    let mut game = Game::register(&handler).await;
    game.join(&steve());

    let (_, app) = connect(&handler).await;
    let hello = app.open(HELLO_PATH, json!({"type": "app"})).unwrap();
    let code: String = hello.read_as().await.unwrap();
    assert_eq!(handler.pending_codes(), 1);

    hello.close(Value::Null).unwrap();
    assert_eq!(app.closed().await.as_deref(), Some(HELLO_CLOSED));
    assert_eq!(handler.pending_codes(), 0);

    game.command(&steve(), &format!("authorize {code}"));
    assert_eq!(game.next_message().await, "Invalid code");
}

#[tokio::test]
async fn app_dropping_mid_pairing_withdraws_the_code() {
    let handler = Handler::new(HandlerConfig::default());
    let (relay_side, app) = connect(&handler).await;
    let hello = app.open(HELLO_PATH, json!({"type": "app"})).unwrap();
    let _code: String = hello.read_as().await.unwrap();

    app.close(Some("Backgrounded"));
    assert_eq!(relay_side.closed().await.as_deref(), Some("Backgrounded"));
    tokio::time::timeout(Duration::from_secs(1), async {
        while handler.pending_codes() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("code still outstanding");
}

#[tokio::test]
async fn code_redeemed_after_its_app_left_is_reported_expired() {
    let handler = Handler::new(HandlerConfig::default());
    let mut game = Game::register(&handler).await;
    game.join(&steve());

    let (code, waiting) = handler.issue_code();
    drop(waiting);

    let matched = handler.codes().next();
    game.command(&steve(), &format!("authorize {code}"));
    assert_eq!(game.next_message().await, "This code has expired");
    assert_eq!(matched.await.unwrap().code, code);
    assert_eq!(handler.pending_codes(), 0);
    assert_eq!(handler.token_count(), 0);
}

#[tokio::test]
async fn malformed_authorize_gets_usage() {
    let handler = Handler::new(HandlerConfig::default());
    let mut game = Game::register(&handler).await;
    game.join(&steve());

    game.command(&steve(), "authorize");
    assert_eq!(game.next_message().await, "Usage: authorize <code>");
    game.command(&steve(), "/authorize abc def");
    assert_eq!(game.next_message().await, "Usage: authorize <code>");
    game.command(&steve(), "authorize abcdef");
    assert_eq!(game.next_message().await, "Invalid code");
}

#[tokio::test]
async fn quitting_player_revokes_token_and_closes_app() {
    let handler = Handler::new(HandlerConfig::default());
    let game = Game::register(&handler).await;
    game.join(&steve());
    let (app, welcome) = pair(&handler, &game, &steve()).await;
    assert_eq!(handler.token_count(), 1);

    game.emit(json!({"event": "player.quit", "player": steve()}));
    assert_eq!(app.closed().await.as_deref(), Some("Quit"));
    assert_eq!(handler.token_count(), 0);

    let (_, late) = connect(&handler).await;
    let err = late
        .request(HELLO_PATH, json!({"type": "app", "token": welcome.token}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChannelClosed { reason: Some(ref r) } if r == "Invalid token"));
}

#[tokio::test]
async fn command_from_unannounced_player_still_pairs() {
    let handler = Handler::new(HandlerConfig::default());
    let game = Game::register(&handler).await;

    let (_, welcome) = pair(&handler, &game, &steve()).await;
    assert_eq!(welcome.player, steve());
    let server = handler.server(&game.welcome.uuid).unwrap();
    assert_eq!(server.players().list(), vec![steve()]);
}

#[tokio::test]
async fn relay_closes_connections_on_shutdown() {
    let options = ListenOptions {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        ..ListenOptions::default()
    };
    let relay = Relay::bind(options, HandlerConfig::default()).await.unwrap();
    let url = format!("ws://{}", relay.local_addr().unwrap());

    let shutdown = ShutdownState::new();
    let running = tokio::spawn({
        let relay = relay.clone();
        let shutdown = shutdown.clone();
        async move { relay.run(shutdown).await }
    });

    let (socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let game = Connection::new(socket);
    let _: ServerWelcome = game
        .request_as(
            HELLO_PATH,
            json!({"type": "server", "name": "Lobby", "platform": "paper", "password": ""}),
        )
        .await
        .unwrap();
    assert_eq!(relay.handler().server_count(), 1);

    shutdown.initiate_shutdown();
    running.await.unwrap().unwrap();
    assert!(shutdown.is_shutdown_complete());
    assert_eq!(game.closed().await.as_deref(), Some(SHUTTING_DOWN));
}
