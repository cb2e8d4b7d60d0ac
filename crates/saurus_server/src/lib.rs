//! # Saurus Server
//!
//! Relay between game servers and companion apps, built on [`multisocket`].
//!
//! Game servers connect and register with a `/hello` channel; the relay then
//! keeps them alive with a heartbeat and follows their player list through
//! the `/events` stream. Companion apps connect the same way and pair with a
//! player through a short code the player confirms in game, or resume an
//! earlier pairing with a session token.
//!
//! ## Components
//!
//! * [`Handler`] - pairing codes, session tokens and the `authorize` command
//! * [`Server`], [`Player`], [`App`] - the sessions the handler creates
//! * [`heartbeat`] - ping/pong liveness for game servers
//! * [`Relay`] - a bound listener with a handler attached
//!
//! ## Example
//!
//! ```rust,no_run
//! use multisocket::ListenOptions;
//! use saurus_events::ShutdownState;
//! use saurus_server::{HandlerConfig, Relay};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), saurus_server::ServerError> {
//! let relay = Relay::bind(ListenOptions::default(), HandlerConfig::default()).await?;
//! relay
//!     .handler()
//!     .authorizations()
//!     .on(|auth| println!("{} paired an app", auth.player.name()))
//!     .detach();
//! relay.run(ShutdownState::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod heartbeat;
pub mod hello;
pub mod relay;
pub mod session;

#[cfg(test)]
mod tests;

pub use config::HandlerConfig;
pub use error::ServerError;
pub use events::{GameEvent, EVENTS_PATH};
pub use handler::{Authorization, CodeRequest, Grant, Handler};
pub use hello::{AppHello, AppWelcome, Hello, ServerHello, ServerWelcome, HELLO_PATH};
pub use relay::{Relay, SHUTTING_DOWN};
pub use session::{App, Player, PlayerInfo, Players, Server};
