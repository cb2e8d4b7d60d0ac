//! # Multisocket
//!
//! Many independent, ordered JSON channels over one WebSocket.
//!
//! A [`Connection`] wraps any WebSocket stream and multiplexes [`Channel`]s
//! over it. Channels are opened locally with [`Connection::open`] /
//! [`Connection::request`] or remotely, in which case the open frame is
//! dispatched by path to whatever consumer registered with
//! [`Connection::route`] or [`Connection::wait_open`]. The [`Listener`]
//! accepts plain or TLS WebSocket connections and publishes each one.
//!
//! ## Example
//!
//! ```rust,no_run
//! use multisocket::{Connection, Listener, ListenOptions, Opened};
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), multisocket::Error> {
//! let listener = Listener::bind(ListenOptions::default()).await?;
//! listener
//!     .accepted()
//!     .on(|conn: &Connection| {
//!         conn.route("/echo", |opened: Opened| async move {
//!             opened.channel.close(json!({"echo": opened.data}))
//!         })
//!         .detach();
//!     })
//!     .detach();
//! listener.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod connection;
pub mod error;
pub mod frame;
pub mod listener;
pub mod tls;


pub use channel::{Channel, ChannelState, Received};
pub use connection::{Connection, Opened, Start, DEFAULT_REQUEST_TIMEOUT};
pub use error::{CloseReason, Error, TIMED_OUT};
pub use frame::{ChannelId, Frame, FrameKind};
pub use listener::{ListenOptions, Listener};
