//! # Saurus Events
//!
//! The notification primitive every suspension point of the relay is built on.
//!
//! ## Pieces
//!
//! - [`EventEmitter`] - typed publish/subscribe with persistent, one-shot and
//!   "await next occurrence" listeners, delivered in registration order
//! - [`Subscription`] / [`Subscriptions`] - explicit disposers; a subscription
//!   owned by one entity can be tied to another entity's end with
//!   [`Subscription::dispose_on`]
//! - [`race`] - first of N awaited conditions against a deadline and a shared
//!   [`CancellationToken`](tokio_util::sync::CancellationToken)
//! - [`ShutdownState`] - process-wide graceful shutdown flags
//!
//! ## Example
//!
//! ```rust
//! use saurus_events::EventEmitter;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let quits: EventEmitter<String> = EventEmitter::new();
//! let next_quit = quits.next();
//! quits.emit(&"Steve".to_string());
//! assert_eq!(next_quit.await.as_deref(), Ok("Steve"));
//! # }
//! ```

pub mod emitter;
pub mod race;
pub mod shutdown;
pub mod subscription;

pub use emitter::{EmitterDropped, EventEmitter, Next};
pub use race::{race, RaceError};
pub use shutdown::ShutdownState;
pub use subscription::{Subscription, Subscriptions};

/// Re-exported so downstream crates share one cancellation token type.
pub use tokio_util::sync::CancellationToken;
