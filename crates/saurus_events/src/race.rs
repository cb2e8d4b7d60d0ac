//! "First of N conditions, or a deadline" combinator.

use futures::future::{select_all, BoxFuture};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a [`race`] produced no winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RaceError {
    /// The deadline fired before any branch settled.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The shared cancellation token fired first.
    #[error("cancelled")]
    Cancelled,

    /// No branches were supplied.
    #[error("nothing to race")]
    Empty,
}

/// Resolves with the output of whichever branch settles first.
///
/// Competing against the branches are an optional `deadline` and the
/// `cancel` token, which is typically owned by the connection or session the
/// waiting task belongs to. Losing branches are dropped as soon as a winner
/// is known; branches built on [`EventEmitter::next`](crate::EventEmitter::next)
/// deregister themselves on drop, so a lost race leaves nothing behind.
///
/// Branches that need to tell the caller *which* condition won should map
/// their output into a common enum before boxing:
///
/// ```rust
/// use futures::FutureExt;
/// use saurus_events::{race, EventEmitter, RaceError};
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// enum Outcome { Pong, Closed }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pongs: EventEmitter<()> = EventEmitter::new();
/// let closes: EventEmitter<()> = EventEmitter::new();
/// let cancel = CancellationToken::new();
///
/// let pong = pongs.next();
/// pongs.emit(&());
///
/// let outcome = race(
///     vec![
///         pong.map(|_| Outcome::Pong).boxed(),
///         closes.next().map(|_| Outcome::Closed).boxed(),
///     ],
///     Some(Duration::from_secs(5)),
///     &cancel,
/// )
/// .await;
/// assert!(matches!(outcome, Ok(Outcome::Pong)));
/// # }
/// ```
pub async fn race<'a, T>(
    branches: Vec<BoxFuture<'a, T>>,
    deadline: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<T, RaceError> {
    if branches.is_empty() {
        return Err(RaceError::Empty);
    }

    let timer = async move {
        match deadline {
            Some(limit) => {
                tokio::time::sleep(limit).await;
                limit
            }
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RaceError::Cancelled),
        (value, _index, _losers) = select_all(branches) => Ok(value),
        limit = timer => Err(RaceError::TimedOut(limit)),
    }
}
