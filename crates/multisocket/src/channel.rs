//! A single logical stream multiplexed over a [`Connection`].

use crate::connection::Connection;
use crate::error::{CloseReason, Error};
use crate::frame::{ChannelId, Frame, FrameKind};
use saurus_events::{EventEmitter, Subscription};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Lifecycle of a channel. Only `Open` accepts further traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    ClosedNormal,
    ClosedError,
}

/// What [`Channel::read`] hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// A plain data frame; the channel stays open.
    Data(Value),
    /// The channel was closed normally with this payload.
    Close(Value),
}

enum Inbound {
    Data(Value),
    Closed(CloseReason),
}

struct ChannelInner {
    id: ChannelId,
    conn: Connection,
    /// `None` while open. Inbox pushes happen under this lock so the queue
    /// order always agrees with the state.
    state: Mutex<Option<CloseReason>>,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    on_close: EventEmitter<CloseReason>,
}

/// One ordered, bidirectional logical stream.
///
/// Channels are created by [`Connection::open`] locally or by an inbound open
/// frame remotely. Inbound frames are queued per channel, so a consumer that
/// reads slowly never holds up delivery to its siblings. The first terminal
/// transition (close, throw, remote close/error, or loss of the connection)
/// wins; every later one is a no-op.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(id: ChannelId, conn: Connection) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ChannelInner {
                id,
                conn,
                state: Mutex::new(None),
                inbox_tx,
                inbox_rx: tokio::sync::Mutex::new(inbox_rx),
                on_close: EventEmitter::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The connection this channel is multiplexed over.
    pub fn connection(&self) -> &Connection {
        &self.inner.conn
    }

    pub fn state(&self) -> ChannelState {
        match &*self.lock_state() {
            None => ChannelState::Open,
            Some(CloseReason::ChannelClosedNormally(_)) => ChannelState::ClosedNormal,
            Some(_) => ChannelState::ClosedError,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() != ChannelState::Open
    }

    /// How the channel ended, if it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.lock_state().clone()
    }

    /// Observer registry notified once on the terminal transition.
    pub fn on_close(&self) -> &EventEmitter<CloseReason> {
        &self.inner.on_close
    }

    /// Runs `handler` once when the channel ends.
    pub fn when_closed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CloseReason) + Send + Sync + 'static,
    {
        self.inner.on_close.once(handler)
    }

    /// Resolves with the close reason once the channel is terminal.
    pub async fn closed(&self) -> CloseReason {
        let next = self.inner.on_close.next();
        if let Some(reason) = self.close_reason() {
            return reason;
        }
        next.await
            .unwrap_or(CloseReason::ConnectionClosed(None))
    }

    /// Sends a data frame. No response is expected.
    pub fn send(&self, data: Value) -> Result<(), Error> {
        if let Some(reason) = self.close_reason() {
            return Err(closed_error(reason));
        }
        self.inner.conn.send_frame(Frame::data(self.inner.id.clone(), data))
    }

    /// Closes the channel normally with a final payload.
    ///
    /// Idempotent: calls after the first terminal transition do nothing.
    pub fn close(&self, data: Value) -> Result<(), Error> {
        if !self.settle(CloseReason::ChannelClosedNormally(data.clone())) {
            return Ok(());
        }
        self.inner.conn.send_frame(Frame::close(self.inner.id.clone(), data))
    }

    /// Closes the channel with an error the peer observes as a close error.
    pub fn throw(&self, reason: Option<String>) -> Result<(), Error> {
        if !self.settle(CloseReason::ChannelClosedWithError(reason.clone())) {
            return Ok(());
        }
        self.inner.conn.send_frame(Frame::error(self.inner.id.clone(), reason))
    }

    /// Turns a local failure into an error frame.
    ///
    /// Close errors are swallowed so a close that originated remotely is
    /// never echoed back to its sender.
    pub fn catch(&self, error: Error) {
        if error.is_close() {
            trace!("🔇 Channel {} swallowing close error: {}", self.inner.id, error);
            return;
        }
        if let Err(e) = self.throw(error.reason()) {
            trace!("Channel {} could not report error: {}", self.inner.id, e);
        }
    }

    /// Waits for the next data frame or the terminal frame.
    ///
    /// Error terminals (thrown channel, lost connection) are raised. Without
    /// a deadline this waits until something arrives or the connection goes.
    pub async fn read(&self) -> Result<Received, Error> {
        match self.next_inbound().await {
            Inbound::Data(data) => Ok(Received::Data(data)),
            Inbound::Closed(reason) => reason.into_result().map(Received::Close),
        }
    }

    /// [`read`](Self::read) bounded by `limit`.
    pub async fn read_timeout(&self, limit: Duration) -> Result<Received, Error> {
        tokio::time::timeout(limit, self.read())
            .await
            .map_err(|_| Error::Timeout(limit))?
    }

    /// Reads the next data frame and deserializes it. A normal close where
    /// data was expected is reported as [`Error::ChannelClosed`].
    pub async fn read_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        match self.read().await? {
            Received::Data(data) => Ok(serde_json::from_value(data)?),
            Received::Close(_) => Err(Error::ChannelClosed { reason: None }),
        }
    }

    /// Waits for the terminal close frame and returns its payload.
    ///
    /// Strict single-response pattern: a data frame raises
    /// [`Error::UnexpectedMessage`], an error close raises the close error and
    /// an elapsed `timeout` raises [`Error::Timeout`].
    pub async fn final_response(&self, timeout: Option<Duration>) -> Result<Value, Error> {
        let received = match timeout {
            Some(limit) => self.read_timeout(limit).await?,
            None => self.read().await?,
        };
        match received {
            Received::Close(data) => Ok(data),
            Received::Data(_) => Err(Error::UnexpectedMessage),
        }
    }

    /// Typed [`final_response`](Self::final_response).
    pub async fn final_as<T: DeserializeOwned>(&self, timeout: Option<Duration>) -> Result<T, Error> {
        let data = self.final_response(timeout).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Applies a frame the connection routed to this channel.
    pub(crate) fn receive(&self, kind: FrameKind) {
        match kind {
            FrameKind::Data(data) => {
                let state = self.lock_state();
                if state.is_none() {
                    let _ = self.inner.inbox_tx.send(Inbound::Data(data));
                } else {
                    trace!("Dropping data for closed channel {}", self.inner.id);
                }
            }
            FrameKind::Close(data) => {
                self.settle(CloseReason::ChannelClosedNormally(data));
            }
            FrameKind::Error(reason) => {
                self.settle(CloseReason::ChannelClosedWithError(reason));
            }
            FrameKind::Open { .. } => {
                trace!("Ignoring open frame routed to existing channel {}", self.inner.id);
            }
        }
    }

    /// Marks the channel as lost together with its connection.
    pub(crate) fn abort(&self, reason: Option<String>) {
        self.settle(CloseReason::ConnectionClosed(reason));
    }

    /// Performs the terminal transition. Returns `false` if the channel was
    /// already terminal.
    fn settle(&self, reason: CloseReason) -> bool {
        {
            let mut state = self.lock_state();
            if state.is_some() {
                return false;
            }
            *state = Some(reason.clone());
            let _ = self.inner.inbox_tx.send(Inbound::Closed(reason.clone()));
        }

        trace!("Channel {} closed: {:?}", self.inner.id, reason);
        self.inner.conn.retire(&self.inner.id);
        self.inner.on_close.emit(&reason);
        true
    }

    async fn next_inbound(&self) -> Inbound {
        let mut inbox = self.inner.inbox_rx.lock().await;

        // Snapshot first: the terminal item is queued before the state is
        // observable, so an empty queue plus a terminal snapshot means the
        // terminal was already consumed.
        let terminal = self.close_reason();
        if let Ok(item) = inbox.try_recv() {
            return item;
        }
        if let Some(reason) = terminal {
            return Inbound::Closed(reason);
        }

        match inbox.recv().await {
            Some(item) => item,
            None => Inbound::Closed(CloseReason::ConnectionClosed(None)),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Option<CloseReason>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn closed_error(reason: CloseReason) -> Error {
    match reason {
        CloseReason::ConnectionClosed(reason) => Error::ConnectionClosed { reason },
        CloseReason::ChannelClosedWithError(reason) => Error::ChannelClosed { reason },
        CloseReason::ChannelClosedNormally(_) => Error::ChannelClosed { reason: None },
    }
}
