//! One physical WebSocket carrying many [`Channel`]s.
//!
//! A connection owns two background tasks:
//!
//! * **Reader**: decodes inbound text messages into frames and routes them to
//!   channels by id, or to path consumers for open frames
//! * **Writer**: drains a single ordered outbound queue into the socket
//!
//! Channel state lives in a concurrent table. When a channel ends its id is
//! *retired* rather than forgotten, so a frame that raced a local close is
//! dropped quietly while a second open for the same id is still rejected.
//! Retired ids of peer-opened channels are kept for the life of the
//! connection. Ids this side opened are forgotten once the peer's own
//! terminal frame arrives; the peer may send nothing more on them.

use crate::channel::Channel;
use crate::error::Error;
use crate::frame::{ChannelId, Frame, FrameKind};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use saurus_events::{race, EventEmitter, RaceError, Subscription};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Deadline applied by [`Connection::request`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// An inbound open frame handed to a path consumer.
#[derive(Debug, Clone)]
pub struct Opened {
    /// The freshly registered channel.
    pub channel: Channel,
    pub path: String,
    /// Payload of the open frame, `null` when absent.
    pub data: Value,
}

impl Opened {
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

#[derive(Clone)]
enum Slot {
    /// `local` is set for channels this side opened.
    Live { channel: Channel, local: bool },
    Retired,
}

enum Outbound {
    Frame(Frame),
    Control(Message),
    Close(Option<String>),
}

struct ConnectionInner {
    id: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    channels: DashMap<ChannelId, Slot>,
    paths: DashMap<String, EventEmitter<Opened>>,
    pings: EventEmitter<()>,
    pongs: EventEmitter<()>,
    closed: EventEmitter<Option<String>>,
    /// `Some(reason)` once closed.
    close_reason: Mutex<Option<Option<String>>>,
    cancel: CancellationToken,
}

/// Handle to a multiplexed connection. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("channels", &self.channel_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Releases the reader of a connection created with [`Connection::deferred`].
#[derive(Debug)]
pub struct Start(oneshot::Sender<()>);

impl Start {
    pub fn start(self) {
        let _ = self.0.send(());
    }
}

impl Connection {
    /// Wraps a WebSocket and starts reading from it immediately.
    pub fn new<S>(socket: S) -> Self
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin + 'static,
    {
        let (conn, start) = Self::deferred(socket);
        start.start();
        conn
    }

    /// Wraps a WebSocket without reading from it until [`Start::start`] is
    /// called (or the [`Start`] is dropped).
    ///
    /// Consumers registered in between, for instance with
    /// [`wait_open`](Self::wait_open), are guaranteed to see the very first
    /// frame.
    pub fn deferred<S>(socket: S) -> (Self, Start)
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (start_tx, start_rx) = oneshot::channel();

        let conn = Self {
            inner: Arc::new(ConnectionInner {
                id: Uuid::new_v4().simple().to_string(),
                outbound,
                channels: DashMap::new(),
                paths: DashMap::new(),
                pings: EventEmitter::new(),
                pongs: EventEmitter::new(),
                closed: EventEmitter::new(),
                close_reason: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        };

        let (sink, stream) = socket.split();
        tokio::spawn(write_loop(conn.inner.id.clone(), sink, outbound_rx));
        tokio::spawn(read_loop(conn.clone(), stream, start_rx));

        debug!("🔗 Connection {} established", conn.inner.id);
        (conn, Start(start_tx))
    }

    /// Short identifier used in logs.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.lock_close_reason().is_some()
    }

    /// Number of live (non-retired) channels.
    pub fn channel_count(&self) -> usize {
        self.inner
            .channels
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Live { .. }))
            .count()
    }

    /// Token cancelled the moment the connection closes.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Fires once per peer ping.
    pub fn pings(&self) -> &EventEmitter<()> {
        &self.inner.pings
    }

    /// Fires once per pong received.
    pub fn pongs(&self) -> &EventEmitter<()> {
        &self.inner.pongs
    }

    /// Fires once with the close reason.
    pub fn on_close(&self) -> &EventEmitter<Option<String>> {
        &self.inner.closed
    }

    /// Resolves with the close reason once the connection is closed.
    pub async fn closed(&self) -> Option<String> {
        let next = self.inner.closed.next();
        if let Some(reason) = self.lock_close_reason().clone() {
            return reason;
        }
        next.await.unwrap_or(None)
    }

    /// Registers a persistent consumer for open frames on `path`.
    ///
    /// Each open is handled on its own task. A handler error is passed to
    /// [`Channel::catch`], so it ends only that channel.
    pub fn route<F, Fut>(&self, path: &str, handler: F) -> Subscription
    where
        F: Fn(Opened) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.path(path).on(move |opened: &Opened| {
            let channel = opened.channel.clone();
            let task = handler(opened.clone());
            tokio::spawn(async move {
                if let Err(e) = task.await {
                    channel.catch(e);
                }
            });
        })
    }

    /// Waits, without deadline, for the next open frame on `path`.
    ///
    /// The consumer is registered when this method is called, not when the
    /// returned future is first polled.
    pub fn wait_open(&self, path: &str) -> impl Future<Output = Result<Opened, Error>> + Send + 'static {
        self.wait_open_inner(path, None)
    }

    /// [`wait_open`](Self::wait_open) bounded by `limit`.
    pub fn wait_open_timeout(
        &self,
        path: &str,
        limit: Duration,
    ) -> impl Future<Output = Result<Opened, Error>> + Send + 'static {
        self.wait_open_inner(path, Some(limit))
    }

    fn wait_open_inner(
        &self,
        path: &str,
        deadline: Option<Duration>,
    ) -> impl Future<Output = Result<Opened, Error>> + Send + 'static {
        let next = self.path(path).next();
        let conn = self.clone();
        async move {
            match race(vec![next.boxed()], deadline, &conn.inner.cancel).await {
                Ok(Ok(opened)) => Ok(opened),
                Ok(Err(_)) | Err(RaceError::Cancelled) | Err(RaceError::Empty) => {
                    Err(Error::ConnectionClosed {
                        reason: conn.lock_close_reason().clone().flatten(),
                    })
                }
                Err(RaceError::TimedOut(limit)) => Err(Error::Timeout(limit)),
            }
        }
    }

    /// Opens a new channel on `path`.
    pub fn open(&self, path: &str, data: Value) -> Result<Channel, Error> {
        self.ensure_open()?;

        let channel = loop {
            let id = Uuid::new_v4().to_string();
            if let Entry::Vacant(slot) = self.inner.channels.entry(id.clone()) {
                let channel = Channel::new(id, self.clone());
                slot.insert(Slot::Live {
                    channel: channel.clone(),
                    local: true,
                });
                break channel;
            }
        };

        trace!("📤 Opening channel {} on {}", channel.id(), path);
        if let Err(e) = self.send_frame(Frame::open(channel.id(), path, data)) {
            channel.abort(e.reason());
            return Err(e);
        }
        Ok(channel)
    }

    /// One-shot RPC with the default one second deadline.
    pub async fn request(&self, path: &str, data: Value) -> Result<Value, Error> {
        self.request_timeout(path, data, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Opens a channel on `path` and waits for its close payload.
    ///
    /// If no terminal frame arrives within `limit` the channel is thrown
    /// with `"Timed out"` so both ends release it.
    pub async fn request_timeout(&self, path: &str, data: Value, limit: Duration) -> Result<Value, Error> {
        let channel = self.open(path, data)?;
        match channel.final_response(Some(limit)).await {
            Ok(value) => Ok(value),
            Err(e) => {
                if !e.is_close() {
                    debug!("⏱️ Request on {} failed: {}", path, e);
                    let _ = channel.throw(e.reason());
                }
                Err(e)
            }
        }
    }

    /// Typed [`request`](Self::request).
    pub async fn request_as<T: DeserializeOwned>(&self, path: &str, data: Value) -> Result<T, Error> {
        let value = self.request(path, data).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Sends a WebSocket ping.
    pub fn ping(&self) -> Result<(), Error> {
        self.send_outbound(Outbound::Control(Message::Ping(Vec::new().into())))
    }

    /// Closes the connection.
    ///
    /// Every live channel observes a connection-closed termination and the
    /// peer receives a close frame carrying `reason`. Idempotent.
    pub fn close(&self, reason: Option<&str>) {
        let reason = reason.map(str::to_string);
        if self.settle(reason.clone()) {
            let _ = self.inner.outbound.send(Outbound::Close(reason));
        }
    }

    pub(crate) fn send_frame(&self, frame: Frame) -> Result<(), Error> {
        self.send_outbound(Outbound::Frame(frame))
    }

    /// Moves a channel id from live to retired.
    pub(crate) fn retire(&self, id: &str) {
        if let Some(mut slot) = self.inner.channels.get_mut(id) {
            *slot = Slot::Retired;
        }
    }

    fn path(&self, path: &str) -> EventEmitter<Opened> {
        self.inner.paths.entry(path.to_string()).or_default().clone()
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match &*self.lock_close_reason() {
            Some(reason) => Err(Error::ConnectionClosed {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn send_outbound(&self, item: Outbound) -> Result<(), Error> {
        self.ensure_open()?;
        self.inner
            .outbound
            .send(item)
            .map_err(|_| Error::ConnectionClosed { reason: None })
    }

    fn lock_close_reason(&self) -> std::sync::MutexGuard<'_, Option<Option<String>>> {
        self.inner
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Terminal transition shared by local and remote closes.
    fn settle(&self, reason: Option<String>) -> bool {
        {
            let mut state = self.lock_close_reason();
            if state.is_some() {
                return false;
            }
            *state = Some(reason.clone());
        }
        self.inner.cancel.cancel();

        let live: Vec<Channel> = self
            .inner
            .channels
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Live { channel, .. } => Some(channel.clone()),
                Slot::Retired => None,
            })
            .collect();
        for channel in live {
            channel.abort(reason.clone());
        }
        // Route handlers may hold clones of this connection.
        self.inner.paths.clear();

        info!(
            "🔌 Connection {} closed: {}",
            self.inner.id,
            reason.as_deref().unwrap_or("no reason given")
        );
        self.inner.closed.emit(&reason);
        true
    }

    /// Routes one decoded text message.
    fn dispatch(&self, text: &str) -> Result<(), Error> {
        let frame = Frame::decode(text)?;
        trace!("📥 Connection {} frame {:?}", self.inner.id, frame);

        match frame.kind {
            FrameKind::Open { path, data } => self.accept_open(frame.channel, path, data),
            kind => {
                let slot = self.inner.channels.get(&frame.channel).map(|slot| slot.clone());
                match slot {
                    Some(Slot::Live { channel, local }) => {
                        let terminal = matches!(kind, FrameKind::Close(_) | FrameKind::Error(_));
                        channel.receive(kind);
                        if local && terminal {
                            self.inner
                                .channels
                                .remove_if(&frame.channel, |_, slot| matches!(slot, Slot::Retired));
                        }
                        Ok(())
                    }
                    Some(Slot::Retired) => {
                        trace!("Dropping frame for retired channel {}", frame.channel);
                        Ok(())
                    }
                    None => Err(Error::ProtocolViolation(format!(
                        "frame for unknown channel {}",
                        frame.channel
                    ))),
                }
            }
        }
    }

    fn accept_open(&self, id: ChannelId, path: String, data: Value) -> Result<(), Error> {
        let channel = match self.inner.channels.entry(id) {
            Entry::Occupied(entry) => {
                return Err(Error::ProtocolViolation(format!(
                    "channel {} opened twice",
                    entry.key()
                )))
            }
            Entry::Vacant(entry) => {
                let channel = Channel::new(entry.key().clone(), self.clone());
                entry.insert(Slot::Live {
                    channel: channel.clone(),
                    local: false,
                });
                channel
            }
        };

        let consumers = self.inner.paths.get(&path).map(|emitter| emitter.clone());
        let opened = Opened {
            channel: channel.clone(),
            path,
            data,
        };
        let delivered = consumers.map_or(0, |emitter| emitter.emit(&opened));
        if delivered == 0 {
            debug!("🚫 No consumer for {} on connection {}", opened.path, self.inner.id);
            channel.catch(Error::NoRoute(opened.path));
        }
        Ok(())
    }
}

async fn read_loop<R>(conn: Connection, mut stream: R, start: oneshot::Receiver<()>)
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let _ = start.await;
    let cancel = conn.cancellation();

    let reason = loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                if let Err(e) = conn.dispatch(text.as_str()) {
                    warn!("❌ Connection {} violated the protocol: {}", conn.inner.id, e);
                    break Some(e.to_string());
                }
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = conn.send_outbound(Outbound::Control(Message::Pong(data)));
                conn.inner.pings.emit(&());
            }
            Some(Ok(Message::Pong(_))) => {
                conn.inner.pongs.emit(&());
            }
            Some(Ok(Message::Close(frame))) => {
                debug!("🔌 Peer closed connection {}", conn.inner.id);
                break frame.map(|f| f.reason.as_str().to_string()).filter(|r| !r.is_empty());
            }
            Some(Ok(Message::Binary(_))) => {
                warn!("❌ Connection {} sent a binary message", conn.inner.id);
                break Some(Error::ProtocolViolation("binary message".into()).to_string());
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                debug!("WebSocket error on connection {}: {}", conn.inner.id, e);
                break Some(e.to_string());
            }
            None => break None,
        }
    };

    conn.close(reason.as_deref());
}

async fn write_loop<W>(id: String, mut sink: W, mut outbound: mpsc::UnboundedReceiver<Outbound>)
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(item) = outbound.recv().await {
        let message = match item {
            Outbound::Frame(frame) => match frame.encode() {
                Ok(text) => Message::Text(text.into()),
                Err(e) => {
                    warn!("Failed to encode frame on connection {}: {}", id, e);
                    continue;
                }
            },
            Outbound::Control(message) => message,
            Outbound::Close(reason) => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: reason.unwrap_or_default().into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
        };

        if let Err(e) = sink.send(message).await {
            debug!("Write failed on connection {}: {}", id, e);
            break;
        }
    }
    let _ = sink.close().await;
    trace!("Writer for connection {} finished", id);
}
