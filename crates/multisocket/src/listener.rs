//! TCP/TLS accept loop producing [`Connection`]s.

use crate::connection::Connection;
use crate::error::Error;
use crate::tls;
use dashmap::DashMap;
use saurus_events::EventEmitter;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where and how to accept connections.
#[derive(Debug, Clone)]
pub struct ListenOptions {
    pub bind_address: SocketAddr,
    /// PEM certificate chain. TLS is used when this and `key_file` are set.
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    /// Upgrade attempts beyond this many live connections get HTTP 503.
    pub max_connections: usize,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8443)),
            cert_file: None,
            key_file: None,
            max_connections: 1000,
        }
    }
}

impl ListenOptions {
    pub fn tls_enabled(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }
}

struct ListenerInner {
    tcp: TcpListener,
    tls: Option<TlsAcceptor>,
    options: ListenOptions,
    accepted: EventEmitter<Connection>,
    live: DashMap<String, Connection>,
}

/// Accepts WebSocket connections and publishes each one on
/// [`accepted`](Self::accepted).
///
/// A failed accept, TLS handshake or upgrade only affects that attempt; the
/// loop keeps running until its shutdown token fires.
#[derive(Clone)]
pub struct Listener {
    inner: Arc<ListenerInner>,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("options", &self.inner.options)
            .field("live", &self.inner.live.len())
            .finish()
    }
}

impl Listener {
    /// Binds the TCP socket and loads TLS material if configured.
    ///
    /// # Arguments
    ///
    /// * `options` - Bind address, optional certificate and key, capacity
    ///
    /// # Returns
    ///
    /// The bound listener, or an I/O or TLS error.
    pub async fn bind(options: ListenOptions) -> Result<Self, Error> {
        let tls = match (&options.cert_file, &options.key_file) {
            (Some(cert), Some(key)) => Some(tls::load_acceptor(cert, key)?),
            _ => None,
        };
        let tcp = TcpListener::bind(options.bind_address).await?;

        info!(
            "🌐 Listening on {} ({})",
            tcp.local_addr()?,
            if tls.is_some() { "wss" } else { "ws" }
        );

        Ok(Self {
            inner: Arc::new(ListenerInner {
                tcp,
                tls,
                options,
                accepted: EventEmitter::new(),
                live: DashMap::new(),
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.inner.tcp.local_addr()?)
    }

    /// Fires with every connection that completed its upgrade, before the
    /// connection starts reading.
    pub fn accepted(&self) -> &EventEmitter<Connection> {
        &self.inner.accepted
    }

    /// Number of connections currently open.
    pub fn connection_count(&self) -> usize {
        self.inner.live.len()
    }

    /// Closes every open connection with `reason`.
    pub fn close_all(&self, reason: &str) {
        let live: Vec<Connection> = self.inner.live.iter().map(|e| e.value().clone()).collect();
        for conn in live {
            conn.close(Some(reason));
        }
    }

    /// Runs the accept loop until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("🛑 Accept loop stopping - shutdown initiated");
                    break;
                }
                accepted = self.inner.tcp.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    let listener = self.clone();
                    tokio::spawn(async move { listener.handshake(stream, addr).await });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    async fn handshake(self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
        }

        match &self.inner.tls {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(stream) => self.upgrade(stream, addr).await,
                Err(e) => warn!("🔐 TLS handshake with {} failed: {}", addr, e),
            },
            None => self.upgrade(stream, addr).await,
        }
    }

    async fn upgrade<S>(&self, stream: S, addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let at_capacity = self.inner.live.len() >= self.inner.options.max_connections;
        let check_capacity = move |_request: &Request, response: Response| {
            if at_capacity {
                let mut rejection = ErrorResponse::new(Some("Server is at capacity".to_string()));
                *rejection.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                return Err(rejection);
            }
            Ok(response)
        };

        let socket = match accept_hdr_async(stream, check_capacity).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!("WebSocket handshake with {} failed: {}", addr, e);
                return;
            }
        };

        let (conn, start) = Connection::deferred(socket);
        self.track(&conn);
        info!("✅ Accepted connection {} from {}", conn.id(), addr);

        self.inner.accepted.emit(&conn);
        start.start();
    }

    fn track(&self, conn: &Connection) {
        self.inner.live.insert(conn.id().to_string(), conn.clone());

        let listener = Arc::downgrade(&self.inner);
        let id = conn.id().to_string();
        conn.on_close()
            .once(move |_| {
                if let Some(listener) = listener.upgrade() {
                    listener.live.remove(&id);
                }
            })
            .detach();
    }
}
