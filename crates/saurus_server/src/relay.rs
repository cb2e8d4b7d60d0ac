//! The relay process core: a listener with the pairing handler attached.

use crate::config::HandlerConfig;
use crate::error::ServerError;
use crate::handler::Handler;
use multisocket::{ListenOptions, Listener};
use saurus_events::ShutdownState;
use std::net::SocketAddr;
use tracing::info;

/// Reason given to connections still open when the relay stops.
pub const SHUTTING_DOWN: &str = "Shutting down";

/// A bound relay, ready to [`run`](Self::run).
#[derive(Debug, Clone)]
pub struct Relay {
    listener: Listener,
    handler: Handler,
}

impl Relay {
    /// Binds the listener and attaches a fresh [`Handler`] to it.
    ///
    /// # Arguments
    ///
    /// * `options` - Where to listen, TLS material and capacity
    /// * `config` - Pairing, heartbeat and request timings
    pub async fn bind(options: ListenOptions, config: HandlerConfig) -> Result<Self, ServerError> {
        let address = options.bind_address;
        let listener = Listener::bind(options)
            .await
            .map_err(|e| ServerError::Network(format!("failed to listen on {address}: {e}")))?;

        let handler = Handler::new(config);
        handler.attach(&listener).detach();

        Ok(Self { listener, handler })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Accepts connections until shutdown is initiated, then closes every
    /// live connection with `"Shutting down"` and marks shutdown complete.
    pub async fn run(&self, shutdown: ShutdownState) -> Result<(), ServerError> {
        self.listener.run(shutdown.token()).await;

        let open = self.listener.connection_count();
        if open > 0 {
            info!("🔌 Closing {} open connection(s)", open);
        }
        self.listener.close_all(SHUTTING_DOWN);

        shutdown.complete_shutdown();
        info!("✅ Relay stopped");
        Ok(())
    }
}
