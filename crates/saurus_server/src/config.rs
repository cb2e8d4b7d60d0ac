//! Runtime settings for the pairing handler and the sessions it creates.

use std::time::Duration;

/// Timing knobs for [`Handler`](crate::Handler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    /// How long an issued pairing code waits for `authorize <code>`.
    pub code_timeout: Duration,
    /// Delay between heartbeat pings to a game server.
    pub heartbeat_interval: Duration,
    /// How long a game server may take to answer a ping.
    pub heartbeat_timeout: Duration,
    /// Deadline for requests the relay sends to a game server.
    pub request_timeout: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            code_timeout: Duration::from_millis(60_000),
            heartbeat_interval: Duration::from_millis(1000),
            heartbeat_timeout: Duration::from_millis(5000),
            request_timeout: multisocket::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}
