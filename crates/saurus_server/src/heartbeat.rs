//! Liveness checking for game-server connections.
//!
//! Every `interval` the relay pings the server and races the next pong against
//! `timeout`. A missed pong closes the connection with `"Timed out"`; there is
//! no retry.

use futures::FutureExt;
use multisocket::{Connection, TIMED_OUT};
use saurus_events::{race, RaceError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Spawns the heartbeat loop for `conn`. The task ends with the connection.
pub fn spawn(conn: Connection, interval: Duration, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(run(conn, interval, timeout))
}

async fn run(conn: Connection, interval: Duration, timeout: Duration) {
    let cancel = conn.cancellation();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        // Listen before pinging so a fast pong is not missed.
        let pong = conn.pongs().next();
        if conn.ping().is_err() {
            return;
        }

        match race(vec![pong.boxed()], Some(timeout), &cancel).await {
            Ok(_) => trace!("💓 Pong from connection {}", conn.id()),
            Err(RaceError::TimedOut(limit)) => {
                warn!("💔 Connection {} missed a pong within {:?}", conn.id(), limit);
                conn.close(Some(TIMED_OUT));
                return;
            }
            Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio::time::Instant;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::WebSocketStream;

    #[tokio::test(start_paused = true)]
    async fn silent_peer_is_closed_with_timed_out() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let conn = Connection::new(WebSocketStream::from_raw_socket(a, Role::Server, None).await);
        // Never read, so never answers a ping.
        let _peer = WebSocketStream::from_raw_socket(b, Role::Client, None).await;

        let started = Instant::now();
        spawn(conn.clone(), Duration::from_millis(1000), Duration::from_millis(5000));

        assert_eq!(conn.closed().await.as_deref(), Some("Timed out"));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(6000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(7000), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn responsive_peer_stays_connected() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let conn = Connection::new(WebSocketStream::from_raw_socket(a, Role::Server, None).await);
        let mut peer = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        // Reading lets the peer answer pings automatically.
        tokio::spawn(async move { while peer.next().await.is_some() {} });

        spawn(conn.clone(), Duration::from_millis(1000), Duration::from_millis(5000));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!conn.is_closed());
    }
}
