use multisocket::Connection;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A companion app connection.
#[derive(Clone)]
pub struct App {
    uuid: Arc<str>,
    conn: Connection,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App").field("uuid", &self.uuid).finish()
    }
}

impl App {
    pub fn new(conn: Connection) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string().into(),
            conn,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn close(&self, reason: &str) {
        self.conn.close(Some(reason));
    }

    pub async fn closed(&self) -> Option<String> {
        self.conn.closed().await
    }
}
