//! Payloads exchanged on the `/hello` channel.

use crate::session::PlayerInfo;
use serde::{Deserialize, Serialize};

/// Path every new connection must open first.
pub const HELLO_PATH: &str = "/hello";

/// First message of a connection, declaring the connecting party's role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Hello {
    /// A game server (or proxy) plugin.
    #[serde(alias = "proxy")]
    Server(ServerHello),
    /// A companion app.
    App(AppHello),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHello {
    pub name: String,
    pub platform: String,
    /// Carried to whoever verifies servers; never checked here.
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppHello {
    /// Resume token from an earlier pairing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Close payload of a game server's hello channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerWelcome {
    pub uuid: String,
}

/// Close payload of a companion app's hello channel once it is authorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppWelcome {
    pub uuid: String,
    pub player: PlayerInfo,
    pub token: String,
}
