//! Game events streamed by a game server over its `/events` channel.
//!
//! Only the records the relay itself acts on are modelled; everything else is
//! passed through untouched as [`GameEvent::Other`].

use crate::session::PlayerInfo;
use serde::Deserialize;
use serde_json::Value;

/// Path of the channel the relay opens on every game server.
pub const EVENTS_PATH: &str = "/events";

#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    PlayerJoin { player: PlayerInfo },
    PlayerQuit { player: PlayerInfo },
    /// A player ran a text command in game.
    PlayerCommand { player: PlayerInfo, command: String },
    Other(Value),
}

#[derive(Deserialize)]
#[serde(tag = "event")]
enum Known {
    #[serde(rename = "player.join")]
    PlayerJoin { player: PlayerInfo },
    #[serde(rename = "player.quit")]
    PlayerQuit { player: PlayerInfo },
    #[serde(rename = "player.command")]
    PlayerCommand { player: PlayerInfo, command: String },
}

impl GameEvent {
    /// Classifies one event record. Never fails: unrecognised or malformed
    /// records become [`GameEvent::Other`].
    pub fn from_value(value: Value) -> Self {
        match Known::deserialize(&value) {
            Ok(Known::PlayerJoin { player }) => Self::PlayerJoin { player },
            Ok(Known::PlayerQuit { player }) => Self::PlayerQuit { player },
            Ok(Known::PlayerCommand { player, command }) => Self::PlayerCommand { player, command },
            Err(_) => Self::Other(value),
        }
    }

    /// The player this event is about, if any.
    pub fn player(&self) -> Option<&PlayerInfo> {
        match self {
            Self::PlayerJoin { player }
            | Self::PlayerQuit { player }
            | Self::PlayerCommand { player, .. } => Some(player),
            Self::Other(_) => None,
        }
    }
}
