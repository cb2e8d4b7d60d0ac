//! Wire framing.
//!
//! Every WebSocket text message carries exactly one JSON object:
//!
//! | Kind  | Shape                                 |
//! |-------|---------------------------------------|
//! | Open  | `{uuid, type: "open", path, data?}`   |
//! | Data  | `{uuid, data}`                        |
//! | Close | `{uuid, type: "close", data?}`        |
//! | Error | `{uuid, type: "error", reason?}`      |

use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a channel, unique within its connection.
pub type ChannelId = String;

/// One decoded wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireFrame", try_from = "WireFrame")]
pub struct Frame {
    pub channel: ChannelId,
    pub kind: FrameKind,
}

/// What a frame does to its channel.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    Open { path: String, data: Value },
    Data(Value),
    Close(Value),
    Error(Option<String>),
}

impl Frame {
    pub fn open(channel: impl Into<ChannelId>, path: impl Into<String>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            kind: FrameKind::Open {
                path: path.into(),
                data,
            },
        }
    }

    pub fn data(channel: impl Into<ChannelId>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            kind: FrameKind::Data(data),
        }
    }

    pub fn close(channel: impl Into<ChannelId>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            kind: FrameKind::Close(data),
        }
    }

    pub fn error(channel: impl Into<ChannelId>, reason: Option<String>) -> Self {
        Self {
            channel: channel.into(),
            kind: FrameKind::Error(reason),
        }
    }

    /// Close and error frames end their channel.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, FrameKind::Close(_) | FrameKind::Error(_))
    }

    pub fn encode(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses one text message. Anything that is not a well-formed frame is
    /// a [`Error::ProtocolViolation`].
    pub fn decode(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text)
            .map_err(|e| Error::ProtocolViolation(format!("malformed frame: {e}")))
    }
}

/// Flat representation matching the JSON layout.
#[derive(Serialize, Deserialize)]
struct WireFrame {
    uuid: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl From<Frame> for WireFrame {
    fn from(frame: Frame) -> Self {
        let mut wire = WireFrame {
            uuid: frame.channel,
            kind: None,
            path: None,
            data: Value::Null,
            reason: None,
        };
        match frame.kind {
            FrameKind::Open { path, data } => {
                wire.kind = Some("open".into());
                wire.path = Some(path);
                wire.data = data;
            }
            FrameKind::Data(data) => wire.data = data,
            FrameKind::Close(data) => {
                wire.kind = Some("close".into());
                wire.data = data;
            }
            FrameKind::Error(reason) => {
                wire.kind = Some("error".into());
                wire.reason = reason;
            }
        }
        wire
    }
}

impl TryFrom<WireFrame> for Frame {
    type Error = String;

    fn try_from(wire: WireFrame) -> Result<Self, Self::Error> {
        let kind = match wire.kind.as_deref() {
            None => FrameKind::Data(wire.data),
            Some("open") => FrameKind::Open {
                path: wire.path.ok_or("open frame without a path")?,
                data: wire.data,
            },
            Some("close") => FrameKind::Close(wire.data),
            Some("error") => FrameKind::Error(wire.reason),
            Some(other) => return Err(format!("unknown frame type `{other}`")),
        };
        Ok(Frame {
            channel: wire.uuid,
            kind,
        })
    }
}
