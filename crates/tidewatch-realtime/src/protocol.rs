//! Socket.IO v4 wire format.
//!
//! Two layers:
//! - Engine.IO packets: a single type digit followed by an optional payload.
//!   Long-polling bodies carry several packets separated by `\x1e`.
//! - Socket.IO packets, carried inside Engine.IO `message` packets. Only the
//!   default namespace and the non-binary packet types are supported.

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

/// Record separator between packets in a polling payload.
pub const PAYLOAD_SEPARATOR: char = '\x1e';

/// Wire decoding errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Zero-length packet.
    #[error("empty packet")]
    Empty,

    /// First character is not an Engine.IO packet type.
    #[error("unknown engine.io packet type {0:?}")]
    UnknownEngineType(char),

    /// First character is not a Socket.IO packet type.
    #[error("unknown socket.io packet type {0:?}")]
    UnknownSocketType(char),

    /// Binary and acknowledgement packets.
    #[error("unsupported socket.io packet type {0:?}")]
    Unsupported(char),

    /// Packet addressed to a namespace other than `/`.
    #[error("unsupported namespace {0:?}")]
    Namespace(String),

    /// Payload did not have the expected shape.
    #[error("malformed {what}: {detail}")]
    Malformed {
        /// Which part failed.
        what: &'static str,
        /// Parser message.
        detail: String,
    },
}

/// Engine.IO handshake data sent in the `open` packet.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    /// Session id, required on polling requests.
    pub sid: String,
    /// Transports the server would upgrade to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    /// Maximum payload size in bytes.
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// Engine.IO packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnginePacket {
    /// `0` handshake.
    Open(OpenInfo),
    /// `1` close.
    Close,
    /// `2` heartbeat from the server, optional probe data.
    Ping(String),
    /// `3` heartbeat reply.
    Pong(String),
    /// `4` carries a Socket.IO packet.
    Message(String),
    /// `5` transport upgrade.
    Upgrade,
    /// `6` no-op.
    Noop,
}

impl EnginePacket {
    /// Text encoding.
    pub fn encode(&self) -> String {
        match self {
            Self::Open(info) => format!(
                "0{}",
                json!({
                    "sid": info.sid,
                    "upgrades": info.upgrades,
                    "pingInterval": info.ping_interval,
                    "pingTimeout": info.ping_timeout,
                    "maxPayload": info.max_payload,
                })
            ),
            Self::Close => "1".to_owned(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_owned(),
            Self::Noop => "6".to_owned(),
        }
    }

    /// Parse one text packet.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let (kind, rest) = split_type(text)?;
        Ok(match kind {
            '0' => Self::Open(serde_json::from_str(rest).map_err(|e| ProtocolError::Malformed {
                what: "open packet",
                detail: e.to_string(),
            })?),
            '1' => Self::Close,
            '2' => Self::Ping(rest.to_owned()),
            '3' => Self::Pong(rest.to_owned()),
            '4' => Self::Message(rest.to_owned()),
            '5' => Self::Upgrade,
            '6' => Self::Noop,
            other => return Err(ProtocolError::UnknownEngineType(other)),
        })
    }
}

/// Join packets into a polling request body.
pub fn encode_payload(packets: &[EnginePacket]) -> String {
    let mut out = String::new();
    for (i, packet) in packets.iter().enumerate() {
        if i > 0 {
            out.push(PAYLOAD_SEPARATOR);
        }
        out.push_str(&packet.encode());
    }
    out
}

/// Split a polling response body into packets.
pub fn decode_payload(body: &str) -> Result<Vec<EnginePacket>, ProtocolError> {
    body.split(PAYLOAD_SEPARATOR)
        .filter(|part| !part.is_empty())
        .map(EnginePacket::decode)
        .collect()
}

/// Socket.IO packet on the default namespace.
#[derive(Clone, Debug, PartialEq)]
pub enum SocketPacket {
    /// `0` namespace connect (client) or connect ack with `{sid}` (server).
    Connect(Option<Value>),
    /// `1` namespace disconnect.
    Disconnect,
    /// `2` named event with at most one argument.
    Event {
        /// Event name.
        name: String,
        /// First argument; several arguments are collected into an array.
        data: Option<Value>,
    },
    /// `4` the server refused the namespace connect.
    ConnectError(Value),
}

impl SocketPacket {
    /// Text encoding, without the Engine.IO prefix.
    pub fn encode(&self) -> String {
        match self {
            Self::Connect(None) => "0".to_owned(),
            Self::Connect(Some(auth)) => format!("0{auth}"),
            Self::Disconnect => "1".to_owned(),
            Self::Event { name, data } => {
                let mut args = vec![Value::String(name.clone())];
                if let Some(data) = data {
                    args.push(data.clone());
                }
                format!("2{}", Value::Array(args))
            }
            Self::ConnectError(err) => format!("4{err}"),
        }
    }

    /// Wrap in an Engine.IO `message` packet.
    pub fn into_engine(self) -> EnginePacket {
        EnginePacket::Message(self.encode())
    }

    /// Parse the body of an Engine.IO `message` packet.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let (kind, mut rest) = split_type(text)?;

        if rest.starts_with('/') {
            let (nsp, tail) = rest.split_once(',').unwrap_or((rest, ""));
            if nsp != "/" {
                return Err(ProtocolError::Namespace(nsp.to_owned()));
            }
            rest = tail;
        }

        // Ack ids are accepted and ignored.
        let ack_digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let rest = &rest[ack_digits..];

        let payload = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(rest).map_err(|e| ProtocolError::Malformed {
                    what: "socket.io payload",
                    detail: e.to_string(),
                })?,
            )
        };

        match kind {
            '0' => Ok(Self::Connect(payload)),
            '1' => Ok(Self::Disconnect),
            '2' => decode_event(payload),
            '4' => Ok(Self::ConnectError(payload.unwrap_or(Value::Null))),
            '3' | '5' | '6' => Err(ProtocolError::Unsupported(kind)),
            other => Err(ProtocolError::UnknownSocketType(other)),
        }
    }
}

fn decode_event(payload: Option<Value>) -> Result<SocketPacket, ProtocolError> {
    let malformed = |detail: &str| ProtocolError::Malformed {
        what: "event",
        detail: detail.to_owned(),
    };
    let Some(Value::Array(mut args)) = payload else {
        return Err(malformed("expected a JSON array"));
    };
    if args.is_empty() {
        return Err(malformed("missing event name"));
    }
    let Value::String(name) = args.remove(0) else {
        return Err(malformed("event name is not a string"));
    };
    let data = match args.len() {
        0 => None,
        1 => args.pop(),
        _ => Some(Value::Array(args)),
    };
    Ok(SocketPacket::Event { name, data })
}

fn split_type(text: &str) -> Result<(char, &str), ProtocolError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    Ok((kind, chars.as_str()))
}
