//! Wire protocol
//!
//! A logical [`Message`] is an event name, an opaque JSON argument payload and an
//! optional correlation id. It is serialized either as a text frame
//! (`["event",args,"id"]`) or as a binary record, then wrapped by the configured
//! [`Compression`]. Byte-stream transports additionally length-prefix every encoded
//! message with the [`framing`] helpers.

pub mod binary;
pub mod compress;
pub mod framing;
pub mod text;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::Serialize;

use crate::error::{Result, RoomcastError};

pub use compress::Compression;
pub use framing::{pack, unpack, PacketCodec};

/// A decoded unit of communication
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Event name, never empty once decoded
    pub event: String,
    /// Raw JSON argument payload, empty when none was sent
    pub args: String,
    /// Correlation id supplied by the peer, empty when absent
    pub id: String,
}

impl Message {
    pub fn new(event: impl Into<String>, args: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            args: args.into(),
            id: id.into(),
        }
    }

    /// Whether the message carries a non-blank payload
    pub fn has_args(&self) -> bool {
        !self.args.trim().is_empty()
    }
}

/// How a message is laid out before compression
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Serialization {
    #[default]
    Text,
    Binary,
}

impl FromStr for Serialization {
    type Err = RoomcastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "binary" | "protobuf" => Ok(Self::Binary),
            other => Err(RoomcastError::ConfigError(format!(
                "unknown serialization '{}', expected text or binary",
                other
            ))),
        }
    }
}

impl fmt::Display for Serialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Serialization and compression used for one direction of traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WireFormat {
    pub serialize: Serialization,
    pub compress: Compression,
}

impl WireFormat {
    pub fn new(serialize: Serialization, compress: Compression) -> Self {
        Self {
            serialize,
            compress,
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.serialize, self.compress)
    }
}

/// Encode one message. `args` is raw JSON (empty for none), `id` may be empty.
pub fn encode(event: &str, args: &str, id: &str, format: WireFormat) -> Result<Bytes> {
    if event.is_empty() {
        return Err(RoomcastError::InvalidEvent);
    }

    let body = match format.serialize {
        Serialization::Text => text::encode(event, args, id),
        Serialization::Binary => binary::encode(event, args, id),
    };

    let compressed = format.compress.compress(&body)?;
    Ok(Bytes::from(compressed.into_owned()))
}

/// Decode one message previously produced by [`encode`] with the same format
pub fn decode(data: &[u8], format: WireFormat) -> Result<Message> {
    let raw = format.compress.decompress(data)?;

    match format.serialize {
        Serialization::Text => text::decode(&raw),
        Serialization::Binary => binary::decode(&raw),
    }
}

/// Serialize handler arguments to the raw JSON carried in a frame.
/// A JSON `null` means "no payload" and is omitted from the frame.
pub fn to_args<T: Serialize + ?Sized>(args: &T) -> Result<String> {
    let json = serde_json::to_string(args)?;
    if json == "null" {
        Ok(String::new())
    } else {
        Ok(json)
    }
}

/// Encoder/decoder bound to a single [`WireFormat`]
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    format: WireFormat,
}

impl Codec {
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn encode(&self, event: &str, args: &str, id: &str) -> Result<Bytes> {
        encode(event, args, id, self.format)
    }

    /// Serialize `args` with [`to_args`] and encode the result
    pub fn encode_with<T: Serialize + ?Sized>(&self, event: &str, args: &T, id: &str) -> Result<Bytes> {
        if event.is_empty() {
            return Err(RoomcastError::InvalidEvent);
        }
        let args = to_args(args)?;
        self.encode(event, &args, id)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Message> {
        decode(data, self.format)
    }
}
