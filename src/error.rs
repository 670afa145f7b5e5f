use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoomcastError {
    // Protocol errors
    #[error("Invalid event: event name can not be empty")]
    InvalidEvent,
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Payload decode error: {0}")]
    PayloadDecode(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    // Connection errors
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    // Actor errors
    #[error("{0} actor is no longer running")]
    ActorUnavailable(&'static str),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // System errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<serde_json::Error> for RoomcastError {
    fn from(err: serde_json::Error) -> Self {
        RoomcastError::Serialization(err.to_string())
    }
}

impl From<prost::DecodeError> for RoomcastError {
    fn from(err: prost::DecodeError) -> Self {
        RoomcastError::MalformedFrame(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RoomcastError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RoomcastError::WebSocket(err.to_string())
    }
}

// Generic result type for roomcast
pub type Result<T> = std::result::Result<T, RoomcastError>;
