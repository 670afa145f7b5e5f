//! Roomcast - an event-oriented realtime messaging server
//!
//! This library provides the protocol codec, room and registry actors,
//! event dispatch and heartbeat tracking behind WebSocket and TCP transports,
//! plus a client that dials a server over either transport.

pub mod client;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod protocol;

// Re-export main components
pub use client::{Client, Initiator, SharedInitiator};
pub use config::*;
pub use constants::*;
pub use crate::core::{Acceptor, AcceptorConfig, ConnectionRef, SharedAcceptor};
pub use error::{Result, RoomcastError};
pub use protocol::{Codec, Compression, Message, Serialization, WireFormat};
