//! Server configuration module
//! Handles transport, wire format and heartbeat parameters for the server

use crate::constants::{
    DEFAULT_HOST, DEFAULT_MAX_FRAME_SIZE, DEFAULT_OUTBOUND_CAPACITY, DEFAULT_PING_INTERVAL_SECS,
    DEFAULT_PING_MAX_MISSED, DEFAULT_PORT, WS_PATH,
};
use crate::core::AcceptorConfig;
use crate::error::{Result, RoomcastError};
use crate::protocol::{Compression, Serialization, WireFormat};
use log::warn;
use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Frame type used for outgoing WebSocket messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WsMessageType {
    #[default]
    Text,
    Binary,
}

impl FromStr for WsMessageType {
    type Err = RoomcastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "binary" => Ok(Self::Binary),
            other => Err(RoomcastError::ConfigError(format!("unknown websocket message type '{}'", other))),
        }
    }
}

/// Wire formats per direction. Send and receive may differ.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportConfig {
    pub send: WireFormat,
    pub receive: WireFormat,
}

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// WebSocket upgrade path, without leading slash
    pub ws_path: String,
    /// Length-prefixed TCP listener, disabled when unset
    pub tcp_port: Option<u16>,
    pub transport: TransportConfig,
    pub ws_message_type: WsMessageType,
    /// Header carrying the real client `ip:port` behind a proxy
    pub remote_addr_header: Option<String>,
    pub ping_interval: Duration,
    pub ping_max_missed: usize,
    pub outbound_capacity: usize,
    pub max_frame_size: usize,
    pub heartbeat_log_min_delay_ms: i64,
}

impl ServerConfig {
    /// Create a test configuration with short heartbeats
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            ws_path: WS_PATH.to_string(),
            tcp_port: None,
            transport: TransportConfig::default(),
            ws_message_type: WsMessageType::Text,
            remote_addr_header: None,
            ping_interval: Duration::from_millis(200),
            ping_max_missed: DEFAULT_PING_MAX_MISSED,
            outbound_capacity: 16,
            max_frame_size: 64 * 1024,
            heartbeat_log_min_delay_ms: 0,
        }
    }

    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("ROOMCAST_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = lookup("ROOMCAST_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let ws_path = lookup("ROOMCAST_WS_PATH")
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or(WS_PATH.to_string());
        if ws_path.contains('/') {
            return Err(RoomcastError::ConfigError(format!(
                "ROOMCAST_WS_PATH must be a single path segment: {}",
                ws_path
            )));
        }

        let tcp_port = match lookup("ROOMCAST_TCP_PORT") {
            Some(raw) => Some(raw.trim().parse::<u16>().map_err(|_| {
                RoomcastError::ConfigError(format!("ROOMCAST_TCP_PORT is not a port number: {}", raw))
            })?),
            None => None,
        };
        if tcp_port.is_some() && tcp_port == Some(port) && port != 0 {
            return Err(RoomcastError::ConfigError(format!(
                "ROOMCAST_TCP_PORT must differ from ROOMCAST_PORT ({})",
                port
            )));
        }

        let transport = TransportConfig {
            send: WireFormat::new(
                parse_or_default(&lookup, "ROOMCAST_SEND_SERIALIZE", Serialization::Text),
                parse_or_default(&lookup, "ROOMCAST_SEND_COMPRESS", Compression::None),
            ),
            receive: WireFormat::new(
                parse_or_default(&lookup, "ROOMCAST_RECEIVE_SERIALIZE", Serialization::Text),
                parse_or_default(&lookup, "ROOMCAST_RECEIVE_COMPRESS", Compression::None),
            ),
        };

        let ws_message_type = parse_or_default(&lookup, "ROOMCAST_WS_MESSAGE_TYPE", WsMessageType::Text);

        let remote_addr_header = lookup("ROOMCAST_REMOTE_ADDR_HEADER")
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());

        // Non-positive values fall back to the defaults
        let ping_secs = lookup("ROOMCAST_PING_INTERVAL")
            .and_then(|p| p.parse::<i64>().ok())
            .filter(|p| *p > 0)
            .map(|p| p as u64)
            .unwrap_or(DEFAULT_PING_INTERVAL_SECS);

        let ping_max_missed = lookup("ROOMCAST_PING_MAX_MISSED")
            .and_then(|m| m.parse::<i64>().ok())
            .filter(|m| *m > 0)
            .map(|m| m as usize)
            .unwrap_or(DEFAULT_PING_MAX_MISSED);

        let outbound_capacity = lookup("ROOMCAST_OUTBOUND_CAPACITY")
            .and_then(|c| c.parse::<usize>().ok())
            .filter(|c| *c > 0)
            .unwrap_or(DEFAULT_OUTBOUND_CAPACITY);

        let max_frame_size = lookup("ROOMCAST_MAX_FRAME_SIZE")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE);

        let heartbeat_log_min_delay_ms = lookup("ROOMCAST_HEARTBEAT_LOG_DELAY_MS")
            .and_then(|d| d.parse::<i64>().ok())
            .unwrap_or(0);

        Ok(Self {
            host,
            port,
            ws_path,
            tcp_port,
            transport,
            ws_message_type,
            remote_addr_header,
            ping_interval: Duration::from_secs(ping_secs),
            ping_max_missed,
            outbound_capacity,
            max_frame_size,
            heartbeat_log_min_delay_ms,
        })
    }

    /// Read deadline after which a silent transport is treated as dead
    pub fn read_timeout(&self) -> Duration {
        AcceptorConfig::from(self).read_timeout()
    }

    /// Address of the WebSocket/HTTP listener
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| RoomcastError::ConfigError(format!("invalid listen address {}:{}: {}", self.host, self.port, e)))
    }

    /// Address of the TCP listener, if enabled
    pub fn tcp_addr(&self) -> Result<Option<SocketAddr>> {
        self.tcp_port
            .map(|port| {
                format!("{}:{}", self.host, port).parse().map_err(|e| {
                    RoomcastError::ConfigError(format!("invalid tcp address {}:{}: {}", self.host, port, e))
                })
            })
            .transpose()
    }
}

/// Parse an optional value, warning and using `default` when it is not recognised
fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("{}: {}, using {}", key, e, default);
            default
        }),
        None => default,
    }
}

impl std::fmt::Display for WsMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Binary => f.write_str("binary"),
        }
    }
}
