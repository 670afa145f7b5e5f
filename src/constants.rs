// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3030;
pub const WS_PATH: &str = "ws";

// Reserved event names
pub const EVENT_CONNECTION: &str = "connection";
pub const EVENT_DISCONNECTION: &str = "disconnection";
pub const EVENT_SOCKET_ID: &str = "socket:id";
pub const EVENT_PING: &str = "ping";
pub const EVENT_PONG: &str = "pong";

// Heartbeat configuration constants
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_PING_MAX_MISSED: usize = 2;

// Connection configuration constants
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 500;
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
pub const CONNECTION_ID_LEN: usize = 20;

// Stream framing: big-endian u32 length prefix
pub const FRAME_HEADER_LEN: usize = 4;

// Upper bound on flushing a transport during teardown
pub const SINK_CLOSE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);
