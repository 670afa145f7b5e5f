//! Transport adapters feeding connections into an acceptor

pub mod tcp;
pub mod websocket;

pub use tcp::{handle_tcp_client, serve_tcp};
pub use websocket::{handle_ws_client, routes};
