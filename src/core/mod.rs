//! Core functionality: connections, rooms, registry, dispatch and heartbeat

pub mod acceptor;
pub mod connection;
pub(crate) mod driver;
pub mod event;
pub mod heartbeat;
pub mod registry;
pub mod response;
pub mod room;

// Re-export main components for convenience
pub use acceptor::{Acceptor, AcceptorConfig, SharedAcceptor};
pub use connection::{Connection, ConnectionOptions, ConnectionRef};
pub use event::{EventTable, Handler, HandlerShape, IntoHandler, Lifecycle};
pub use heartbeat::{HeartbeatState, HeartbeatTracker, PingDecision};
pub use registry::Registry;
pub use response::{ArgsRequest, Responder, Response};
pub use room::{Room, RoomManager};
