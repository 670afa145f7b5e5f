//! Endpoint: connection registry, rooms and event table for accepted connections.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, Stream};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::constants::{
    DEFAULT_OUTBOUND_CAPACITY, DEFAULT_PING_INTERVAL_SECS, DEFAULT_PING_MAX_MISSED, EVENT_SOCKET_ID,
};
use crate::core::connection::{Connection, ConnectionOptions, ConnectionRef};
use crate::core::driver::{register_heartbeat_handlers, Driver};
use crate::core::event::{EventTable, IntoHandler, Lifecycle};
use crate::core::registry::Registry;
use crate::core::room::RoomManager;
use crate::error::Result;
use crate::protocol::{Codec, WireFormat};

/// Shared acceptor handle for transport adapters
pub type SharedAcceptor = Arc<Acceptor>;

/// Settings the endpoint needs, independent of any transport
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    /// Format of frames written to clients
    pub send: WireFormat,
    /// Format of frames read from clients
    pub receive: WireFormat,
    pub ping_interval: Duration,
    pub ping_max_missed: usize,
    pub outbound_capacity: usize,
    /// Ping sends are logged at debug only once the measured delay reaches this
    pub heartbeat_log_min_delay_ms: i64,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            send: WireFormat::default(),
            receive: WireFormat::default(),
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            ping_max_missed: DEFAULT_PING_MAX_MISSED,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            heartbeat_log_min_delay_ms: 0,
        }
    }
}

impl AcceptorConfig {
    /// Read deadline after which a silent transport is treated as dead
    pub fn read_timeout(&self) -> Duration {
        let periods = u32::try_from(self.ping_max_missed.saturating_add(2)).unwrap_or(u32::MAX);
        self.ping_interval.saturating_mul(periods)
    }
}

impl From<&ServerConfig> for AcceptorConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            send: config.transport.send,
            receive: config.transport.receive,
            ping_interval: config.ping_interval,
            ping_max_missed: config.ping_max_missed,
            outbound_capacity: config.outbound_capacity,
            heartbeat_log_min_delay_ms: config.heartbeat_log_min_delay_ms,
        }
    }
}

/// One endpoint's worth of connections, rooms and handlers
pub struct Acceptor {
    config: AcceptorConfig,
    send_codec: Codec,
    receive_codec: Codec,
    events: Arc<EventTable>,
    rooms: RoomManager,
    registry: Registry,
}

impl Acceptor {
    /// Create the endpoint and spawn its actors. Must be called from within a Tokio runtime.
    pub fn new(config: AcceptorConfig) -> Self {
        let send_codec = Codec::new(config.send);
        let receive_codec = Codec::new(config.receive);
        let acceptor = Self {
            send_codec,
            receive_codec,
            events: Arc::new(EventTable::new()),
            rooms: RoomManager::new(send_codec),
            registry: Registry::new(send_codec),
            config,
        };
        register_heartbeat_handlers(&acceptor.events);
        acceptor
    }

    pub fn config(&self) -> &AcceptorConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventTable> {
        &self.events
    }

    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register an event handler, replacing any earlier one (built-ins included)
    pub fn on<M, H>(&self, event: &str, handler: H) -> Result<()>
    where
        H: IntoHandler<M>,
    {
        self.events.on(event, handler)
    }

    /// Create a connection for a freshly accepted transport.
    ///
    /// The receiver is the connection's outbound queue; hand both to [`Acceptor::serve`].
    pub fn accept(&self, remote_addr: SocketAddr) -> (ConnectionRef, mpsc::Receiver<Bytes>) {
        let options = ConnectionOptions {
            codec: self.send_codec,
            outbound_capacity: self.config.outbound_capacity,
            ping_max_missed: self.config.ping_max_missed,
        };
        Connection::new(remote_addr, options, self.rooms.clone(), self.registry.clone())
    }

    /// Drive a connection until either side stops, then tear it down.
    ///
    /// `stream` yields raw inbound frames and `sink` takes encoded outbound
    /// frames; framing is the transport's job.
    pub async fn serve<S, E, K>(
        &self,
        connection: ConnectionRef,
        outbound: mpsc::Receiver<Bytes>,
        stream: S,
        sink: K,
    ) where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
        K: Sink<Bytes> + Unpin,
        K::Error: Display,
    {
        self.registry.join(&connection);
        info!("[connect] {} {}", connection.id(), connection.remote_addr());

        connection.emit(EVENT_SOCKET_ID, connection.id(), "");
        self.events.dispatch_lifecycle(&connection, Lifecycle::Connection);

        self.driver().run(&connection, outbound, stream, sink).await;

        self.teardown(&connection).await;
    }

    fn driver(&self) -> Driver<'_> {
        Driver {
            config: &self.config,
            send_codec: self.send_codec,
            receive_codec: self.receive_codec,
            events: &self.events,
        }
    }

    async fn teardown(&self, connection: &ConnectionRef) {
        connection.close();
        connection.leave_all();
        self.registry.leave(connection);
        info!(
            "[disconnect] {} {} after {:?} (dropped messages: {})",
            connection.id(),
            connection.remote_addr(),
            connection.connection_duration(),
            connection.dropped_messages()
        );

        if let Some(handle) = self.events.dispatch_lifecycle(connection, Lifecycle::Disconnection) {
            if let Err(e) = handle.await {
                warn!("[disconnect] handler failed for {}: {}", connection.id(), e);
            }
        }
    }

    /// Emit to one connection by id; unknown ids are ignored
    pub fn emit<T: Serialize + ?Sized>(&self, id: &str, event: &str, args: &T, correlation_id: &str) {
        self.registry.emit(id, event, args, correlation_id);
    }

    pub fn broadcast_to<T: Serialize + ?Sized>(&self, room: &str, event: &str, args: &T, correlation_id: &str) {
        self.rooms.broadcast_to(room, event, args, correlation_id);
    }

    pub fn broadcast_to_all<T: Serialize + ?Sized>(&self, event: &str, args: &T, correlation_id: &str) {
        self.registry.broadcast_to_all(event, args, correlation_id);
    }

    pub async fn client(&self, id: &str) -> Result<Option<ConnectionRef>> {
        self.registry.get(id).await
    }

    pub async fn clients(&self) -> Result<Vec<ConnectionRef>> {
        self.registry.all().await
    }

    pub async fn clients_by_room(&self, room: &str) -> Result<Vec<ConnectionRef>> {
        self.rooms.members(room).await
    }

    /// Close a connection by id. Returns `false` if it is unknown or already closing.
    pub async fn disconnect(&self, id: &str) -> Result<bool> {
        Ok(self.registry.get(id).await?.map_or(false, |conn| conn.close()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{EVENT_CONNECTION, EVENT_PING, EVENT_PONG};
    use futures_util::stream;
    use std::convert::Infallible;
    use tokio_util::sync::PollSender;

    #[test]
    fn test_read_timeout_scales_with_missed_pings() {
        let config = AcceptorConfig {
            ping_interval: Duration::from_secs(5),
            ping_max_missed: 2,
            ..AcceptorConfig::default()
        };
        assert_eq!(config.read_timeout(), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_builtin_heartbeat_handlers_registered() {
        let acceptor = Acceptor::new(AcceptorConfig::default());
        assert!(acceptor.events().contains(EVENT_PING));
        assert!(acceptor.events().contains(EVENT_PONG));
    }

    #[tokio::test]
    async fn test_serve_handshake_and_teardown() {
        let acceptor = Acceptor::new(AcceptorConfig::default());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        acceptor
            .on(EVENT_CONNECTION, move |conn: ConnectionRef| {
                let tx = tx.clone();
                async move {
                    conn.join("lobby");
                    let _ = tx.send(conn.id().to_string());
                }
            })
            .unwrap();

        let (conn, outbound) = acceptor.accept("127.0.0.1:6000".parse().unwrap());
        let id = conn.id().to_string();

        // Peer sends nothing and hangs up; the sink collects what we wrote.
        let (sink_tx, mut sink_rx) = mpsc::channel::<Bytes>(16);
        let sink_tx = PollSender::new(sink_tx);
        let inbound = stream::pending::<std::result::Result<Bytes, Infallible>>();
        let serve = {
            let conn = conn.clone();
            let acceptor = &acceptor;
            async move { acceptor.serve(conn, outbound, inbound, sink_tx).await }
        };
        let driver = async {
            assert_eq!(rx.recv().await.unwrap(), id);
            let first = sink_rx.recv().await.unwrap();
            assert_eq!(first, Bytes::from(format!(r#"["socket:id","{}"]"#, id)));
            assert_eq!(acceptor.clients_by_room("lobby").await.unwrap().len(), 1);
            assert!(acceptor.disconnect(&id).await.unwrap());
        };
        tokio::join!(serve, driver);

        assert!(acceptor.client(&id).await.unwrap().is_none());
        assert!(acceptor.rooms().rooms_of(&id).await.unwrap().is_empty());
    }
}
