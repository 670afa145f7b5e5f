//! Dialing side of the protocol
//!
//! An [`Initiator`] holds the event table and settings for outbound
//! connections. Each dial yields a [`Client`] whose connection is pumped by the
//! same read/write loops the server uses. The server's `socket:id` announcement
//! is adopted as the client's id and fires the `connection` handler; `ping` is
//! answered with `pong` and our own pings measure the round trip.

use std::fmt::Display;
use std::future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::WsMessageType;
use crate::constants::{EVENT_PING, EVENT_SOCKET_ID};
use crate::core::driver::{register_heartbeat_handlers, Driver};
use crate::core::event::WithArgs;
use crate::core::heartbeat::now_millis;
use crate::core::{
    AcceptorConfig, Connection, ConnectionOptions, ConnectionRef, EventTable, IntoHandler, Lifecycle,
    Registry, RoomManager,
};
use crate::error::Result;
use crate::protocol::{Codec, PacketCodec};

/// Shared initiator handle; dialing needs one
pub type SharedInitiator = Arc<Initiator>;

/// Handlers and settings for connections this process dials
pub struct Initiator {
    config: AcceptorConfig,
    send_codec: Codec,
    receive_codec: Codec,
    events: Arc<EventTable>,
    rooms: RoomManager,
    registry: Registry,
}

impl Initiator {
    /// Create an initiator and spawn its actors. Must be called from within a Tokio runtime.
    pub fn new(config: AcceptorConfig) -> SharedInitiator {
        let send_codec = Codec::new(config.send);
        let receive_codec = Codec::new(config.receive);
        let events = Arc::new(EventTable::new());
        register_heartbeat_handlers(&events);
        register_socket_id_handler(&events);

        Arc::new(Self {
            send_codec,
            receive_codec,
            events,
            rooms: RoomManager::new(send_codec),
            registry: Registry::new(send_codec),
            config,
        })
    }

    pub fn config(&self) -> &AcceptorConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventTable> {
        &self.events
    }

    /// Register an event handler, replacing any earlier one (built-ins included)
    pub fn on<M, H>(&self, event: &str, handler: H) -> Result<()>
    where
        H: IntoHandler<M>,
    {
        self.events.on(event, handler)
    }

    /// Live connections dialed through this initiator
    pub async fn connections(&self) -> Result<Vec<ConnectionRef>> {
        self.registry.all().await
    }

    /// Dial a server's WebSocket endpoint, e.g. `ws://127.0.0.1:3030/ws`
    pub async fn connect_ws(self: &Arc<Self>, url: &str, message_type: WsMessageType) -> Result<Client> {
        let (socket, _) = connect_async(url).await?;
        let remote_addr = match socket.get_ref() {
            MaybeTlsStream::Plain(stream) => stream.peer_addr()?,
            _ => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        };
        debug!("[client] websocket connected to {} ({})", url, remote_addr);

        let (ws_tx, ws_rx) = socket.split();
        let inbound = ws_rx
            .take_while(|result| future::ready(!matches!(result, Ok(WsMessage::Close(_)))))
            .filter_map(|result| {
                future::ready(match result {
                    Ok(WsMessage::Text(text)) => Some(Ok(Bytes::from(text))),
                    Ok(WsMessage::Binary(data)) => Some(Ok(Bytes::from(data))),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                })
            });
        let sink = ws_tx.with(move |frame: Bytes| future::ready(Ok::<_, WsError>(to_ws_message(frame, message_type))));

        Ok(self.receive(remote_addr, Box::pin(inbound), Box::pin(sink)))
    }

    /// Dial a server's length-prefixed TCP transport
    pub async fn connect_tcp<A: ToSocketAddrs>(self: &Arc<Self>, addr: A, max_frame_size: usize) -> Result<Client> {
        let socket = TcpStream::connect(addr).await?;
        if let Err(e) = socket.set_nodelay(true) {
            debug!("[client] TCP_NODELAY failed: {}", e);
        }
        let remote_addr = socket.peer_addr()?;
        debug!("[client] tcp connected to {}", remote_addr);

        let (reader, writer) = socket.into_split();
        let inbound = FramedRead::new(reader, PacketCodec::new(max_frame_size));
        let sink = FramedWrite::new(writer, PacketCodec::new(max_frame_size));
        Ok(self.receive(remote_addr, inbound, sink))
    }

    /// Pump an already established transport on a background task
    pub fn receive<S, E, K>(self: &Arc<Self>, remote_addr: SocketAddr, stream: S, sink: K) -> Client
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
        K: Sink<Bytes> + Unpin + Send + 'static,
        K::Error: Display + Send + 'static,
    {
        let options = ConnectionOptions {
            codec: self.send_codec,
            outbound_capacity: self.config.outbound_capacity,
            ping_max_missed: self.config.ping_max_missed,
        };
        let (connection, outbound) =
            Connection::new(remote_addr, options, self.rooms.clone(), self.registry.clone());
        self.registry.join(&connection);

        let initiator = Arc::clone(self);
        let conn = connection.clone();
        let task = tokio::spawn(async move {
            initiator.driver().run(&conn, outbound, stream, sink).await;
            initiator.teardown(&conn).await;
        });

        Client { connection, task }
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
            "[client] disconnected from {} as {} after {:?}",
            connection.remote_addr(),
            connection.peer_id().unwrap_or_default(),
            connection.connection_duration()
        );

        if let Some(handle) = self.events.dispatch_lifecycle(connection, Lifecycle::Disconnection) {
            if let Err(e) = handle.await {
                warn!("[client] disconnection handler failed: {}", e);
            }
        }
    }
}

/// Adopt the server-assigned id, then run the `connection` handler
fn register_socket_id_handler(events: &Arc<EventTable>) {
    // Weak, or the table would own itself through its own handler
    let table = Arc::downgrade(events);
    let socket_id = move |conn: ConnectionRef, id: String| {
        let table = table.clone();
        async move {
            debug!("[client] {} assigned id {}", conn.remote_addr(), id);
            conn.set_peer_id(id);
            if let Some(events) = table.upgrade() {
                events.dispatch_lifecycle(&conn, Lifecycle::Connection);
            }
        }
    };
    events.insert(EVENT_SOCKET_ID, IntoHandler::<WithArgs<String>>::into_handler(socket_id));
}

/// Text frames must be UTF-8; anything else goes out as binary
fn to_ws_message(frame: Bytes, message_type: WsMessageType) -> WsMessage {
    match message_type {
        WsMessageType::Binary => WsMessage::Binary(frame.to_vec()),
        WsMessageType::Text => match String::from_utf8(frame.to_vec()) {
            Ok(text) => WsMessage::Text(text),
            Err(e) => WsMessage::Binary(e.into_bytes()),
        },
    }
}

/// One dialed connection
pub struct Client {
    connection: ConnectionRef,
    task: JoinHandle<()>,
}

impl Client {
    pub fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    /// Id the server assigned, once `socket:id` has arrived
    pub fn id(&self) -> Option<String> {
        self.connection.peer_id()
    }

    /// `false` once the connection has closed for any reason
    pub fn alive(&self) -> bool {
        !self.connection.is_closed()
    }

    /// Queue an event for the server; dropped when the connection is gone
    pub fn emit<T: Serialize + ?Sized>(&self, event: &str, args: &T, id: &str) {
        self.connection.emit(event, args, id);
    }

    /// Send a heartbeat now instead of waiting for the next tick
    pub fn ping(&self) -> bool {
        if !self.alive() {
            return false;
        }
        let stamp = now_millis();
        self.connection.record_ping(stamp);
        self.connection.emit(EVENT_PING, &stamp, "");
        true
    }

    /// Last measured round trip in milliseconds
    pub fn delay(&self) -> i64 {
        self.connection.delay()
    }

    /// Start closing. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        self.connection.close()
    }

    /// Wait until the connection has closed and `disconnection` has run
    pub async fn closed(self) {
        if let Err(e) = self.task.await {
            warn!("[client] connection task failed: {}", e);
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("connection", &self.connection).finish()
    }
}
