//! Client connection handle
//! Identity, bounded outbound queue, heartbeat state and the room/registry
//! handles a connection uses to reach its endpoint.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::constants::CONNECTION_ID_LEN;
use crate::core::heartbeat::{now_millis, HeartbeatState, HeartbeatTracker, PingDecision};
use crate::core::registry::Registry;
use crate::core::room::RoomManager;
use crate::error::Result;
use crate::protocol::Codec;

/// Shared handle to a live connection
pub type ConnectionRef = Arc<Connection>;

/// Per-connection settings taken from the endpoint configuration
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    pub codec: Codec,
    pub outbound_capacity: usize,
    pub ping_max_missed: usize,
}

/// Represents the state of a single client connection
pub struct Connection {
    id: String,
    peer_id: Mutex<Option<String>>,
    remote_addr: SocketAddr,
    codec: Codec,
    outbound: mpsc::Sender<Bytes>,
    heartbeat: Mutex<HeartbeatTracker>,
    rooms: RoomManager,
    registry: Registry,
    shutdown: CancellationToken,
    closed: AtomicBool,
    dropped: AtomicU64,
    connected_at: Instant,
}

impl Connection {
    /// Create a connection with a fresh id. The returned receiver is the outbound
    /// queue and belongs to the transport's write loop.
    pub fn new(
        remote_addr: SocketAddr,
        options: ConnectionOptions,
        rooms: RoomManager,
        registry: Registry,
    ) -> (ConnectionRef, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(options.outbound_capacity.max(1));
        let connection = Self {
            id: generate_id(&remote_addr),
            peer_id: Mutex::new(None),
            remote_addr,
            codec: options.codec,
            outbound: tx,
            heartbeat: Mutex::new(HeartbeatTracker::new(options.ping_max_missed)),
            rooms,
            registry,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            connected_at: Instant::now(),
        };
        (Arc::new(connection), rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id the remote endpoint announced with `socket:id`. Only set on dialed connections.
    pub fn peer_id(&self) -> Option<String> {
        self.peer_id.lock().clone()
    }

    pub(crate) fn set_peer_id(&self, id: String) {
        *self.peer_id.lock() = Some(id);
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Calculate the connection duration
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Encode an event and queue it for this client.
    ///
    /// Never blocks: encode failures are logged and a full queue drops the new message.
    pub fn emit<T: Serialize + ?Sized>(&self, event: &str, args: &T, id: &str) {
        match self.codec.encode_with(event, args, id) {
            Ok(frame) => {
                self.send(frame);
            }
            Err(e) => {
                warn!("[emit] encode error for '{}' to {} {}: {}", event, self.id, self.remote_addr, e);
            }
        }
    }

    /// Queue an already encoded frame. Returns `false` when it was dropped.
    pub fn send(&self, frame: Bytes) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "[emit] outbound queue full, message dropped: {} {} (dropped {})",
                    self.id, self.remote_addr, dropped
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("[emit] outbound queue closed: {} {}", self.id, self.remote_addr);
                false
            }
        }
    }

    /// Frames waiting in the outbound queue
    pub fn queued(&self) -> usize {
        self.outbound.max_capacity() - self.outbound.capacity()
    }

    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Join a room on this connection's endpoint
    pub fn join(self: &Arc<Self>, room: &str) {
        self.rooms.join(room, self);
    }

    pub fn leave(&self, room: &str) {
        self.rooms.leave(room, self);
    }

    pub fn leave_all(&self) {
        self.rooms.leave_all(self);
    }

    /// Rooms this connection currently belongs to
    pub async fn rooms(&self) -> Result<Vec<String>> {
        self.rooms.rooms_of(&self.id).await
    }

    /// Broadcast to a room on this connection's endpoint, including this connection if it is a member
    pub fn broadcast_to<T: Serialize + ?Sized>(&self, room: &str, event: &str, args: &T, id: &str) {
        self.rooms.broadcast_to(room, event, args, id);
    }

    /// Broadcast to every connection on this connection's endpoint
    pub fn broadcast_to_all<T: Serialize + ?Sized>(&self, event: &str, args: &T, id: &str) {
        self.registry.broadcast_to_all(event, args, id);
    }

    pub fn ping_tick(&self) -> PingDecision {
        self.heartbeat.lock().tick(now_millis())
    }

    pub fn record_ping(&self, timestamp: i64) {
        self.heartbeat.lock().record_ping(timestamp);
    }

    /// Apply a `pong` echo; returns the new delay when it matched an outstanding ping
    pub fn on_pong(&self, timestamp: i64) -> Option<i64> {
        let delay = self.heartbeat.lock().on_pong(timestamp, now_millis());
        if let Some(delay) = delay {
            trace!("[heartbeat][pong] {} {} delay={}ms", self.id, self.remote_addr, delay);
        }
        delay
    }

    /// Last measured round trip in milliseconds
    pub fn delay(&self) -> i64 {
        self.heartbeat.lock().delay()
    }

    pub fn outstanding_pings(&self) -> usize {
        self.heartbeat.lock().outstanding()
    }

    pub fn heartbeat_state(&self) -> HeartbeatState {
        self.heartbeat.lock().state()
    }

    /// Close the connection; both transport loops stop. Returns `true` on the first call only.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once [`Connection::close`] has been called
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_id", &*self.peer_id.lock())
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Hash of remote address, wall-clock nanos and randomness, URL-safe base64
fn generate_id(remote_addr: &SocketAddr) -> String {
    let mut hasher = Sha256::new();
    hasher.update(remote_addr.to_string().as_bytes());
    hasher.update(
        chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_be_bytes(),
    );
    hasher.update(rand::random::<u64>().to_be_bytes());
    hasher.update(rand::random::<u64>().to_be_bytes());

    let mut id = URL_SAFE_NO_PAD.encode(hasher.finalize());
    id.truncate(CONNECTION_ID_LEN);
    id
}
