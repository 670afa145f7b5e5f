//! Transport-generic read/write loops shared by the accepting and the dialing side.

use std::fmt::Display;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, trace, warn};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::constants::{EVENT_PING, EVENT_PONG, SINK_CLOSE_TIMEOUT};
use crate::core::acceptor::AcceptorConfig;
use crate::core::connection::ConnectionRef;
use crate::core::event::{EventTable, IntoHandler, WithArgs, WithArgsAndId};
use crate::core::heartbeat::PingDecision;
use crate::protocol::Codec;

/// Install the `ping` echo and the `pong` delay update on an event table
pub(crate) fn register_heartbeat_handlers(events: &EventTable) {
    // Echo the peer's ping untouched
    let ping = |conn: ConnectionRef, stamp: Value, id: String| async move {
        trace!("[heartbeat][ping] received from {} {}", conn.id(), conn.remote_addr());
        conn.emit(EVENT_PONG, &stamp, &id);
    };
    let pong = |conn: ConnectionRef, stamp: i64| async move {
        conn.on_pong(stamp);
    };
    events.insert(EVENT_PING, IntoHandler::<WithArgsAndId<Value>>::into_handler(ping));
    events.insert(EVENT_PONG, IntoHandler::<WithArgs<i64>>::into_handler(pong));
}

/// Borrowed view of an endpoint, enough to pump one connection
pub(crate) struct Driver<'a> {
    pub config: &'a AcceptorConfig,
    pub send_codec: Codec,
    pub receive_codec: Codec,
    pub events: &'a EventTable,
}

impl Driver<'_> {
    /// Run both loops until either stops. The connection is closed on return.
    pub async fn run<S, E, K>(
        &self,
        connection: &ConnectionRef,
        outbound: mpsc::Receiver<Bytes>,
        stream: S,
        sink: K,
    ) where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
        K: Sink<Bytes> + Unpin,
        K::Error: Display,
    {
        tokio::join!(
            self.read_loop(connection, stream),
            self.write_loop(connection, outbound, sink)
        );
    }

    async fn read_loop<S, E>(&self, connection: &ConnectionRef, mut stream: S)
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let deadline = self.config.read_timeout();
        loop {
            let next = tokio::select! {
                _ = connection.closed() => break,
                next = time::timeout(deadline, stream.next()) => next,
            };
            match next {
                Ok(Some(Ok(data))) => match self.receive_codec.decode(&data) {
                    Ok(message) => {
                        self.events.dispatch(connection, &message);
                    }
                    Err(e) => {
                        warn!("[read] dropping frame from {} {}: {}", connection.id(), connection.remote_addr(), e);
                    }
                },
                Ok(Some(Err(e))) => {
                    debug!("[read] {} {}: {}", connection.id(), connection.remote_addr(), e);
                    break;
                }
                Ok(None) => {
                    debug!("[read] closed by peer: {} {}", connection.id(), connection.remote_addr());
                    break;
                }
                Err(_) => {
                    warn!(
                        "[read] no data for {:?}, closing {} {}",
                        deadline,
                        connection.id(),
                        connection.remote_addr()
                    );
                    break;
                }
            }
        }
        connection.close();
    }

    async fn write_loop<K>(&self, connection: &ConnectionRef, mut outbound: mpsc::Receiver<Bytes>, mut sink: K)
    where
        K: Sink<Bytes> + Unpin,
        K::Error: Display,
    {
        let interval = self.config.ping_interval;
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let frame = tokio::select! {
                _ = connection.closed() => break,
                frame = outbound.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                _ = ticker.tick() => match self.ping_frame(connection) {
                    Some(frame) => frame,
                    None => break,
                },
            };
            if !write_frame(connection, &mut sink, frame).await {
                break;
            }
        }

        // A peer that stopped reading must not hold teardown hostage
        match time::timeout(SINK_CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!("[write] close {}: {}", connection.id(), e),
            Err(_) => debug!("[write] close timed out for {}", connection.id()),
        }
        connection.close();
    }

    /// Next heartbeat frame, or `None` when the peer is unresponsive
    fn ping_frame(&self, connection: &ConnectionRef) -> Option<Bytes> {
        let stamp = match connection.ping_tick() {
            PingDecision::Send(stamp) => stamp,
            PingDecision::Unresponsive => {
                warn!(
                    "[heartbeat] {} missed pings, closing {} {}",
                    connection.outstanding_pings(),
                    connection.id(),
                    connection.remote_addr()
                );
                return None;
            }
        };

        let frame = match self.send_codec.encode_with(EVENT_PING, &stamp, "") {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[heartbeat] encode error: {}", e);
                return None;
            }
        };
        connection.record_ping(stamp);

        let delay = connection.delay();
        if delay >= self.config.heartbeat_log_min_delay_ms {
            debug!("[heartbeat][ping] {} {} delay={}ms", connection.id(), connection.remote_addr(), delay);
        } else {
            trace!("[heartbeat][ping] {} {} delay={}ms", connection.id(), connection.remote_addr(), delay);
        }
        Some(frame)
    }
}

/// Write one frame unless the connection closes first. Returns `false` when writing must stop.
async fn write_frame<K>(connection: &ConnectionRef, sink: &mut K, frame: Bytes) -> bool
where
    K: Sink<Bytes> + Unpin,
    K::Error: Display,
{
    tokio::select! {
        _ = connection.closed() => false,
        result = sink.send(frame) => match result {
            Ok(()) => true,
            Err(e) => {
                debug!("[write] {} {}: {}", connection.id(), connection.remote_addr(), e);
                false
            }
        },
    }
}
