//! Connection registry actor
//!
//! Owns the connection id -> connection map for one endpoint. Like the room
//! actor, every change and every read goes through its single control loop.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, trace, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::core::connection::ConnectionRef;
use crate::error::{Result, RoomcastError};
use crate::protocol::Codec;

enum RegistryCommand {
    Join(ConnectionRef),
    Leave(ConnectionRef),
    Get {
        id: String,
        reply: oneshot::Sender<Option<ConnectionRef>>,
    },
    All {
        reply: oneshot::Sender<Vec<ConnectionRef>>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    Emit {
        id: String,
        frame: Bytes,
    },
    Broadcast {
        frame: Bytes,
    },
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<String, ConnectionRef>,
}

impl RegistryState {
    fn apply(&mut self, command: RegistryCommand) {
        match command {
            RegistryCommand::Join(connection) => {
                let id = connection.id().to_string();
                if connection.is_closed() {
                    debug!("[registry] ignoring join of closed connection {}", id);
                    return;
                }
                if let Some(previous) = self.connections.insert(id.clone(), connection) {
                    // Ids are random; a clash with a different live connection is a bug worth seeing
                    if !previous.is_closed() {
                        warn!("[registry] connection id reused while still open: {}", id);
                    }
                }
                info!("[registry] joined {} (connections: {})", id, self.connections.len());
            }
            RegistryCommand::Leave(connection) => {
                let id = connection.id();
                let same = self
                    .connections
                    .get(id)
                    .map_or(false, |current| Arc::ptr_eq(current, &connection));
                if same {
                    self.connections.remove(id);
                    info!("[registry] left {} (connections: {})", id, self.connections.len());
                }
            }
            RegistryCommand::Get { id, reply } => {
                let _ = reply.send(self.connections.get(&id).cloned());
            }
            RegistryCommand::All { reply } => {
                let _ = reply.send(self.connections.values().cloned().collect());
            }
            RegistryCommand::Count { reply } => {
                let _ = reply.send(self.connections.len());
            }
            RegistryCommand::Emit { id, frame } => match self.connections.get(&id) {
                Some(connection) => {
                    connection.send(frame);
                }
                None => trace!("[registry] emit to unknown connection {}", id),
            },
            RegistryCommand::Broadcast { frame } => {
                let delivered = self
                    .connections
                    .values()
                    .filter(|connection| connection.send(frame.clone()))
                    .count();
                trace!(
                    "[registry] broadcast delivered to {}/{}",
                    delivered,
                    self.connections.len()
                );
            }
        }
    }
}

/// Handle to a registry actor
#[derive(Clone)]
pub struct Registry {
    tx: mpsc::UnboundedSender<RegistryCommand>,
    codec: Codec,
}

impl Registry {
    /// Spawn the actor task. Must be called from within a Tokio runtime.
    pub fn new(codec: Codec) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut state = RegistryState::default();
            while let Some(command) = rx.recv().await {
                state.apply(command);
            }
            debug!("[registry] stopped");
        });
        Self { tx, codec }
    }

    fn submit(&self, command: RegistryCommand) {
        if self.tx.send(command).is_err() {
            warn!("[registry] not running, command dropped");
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| RoomcastError::ActorUnavailable("registry"))?;
        response
            .await
            .map_err(|_| RoomcastError::ActorUnavailable("registry"))
    }

    pub fn join(&self, connection: &ConnectionRef) {
        self.submit(RegistryCommand::Join(connection.clone()));
    }

    /// Remove a connection; a newer connection registered under the same id is left alone
    pub fn leave(&self, connection: &ConnectionRef) {
        self.submit(RegistryCommand::Leave(connection.clone()));
    }

    pub async fn get(&self, id: &str) -> Result<Option<ConnectionRef>> {
        let id = id.to_string();
        self.request(|reply| RegistryCommand::Get { id, reply }).await
    }

    /// Snapshot of every registered connection
    pub async fn all(&self) -> Result<Vec<ConnectionRef>> {
        self.request(|reply| RegistryCommand::All { reply }).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.request(|reply| RegistryCommand::Count { reply }).await
    }

    /// Emit to one connection by id; unknown ids are ignored
    pub fn emit<T: Serialize + ?Sized>(&self, id: &str, event: &str, args: &T, correlation_id: &str) {
        match self.codec.encode_with(event, args, correlation_id) {
            Ok(frame) => self.submit(RegistryCommand::Emit {
                id: id.to_string(),
                frame,
            }),
            Err(e) => warn!("[registry][emit] encode error for '{}' to {}: {}", event, id, e),
        }
    }

    /// Encode once and queue the frame to every registered connection
    pub fn broadcast_to_all<T: Serialize + ?Sized>(&self, event: &str, args: &T, correlation_id: &str) {
        match self.codec.encode_with(event, args, correlation_id) {
            Ok(frame) => self.submit(RegistryCommand::Broadcast { frame }),
            Err(e) => warn!("[registry][broadcast] encode error for '{}': {}", event, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core::acceptor::{Acceptor, AcceptorConfig};

    #[tokio::test]
    async fn test_join_get_leave() {
        let acceptor = Acceptor::new(AcceptorConfig::default());
        let registry = acceptor.registry();
        let (conn, _rx) = acceptor.accept("127.0.0.1:9000".parse().unwrap());

        registry.join(&conn);
        registry.join(&conn);
        assert_eq!(registry.count().await.unwrap(), 1);
        assert!(registry.get(conn.id()).await.unwrap().is_some());

        registry.leave(&conn);
        registry.leave(&conn);
        assert!(registry.get(conn.id()).await.unwrap().is_none());
        assert!(registry.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emit_to_unknown_id_is_noop() {
        let acceptor = Acceptor::new(AcceptorConfig::default());
        let (conn, _rx) = acceptor.accept("127.0.0.1:9001".parse().unwrap());
        acceptor.registry().join(&conn);
        acceptor.registry().emit("nobody", "hello", &1, "");
        assert_eq!(acceptor.registry().count().await.unwrap(), 1);
        assert_eq!(conn.queued(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_survives_mutation() {
        let acceptor = Acceptor::new(AcceptorConfig::default());
        let mut keep = Vec::new();
        for port in 0..10u16 {
            let (conn, rx) = acceptor.accept(format!("127.0.0.1:{}", 7000 + port).parse().unwrap());
            acceptor.registry().join(&conn);
            keep.push((conn, rx));
        }
        let snapshot = acceptor.registry().all().await.unwrap();
        for (conn, _) in &keep {
            acceptor.registry().leave(conn);
        }
        assert_eq!(snapshot.len(), 10);
        assert_eq!(acceptor.registry().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_connection_is_not_registered() {
        let acceptor = Acceptor::new(AcceptorConfig::default());
        let (conn, _rx) = acceptor.accept("127.0.0.1:9002".parse().unwrap());
        conn.close();
        acceptor.registry().join(&conn);
        assert!(acceptor.registry().get(conn.id()).await.unwrap().is_none());
        assert_eq!(acceptor.registry().count().await.unwrap(), 0);
    }
}
