//! Room membership actor
//!
//! One task owns both the room -> members map and the member -> rooms index.
//! Joins, leaves and broadcasts are queued to it and applied in arrival order,
//! so membership is never read while it is being changed.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use log::{debug, trace, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::core::connection::{Connection, ConnectionRef};
use crate::error::{Result, RoomcastError};
use crate::protocol::Codec;

/// Represents a broadcast room
#[derive(Debug, Clone)]
pub struct Room {
    /// Name chosen by the joining code
    pub name: String,
    /// Members keyed by connection id
    pub members: HashMap<String, ConnectionRef>,
}

impl Room {
    pub fn new(name: String) -> Self {
        Self {
            name,
            members: HashMap::new(),
        }
    }

    /// Adds a member; returns `false` when it was already present
    pub fn add_member(&mut self, connection: ConnectionRef) -> bool {
        self.members
            .insert(connection.id().to_string(), connection)
            .is_none()
    }

    pub fn remove_member(&mut self, connection_id: &str) -> bool {
        self.members.remove(connection_id).is_some()
    }

    pub fn has_member(&self, connection_id: &str) -> bool {
        self.members.contains_key(connection_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

enum RoomCommand {
    Join {
        room: String,
        connection: ConnectionRef,
    },
    Leave {
        room: String,
        connection_id: String,
    },
    LeaveAll {
        connection_id: String,
    },
    Broadcast {
        room: String,
        frame: Bytes,
    },
    Members {
        room: String,
        reply: oneshot::Sender<Vec<ConnectionRef>>,
    },
    RoomsOf {
        connection_id: String,
        reply: oneshot::Sender<Vec<String>>,
    },
    List {
        reply: oneshot::Sender<Vec<(String, usize)>>,
    },
}

/// State owned by the actor task
#[derive(Default)]
struct RoomState {
    rooms: HashMap<String, Room>,
    /// connection id -> rooms joined, for leaving everything at once
    client_rooms: HashMap<String, HashSet<String>>,
}

impl RoomState {
    fn apply(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join { room, connection } => self.join(room, connection),
            RoomCommand::Leave {
                room,
                connection_id,
            } => self.leave(&room, &connection_id),
            RoomCommand::LeaveAll { connection_id } => self.leave_all(&connection_id),
            RoomCommand::Broadcast { room, frame } => self.broadcast(&room, frame),
            RoomCommand::Members { room, reply } => {
                let members = self
                    .rooms
                    .get(&room)
                    .map(|r| r.members.values().cloned().collect())
                    .unwrap_or_default();
                let _ = reply.send(members);
            }
            RoomCommand::RoomsOf {
                connection_id,
                reply,
            } => {
                let rooms = self
                    .client_rooms
                    .get(&connection_id)
                    .map(|rooms| rooms.iter().cloned().collect())
                    .unwrap_or_default();
                let _ = reply.send(rooms);
            }
            RoomCommand::List { reply } => {
                let rooms = self
                    .rooms
                    .values()
                    .map(|room| (room.name.clone(), room.member_count()))
                    .collect();
                let _ = reply.send(rooms);
            }
        }
    }

    fn join(&mut self, room: String, connection: ConnectionRef) {
        let connection_id = connection.id().to_string();
        // Closed before this join was applied; its leave_all has already run or is queued
        if connection.is_closed() {
            debug!("[room][join] ignoring closed connection {} for {}", connection_id, room);
            return;
        }
        let entry = self
            .rooms
            .entry(room.clone())
            .or_insert_with(|| Room::new(room.clone()));
        if entry.add_member(connection) {
            debug!("[room][join] {} {}", room, connection_id);
        }
        self.client_rooms
            .entry(connection_id)
            .or_default()
            .insert(room);
    }

    fn leave(&mut self, room: &str, connection_id: &str) {
        self.remove_from_room(room, connection_id);
        if let Some(rooms) = self.client_rooms.get_mut(connection_id) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.client_rooms.remove(connection_id);
            }
        }
    }

    fn leave_all(&mut self, connection_id: &str) {
        let rooms = self.client_rooms.remove(connection_id).unwrap_or_default();
        for room in &rooms {
            self.remove_from_room(room, connection_id);
        }
        debug!("[room][leave_all] {} left {} rooms", connection_id, rooms.len());
    }

    fn remove_from_room(&mut self, room: &str, connection_id: &str) {
        if let Some(entry) = self.rooms.get_mut(room) {
            if entry.remove_member(connection_id) {
                debug!("[room][leave] {} {}", room, connection_id);
            }
            if entry.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    fn broadcast(&self, room: &str, frame: Bytes) {
        let Some(entry) = self.rooms.get(room) else {
            trace!("[room][broadcast] no such room: {}", room);
            return;
        };
        let mut delivered = 0;
        for connection in entry.members.values() {
            if connection.send(frame.clone()) {
                delivered += 1;
            }
        }
        trace!(
            "[room][broadcast] {} delivered to {}/{}",
            room,
            delivered,
            entry.member_count()
        );
    }
}

/// Handle to a room actor. Cloning is cheap; every clone talks to the same task.
#[derive(Clone)]
pub struct RoomManager {
    tx: mpsc::UnboundedSender<RoomCommand>,
    codec: Codec,
}

impl RoomManager {
    /// Spawn the actor task. Must be called from within a Tokio runtime.
    ///
    /// The task runs until every handle is dropped.
    pub fn new(codec: Codec) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut state = RoomState::default();
            while let Some(command) = rx.recv().await {
                state.apply(command);
            }
            debug!("[room] manager stopped");
        });
        Self { tx, codec }
    }

    fn submit(&self, command: RoomCommand) {
        if self.tx.send(command).is_err() {
            warn!("[room] manager is not running, command dropped");
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> RoomCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| RoomcastError::ActorUnavailable("room"))?;
        response
            .await
            .map_err(|_| RoomcastError::ActorUnavailable("room"))
    }

    /// Add a connection to a room, creating the room on first join
    pub fn join(&self, room: &str, connection: &ConnectionRef) {
        self.submit(RoomCommand::Join {
            room: room.to_string(),
            connection: connection.clone(),
        });
    }

    pub fn leave(&self, room: &str, connection: &Connection) {
        self.submit(RoomCommand::Leave {
            room: room.to_string(),
            connection_id: connection.id().to_string(),
        });
    }

    /// Remove a connection from every room it belongs to in one step
    pub fn leave_all(&self, connection: &Connection) {
        self.submit(RoomCommand::LeaveAll {
            connection_id: connection.id().to_string(),
        });
    }

    /// Encode once and queue the frame to every member at the time the broadcast is applied
    pub fn broadcast_to<T: Serialize + ?Sized>(&self, room: &str, event: &str, args: &T, id: &str) {
        match self.codec.encode_with(event, args, id) {
            Ok(frame) => self.broadcast_frame(room, frame),
            Err(e) => warn!("[room][broadcast] encode error for '{}' to {}: {}", event, room, e),
        }
    }

    pub fn broadcast_frame(&self, room: &str, frame: Bytes) {
        self.submit(RoomCommand::Broadcast {
            room: room.to_string(),
            frame,
        });
    }

    /// Snapshot of a room's members; empty when the room does not exist
    pub async fn members(&self, room: &str) -> Result<Vec<ConnectionRef>> {
        let room = room.to_string();
        self.request(|reply| RoomCommand::Members { room, reply }).await
    }

    pub async fn rooms_of(&self, connection_id: &str) -> Result<Vec<String>> {
        let connection_id = connection_id.to_string();
        self.request(|reply| RoomCommand::RoomsOf {
            connection_id,
            reply,
        })
        .await
    }

    /// Non-empty rooms with their member counts
    pub async fn list_rooms(&self) -> Result<Vec<(String, usize)>> {
        self.request(|reply| RoomCommand::List { reply }).await
    }
}
