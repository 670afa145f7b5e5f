//! Event dispatch table
//!
//! Handlers are async functions taking the connection plus, optionally, a typed
//! argument and the request correlation id. The shape is picked once when the
//! handler is registered (see [`IntoHandler`]), so dispatch does no inspection
//! beyond a map lookup.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::constants::{EVENT_CONNECTION, EVENT_DISCONNECTION};
use crate::core::connection::ConnectionRef;
use crate::error::{Result, RoomcastError};
use crate::protocol::Message;

/// Boxed future returned by every registered handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type BoxedHandler = Arc<dyn Fn(ConnectionRef, &Message) -> HandlerFuture + Send + Sync>;

/// Which inputs a handler takes beyond the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerShape {
    Bare,
    WithArgs,
    WithArgsAndId,
}

/// A registered handler, tagged with its call shape
#[derive(Clone)]
pub enum Handler {
    /// `(connection)`
    Bare(BoxedHandler),
    /// `(connection, args)`
    WithArgs(BoxedHandler),
    /// `(connection, args, correlation_id)`
    WithArgsAndId(BoxedHandler),
}

impl Handler {
    pub fn shape(&self) -> HandlerShape {
        match self {
            Handler::Bare(_) => HandlerShape::Bare,
            Handler::WithArgs(_) => HandlerShape::WithArgs,
            Handler::WithArgsAndId(_) => HandlerShape::WithArgsAndId,
        }
    }

    /// Build the handler future for a decoded message
    pub fn call(&self, connection: ConnectionRef, message: &Message) -> HandlerFuture {
        match self {
            Handler::Bare(f) | Handler::WithArgs(f) | Handler::WithArgsAndId(f) => f(connection, message),
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handler").field(&self.shape()).finish()
    }
}

/// Marker for `(connection)` handlers
pub struct Bare;
/// Marker for `(connection, args)` handlers
pub struct WithArgs<T>(PhantomData<fn() -> T>);
/// Marker for `(connection, args, correlation_id)` handlers
pub struct WithArgsAndId<T>(PhantomData<fn() -> T>);

/// Conversion from an async function into a [`Handler`].
///
/// Implemented only for the three supported shapes, so a function with any
/// other signature is rejected by the compiler at the `on` call site.
/// Closures need their parameter types spelled out so the shape can be inferred:
///
/// ```ignore
/// acceptor.on("chat", |conn: ConnectionRef, msg: Chat, id: String| async move {
///     conn.emit("chat", &msg, &id);
/// })?;
/// ```
pub trait IntoHandler<M>: Send + Sync + 'static {
    fn into_handler(self) -> Handler;
}

impl<F, Fut> IntoHandler<Bare> for F
where
    F: Fn(ConnectionRef) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn into_handler(self) -> Handler {
        Handler::Bare(Arc::new(
            move |connection: ConnectionRef, _message: &Message| -> HandlerFuture {
                Box::pin(self(connection))
            },
        ))
    }
}

impl<F, Fut, T> IntoHandler<WithArgs<T>> for F
where
    F: Fn(ConnectionRef, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    T: DeserializeOwned + Default + Send + 'static,
{
    fn into_handler(self) -> Handler {
        Handler::WithArgs(Arc::new(move |connection: ConnectionRef, message: &Message| -> HandlerFuture {
            let args = parse_args::<T>(message);
            Box::pin(self(connection, args))
        }))
    }
}

impl<F, Fut, T> IntoHandler<WithArgsAndId<T>> for F
where
    F: Fn(ConnectionRef, T, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    T: DeserializeOwned + Default + Send + 'static,
{
    fn into_handler(self) -> Handler {
        Handler::WithArgsAndId(Arc::new(move |connection: ConnectionRef, message: &Message| -> HandlerFuture {
            let args = parse_args::<T>(message);
            Box::pin(self(connection, args, message.id.clone()))
        }))
    }
}

/// Deserialize the raw JSON args, falling back to `T::default()`.
///
/// A bad payload must not swallow the event, so failures are logged and the
/// handler still runs.
fn parse_args<T: DeserializeOwned + Default>(message: &Message) -> T {
    if !message.has_args() {
        return T::default();
    }
    match serde_json::from_str(message.args.trim()) {
        Ok(args) => args,
        Err(e) => {
            let err = RoomcastError::PayloadDecode(e.to_string());
            warn!("[dispatch] '{}': {}, using default args", message.event, err);
            T::default()
        }
    }
}

/// Internally triggered pseudo-events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Connection,
    Disconnection,
}

impl Lifecycle {
    pub fn event(self) -> &'static str {
        match self {
            Lifecycle::Connection => EVENT_CONNECTION,
            Lifecycle::Disconnection => EVENT_DISCONNECTION,
        }
    }
}

/// Event name -> handler map. Written at setup, read on every dispatch.
#[derive(Default)]
pub struct EventTable {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event`; a later registration replaces an earlier one
    pub fn on<M, H>(&self, event: &str, handler: H) -> Result<()>
    where
        H: IntoHandler<M>,
    {
        if event.is_empty() {
            return Err(RoomcastError::InvalidEvent);
        }
        self.insert(event, handler.into_handler());
        Ok(())
    }

    pub(crate) fn insert(&self, event: &str, handler: Handler) {
        let shape = handler.shape();
        if self.handlers.write().insert(event.to_string(), handler).is_some() {
            debug!("[events] replaced handler for '{}' ({:?})", event, shape);
        } else {
            debug!("[events] registered '{}' ({:?})", event, shape);
        }
    }

    pub fn shape(&self, event: &str) -> Option<HandlerShape> {
        self.handlers.read().get(event).map(Handler::shape)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.handlers.read().contains_key(event)
    }

    /// Run the handler for `message.event` on its own task.
    ///
    /// Unregistered events are dropped and `None` is returned.
    pub fn dispatch(&self, connection: &ConnectionRef, message: &Message) -> Option<JoinHandle<()>> {
        let handler = self.handlers.read().get(&message.event).cloned();
        match handler {
            Some(handler) => {
                trace!("[dispatch] '{}' from {}", message.event, connection.id());
                Some(tokio::spawn(handler.call(connection.clone(), message)))
            }
            None => {
                trace!("[dispatch] no handler for '{}' from {}", message.event, connection.id());
                None
            }
        }
    }

    /// Dispatch `connection` / `disconnection` with no args and no correlation id
    pub fn dispatch_lifecycle(&self, connection: &ConnectionRef, lifecycle: Lifecycle) -> Option<JoinHandle<()>> {
        self.dispatch(connection, &Message::new(lifecycle.event(), "", ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::acceptor::{Acceptor, AcceptorConfig};
    use serde::Deserialize;
    use tokio::sync::mpsc;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Chat {
        text: String,
    }

    fn connection() -> (ConnectionRef, mpsc::Receiver<bytes::Bytes>) {
        let acceptor = Acceptor::new(AcceptorConfig::default());
        acceptor.accept("127.0.0.1:5555".parse().unwrap())
    }

    #[tokio::test]
    async fn test_shapes_are_classified_at_registration() {
        let table = EventTable::new();
        table.on("a", |_conn: ConnectionRef| async {}).unwrap();
        table.on("b", |_conn: ConnectionRef, _n: i64| async {}).unwrap();
        table
            .on("c", |_conn: ConnectionRef, _chat: Chat, _id: String| async {})
            .unwrap();

        assert_eq!(table.shape("a"), Some(HandlerShape::Bare));
        assert_eq!(table.shape("b"), Some(HandlerShape::WithArgs));
        assert_eq!(table.shape("c"), Some(HandlerShape::WithArgsAndId));
        assert_eq!(table.shape("d"), None);
    }

    #[tokio::test]
    async fn test_empty_event_name_is_rejected() {
        let table = EventTable::new();
        let result = table.on("", |_conn: ConnectionRef| async {});
        assert!(matches!(result, Err(RoomcastError::InvalidEvent)));
        assert!(!table.contains(""));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let table = EventTable::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = tx.clone();
        table
            .on("x", move |_conn: ConnectionRef| {
                let first = first.clone();
                async move {
                    let _ = first.send("first");
                }
            })
            .unwrap();
        table
            .on("x", move |_conn: ConnectionRef, _n: i64| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send("second");
                }
            })
            .unwrap();

        let (conn, _out) = connection();
        table.dispatch(&conn, &Message::new("x", "1", "")).unwrap().await.unwrap();
        assert_eq!(rx.recv().await, Some("second"));
        assert_eq!(table.shape("x"), Some(HandlerShape::WithArgs));
    }

    #[tokio::test]
    async fn test_args_and_id_are_delivered() {
        let table = EventTable::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        table
            .on("chat", move |_conn: ConnectionRef, chat: Chat, id: String| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send((chat, id));
                }
            })
            .unwrap();

        let (conn, _out) = connection();
        let message = Message::new("chat", r#"{"text":"hi"}"#, "req-1");
        table.dispatch(&conn, &message).unwrap().await.unwrap();
        let (chat, id) = rx.recv().await.unwrap();
        assert_eq!(chat, Chat { text: "hi".into() });
        assert_eq!(id, "req-1");
    }

    #[tokio::test]
    async fn test_bad_payload_still_invokes_with_default() {
        let table = EventTable::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        table
            .on("chat", move |_conn: ConnectionRef, chat: Chat| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(chat);
                }
            })
            .unwrap();

        let (conn, _out) = connection();
        table
            .dispatch(&conn, &Message::new("chat", "[1,2,3]", ""))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), Chat::default());
    }

    #[tokio::test]
    async fn test_unregistered_event_is_dropped() {
        let table = EventTable::new();
        let (conn, _out) = connection();
        assert!(table.dispatch(&conn, &Message::new("nobody", "", "")).is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_dispatch_has_no_args_or_id() {
        let table = EventTable::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        table
            .on(EVENT_CONNECTION, move |_conn: ConnectionRef, args: Option<i64>, id: String| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send((args, id));
                }
            })
            .unwrap();

        let (conn, _out) = connection();
        table
            .dispatch_lifecycle(&conn, Lifecycle::Connection)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), (None, String::new()));
        assert!(table.dispatch_lifecycle(&conn, Lifecycle::Disconnection).is_none());
    }
}
