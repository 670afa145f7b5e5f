use std::convert::Infallible;
use std::future;
use std::net::{Ipv4Addr, SocketAddr};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use warp::http::HeaderMap;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use crate::config::{ServerConfig, WsMessageType};
use crate::core::SharedAcceptor;

/// WebSocket upgrade route at `/{ws_path}`
pub fn ws_route(
    acceptor: SharedAcceptor,
    config: &ServerConfig,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let header = config.remote_addr_header.clone();
    let message_type = config.ws_message_type;

    warp::path(config.ws_path.clone())
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::addr::remote())
        .and(warp::header::headers_cloned())
        .and(with_acceptor(acceptor))
        .map(
            move |ws: Ws, peer: Option<SocketAddr>, headers: HeaderMap, acceptor: SharedAcceptor| {
                let remote_addr = resolve_remote_addr(&headers, header.as_deref(), peer);
                debug!("New websocket connection from {}", remote_addr);
                ws.on_upgrade(move |socket| handle_ws_client(socket, remote_addr, acceptor, message_type))
            },
        )
}

/// Health check route
pub fn health_route() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("health").and(warp::path::end()).map(|| "OK")
}

/// WebSocket and health routes combined
pub fn routes(
    acceptor: SharedAcceptor,
    config: &ServerConfig,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    ws_route(acceptor, config).or(health_route())
}

// Helper function to include the acceptor in request
fn with_acceptor(
    acceptor: SharedAcceptor,
) -> impl Filter<Extract = (SharedAcceptor,), Error = Infallible> + Clone {
    warp::any().map(move || acceptor.clone())
}

/// Handle an upgraded WebSocket connection until it closes
pub async fn handle_ws_client(
    ws: WebSocket,
    remote_addr: SocketAddr,
    acceptor: SharedAcceptor,
    message_type: WsMessageType,
) {
    let (conn, outbound) = acceptor.accept(remote_addr);
    let (ws_tx, ws_rx) = ws.split();

    // Close frames end the stream; control frames are answered by the socket itself
    let inbound = ws_rx
        .take_while(|result| future::ready(!matches!(result, Ok(msg) if msg.is_close())))
        .filter_map(|result| {
            future::ready(match result {
                Ok(msg) if msg.is_text() || msg.is_binary() => Some(Ok(Bytes::from(msg.into_bytes()))),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        });

    let sink = ws_tx.with(move |frame: Bytes| future::ready(Ok::<_, warp::Error>(to_ws_message(frame, message_type))));

    acceptor
        .serve(conn, outbound, Box::pin(inbound), Box::pin(sink))
        .await;
}

/// Text frames must be UTF-8; anything else goes out as binary
fn to_ws_message(frame: Bytes, message_type: WsMessageType) -> Message {
    match message_type {
        WsMessageType::Binary => Message::binary(frame.to_vec()),
        WsMessageType::Text => match String::from_utf8(frame.to_vec()) {
            Ok(text) => Message::text(text),
            Err(e) => Message::binary(e.into_bytes()),
        },
    }
}

/// Client address from the configured proxy header (`ip:port`), else the socket peer
pub fn resolve_remote_addr(
    headers: &HeaderMap,
    header: Option<&str>,
    peer: Option<SocketAddr>,
) -> SocketAddr {
    if let Some(name) = header {
        match headers.get(name).map(|value| value.to_str()) {
            Some(Ok(value)) => match value.trim().parse() {
                Ok(addr) => return addr,
                Err(_) => warn!("Ignoring malformed {} header: {}", name, value),
            },
            Some(Err(_)) => warn!("Ignoring non-ASCII {} header", name),
            None => {}
        }
    }
    peer.unwrap_or_else(|| {
        info!("Peer address unavailable, using unspecified address");
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    })
}
