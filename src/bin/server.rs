use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

use roomcast::config::ServerConfig;
use roomcast::constants::{EVENT_CONNECTION, EVENT_DISCONNECTION};
use roomcast::core::{Acceptor, AcceptorConfig, ConnectionRef, Responder};
use roomcast::error::Result;
use roomcast::handlers::{routes, serve_tcp};

/// Chat line sent to a room
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
struct ChatLine {
    room: String,
    text: String,
    #[serde(default)]
    from: String,
}

#[tokio::main]
async fn main() {
    // Initialize env
    match dotenvy::dotenv() {
        Ok(_) => info!("Environment variables loaded from .env file"),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    // Initialize logging
    env_logger::init();

    if let Err(e) = run().await {
        error!("Server failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = ServerConfig::from_env()?;
    info!(
        "Configuration: host={}, port={}, ws_path=/{}, tcp_port={:?}, send={}, receive={}",
        config.host,
        config.port,
        config.ws_path,
        config.tcp_port,
        config.transport.send,
        config.transport.receive
    );

    let acceptor = Arc::new(Acceptor::new(AcceptorConfig::from(&config)));
    register_demo_handlers(&acceptor)?;

    if let Some(tcp_addr) = config.tcp_addr()? {
        let listener = TcpListener::bind(tcp_addr).await?;
        tokio::spawn(serve_tcp(listener, acceptor.clone(), config.max_frame_size));
    }

    let addr = config.socket_addr()?;
    info!("Starting Roomcast server on {}", addr);
    warp::serve(routes(acceptor, &config)).run(addr).await;
    Ok(())
}

fn register_demo_handlers(acceptor: &Acceptor) -> Result<()> {
    acceptor.on(EVENT_CONNECTION, |conn: ConnectionRef| async move {
        info!("Client connected: {} from {}", conn.id(), conn.remote_addr());
    })?;

    acceptor.on(EVENT_DISCONNECTION, |conn: ConnectionRef| async move {
        info!("Client disconnected: {} (delay {}ms)", conn.id(), conn.delay());
    })?;

    acceptor.on("join", |conn: ConnectionRef, room: String, id: String| async move {
        let responder = Responder::new(conn.clone(), "join").with_identity(id);
        if room.is_empty() {
            responder.fail("room name required");
            return;
        }
        conn.join(&room);
        responder.success(serde_json::json!({ "room": room }));
    })?;

    acceptor.on("leave", |conn: ConnectionRef, room: String| async move {
        conn.leave(&room);
    })?;

    acceptor.on("rooms", |conn: ConnectionRef, _args: (), id: String| async move {
        match conn.rooms().await {
            Ok(rooms) => conn.emit("rooms", &rooms, &id),
            Err(e) => warn!("Failed to list rooms for {}: {}", conn.id(), e),
        }
    })?;

    acceptor.on("chat", |conn: ConnectionRef, line: ChatLine, id: String| async move {
        if line.room.is_empty() || line.text.is_empty() {
            return;
        }
        let line = ChatLine {
            from: conn.id().to_string(),
            ..line
        };
        conn.broadcast_to(&line.room, "chat", &line, &id);
    })?;

    Ok(())
}
