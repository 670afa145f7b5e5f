//! Length-prefixed TCP transport

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, error, info};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::core::SharedAcceptor;
use crate::protocol::PacketCodec;

/// Accept TCP clients forever, one task per connection
pub async fn serve_tcp(listener: TcpListener, acceptor: SharedAcceptor, max_frame_size: usize) {
    if let Ok(addr) = listener.local_addr() {
        info!("TCP transport listening on {}", addr);
    }
    loop {
        match listener.accept().await {
            Ok((socket, remote_addr)) => {
                tokio::spawn(handle_tcp_client(socket, remote_addr, acceptor.clone(), max_frame_size));
            }
            Err(e) => {
                // Usually fd exhaustion; back off instead of spinning
                error!("TCP accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Drive one TCP client through the acceptor until it disconnects
pub async fn handle_tcp_client(
    socket: TcpStream,
    remote_addr: SocketAddr,
    acceptor: SharedAcceptor,
    max_frame_size: usize,
) {
    if let Err(e) = socket.set_nodelay(true) {
        debug!("TCP_NODELAY failed for {}: {}", remote_addr, e);
    }
    let (reader, writer) = socket.into_split();
    let inbound = FramedRead::new(reader, PacketCodec::new(max_frame_size));
    let sink = FramedWrite::new(writer, PacketCodec::new(max_frame_size));

    let (conn, outbound) = acceptor.accept(remote_addr);
    acceptor.serve(conn, outbound, inbound, sink).await;
}
