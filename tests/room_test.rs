use roomcast::core::{Acceptor, AcceptorConfig};
use roomcast::protocol::Message;
use tokio::sync::mpsc::error::TryRecvError;

fn acceptor() -> Acceptor {
    Acceptor::new(AcceptorConfig::default())
}

#[tokio::test]
async fn test_broadcast_reaches_only_members() {
    let acceptor = acceptor();
    let (alice, mut alice_rx) = acceptor.accept("127.0.0.1:10001".parse().unwrap());
    let (_bob, mut bob_rx) = acceptor.accept("127.0.0.1:10002".parse().unwrap());

    alice.join("lobby");
    acceptor.broadcast_to("lobby", "news", &"hello", "");
    // Queries are answered in submission order, so the broadcast has been applied
    assert_eq!(acceptor.clients_by_room("lobby").await.unwrap().len(), 1);

    let frame = alice_rx.try_recv().unwrap();
    assert_eq!(
        acceptor.rooms().members("lobby").await.unwrap()[0].id(),
        alice.id()
    );
    assert_eq!(
        roomcast::protocol::decode(&frame, Default::default()).unwrap(),
        Message::new("news", "\"hello\"", "")
    );
    assert_eq!(bob_rx.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn test_join_after_broadcast_misses_it() {
    let acceptor = acceptor();
    let (alice, mut alice_rx) = acceptor.accept("127.0.0.1:10003".parse().unwrap());

    acceptor.broadcast_to("late", "news", &1, "");
    alice.join("late");
    acceptor.clients_by_room("late").await.unwrap();
    assert_eq!(alice_rx.try_recv(), Err(TryRecvError::Empty));

    alice.broadcast_to("late", "news", &2, "");
    acceptor.clients_by_room("late").await.unwrap();
    assert_eq!(&alice_rx.try_recv().unwrap()[..], b"[\"news\",2]");
}

#[tokio::test]
async fn test_leave_all_removes_every_membership() {
    let acceptor = acceptor();
    let (conn, mut rx) = acceptor.accept("127.0.0.1:10004".parse().unwrap());

    for room in ["a", "b", "c"] {
        conn.join(room);
    }
    let mut rooms = conn.rooms().await.unwrap();
    rooms.sort();
    assert_eq!(rooms, vec!["a", "b", "c"]);

    conn.leave_all();
    assert!(conn.rooms().await.unwrap().is_empty());
    for room in ["a", "b", "c"] {
        acceptor.broadcast_to(room, "gone", &room, "");
        assert!(acceptor.clients_by_room(room).await.unwrap().is_empty());
    }
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    assert!(acceptor.rooms().list_rooms().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_leave_is_idempotent() {
    let acceptor = acceptor();
    let (conn, _rx) = acceptor.accept("127.0.0.1:10005".parse().unwrap());

    conn.leave("never-joined");
    conn.join("x");
    conn.leave("x");
    conn.leave("x");
    assert!(conn.rooms().await.unwrap().is_empty());
    assert!(acceptor.clients_by_room("x").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_slow_member_does_not_block_broadcast() {
    let acceptor = Acceptor::new(AcceptorConfig {
        outbound_capacity: 1,
        ..AcceptorConfig::default()
    });
    let (slow, mut slow_rx) = acceptor.accept("127.0.0.1:10006".parse().unwrap());
    let (fast, mut fast_rx) = acceptor.accept("127.0.0.1:10007".parse().unwrap());
    slow.join("r");
    fast.join("r");

    acceptor.broadcast_to("r", "n", &1, "");
    acceptor.clients_by_room("r").await.unwrap();
    assert!(fast_rx.try_recv().is_ok());

    acceptor.broadcast_to("r", "n", &2, "");
    acceptor.clients_by_room("r").await.unwrap();
    assert_eq!(&fast_rx.try_recv().unwrap()[..], b"[\"n\",2]");

    // The stalled member kept its first frame and dropped the second
    assert_eq!(slow.dropped_messages(), 1);
    assert_eq!(&slow_rx.try_recv().unwrap()[..], b"[\"n\",1]");
    assert_eq!(slow_rx.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn test_join_after_teardown_is_refused() {
    let acceptor = acceptor();
    let (conn, outbound) = acceptor.accept("127.0.0.1:10008".parse().unwrap());

    // Peer hangs up immediately
    let inbound = futures_util::stream::empty::<Result<bytes::Bytes, std::convert::Infallible>>();
    let sink = futures_util::sink::drain::<bytes::Bytes>();
    acceptor.serve(conn.clone(), outbound, inbound, sink).await;
    assert!(conn.is_closed());

    // A handler task finishing late
    conn.join("lobby");
    assert!(acceptor.clients_by_room("lobby").await.unwrap().is_empty());
    assert!(conn.rooms().await.unwrap().is_empty());
    assert!(acceptor.rooms().list_rooms().await.unwrap().is_empty());
    assert!(acceptor.clients().await.unwrap().is_empty());
}
