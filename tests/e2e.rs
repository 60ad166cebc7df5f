//! End-to-end tunnel tests: two real peers relayed through a real room over
//! loopback QUIC. The room side is wired the same way the daemon wires it:
//! accept, register, dispatch `tunnel.connect`, unregister on close.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use room_proto::{ConnectRequest, ConnectRequestWithOrigin, Identity, Keypair, Method};
use room_registry::EndpointRegistry;
use room_transport::{TransportError, TransportResult};
use room_transport_quic::{QuicConfig, RoomConnection, RoomConnector, RoomListener};
use room_tunnel::ConnectHandler;

const WAIT: Duration = Duration::from_secs(5);

/// Runs a room with an open admission policy and reports each admitted peer
/// on the returned channel, so tests can sequence their dials.
fn spawn_room(keypair: &Keypair) -> (SocketAddr, mpsc::UnboundedReceiver<Identity>) {
    let addr = "127.0.0.1:0".parse().unwrap();
    let listener = RoomListener::bind(addr, keypair, &QuicConfig::default()).unwrap();
    let addr = listener.local_addr().unwrap();

    let registry = EndpointRegistry::new();
    let handler = ConnectHandler::new(keypair.identity(), Arc::new(registry.clone()));
    let (joined_tx, joined_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(connection) = listener.accept().await {
            let registry = registry.clone();
            let handler = handler.clone();
            let joined_tx = joined_tx.clone();
            tokio::spawn(async move {
                let peer = connection.identity();
                let endpoint = connection.endpoint();
                registry.register(endpoint.clone());
                let _ = joined_tx.send(peer);

                while let Ok(Some(call)) = connection.next_call().await {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let _ = handler.handle_connect(Some(peer), call).await;
                    });
                }

                registry.unregister_endpoint(&endpoint);
            });
        }
    });

    (addr, joined_rx)
}

async fn join_room(keypair: &Keypair, addr: SocketAddr, room: Identity) -> RoomConnection {
    // The connector can be dropped once connected; the connection keeps the
    // underlying endpoint alive.
    let connector = RoomConnector::new(keypair, &QuicConfig::default()).unwrap();
    timeout(WAIT, connector.connect(addr, room))
        .await
        .expect("dial timed out")
        .unwrap()
}

/// Accepts one tunnel call, echoes until EOF, then waits for `done` before
/// letting the connection go. Returns the origin the forwarded request named.
fn serve_one_echo(
    connection: RoomConnection,
    done: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<Identity> {
    tokio::spawn(async move {
        let call = connection.next_call().await.unwrap().expect("no tunnel call");
        assert_eq!(call.method, Method::tunnel_connect());
        let request = ConnectRequestWithOrigin::from_raw_args(&call.args).unwrap();

        let mut stream = call.accept().await.unwrap();
        while let Some(chunk) = stream.source.next_chunk().await.unwrap() {
            stream.sink.write_chunk(chunk).await.unwrap();
        }
        stream.sink.close().await.unwrap();

        let _ = done.await;
        connection.close("test over");
        request.origin
    })
}

async fn open_tunnel(
    conn: &RoomConnection,
    portal: Identity,
    target: Identity,
) -> TransportResult<room_transport::DuplexStream> {
    let args = ConnectRequest { portal, target }.to_raw_args().unwrap();
    timeout(WAIT, conn.endpoint().open_duplex(Method::tunnel_connect(), args))
        .await
        .expect("tunnel open timed out")
}

#[tokio::test]
async fn tunnel_relays_bytes_between_peers_through_the_room() {
    let room_keys = Keypair::generate();
    let room_id = room_keys.identity();
    let (addr, mut joined) = spawn_room(&room_keys);

    let target_keys = Keypair::generate();
    let target_conn = join_room(&target_keys, addr, room_id).await;
    assert_eq!(
        timeout(WAIT, joined.recv()).await.unwrap(),
        Some(target_keys.identity())
    );

    let (done_tx, done_rx) = oneshot::channel();
    let target = serve_one_echo(target_conn, done_rx);

    let caller_keys = Keypair::generate();
    let caller_conn = join_room(&caller_keys, addr, room_id).await;
    assert_eq!(
        timeout(WAIT, joined.recv()).await.unwrap(),
        Some(caller_keys.identity())
    );

    let mut tunnel = open_tunnel(&caller_conn, room_id, target_keys.identity())
        .await
        .unwrap();

    tunnel.sink.write_chunk(Bytes::from_static(b"ping")).await.unwrap();
    tunnel.sink.write_chunk(Bytes::from_static(b"pong")).await.unwrap();
    tunnel.sink.close().await.unwrap();

    assert_eq!(
        timeout(WAIT, tunnel.source.next_chunk()).await.unwrap().unwrap(),
        Some(Bytes::from_static(b"ping"))
    );
    assert_eq!(
        timeout(WAIT, tunnel.source.next_chunk()).await.unwrap().unwrap(),
        Some(Bytes::from_static(b"pong"))
    );
    assert_eq!(
        timeout(WAIT, tunnel.source.next_chunk()).await.unwrap().unwrap(),
        None
    );

    // The target saw the room-attested origin, not anything caller-claimed.
    let _ = done_tx.send(());
    let origin = timeout(WAIT, target).await.unwrap().unwrap();
    assert_eq!(origin, caller_keys.identity());

    caller_conn.close("done");
}

#[tokio::test]
async fn tunnel_to_an_absent_peer_is_rejected() {
    let room_keys = Keypair::generate();
    let room_id = room_keys.identity();
    let (addr, mut joined) = spawn_room(&room_keys);

    let caller_keys = Keypair::generate();
    let caller_conn = join_room(&caller_keys, addr, room_id).await;
    assert!(timeout(WAIT, joined.recv()).await.unwrap().is_some());

    let absent = Keypair::generate().identity();
    let result = open_tunnel(&caller_conn, room_id, absent).await;

    match result {
        Err(TransportError::Rejected(reason)) => assert_eq!(reason, "no such endpoint"),
        other => panic!("expected rejection, got {:?}", other),
    }

    caller_conn.close("done");
}

#[tokio::test]
async fn request_addressed_to_another_room_is_rejected() {
    let room_keys = Keypair::generate();
    let room_id = room_keys.identity();
    let (addr, mut joined) = spawn_room(&room_keys);

    let caller_keys = Keypair::generate();
    let caller_conn = join_room(&caller_keys, addr, room_id).await;
    assert!(timeout(WAIT, joined.recv()).await.unwrap().is_some());

    let other_room = Keypair::generate().identity();
    let result = open_tunnel(&caller_conn, other_room, caller_keys.identity()).await;

    match result {
        Err(TransportError::Rejected(reason)) => {
            assert_eq!(reason, "talking to the wrong room")
        }
        other => panic!("expected rejection, got {:?}", other),
    }

    caller_conn.close("done");
}

#[tokio::test]
async fn unknown_methods_are_rejected_by_the_handler_path() {
    // A room only answers tunnel.connect; anything else is refused before
    // any stream is handed out. This mirrors the daemon's dispatch.
    let room_keys = Keypair::generate();
    let room_id = room_keys.identity();

    let addr = "127.0.0.1:0".parse().unwrap();
    let listener = RoomListener::bind(addr, &room_keys, &QuicConfig::default()).unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Some(connection) = listener.accept().await {
            tokio::spawn(async move {
                while let Ok(Some(call)) = connection.next_call().await {
                    if call.method == Method::tunnel_connect() {
                        panic!("test dialed the wrong method");
                    }
                    let reason = TransportError::NoSuchMethod(call.method.to_string());
                    let _ = call.reject(&reason.to_string()).await;
                }
            });
        }
    });

    let caller_keys = Keypair::generate();
    let caller_conn = join_room(&caller_keys, addr, room_id).await;

    let result = timeout(
        WAIT,
        caller_conn
            .endpoint()
            .open_duplex(Method::new(["room", "gossip"]), Vec::new()),
    )
    .await
    .unwrap();

    match result {
        Err(TransportError::Rejected(reason)) => {
            assert_eq!(reason, "no such method: room.gossip")
        }
        other => panic!("expected rejection, got {:?}", other),
    }

    caller_conn.close("done");
}
