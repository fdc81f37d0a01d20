#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Connection engine tests against real loopback sockets, with a raw peer on
//! the other side so wire bytes can be asserted directly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use netframe::config::NetConfig;
use netframe::error::NetError;
use netframe::transport::connection::{Connection, ConnectionEvent, ConnectionState};
use netframe::transport::resolver::{DnsEndpointResolver, EndpointResolver, FixedResolver};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const TICK: Duration = Duration::from_secs(2);

/// Bind a loopback listener and return it with its ephemeral address.
async fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    (listener, addr)
}

/// Connect an outbound `Connection` to a raw accepted peer socket.
async fn connected_pair() -> (Connection, UnboundedReceiver<ConnectionEvent>, TcpStream) {
    let (listener, addr) = listener().await;
    let conn = Connection::new(addr.ip().to_string(), addr.port()).expect("build");
    let mut events = conn.subscribe();

    let accept = tokio::spawn(async move { listener.accept().await });
    conn.connect().await.expect("connect");
    let (raw, _) = accept.await.expect("join").expect("accept");

    match timeout(TICK, events.recv()).await.expect("event").unwrap() {
        ConnectionEvent::Connected => {}
        other => panic!("Expected Connected first, got {other:?}"),
    }
    (conn, events, raw)
}

async fn next_event(events: &mut UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(TICK, events.recv())
        .await
        .expect("event within deadline")
        .expect("channel open")
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

#[tokio::test]
async fn test_empty_host_is_rejected() {
    assert!(matches!(
        Connection::new("", 9000),
        Err(NetError::InvalidArgument(_))
    ));
    assert!(matches!(
        Connection::new("   ", 9000),
        Err(NetError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_new_connection_starts_unconnected() {
    let conn = Connection::new("127.0.0.1", 9000).expect("build");
    assert_eq!(conn.state(), ConnectionState::Unconnected);
    assert!(!conn.is_connected());
    assert!(conn.peer_addr().is_none());
}

#[tokio::test]
async fn test_handle_identity() {
    let a = Connection::new("127.0.0.1", 9000).expect("build");
    let b = Connection::new("127.0.0.1", 9000).expect("build");
    let a2 = a.clone();

    assert!(a.same_connection(&a2));
    assert_eq!(a, a2);
    assert!(!a.same_connection(&b));
    assert_ne!(a, b);
}

#[tokio::test]
async fn test_custom_resolver_drives_connect() {
    let (listener, addr) = listener().await;
    let conn = Connection::with_resolver(
        "name-that-does-not-resolve",
        1, // ignored by the fixed resolver
        Arc::new(FixedResolver::new(addr)),
    )
    .expect("build");

    assert_eq!(conn.remote_endpoint().await.expect("resolve"), addr);

    let accept = tokio::spawn(async move { listener.accept().await });
    conn.connect().await.expect("connect via fixed resolver");
    accept.await.expect("join").expect("accept");
    assert!(conn.is_connected());
    conn.close().await.expect("close");
}

#[tokio::test]
async fn test_resolver_literal_fast_path_and_ip_combination() {
    let resolver = DnsEndpointResolver::new();

    let addr = resolver.resolve("192.0.2.7", 4000).await.expect("literal");
    assert_eq!(
        addr,
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)), 4000)
    );

    let combined = resolver.resolve_ip(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000);
    assert_eq!(
        combined,
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000)
    );
}

// ============================================================================
// SEND PATH (outbound bytes)
// ============================================================================

#[tokio::test]
async fn test_send_produces_prefix_and_payload() {
    let (conn, _events, mut raw) = connected_pair().await;

    conn.send(b"payload!").await.expect("send");

    let mut buf = [0u8; 12];
    raw.read_exact(&mut buf).await.expect("read frame");
    assert_eq!(&buf[..4], &8u32.to_ne_bytes());
    assert_eq!(&buf[4..], b"payload!");
    conn.close().await.expect("close");
}

#[tokio::test]
async fn test_keep_alive_is_a_bare_prefix() {
    let (conn, _events, mut raw) = connected_pair().await;

    conn.send_keep_alive().await.expect("keep-alive");
    conn.send(b"after").await.expect("send");

    // Keep-alive contributes exactly 4 zero bytes before the next frame.
    let mut buf = [0u8; 13];
    raw.read_exact(&mut buf).await.expect("read both frames");
    assert_eq!(&buf[..4], &0u32.to_ne_bytes());
    assert_eq!(&buf[4..8], &5u32.to_ne_bytes());
    assert_eq!(&buf[8..], b"after");
    conn.close().await.expect("close");
}

#[tokio::test]
async fn test_send_while_unconnected_fails() {
    let conn = Connection::new("127.0.0.1", 9000).expect("build");
    assert!(matches!(
        conn.send(b"too early").await,
        Err(NetError::NotConnected)
    ));
}

#[tokio::test]
async fn test_begin_send_completes() {
    let (conn, _events, mut raw) = connected_pair().await;

    let op = conn.begin_send(bytes::Bytes::from_static(b"deferred"));
    op.wait().await.expect("async send");

    let mut buf = [0u8; 12];
    raw.read_exact(&mut buf).await.expect("read frame");
    assert_eq!(&buf[4..], b"deferred");
    conn.close().await.expect("close");
}

// ============================================================================
// RECEIVE PATH (events)
// ============================================================================

#[tokio::test]
async fn test_incoming_frame_raises_message_event() {
    let (conn, mut events, mut raw) = connected_pair().await;

    raw.write_all(&4u32.to_ne_bytes()).await.unwrap();
    raw.write_all(b"ping").await.unwrap();

    match next_event(&mut events).await {
        ConnectionEvent::Message(payload) => assert_eq!(&payload[..], b"ping"),
        other => panic!("Expected Message, got {other:?}"),
    }
    conn.close().await.expect("close");
}

#[tokio::test]
async fn test_incoming_zero_frame_raises_keep_alive_event() {
    let (conn, mut events, mut raw) = connected_pair().await;

    raw.write_all(&0u32.to_ne_bytes()).await.unwrap();
    raw.write_all(&3u32.to_ne_bytes()).await.unwrap();
    raw.write_all(b"msg").await.unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::KeepAlive
    ));
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Message(p) if &p[..] == b"msg"
    ));
    conn.close().await.expect("close");
}

#[tokio::test]
async fn test_peer_eof_raises_disconnected_once_and_goes_silent() {
    let (conn, mut events, raw) = connected_pair().await;

    drop(raw);

    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected
    ));
    // Subscriptions are cleared at teardown, so the channel closes with no
    // further events.
    assert!(timeout(TICK, events.recv()).await.expect("closed").is_none());
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn test_malformed_prefix_raises_disconnected_then_receive_error() {
    let (conn, mut events, mut raw) = connected_pair().await;

    // Declared length far beyond the default limit.
    raw.write_all(&u32::MAX.to_ne_bytes()).await.unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected
    ));
    match next_event(&mut events).await {
        ConnectionEvent::ReceiveError(err) => {
            assert!(matches!(&*err, NetError::ProtocolViolation(_)), "got {err}");
        }
        other => panic!("Expected ReceiveError, got {other:?}"),
    }
    assert!(timeout(TICK, events.recv()).await.expect("closed").is_none());
    assert_eq!(conn.state(), ConnectionState::Closed);
}

// ============================================================================
// CLOSE
// ============================================================================

#[tokio::test]
async fn test_close_is_idempotent_with_one_disconnected() {
    let (conn, mut events, mut raw) = connected_pair().await;

    conn.close().await.expect("close");
    conn.close().await.expect("second close");

    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected
    ));
    assert!(timeout(TICK, events.recv()).await.expect("closed").is_none());

    // The raw peer observes EOF.
    let mut buf = [0u8; 1];
    assert_eq!(raw.read(&mut buf).await.expect("eof"), 0);

    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(matches!(
        conn.send(b"after close").await,
        Err(NetError::NotConnected)
    ));
}

#[tokio::test]
async fn test_connect_after_close_fails() {
    let (conn, _events, _raw) = connected_pair().await;
    conn.close().await.expect("close");
    assert!(matches!(conn.connect().await, Err(NetError::NotConnected)));
}

#[tokio::test]
async fn test_close_with_a_write_in_flight_reports_it_and_still_tears_down() {
    let (listener, addr) = listener().await;
    let socket = TcpSocket::new_v4().expect("socket");
    socket.set_recv_buffer_size(4096).expect("rcvbuf");
    let _raw = socket.connect(addr).await.expect("raw connect");
    let (accepted, _) = listener.accept().await.expect("accept");
    socket2::SockRef::from(&accepted)
        .set_send_buffer_size(4096)
        .expect("sndbuf");

    let conn = Connection::from_accepted(accepted).expect("wrap");
    let mut events = conn.subscribe();
    conn.initialize().expect("initialize");
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Connected
    ));

    // Far more than the two tiny socket buffers can absorb while the peer
    // is not reading, so the write parks mid-frame.
    let op = conn.begin_send(bytes::Bytes::from(vec![0u8; 64 * 1024]));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!op.is_complete());

    match conn.close().await {
        Err(NetError::OperationInProgress("write")) => {}
        other => panic!("Expected OperationInProgress, got {other:?}"),
    }

    // The teardown completed regardless of the reported failure.
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected
    ));
    assert!(timeout(TICK, events.recv()).await.expect("closed").is_none());
}

// ============================================================================
// TWO-PHASE INITIALIZATION (accepted sockets)
// ============================================================================

#[tokio::test]
async fn test_accepted_socket_delivers_frames_sent_before_initialize() {
    let (listener, addr) = listener().await;
    let mut raw = TcpStream::connect(addr).await.expect("raw connect");
    let (accepted, _) = listener.accept().await.expect("accept");

    // Frame lands on the socket before anything reads it.
    raw.write_all(&5u32.to_ne_bytes()).await.unwrap();
    raw.write_all(b"early").await.unwrap();

    let conn = Connection::from_accepted(accepted).expect("wrap");
    assert!(conn.is_connected());
    assert!(conn.peer_addr().is_some());

    let mut events = conn.subscribe();
    conn.initialize().expect("initialize");

    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Connected
    ));
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Message(p) if &p[..] == b"early"
    ));
    conn.close().await.expect("close");
}

#[tokio::test]
async fn test_initialize_twice_fails() {
    let (listener, addr) = listener().await;
    let _raw = TcpStream::connect(addr).await.expect("raw connect");
    let (accepted, _) = listener.accept().await.expect("accept");

    let conn = Connection::from_accepted(accepted).expect("wrap");
    let _events = conn.subscribe();
    conn.initialize().expect("first initialize");
    assert!(matches!(
        conn.initialize(),
        Err(NetError::InvalidArgument(_))
    ));
    conn.close().await.expect("close");
}

// ============================================================================
// ASYNC CONNECT
// ============================================================================

#[tokio::test]
async fn test_begin_connect_success() {
    let (listener, addr) = listener().await;
    let conn = Connection::new(addr.ip().to_string(), addr.port()).expect("build");
    let mut events = conn.subscribe();

    let accept = tokio::spawn(async move { listener.accept().await });
    conn.begin_connect().wait().await.expect("async connect");
    accept.await.expect("join").expect("accept");

    assert!(conn.is_connected());
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Connected
    ));
    conn.close().await.expect("close");
}

#[tokio::test]
async fn test_begin_connect_failure_raises_connection_error() {
    // A listener that is bound then dropped gives a port that refuses.
    let (listener, addr) = listener().await;
    drop(listener);

    let conn = Connection::new(addr.ip().to_string(), addr.port()).expect("build");
    let mut events = conn.subscribe();

    let result = conn.begin_connect().wait().await;
    match result {
        Err(NetError::OperationFailed { operation, .. }) => assert_eq!(operation, "connect"),
        other => panic!("Expected OperationFailed, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::ConnectionError(_)
    ));
    assert!(!conn.is_connected());
}

// ============================================================================
// CONFIG-DRIVEN BEHAVIOR
// ============================================================================

#[tokio::test]
async fn test_connect_respects_the_configured_timeout() {
    // A listener that never accepts, with a minimal backlog saturated by
    // parked connection attempts, so the next attempt hangs in SYN retry.
    let socket = TcpSocket::new_v4().expect("socket");
    socket
        .bind("127.0.0.1:0".parse().expect("addr"))
        .expect("bind");
    let listener = socket.listen(1).expect("listen");
    let addr = listener.local_addr().expect("local_addr");

    let mut parked = Vec::new();
    let mut saturated = false;
    for _ in 0..16 {
        match timeout(Duration::from_millis(250), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => parked.push(stream),
            _ => {
                saturated = true;
                break;
            }
        }
    }
    assert!(saturated, "could not saturate the listener backlog");

    let config = NetConfig::default_with_overrides(|cfg| {
        cfg.client.host = addr.ip().to_string();
        cfg.client.port = addr.port();
        cfg.client.connect_timeout = Duration::from_millis(250);
    });
    let conn = Connection::from_config(&config).expect("build");

    let started = std::time::Instant::now();
    match conn.connect().await {
        Err(NetError::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::TimedOut),
        other => panic!("Expected a timed-out connect, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn test_keep_alive_ticker_sends_idle_frames() {
    let (listener, addr) = listener().await;
    let config = NetConfig::default_with_overrides(|cfg| {
        cfg.client.host = addr.ip().to_string();
        cfg.client.port = addr.port();
        cfg.transport.keep_alive_interval = Duration::from_millis(150);
    });
    let conn = Connection::from_config(&config).expect("build");

    let accept = tokio::spawn(async move { listener.accept().await });
    conn.connect().await.expect("connect");
    let (mut raw, _) = accept.await.expect("join").expect("accept");

    // Two idle intervals produce two bare zero prefixes with no send call.
    let mut buf = [0u8; 8];
    timeout(Duration::from_secs(2), raw.read_exact(&mut buf))
        .await
        .expect("keep-alives within deadline")
        .expect("read");
    assert_eq!(buf, [0u8; 8]);
    conn.close().await.expect("close");
}
