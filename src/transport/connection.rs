//! # Connection Engine
//!
//! One point-to-point framed connection with a continuous receive loop and
//! typed notifications.
//!
//! A [`Connection`] is a cheaply cloneable handle over one framed TCP
//! connection. It is constructed either outbound (given a target host and
//! port, socket created lazily at [`Connection::connect`]) or inbound around
//! an already-accepted socket, in which case the explicit two-phase
//! [`Connection::initialize`] call arms the first read only after the caller
//! has subscribed, so no frame arriving immediately after accept is lost.
//!
//! Notifications are delivered as a tagged union, [`ConnectionEvent`], over
//! unbounded channels handed out by [`Connection::subscribe`]. Exactly one
//! read is outstanding at a time and the next read is only armed after the
//! current completion has been fully processed, so `Message` and `KeepAlive`
//! events are serialized in wire order for the connection.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Notify;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, instrument, warn};

use crate::config::{NetConfig, DEFAULT_CONNECT_TIMEOUT};
use crate::core::codec::DEFAULT_MAX_MESSAGE_LENGTH;
use crate::core::frame::ReadOutcome;
use crate::core::ops::Operation;
use crate::error::{NetError, Result};
use crate::protocol::wire::TcpWireProtocol;
use crate::transport::resolver::{DnsEndpointResolver, EndpointResolver};

/// Lifecycle state of a [`Connection`].
///
/// `Closed` is terminal: a closed connection cannot become connected again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed outbound; no socket yet.
    Unconnected,
    /// Live: the socket is up and the protocol has an attached stream.
    Connected,
    /// Teardown in progress.
    Closing,
    /// Torn down. Terminal.
    Closed,
}

/// A notification raised by a [`Connection`].
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The connection was established (or an accepted connection was
    /// initialized).
    Connected,
    /// The connection was torn down. Raised exactly once per connection.
    Disconnected,
    /// An application message arrived; payload verbatim.
    Message(Bytes),
    /// The zero-length keep-alive frame arrived.
    KeepAlive,
    /// Establishing the connection failed asynchronously.
    ConnectionError(Arc<NetError>),
    /// The receive loop faulted.
    ReceiveError(Arc<NetError>),
}

struct Target {
    host: String,
    port: u16,
}

struct ConnState {
    phase: ConnectionState,
    keep_reading: bool,
    receiving: bool,
    resolved: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    subscribers: Vec<mpsc::UnboundedSender<ConnectionEvent>>,
}

struct ConnectionInner {
    target: Option<Target>,
    resolver: Arc<dyn EndpointResolver>,
    protocol: TcpWireProtocol,
    connect_timeout: Duration,
    // When set, an idle-keep-alive ticker is started alongside the receive
    // loop of an outbound connection.
    keep_alive: Option<Duration>,
    state: Mutex<ConnState>,
    // Wakes the receive loop out of an idle pending read during close().
    shutdown: Notify,
}

/// One framed point-to-point connection. Clone freely; all clones share the
/// same underlying connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Build an outbound connection to `host:port`, resolving through DNS.
    ///
    /// The socket is created lazily at [`connect`](Self::connect) time.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::with_resolver(host, port, Arc::new(DnsEndpointResolver::new()))
    }

    /// Build an outbound connection with a custom endpoint resolver.
    pub fn with_resolver(
        host: impl Into<String>,
        port: u16,
        resolver: Arc<dyn EndpointResolver>,
    ) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(NetError::InvalidArgument(
                "empty hostname provided".to_string(),
            ));
        }
        Ok(Self::build(
            Some(Target { host, port }),
            resolver,
            DEFAULT_MAX_MESSAGE_LENGTH,
            DEFAULT_CONNECT_TIMEOUT,
            None,
        ))
    }

    /// Build an outbound connection from the `[client]` and `[transport]`
    /// sections of a configuration: target endpoint, connect timeout,
    /// maximum message length and the idle keep-alive interval.
    pub fn from_config(config: &NetConfig) -> Result<Self> {
        let host = config.client.host.clone();
        if host.trim().is_empty() {
            return Err(NetError::InvalidArgument(
                "empty hostname provided".to_string(),
            ));
        }
        Ok(Self::build(
            Some(Target {
                host,
                port: config.client.port,
            }),
            Arc::new(DnsEndpointResolver::new()),
            config.transport.max_message_length,
            config.client.connect_timeout,
            Some(config.transport.keep_alive_interval),
        ))
    }

    /// Wrap an already-connected socket, typically handed off by the server
    /// accept loop.
    ///
    /// The protocol is attached immediately so [`is_connected`](Self::is_connected)
    /// reports correctly, but the receive loop is *not* armed:
    /// [`initialize`](Self::initialize) must be called, after the caller has
    /// subscribed to events.
    pub fn from_accepted(stream: TcpStream) -> Result<Self> {
        Self::from_accepted_with_max_length(stream, DEFAULT_MAX_MESSAGE_LENGTH)
    }

    /// [`from_accepted`](Self::from_accepted) with a custom maximum message length.
    pub fn from_accepted_with_max_length(
        stream: TcpStream,
        max_message_length: usize,
    ) -> Result<Self> {
        let peer = stream.peer_addr().map_err(|err| {
            NetError::InvalidArgument(format!("non-connected socket provided: {err}"))
        })?;

        let conn = Self::build(
            None,
            Arc::new(DnsEndpointResolver::new()),
            max_message_length,
            DEFAULT_CONNECT_TIMEOUT,
            None,
        );
        let (read_half, write_half) = stream.into_split();
        conn.inner.protocol.attach(read_half, write_half)?;
        {
            let mut state = conn.lock_state()?;
            state.phase = ConnectionState::Connected;
            state.peer_addr = Some(peer);
        }
        Ok(conn)
    }

    fn build(
        target: Option<Target>,
        resolver: Arc<dyn EndpointResolver>,
        max_message_length: usize,
        connect_timeout: Duration,
        keep_alive: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                target,
                resolver,
                protocol: TcpWireProtocol::with_max_message_length(max_message_length),
                connect_timeout,
                keep_alive,
                state: Mutex::new(ConnState {
                    phase: ConnectionState::Unconnected,
                    keep_reading: false,
                    receiving: false,
                    resolved: None,
                    peer_addr: None,
                    subscribers: Vec::new(),
                }),
                shutdown: Notify::new(),
            }),
        }
    }

    /// Whether the two handles refer to the same underlying connection.
    pub fn same_connection(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner
            .state
            .lock()
            .map(|state| state.phase)
            .unwrap_or(ConnectionState::Closed)
    }

    /// The peer address, once known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|state| state.peer_addr)
    }

    /// True only if the lifecycle state is `Connected` and the protocol has
    /// an attached stream. Any failure querying state is treated as "not
    /// connected".
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.inner.protocol.is_attached()
    }

    /// Subscribe to this connection's notifications.
    ///
    /// Multiple subscribers are supported; each receives every event from
    /// the point of subscription. All subscriptions are cleared by
    /// [`close`](Self::close).
    pub fn subscribe(&self) -> UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut state) = self.inner.state.lock() {
            state.subscribers.push(tx);
        }
        rx
    }

    /// The remote endpoint this outbound connection targets, resolved once
    /// and cached so the same address serves both address-family selection
    /// and the actual connect.
    pub async fn remote_endpoint(&self) -> Result<SocketAddr> {
        let target = self.require_target()?;
        if let Some(addr) = self.lock_state()?.resolved {
            return Ok(addr);
        }
        let addr = self
            .inner
            .resolver
            .resolve(&target.host, target.port)
            .await?;
        self.lock_state()?.resolved = Some(addr);
        Ok(addr)
    }

    /// Connect to the remote endpoint, arm the receive loop and raise
    /// [`ConnectionEvent::Connected`].
    ///
    /// The connection attempt is bounded by the configured connect timeout
    /// and fails with a [`std::io::ErrorKind::TimedOut`] error once it
    /// elapses.
    #[instrument(skip(self), fields(peer = tracing::field::Empty))]
    pub async fn connect(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Unconnected => {}
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Closing | ConnectionState::Closed => {
                return Err(NetError::NotConnected)
            }
        }

        let addr = self.remote_endpoint().await?;
        let stream = time::timeout(self.inner.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                NetError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "connecting to {addr} timed out after {:?}",
                        self.inner.connect_timeout
                    ),
                ))
            })??;
        let peer = stream.peer_addr().ok();
        tracing::Span::current().record("peer", tracing::field::display(addr));

        let (read_half, write_half) = stream.into_split();
        self.inner.protocol.attach(read_half, write_half)?;
        {
            let mut state = self.lock_state()?;
            state.phase = ConnectionState::Connected;
            state.peer_addr = peer;
        }
        debug!(peer = %addr, "connection established");

        self.emit(ConnectionEvent::Connected);
        self.start_receiving()?;
        if let Some(interval) = self.inner.keep_alive {
            self.start_keep_alive(interval);
        }
        Ok(())
    }

    /// Connect asynchronously, returning a waitable handle.
    ///
    /// A connect failure is additionally raised as
    /// [`ConnectionEvent::ConnectionError`] since no synchronous caller is
    /// present when it is discovered.
    pub fn begin_connect(&self) -> Operation<()> {
        let conn = self.clone();
        Operation::spawn("connect", async move {
            match conn.connect().await {
                Ok(()) => Ok(()),
                Err(err) => {
                    let err = err.shared();
                    conn.emit(ConnectionEvent::ConnectionError(Arc::clone(&err)));
                    Err(NetError::OperationFailed {
                        operation: "connect".to_string(),
                        source: err,
                    })
                }
            }
        })
    }

    /// Arm the receive loop of a pre-connected (accepted) connection and
    /// raise [`ConnectionEvent::Connected`].
    ///
    /// Call only after subscribing to events; this two-phase start is what
    /// guarantees the first frame after accept is not lost.
    pub fn initialize(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }
        self.emit(ConnectionEvent::Connected);
        self.start_receiving()
    }

    /// Send one framed message. Requires a live connection.
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }
        match self.inner.protocol.write(payload).await {
            Ok(()) => Ok(()),
            // Local validation failures leave the connection intact.
            Err(err @ (NetError::OperationInProgress(_) | NetError::ProtocolViolation(_))) => {
                Err(err)
            }
            Err(err) => {
                // The stream is no longer usable; tear down so Disconnected
                // is raised exactly once through the same path as any close.
                // The write error is what the caller gets; the shutdown
                // outcome is secondary to it.
                if !matches!(self.teardown().await, Ok(false)) {
                    self.clear_subscribers();
                }
                Err(err)
            }
        }
    }

    /// Send the zero-length keep-alive frame.
    pub async fn send_keep_alive(&self) -> Result<()> {
        self.send(crate::core::frame::KEEP_ALIVE_PAYLOAD).await
    }

    /// Send asynchronously, returning a waitable handle.
    pub fn begin_send(&self, payload: Bytes) -> Operation<()> {
        let conn = self.clone();
        Operation::spawn("send", async move { conn.send(&payload).await })
    }

    /// Close the connection. Idempotent.
    ///
    /// Stops the receive loop, shuts down and closes the socket if still
    /// open, raises [`ConnectionEvent::Disconnected`] exactly once, and
    /// clears all event subscriptions so the connection is silent afterwards.
    ///
    /// Returns the error from the orderly write-half shutdown, if any. The
    /// cleanup completes regardless: a write still in flight at close time
    /// is reported as [`NetError::OperationInProgress`] and the socket is
    /// torn down abruptly once that write completes.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        let result = self.teardown().await;
        self.clear_subscribers();
        result.map(|_| ())
    }

    /// Transition to `Closed`, stop the receive loop, shut down and reset
    /// the protocol and raise `Disconnected`. `Ok(false)` means the
    /// connection was already closing or closed; `Err` means the teardown
    /// completed but the orderly write-half shutdown failed.
    async fn teardown(&self) -> Result<bool> {
        {
            let Ok(mut state) = self.inner.state.lock() else {
                return Ok(false);
            };
            if matches!(
                state.phase,
                ConnectionState::Closing | ConnectionState::Closed
            ) {
                return Ok(false);
            }
            state.phase = ConnectionState::Closing;
            state.keep_reading = false;
        }

        // Wake an idle pending read; the loop re-checks the liveness guard
        // and discards whatever the read returns.
        self.inner.shutdown.notify_one();
        // Orderly shutdown of the write half first; dropping the halves in
        // reset() closes the socket regardless of its outcome.
        let shutdown = self.inner.protocol.shutdown().await;
        self.inner.protocol.reset();

        self.emit(ConnectionEvent::Disconnected);
        debug!(peer = ?self.peer_addr(), "connection closed");

        if let Ok(mut state) = self.inner.state.lock() {
            state.phase = ConnectionState::Closed;
        }
        shutdown.map(|()| true)
    }

    fn clear_subscribers(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.subscribers.clear();
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        let Ok(mut state) = self.inner.state.lock() else {
            return;
        };
        state
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn keep_reading(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|state| state.keep_reading)
            .unwrap_or(false)
    }

    fn start_receiving(&self) -> Result<()> {
        {
            let mut state = self.lock_state()?;
            if state.receiving {
                return Err(NetError::InvalidArgument(
                    "connection is already receiving".to_string(),
                ));
            }
            state.receiving = true;
            state.keep_reading = true;
        }
        let conn = self.clone();
        tokio::spawn(receive_loop(conn));
        Ok(())
    }

    /// Send the keep-alive frame every `interval` until the connection goes
    /// down. A tick that collides with an application write is skipped: the
    /// wire is evidently live.
    fn start_keep_alive(&self, interval: Duration) {
        let conn = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !conn.is_connected() {
                    return;
                }
                match conn.send_keep_alive().await {
                    Ok(()) | Err(NetError::OperationInProgress(_)) => {}
                    Err(_) => return,
                }
            }
        });
    }

    fn require_target(&self) -> Result<&Target> {
        self.inner.target.as_ref().ok_or_else(|| {
            NetError::InvalidArgument(
                "connection was built around an accepted socket; it has no outbound target"
                    .to_string(),
            )
        })
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, ConnState>> {
        self.inner
            .state
            .lock()
            .map_err(|_| NetError::Internal("connection state poisoned".to_string()))
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.same_connection(other)
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer_addr())
            .field("state", &self.state())
            .finish()
    }
}

/// The self-re-arming chain of reads that delivers ordered notifications for
/// one connection. Exactly one read is outstanding at a time; the next is
/// only issued after the current completion has been fully processed.
async fn receive_loop(conn: Connection) {
    loop {
        let outcome = tokio::select! {
            _ = conn.inner.shutdown.notified() => return,
            outcome = conn.inner.protocol.read() => outcome,
        };

        // A read that completes after close() was requested is silently
        // discarded: no events, no re-arm.
        if !conn.keep_reading() {
            return;
        }

        match outcome {
            Ok(ReadOutcome::Message(payload)) => {
                conn.emit(ConnectionEvent::Message(payload));
            }
            Ok(ReadOutcome::KeepAlive) => {
                conn.emit(ConnectionEvent::KeepAlive);
            }
            Ok(ReadOutcome::EmptyRead) => {
                // Orderly close by the peer. Close explicitly so the socket
                // does not linger half-open; Disconnected fires exactly once.
                let _ = conn.teardown().await;
                conn.clear_subscribers();
                return;
            }
            Err(err) => {
                warn!(peer = ?conn.peer_addr(), error = %err, "receive loop faulted");
                let err = err.shared();
                // The fault leaves the connection unusable: tear down (which
                // raises Disconnected once), then report the fault, then go
                // silent.
                let _ = conn.teardown().await;
                conn.emit(ConnectionEvent::ReceiveError(err));
                conn.clear_subscribers();
                return;
            }
        }
    }
}
