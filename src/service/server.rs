//! # Protocol Server
//!
//! Listens, accepts, wraps, registers, and republishes.
//!
//! [`ProtocolServer`] accepts raw TCP connections, hands each to the
//! configured [`ClientFactory`], registers the resulting [`Connection`] and
//! republishes its notifications at server scope as [`ServerEvent`]s carrying
//! the originating connection. A fault on one client is always reported and
//! isolated; it never tears down the listener, and the accept loop is always
//! re-armed.

use std::fmt;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Notify;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, instrument, warn};

use crate::error::constants::{ERR_ALREADY_STARTED, ERR_NO_FACTORY};
use crate::error::{NetError, Result};
use crate::transport::connection::{Connection, ConnectionEvent};
use crate::transport::factory::ClientFactory;
use crate::transport::registry::ConnectionRegistry;
use crate::transport::resolver::{DnsEndpointResolver, EndpointResolver};

/// A notification raised at server scope.
///
/// The four client-originated kinds carry the [`Connection`] they originated
/// from, so one subscriber can serve many clients.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A client was accepted, wrapped and registered.
    ClientConnected(Connection),
    /// A registered client disconnected and was unregistered.
    ClientDisconnected(Connection),
    /// A failure in the server itself: accepting, wrapping or closing.
    ServerError(Arc<NetError>),
    /// A message arrived on a registered client connection.
    Message {
        /// The originating connection.
        client: Connection,
        /// The message payload, verbatim.
        payload: Bytes,
    },
    /// A keep-alive arrived on a registered client connection.
    KeepAlive {
        /// The originating connection.
        client: Connection,
    },
    /// A client connection failed to establish.
    ClientConnectionError {
        /// The originating connection.
        client: Connection,
        /// The captured failure.
        error: Arc<NetError>,
    },
    /// A client's receive loop faulted.
    ClientReceiveError {
        /// The originating connection.
        client: Connection,
        /// The captured failure.
        error: Arc<NetError>,
    },
}

enum BindTarget {
    Addr(SocketAddr),
    Host(String, u16),
    AllInterfaces(u16),
}

struct ServerState {
    running: bool,
    stopped: bool,
    local_addr: Option<SocketAddr>,
    subscribers: Vec<mpsc::UnboundedSender<ServerEvent>>,
}

struct ServerInner {
    target: BindTarget,
    factory: Mutex<Option<Arc<dyn ClientFactory>>>,
    state: Mutex<ServerState>,
    registry: ConnectionRegistry,
    shutdown: Notify,
}

/// Accepts framed connections and republishes their events. Clone freely;
/// all clones share the same server.
#[derive(Clone)]
pub struct ProtocolServer {
    inner: Arc<ServerInner>,
}

impl ProtocolServer {
    /// Server listening on a concrete socket address.
    pub fn bind_addr(addr: SocketAddr) -> Self {
        Self::build(BindTarget::Addr(addr))
    }

    /// Server listening on a host name or IP literal, resolved at
    /// [`start`](Self::start) time.
    pub fn bind_host(host: impl Into<String>, port: u16) -> Self {
        Self::build(BindTarget::Host(host.into(), port))
    }

    /// Server listening on all interfaces, both address families, via a
    /// dual-stack socket.
    pub fn bind_port(port: u16) -> Self {
        Self::build(BindTarget::AllInterfaces(port))
    }

    fn build(target: BindTarget) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                target,
                factory: Mutex::new(None),
                state: Mutex::new(ServerState {
                    running: false,
                    stopped: false,
                    local_addr: None,
                    subscribers: Vec::new(),
                }),
                registry: ConnectionRegistry::new(),
                shutdown: Notify::new(),
            }),
        }
    }

    /// Install the connected-client factory. Required before
    /// [`start`](Self::start).
    pub fn set_client_factory(&self, factory: Arc<dyn ClientFactory>) {
        if let Ok(mut slot) = self.inner.factory.lock() {
            *slot = Some(factory);
        }
    }

    /// Builder form of [`set_client_factory`](Self::set_client_factory).
    pub fn with_client_factory(self, factory: Arc<dyn ClientFactory>) -> Self {
        self.set_client_factory(factory);
        self
    }

    /// Subscribe to server-scope notifications.
    pub fn subscribe(&self) -> UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut state) = self.inner.state.lock() {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Subscription adapted to a [`futures::Stream`] for `StreamExt` consumers.
    pub fn event_stream(&self) -> UnboundedReceiverStream<ServerEvent> {
        UnboundedReceiverStream::new(self.subscribe())
    }

    /// The locally bound listener address, once started. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|state| state.local_addr)
    }

    /// Snapshot of the currently registered client connections.
    pub fn clients(&self) -> Vec<Connection> {
        self.inner.registry.snapshot()
    }

    /// Whether [`stop`](Self::stop) has been requested.
    pub fn is_stopped(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|state| state.stopped)
            .unwrap_or(true)
    }

    /// Bind, listen and arm the accept loop.
    ///
    /// Fails with a configuration error, without binding the listener, when
    /// no client factory has been set.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let factory = self
            .inner
            .factory
            .lock()
            .map_err(|_| NetError::Internal("server factory slot poisoned".to_string()))?
            .clone()
            .ok_or_else(|| NetError::Configuration(ERR_NO_FACTORY.to_string()))?;

        {
            let mut state = self.lock_state()?;
            if state.running {
                return Err(NetError::Configuration(ERR_ALREADY_STARTED.to_string()));
            }
            state.running = true;
            state.stopped = false;
        }

        let listener = match self.bind_listener().await {
            Ok(listener) => listener,
            Err(err) => {
                if let Ok(mut state) = self.inner.state.lock() {
                    state.running = false;
                }
                return Err(err);
            }
        };
        let local_addr = listener.local_addr()?;
        self.lock_state()?.local_addr = Some(local_addr);
        info!(addr = %local_addr, "server listening");

        let server = self.clone();
        tokio::spawn(server.accept_loop(listener, factory));
        Ok(())
    }

    /// Stop listening and force-close every registered connection.
    ///
    /// A failure closing one connection is reported as
    /// [`ServerEvent::ServerError`] and does not stop the remaining
    /// connections from being closed. Idempotent.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.running = false;
        }
        self.inner.shutdown.notify_one();

        for client in self.inner.registry.snapshot() {
            if let Err(err) = client.close().await {
                warn!(client = ?client, error = %err, "failed to close client during stop");
                self.emit(ServerEvent::ServerError(err.shared()));
            }
        }
        self.inner.registry.clear();
        info!("server stopped");
    }

    async fn bind_listener(&self) -> Result<TcpListener> {
        match &self.inner.target {
            BindTarget::Addr(addr) => Ok(TcpListener::bind(addr).await?),
            BindTarget::Host(host, port) => {
                let addr = DnsEndpointResolver::new().resolve(host, *port).await?;
                Ok(TcpListener::bind(addr).await?)
            }
            BindTarget::AllInterfaces(port) => dual_stack_listener(*port),
        }
    }

    async fn accept_loop(self, listener: TcpListener, factory: Arc<dyn ClientFactory>) {
        loop {
            let accepted = tokio::select! {
                _ = self.inner.shutdown.notified() => return,
                accepted = listener.accept() => accepted,
            };

            // An accept that races stop() is discarded: the socket is
            // dropped and the loop exits.
            if self.is_stopped() {
                return;
            }

            match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "accepted connection");
                    if let Err(err) = self.adopt(stream, factory.as_ref()) {
                        warn!(peer = %peer, error = %err, "failed to adopt accepted connection");
                        self.emit(ServerEvent::ServerError(err.shared()));
                    }
                }
                Err(err) => {
                    error!(error = %err, "error accepting connection");
                    self.emit(ServerEvent::ServerError(NetError::from(err).shared()));
                }
            }
        }
    }

    /// Wrap, register, re-subscribe and only then initialize, so the first
    /// frame the client sends is never lost.
    fn adopt(&self, stream: TcpStream, factory: &dyn ClientFactory) -> Result<()> {
        let connection = factory.wrap(stream)?;
        self.inner.registry.add(connection.clone());
        let events = connection.subscribe();
        self.spawn_forwarder(connection.clone(), events);
        self.emit(ServerEvent::ClientConnected(connection.clone()));

        if let Err(err) = connection.initialize() {
            self.inner.registry.remove(&connection);
            return Err(err);
        }
        Ok(())
    }

    fn spawn_forwarder(&self, client: Connection, mut events: UnboundedReceiver<ConnectionEvent>) {
        let server = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    // Announced as ClientConnected by the accept path.
                    ConnectionEvent::Connected => {}
                    ConnectionEvent::Disconnected => {
                        server.inner.registry.remove(&client);
                        server.emit(ServerEvent::ClientDisconnected(client.clone()));
                    }
                    ConnectionEvent::Message(payload) => {
                        server.emit(ServerEvent::Message {
                            client: client.clone(),
                            payload,
                        });
                    }
                    ConnectionEvent::KeepAlive => {
                        server.emit(ServerEvent::KeepAlive {
                            client: client.clone(),
                        });
                    }
                    ConnectionEvent::ConnectionError(error) => {
                        server.emit(ServerEvent::ClientConnectionError {
                            client: client.clone(),
                            error,
                        });
                    }
                    ConnectionEvent::ReceiveError(error) => {
                        server.emit(ServerEvent::ClientReceiveError {
                            client: client.clone(),
                            error,
                        });
                    }
                }
            }
        });
    }

    fn emit(&self, event: ServerEvent) {
        let Ok(mut state) = self.inner.state.lock() else {
            return;
        };
        state
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, ServerState>> {
        self.inner
            .state
            .lock()
            .map_err(|_| NetError::Internal("server state poisoned".to_string()))
    }
}

impl fmt::Debug for ProtocolServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolServer")
            .field("local_addr", &self.local_addr())
            .field("clients", &self.inner.registry.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Listener on all interfaces covering both address families: a dual-stack
/// IPv6 socket with `IPV6_V6ONLY` off. If the platform rejects the option
/// the bind error propagates; there is no silent IPv4 fallback.
fn dual_stack_listener(port: u16) -> Result<TcpListener> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_only_v6(false)?;
    socket.set_nonblocking(true)?;
    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener)?)
}
