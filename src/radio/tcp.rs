//! TCP stand-in for a short-range radio.
//!
//! Peer addresses are socket addresses. Service routing is reproduced with a
//! 16-byte preamble: a client writes its service identifier right after the
//! TCP connect, and the listener drops connections whose identifier does not
//! match its own.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::core::{Capability, Peer, RadioAdapter, RadioChannel, RadioEvent, RadioListener};

/// Default time a listener waits for a client's service preamble.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of the radio event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 32;

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "channel closed")
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|c| *c).await;
}

/// TCP radio configuration.
#[derive(Debug, Clone)]
pub struct TcpRadioConfig {
    /// Address the listener binds to. Port 0 picks a free port.
    pub bind_addr: SocketAddr,

    /// Name this device reports.
    pub local_name: Option<String>,

    /// Peers treated as bonded.
    pub bonded_peers: Vec<Peer>,

    /// Peers a scan reports.
    pub nearby_peers: Vec<Peer>,

    /// Capabilities granted to the application.
    pub capabilities: HashSet<Capability>,

    /// Time allowed for a client's service preamble.
    pub handshake_timeout: Duration,

    /// Capacity of the radio event channel.
    pub event_capacity: usize,
}

impl Default for TcpRadioConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            local_name: None,
            bonded_peers: Vec::new(),
            nearby_peers: Vec::new(),
            capabilities: [Capability::Scan, Capability::Connect].into_iter().collect(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl TcpRadioConfig {
    /// Create a builder.
    pub fn builder() -> TcpRadioConfigBuilder {
        TcpRadioConfigBuilder::new()
    }
}

/// Builder for [`TcpRadioConfig`].
#[derive(Debug, Default)]
pub struct TcpRadioConfigBuilder {
    config: TcpRadioConfig,
}

impl TcpRadioConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listener bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the local device name.
    pub fn local_name(mut self, name: impl Into<String>) -> Self {
        self.config.local_name = Some(name.into());
        self
    }

    /// Add a bonded peer.
    pub fn bonded_peer(mut self, peer: Peer) -> Self {
        self.config.bonded_peers.push(peer);
        self
    }

    /// Add a peer that scans report.
    pub fn nearby_peer(mut self, peer: Peer) -> Self {
        self.config.nearby_peers.push(peer);
        self
    }

    /// Replace the granted capabilities.
    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.config.capabilities = capabilities.into_iter().collect();
        self
    }

    /// Set the preamble timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the event channel capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TcpRadioConfig {
        self.config
    }
}

/// Where a client channel connects to.
#[derive(Debug, Clone)]
struct Target {
    addr: SocketAddr,
    address: String,
    service: Uuid,
    events: broadcast::Sender<RadioEvent>,
}

/// A TCP stream split into independently locked halves.
#[derive(Debug)]
pub struct TcpChannel {
    target: Option<Target>,
    reader: tokio::sync::Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    closed: watch::Sender<bool>,
}

impl TcpChannel {
    fn client(target: Target) -> Self {
        Self {
            target: Some(target),
            reader: tokio::sync::Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            closed: watch::channel(false).0,
        }
    }

    fn accepted(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            target: None,
            reader: tokio::sync::Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            connected: AtomicBool::new(true),
            closed: watch::channel(false).0,
        }
    }

    async fn open(target: &Target) -> io::Result<TcpStream> {
        let mut stream = TcpStream::connect(target.addr).await?;
        stream.set_nodelay(true)?;
        stream.write_all(target.service.as_bytes()).await?;
        Ok(stream)
    }

    fn notify(&self, connected: bool) {
        if let Some(target) = &self.target {
            let _ = target.events.send(RadioEvent::ConnectivityChanged {
                connected,
                address: target.address.clone(),
            });
        }
    }
}

#[async_trait]
impl RadioChannel for TcpChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> io::Result<()> {
        let target = self.target.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "incoming channels are already open")
        })?;

        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(closed_error());
        }

        let stream = tokio::select! {
            stream = Self::open(target) => stream?,
            _ = wait_closed(&mut closed) => return Err(closed_error()),
        };
        let (reader, writer) = stream.into_split();
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);

        let closed_during_connect = *self.closed.borrow();
        if closed_during_connect {
            self.reader.lock().await.take();
            self.writer.lock().await.take();
            return Err(closed_error());
        }
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("tcp channel connected to {}", target.addr);
        self.notify(true);
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(closed_error());
        }

        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or_else(closed_error)?;
        let result = tokio::select! {
            result = reader.read(buf) => result,
            _ = wait_closed(&mut closed) => Err(closed_error()),
        };
        if *self.closed.borrow() {
            guard.take();
        }
        result
    }

    async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(closed_error());
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(closed_error)?;
        tokio::select! {
            result = writer.write_all(data) => result,
            _ = wait_closed(&mut closed) => Err(closed_error()),
        }
    }

    fn close(&self) -> io::Result<()> {
        self.closed.send_replace(true);

        // Halves busy in a pending call are released once it wakes.
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }

        if self.connected.swap(false, Ordering::SeqCst) {
            self.notify(false);
        }
        Ok(())
    }
}

/// Listening handle bound to one service identifier.
///
/// Closing it drops the socket, so later connection attempts are refused.
#[derive(Debug)]
pub struct TcpRadioListener {
    listener: tokio::sync::Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    service: Uuid,
    handshake_timeout: Duration,
    closed: watch::Sender<bool>,
}

impl TcpRadioListener {
    /// Local address the listener was bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept one TCP connection and check its preamble.
    ///
    /// `Ok(None)` means the connection was dropped.
    async fn accept_routed(&self, listener: &TcpListener) -> io::Result<Option<TcpStream>> {
        let (mut stream, addr) = listener.accept().await?;

        let mut preamble = [0u8; 16];
        match tokio::time::timeout(self.handshake_timeout, stream.read_exact(&mut preamble)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::debug!("dropping {}: preamble read failed: {}", addr, e);
                return Ok(None);
            }
            Err(_) => {
                tracing::debug!("dropping {}: preamble timed out", addr);
                return Ok(None);
            }
        }

        let service = Uuid::from_bytes(preamble);
        if service != self.service {
            tracing::warn!("dropping {}: service {} is not {}", addr, service, self.service);
            return Ok(None);
        }

        stream.set_nodelay(true)?;
        tracing::debug!("accepted {} on service {}", addr, service);
        Ok(Some(stream))
    }
}

#[async_trait]
impl RadioListener for TcpRadioListener {
    type Channel = TcpChannel;

    async fn accept(&self) -> io::Result<TcpChannel> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(closed_error());
        }

        let mut guard = self.listener.lock().await;
        let result = loop {
            let Some(listener) = guard.as_ref() else {
                break Err(closed_error());
            };
            let routed = tokio::select! {
                routed = self.accept_routed(listener) => routed,
                _ = wait_closed(&mut closed) => Err(closed_error()),
            };
            match routed {
                Ok(Some(stream)) => break Ok(TcpChannel::accepted(stream)),
                Ok(None) => continue,
                Err(e) => break Err(e),
            }
        };

        // A close that raced this accept could not take the socket.
        if *self.closed.borrow() {
            guard.take();
        }
        result
    }

    fn close(&self) -> io::Result<()> {
        self.closed.send_replace(true);
        if let Ok(mut listener) = self.listener.try_lock() {
            if listener.take().is_some() {
                tracing::debug!("listener on {} closed", self.local_addr);
            }
        }
        Ok(())
    }
}

/// Radio adapter over TCP.
#[derive(Debug)]
pub struct TcpRadio {
    config: TcpRadioConfig,
    events: broadcast::Sender<RadioEvent>,
    scanning: AtomicBool,
    listening_addr: Mutex<Option<SocketAddr>>,
}

impl TcpRadio {
    /// Create a radio.
    pub fn new(config: TcpRadioConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            events,
            scanning: AtomicBool::new(false),
            listening_addr: Mutex::new(None),
        }
    }

    /// Get the radio configuration.
    pub fn config(&self) -> &TcpRadioConfig {
        &self.config
    }

    /// Address of the most recent listener, once one is open.
    pub fn listening_addr(&self) -> Option<SocketAddr> {
        *self
            .listening_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RadioAdapter for TcpRadio {
    type Channel = TcpChannel;
    type Listener = TcpRadioListener;

    fn has_permission(&self, capability: Capability) -> bool {
        self.config.capabilities.contains(&capability)
    }

    fn local_name(&self) -> Option<String> {
        self.config.local_name.clone()
    }

    fn available_peers(&self) -> Vec<Peer> {
        self.config.nearby_peers.clone()
    }

    fn bonded_peers(&self) -> Vec<Peer> {
        self.config.bonded_peers.clone()
    }

    fn start_scan(&self) -> bool {
        self.scanning.store(true, Ordering::SeqCst);
        for peer in &self.config.nearby_peers {
            let _ = self.events.send(RadioEvent::PeerFound(peer.clone()));
        }
        true
    }

    fn stop_scan(&self) -> bool {
        self.scanning.swap(false, Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.events.subscribe()
    }

    async fn listen(&self, name: &str, service: Uuid) -> io::Result<TcpRadioListener> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        *self
            .listening_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(addr);

        tracing::info!("{} listening on {}", name, addr);
        Ok(TcpRadioListener {
            listener: tokio::sync::Mutex::new(Some(listener)),
            local_addr: addr,
            service,
            handshake_timeout: self.config.handshake_timeout,
            closed: watch::channel(false).0,
        })
    }

    fn remote_channel(&self, address: &str, service: Uuid) -> io::Result<TcpChannel> {
        let addr = address
            .parse::<SocketAddr>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Ok(TcpChannel::client(Target {
            addr,
            address: address.to_string(),
            service,
            events: self.events.clone(),
        }))
    }
}
