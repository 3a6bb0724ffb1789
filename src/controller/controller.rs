//! High-level chat controller.
//!
//! Provides `ChatController<A>` which owns the connection role (listening,
//! connected as client, connected as server) over a radio adapter `A`, and
//! publishes discovery and connectivity state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::config::ControllerConfig;
use super::events::ConnectionEvents;
use crate::core::constants::ERROR_NON_PAIRED_PEER;
use crate::core::{Capability, Message, Peer, RadioAdapter, RadioChannel, RadioEvent, RadioListener};
use crate::transport::{TransferSession, frame};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the controller and its connection sequences.
pub(crate) struct Shared<A: RadioAdapter> {
    /// The radio.
    pub(crate) adapter: Arc<A>,

    /// Controller configuration.
    pub(crate) config: ControllerConfig,

    /// Listening handle (server role).
    listener: Mutex<Option<Arc<A::Listener>>>,

    /// Open or connecting channel (either role).
    channel: Mutex<Option<Arc<A::Channel>>>,

    /// Session over `channel` once it is open.
    session: Mutex<Option<Arc<TransferSession<A::Channel>>>>,

    connection_established: watch::Sender<bool>,
    scanned_peers: watch::Sender<Vec<Peer>>,
    paired_peers: watch::Sender<Vec<Peer>>,
    errors: broadcast::Sender<String>,
}

impl<A: RadioAdapter> Shared<A> {
    fn new(adapter: Arc<A>, config: ControllerConfig) -> Self {
        let (errors, _) = broadcast::channel(config.error_capacity.max(1));
        Self {
            adapter,
            config,
            listener: Mutex::new(None),
            channel: Mutex::new(None),
            session: Mutex::new(None),
            connection_established: watch::channel(false).0,
            scanned_peers: watch::channel(Vec::new()).0,
            paired_peers: watch::channel(Vec::new()).0,
            errors,
        }
    }

    /// Close every open handle and drop the session.
    pub(crate) fn stop(&self) {
        let channel = lock(&self.channel).take();
        let listener = lock(&self.listener).take();
        let session = lock(&self.session).take();

        if let Some(channel) = channel {
            if let Err(e) = channel.close() {
                tracing::debug!("closing channel: {}", e);
            }
        }
        if let Some(listener) = listener {
            if let Err(e) = listener.close() {
                tracing::debug!("closing listener: {}", e);
            }
        }
        if session.is_some() {
            tracing::info!("connection stopped");
        }
    }

    pub(crate) fn install_listener(&self, listener: Arc<A::Listener>) {
        *lock(&self.listener) = Some(listener);
    }

    pub(crate) fn install_channel(&self, channel: Arc<A::Channel>) {
        *lock(&self.channel) = Some(channel);
    }

    pub(crate) fn install_session(&self, session: TransferSession<A::Channel>) {
        *lock(&self.session) = Some(Arc::new(session));
    }

    /// Forget `listener` if it is still the current one.
    pub(crate) fn release_listener(&self, listener: &Arc<A::Listener>) {
        let mut current = lock(&self.listener);
        if current.as_ref().is_some_and(|l| Arc::ptr_eq(l, listener)) {
            *current = None;
        }
    }

    /// Forget `channel` and its session if they are still the current ones.
    pub(crate) fn release_channel(&self, channel: &Arc<A::Channel>) {
        {
            let mut current = lock(&self.channel);
            if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, channel)) {
                *current = None;
            }
        }
        let mut session = lock(&self.session);
        if session
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s.channel(), channel))
        {
            *session = None;
        }
    }

    fn current_session(&self) -> Option<Arc<TransferSession<A::Channel>>> {
        lock(&self.session).clone()
    }

    fn has_listener(&self) -> bool {
        lock(&self.listener).is_some()
    }

    pub(crate) fn start_discovery(&self) {
        if !self.adapter.has_permission(Capability::Scan) {
            tracing::debug!("discovery skipped: scan permission missing");
            return;
        }

        self.update_paired_peers();
        for peer in self.adapter.available_peers() {
            self.add_scanned_peer(peer);
        }

        if self.adapter.start_scan() {
            tracing::info!("discovery started");
        } else {
            tracing::warn!("radio refused to start discovery");
        }
    }

    pub(crate) fn stop_discovery(&self) {
        if !self.adapter.has_permission(Capability::Scan) {
            return;
        }
        if self.adapter.stop_scan() {
            tracing::debug!("discovery stopped");
        }
    }

    fn update_paired_peers(&self) {
        if !self.adapter.has_permission(Capability::Connect) {
            return;
        }
        self.paired_peers.send_replace(self.adapter.bonded_peers());
    }

    fn add_scanned_peer(&self, peer: Peer) {
        self.scanned_peers.send_if_modified(|peers| {
            if peers.iter().any(|p| p.address == peer.address) {
                false
            } else {
                tracing::debug!("found peer {}", peer);
                peers.push(peer);
                true
            }
        });
    }

    fn handle_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::PeerFound(peer) => self.add_scanned_peer(peer),
            RadioEvent::ConnectivityChanged { connected, address } => {
                let bonded = self
                    .adapter
                    .bonded_peers()
                    .iter()
                    .any(|p| p.address == address);
                if bonded {
                    let state = if connected { "up" } else { "down" };
                    tracing::debug!("link to {} is {}", address, state);
                    self.connection_established.send_replace(connected);
                } else {
                    tracing::warn!("connectivity change from non-paired peer {}", address);
                    // No subscribers is fine.
                    let _ = self.errors.send(ERROR_NON_PAIRED_PEER.to_string());
                }
            }
        }
    }
}

async fn watch_radio<A: RadioAdapter>(
    shared: Arc<Shared<A>>,
    mut events: broadcast::Receiver<RadioEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => shared.handle_event(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("radio event subscriber lagged, {} events skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::debug!("radio event subscription ended");
}

/// Connection controller over a radio adapter.
///
/// At most one role is active: opening a new listener or client channel
/// first tears down whatever was open before.
///
/// # Example
///
/// ```ignore
/// use peerchat::controller::{ChatController, ControllerConfig};
///
/// let controller = ChatController::new(radio, ControllerConfig::default(), &Handle::current());
///
/// let mut events = controller.connect(&peer);
/// while let Some(item) = events.next().await {
///     match item? {
///         ConnectionOutcome::Established => println!("connected"),
///         ConnectionOutcome::DataReceived { message: Some(m) } => println!("{}: {}", m.sender, m.body),
///         ConnectionOutcome::DataReceived { message: None } => {}
///         ConnectionOutcome::Failed { reason } => eprintln!("{}", reason),
///     }
/// }
/// ```
pub struct ChatController<A: RadioAdapter> {
    shared: Arc<Shared<A>>,

    /// Radio event subscription task.
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<A: RadioAdapter> ChatController<A> {
    /// Create a controller.
    ///
    /// The radio event subscription runs on `runtime` until
    /// [`release`](Self::release) or drop.
    pub fn new(adapter: Arc<A>, config: ControllerConfig, runtime: &Handle) -> Self {
        let shared = Arc::new(Shared::new(adapter, config));
        shared.update_paired_peers();

        let events = shared.adapter.subscribe();
        let watcher = runtime.spawn(watch_radio(Arc::clone(&shared), events));

        Self {
            shared,
            watcher: Mutex::new(Some(watcher)),
        }
    }

    /// Start scanning for peers. No-op without scan permission.
    pub fn start_discovery(&self) {
        self.shared.start_discovery();
    }

    /// Stop scanning for peers. No-op without scan permission.
    pub fn stop_discovery(&self) {
        self.shared.stop_discovery();
    }

    /// Listen for one incoming connection.
    ///
    /// Nothing happens until the returned sequence is polled.
    pub fn start_server(&self) -> ConnectionEvents<A> {
        ConnectionEvents::server(Arc::clone(&self.shared))
    }

    /// Connect to `peer` as a client.
    ///
    /// Nothing happens until the returned sequence is polled.
    pub fn connect(&self, peer: &Peer) -> ConnectionEvents<A> {
        ConnectionEvents::client(Arc::clone(&self.shared), peer.clone())
    }

    /// Send `text` over the open session.
    ///
    /// Returns `None` without connect permission or without an open session.
    /// Otherwise returns the sent message even if the write failed; a broken
    /// link surfaces through the receive side.
    pub async fn send_message(&self, peer: &Peer, text: &str) -> Option<Message> {
        if !self.shared.adapter.has_permission(Capability::Connect) {
            return None;
        }
        let session = self.shared.current_session()?;

        let sender = self
            .shared
            .adapter
            .local_name()
            .unwrap_or_else(|| self.shared.config.fallback_sender.clone());
        let message = Message::new(text, sender, true);

        if session.send(&frame::encode(&message)).await {
            tracing::debug!("message sent to {}", peer);
        } else {
            tracing::warn!("message to {} was not delivered", peer);
        }

        Some(message)
    }

    /// Close any open channel and listener. Safe to call at any time.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// End the radio subscription and stop. Terminal.
    pub fn release(&self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
        self.shared.stop();
    }

    /// Whether a session is currently open.
    pub fn has_session(&self) -> bool {
        self.shared.current_session().is_some()
    }

    /// Whether a listening handle is currently open.
    pub fn is_listening(&self) -> bool {
        self.shared.has_listener()
    }

    /// Link state reported by the radio for bonded peers.
    pub fn connection_established(&self) -> watch::Receiver<bool> {
        self.shared.connection_established.subscribe()
    }

    /// Peers found by discovery, deduplicated by address.
    pub fn scanned_peers(&self) -> watch::Receiver<Vec<Peer>> {
        self.shared.scanned_peers.subscribe()
    }

    /// Peers bonded with this device.
    pub fn paired_peers(&self) -> watch::Receiver<Vec<Peer>> {
        self.shared.paired_peers.subscribe()
    }

    /// User-visible error messages.
    pub fn errors(&self) -> broadcast::Receiver<String> {
        self.shared.errors.subscribe()
    }

    /// Get the controller configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    /// Get the radio adapter.
    pub fn adapter(&self) -> &Arc<A> {
        &self.shared.adapter
    }
}

impl<A: RadioAdapter> Drop for ChatController<A> {
    fn drop(&mut self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
    }
}
