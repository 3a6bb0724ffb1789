//! In-memory radio adapter for unit tests.
//!
//! Channels are `tokio::io::duplex` pairs; the test holds the remote end.
//! Every handle records `close()` calls so tests can assert that teardown
//! left nothing open.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

use crate::core::{Capability, Peer, RadioAdapter, RadioChannel, RadioEvent, RadioListener};

const DUPLEX_CAPACITY: usize = 4096;

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "handle closed")
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|c| *c).await;
}

/// Open/close bookkeeping shared by all handles of one kind.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    close_calls: AtomicUsize,
}

impl Counters {
    fn record_open(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Handles handed out and not yet closed.
    pub(crate) fn open(&self) -> usize {
        self.opened() - self.closed.load(Ordering::SeqCst)
    }
}

/// How a client channel's `connect` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectBehavior {
    Succeed,
    Fail,
    /// Never completes until the channel is closed.
    Hang,
}

pub(crate) struct MockChannel {
    reader: tokio::sync::Mutex<Option<ReadHalf<DuplexStream>>>,
    writer: tokio::sync::Mutex<Option<WriteHalf<DuplexStream>>>,
    pending: Mutex<Option<DuplexStream>>,
    connected: AtomicBool,
    closed: watch::Sender<bool>,
    close_recorded: AtomicBool,
    behavior: ConnectBehavior,
    counters: Arc<Counters>,
}

impl MockChannel {
    fn new(
        stream: DuplexStream,
        connected: bool,
        behavior: ConnectBehavior,
        counters: Arc<Counters>,
    ) -> Self {
        let (reader, writer, pending) = if connected {
            let (r, w) = tokio::io::split(stream);
            (Some(r), Some(w), None)
        } else {
            (None, None, Some(stream))
        };
        Self {
            reader: tokio::sync::Mutex::new(reader),
            writer: tokio::sync::Mutex::new(writer),
            pending: Mutex::new(pending),
            connected: AtomicBool::new(connected),
            closed: watch::channel(false).0,
            close_recorded: AtomicBool::new(false),
            behavior,
            counters,
        }
    }

    /// A connected channel and the remote end of its stream.
    pub(crate) fn connected_pair() -> (Self, DuplexStream) {
        let (local, remote) = tokio::io::duplex(DUPLEX_CAPACITY);
        let channel = Self::new(local, true, ConnectBehavior::Succeed, Arc::default());
        (channel, remote)
    }

    /// A channel that was never connected.
    pub(crate) fn unconnected() -> Self {
        let (local, _remote) = tokio::io::duplex(DUPLEX_CAPACITY);
        Self::new(local, false, ConnectBehavior::Fail, Arc::default())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl RadioChannel for MockChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> io::Result<()> {
        if self.is_closed() {
            return Err(aborted());
        }
        match self.behavior {
            ConnectBehavior::Fail => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "peer refused",
            )),
            ConnectBehavior::Hang => {
                let mut closed = self.closed.subscribe();
                wait_closed(&mut closed).await;
                Err(aborted())
            }
            ConnectBehavior::Succeed => {
                let stream = self
                    .pending
                    .lock()
                    .unwrap()
                    .take()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::AlreadyExists, "connected"))?;
                let (r, w) = tokio::io::split(stream);
                *self.reader.lock().await = Some(r);
                *self.writer.lock().await = Some(w);
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(aborted());
        }
        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or_else(aborted)?;
        tokio::select! {
            result = reader.read(buf) => result,
            _ = wait_closed(&mut closed) => Err(aborted()),
        }
    }

    async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(aborted());
        }
        let mut writer = self.writer.lock().await;
        writer.as_mut().ok_or_else(aborted)?.write_all(data).await
    }

    fn close(&self) -> io::Result<()> {
        self.counters.close_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.closed.send_replace(true);
        if !self.close_recorded.swap(true, Ordering::SeqCst) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        Ok(())
    }
}

pub(crate) struct MockListener {
    incoming: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MockChannel>>>,
    closed: watch::Sender<bool>,
    close_recorded: AtomicBool,
    counters: Arc<Counters>,
    channel_counters: Arc<Counters>,
    accepts: Arc<AtomicUsize>,
}

#[async_trait]
impl RadioListener for MockListener {
    type Channel = MockChannel;

    async fn accept(&self) -> io::Result<MockChannel> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(aborted());
        }
        let mut incoming = self.incoming.lock().await;
        let channel = tokio::select! {
            channel = incoming.recv() => channel.ok_or_else(aborted)?,
            _ = wait_closed(&mut closed) => return Err(aborted()),
        };
        self.accepts.fetch_add(1, Ordering::SeqCst);
        self.channel_counters.record_open();
        Ok(channel)
    }

    fn close(&self) -> io::Result<()> {
        self.counters.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.send_replace(true);
        if !self.close_recorded.swap(true, Ordering::SeqCst) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Scriptable in-memory adapter.
pub(crate) struct MockRadio {
    permissions: Mutex<HashSet<Capability>>,
    name: Option<String>,
    bonded: Vec<Peer>,
    available: Vec<Peer>,
    events: broadcast::Sender<RadioEvent>,
    behavior: Mutex<ConnectBehavior>,
    fail_listen: AtomicBool,
    pub(crate) channels: Arc<Counters>,
    pub(crate) listeners: Arc<Counters>,
    pub(crate) accepts: Arc<AtomicUsize>,
    pub(crate) scans_started: AtomicUsize,
    pub(crate) scans_stopped: AtomicUsize,
    /// Listeners still open when the last client channel was created.
    pub(crate) listeners_open_at_dial: AtomicUsize,
    incoming_tx: mpsc::UnboundedSender<MockChannel>,
    incoming_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MockChannel>>>,
    remotes: Mutex<Vec<DuplexStream>>,
}

impl MockRadio {
    pub(crate) fn new() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            permissions: Mutex::new([Capability::Scan, Capability::Connect].into_iter().collect()),
            name: Some("local-device".to_string()),
            bonded: vec![Peer::new("bonded", "AA:AA:AA:AA:AA:AA")],
            available: vec![Peer::new("nearby", "BB:BB:BB:BB:BB:BB")],
            events: broadcast::channel(16).0,
            behavior: Mutex::new(ConnectBehavior::Succeed),
            fail_listen: AtomicBool::new(false),
            channels: Arc::default(),
            listeners: Arc::default(),
            accepts: Arc::default(),
            scans_started: AtomicUsize::new(0),
            scans_stopped: AtomicUsize::new(0),
            listeners_open_at_dial: AtomicUsize::new(0),
            incoming_tx,
            incoming_rx: Arc::new(tokio::sync::Mutex::new(incoming_rx)),
            remotes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn without_name(mut self) -> Self {
        self.name = None;
        self
    }

    pub(crate) fn revoke(&self, capability: Capability) {
        self.permissions.lock().unwrap().remove(&capability);
    }

    pub(crate) fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub(crate) fn fail_listen(&self) {
        self.fail_listen.store(true, Ordering::SeqCst);
    }

    pub(crate) fn emit(&self, event: RadioEvent) {
        let _ = self.events.send(event);
    }

    /// Queue an incoming connection; returns the remote end.
    pub(crate) fn push_incoming(&self) -> DuplexStream {
        let (local, remote) = tokio::io::duplex(DUPLEX_CAPACITY);
        let channel = MockChannel::new(
            local,
            true,
            ConnectBehavior::Succeed,
            Arc::clone(&self.channels),
        );
        let _ = self.incoming_tx.send(channel);
        remote
    }

    /// Remote end of the most recent client channel.
    pub(crate) fn take_remote(&self) -> Option<DuplexStream> {
        self.remotes.lock().unwrap().pop()
    }

    pub(crate) fn bonded(&self) -> &Peer {
        &self.bonded[0]
    }
}

#[async_trait]
impl RadioAdapter for MockRadio {
    type Channel = MockChannel;
    type Listener = MockListener;

    fn has_permission(&self, capability: Capability) -> bool {
        self.permissions.lock().unwrap().contains(&capability)
    }

    fn local_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn available_peers(&self) -> Vec<Peer> {
        self.available.clone()
    }

    fn bonded_peers(&self) -> Vec<Peer> {
        self.bonded.clone()
    }

    fn start_scan(&self) -> bool {
        self.scans_started.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn stop_scan(&self) -> bool {
        self.scans_stopped.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.events.subscribe()
    }

    async fn listen(&self, _name: &str, _service: Uuid) -> io::Result<MockListener> {
        if self.fail_listen.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "service busy"));
        }
        self.listeners.record_open();
        Ok(MockListener {
            incoming: Arc::clone(&self.incoming_rx),
            closed: watch::channel(false).0,
            close_recorded: AtomicBool::new(false),
            counters: Arc::clone(&self.listeners),
            channel_counters: Arc::clone(&self.channels),
            accepts: Arc::clone(&self.accepts),
        })
    }

    fn remote_channel(&self, address: &str, _service: Uuid) -> io::Result<MockChannel> {
        if address.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty address"));
        }
        self.listeners_open_at_dial
            .store(self.listeners.open(), Ordering::SeqCst);
        let (local, remote) = tokio::io::duplex(DUPLEX_CAPACITY);
        let behavior = *self.behavior.lock().unwrap();
        let channel = MockChannel::new(local, false, behavior, Arc::clone(&self.channels));
        self.channels.record_open();
        self.remotes.lock().unwrap().push(remote);
        Ok(channel)
    }
}
