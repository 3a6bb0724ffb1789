//! Collaborator traits for the radio adapter.
//!
//! The adapter is a capability-gated black box: device enumeration, pairing,
//! and RF scanning stay behind these traits. The controller only needs to
//! open channels, list peers, and observe [`RadioEvent`]s.

use std::io;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::types::{Capability, Peer, RadioEvent};

/// One bidirectional byte channel to a peer.
///
/// Read and write are independent halves: a pending `read` must not block a
/// concurrent `write_all`. `close` is synchronous so teardown can run from
/// `Drop`, and it MUST wake any pending `connect`, `read`, or `write_all`
/// with an error.
#[async_trait]
pub trait RadioChannel: Send + Sync + 'static {
    /// Whether the channel currently has an open link.
    fn is_connected(&self) -> bool;

    /// Open the link to the remote end (client channels only).
    async fn connect(&self) -> io::Result<()>;

    /// Read up to `buf.len()` bytes; returns the count actually read.
    ///
    /// `Ok(0)` means the peer closed the stream.
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `data`.
    async fn write_all(&self, data: &[u8]) -> io::Result<()>;

    /// Close the channel. Idempotent.
    fn close(&self) -> io::Result<()>;
}

/// A listening handle that hands out incoming channels.
#[async_trait]
pub trait RadioListener: Send + Sync + 'static {
    /// Channel type produced by `accept`.
    type Channel: RadioChannel;

    /// Wait for the next incoming channel.
    async fn accept(&self) -> io::Result<Self::Channel>;

    /// Stop listening. Idempotent; a pending `accept` fails.
    fn close(&self) -> io::Result<()>;
}

/// The platform radio as seen by the controller.
#[async_trait]
pub trait RadioAdapter: Send + Sync + 'static {
    /// Channel type for both roles.
    type Channel: RadioChannel;

    /// Listener type for the server role.
    type Listener: RadioListener<Channel = Self::Channel>;

    /// Synchronous permission check, queried before every privileged call.
    fn has_permission(&self, capability: Capability) -> bool;

    /// Name this device advertises, if the radio reports one.
    fn local_name(&self) -> Option<String>;

    /// Peers currently visible to a scan.
    fn available_peers(&self) -> Vec<Peer>;

    /// Peers bonded (paired) with this device.
    fn bonded_peers(&self) -> Vec<Peer>;

    /// Start scanning; results arrive as [`RadioEvent::PeerFound`].
    fn start_scan(&self) -> bool;

    /// Stop an ongoing scan.
    fn stop_scan(&self) -> bool;

    /// Subscribe to adapter notifications.
    fn subscribe(&self) -> broadcast::Receiver<RadioEvent>;

    /// Open a listening handle registered under `service`.
    async fn listen(&self, name: &str, service: Uuid) -> io::Result<Self::Listener>;

    /// Resolve `address` to an unconnected channel scoped to `service`.
    fn remote_channel(&self, address: &str, service: Uuid) -> io::Result<Self::Channel>;
}
