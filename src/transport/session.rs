//! Transfer session over one open radio channel.
//!
//! [`TransferSession::open`] splits a channel into a send handle and the
//! single [`ReceiveLoop`] allowed per channel.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::frame;
use crate::core::constants::DEFAULT_READ_BUFFER_SIZE;
use crate::core::{ConnectionOutcome, RadioChannel, TransferError};

/// Send side of an open channel.
///
/// Writes are serialized: at most one is in flight at a time. Reads happen
/// independently in the paired [`ReceiveLoop`].
pub struct TransferSession<C: RadioChannel> {
    /// The underlying channel, shared with the receive loop.
    channel: Arc<C>,
    /// Serializes writes.
    write_lock: Mutex<()>,
}

impl<C: RadioChannel> TransferSession<C> {
    /// Wrap an open channel, returning the send handle and the receive loop.
    pub fn open(channel: Arc<C>, read_buffer_size: usize) -> (Self, ReceiveLoop<C>) {
        let incoming = ReceiveLoop {
            channel: Arc::clone(&channel),
            recv_buffer: vec![0u8; read_buffer_size.max(1)],
            started: false,
            finished: false,
        };
        let session = Self {
            channel,
            write_lock: Mutex::new(()),
        };
        (session, incoming)
    }

    /// Wrap an open channel with the default buffer size.
    pub fn with_default_buffer(channel: Arc<C>) -> (Self, ReceiveLoop<C>) {
        Self::open(channel, DEFAULT_READ_BUFFER_SIZE)
    }

    /// Write `data` to the peer.
    ///
    /// Returns `false` on any I/O failure; errors never escape.
    pub async fn send(&self, data: &[u8]) -> bool {
        let _guard = self.write_lock.lock().await;
        match self.channel.write_all(data).await {
            Ok(()) => {
                tracing::trace!("sent {} bytes", data.len());
                true
            }
            Err(e) => {
                tracing::debug!("write failed: {}", e);
                false
            }
        }
    }

    /// Get the underlying channel.
    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }
}

impl<C: RadioChannel> std::fmt::Debug for TransferSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSession")
            .field("connected", &self.channel.is_connected())
            .finish()
    }
}

/// Lazy, non-restartable sequence of inbound frames.
///
/// Each call to [`next`](Self::next) performs exactly one read.
pub struct ReceiveLoop<C: RadioChannel> {
    channel: Arc<C>,
    recv_buffer: Vec<u8>,
    started: bool,
    finished: bool,
}

impl<C: RadioChannel> ReceiveLoop<C> {
    /// Read and decode the next frame.
    ///
    /// Returns `None` once the loop has ended: immediately if the channel was
    /// not connected when the loop started, or after a fatal error was
    /// returned. Malformed frames yield `DataReceived { message: None }`
    /// and the loop continues.
    pub async fn next(&mut self) -> Option<Result<ConnectionOutcome, TransferError>> {
        if self.finished {
            return None;
        }

        if !self.started {
            self.started = true;
            if !self.channel.is_connected() {
                tracing::debug!("channel not connected, receive loop ends");
                self.finished = true;
                return None;
            }
        }

        let len = match self.channel.read(&mut self.recv_buffer).await {
            Ok(0) => {
                self.finished = true;
                return Some(Err(TransferError::Disconnected));
            }
            Ok(len) => len,
            Err(e) => {
                self.finished = true;
                return Some(Err(TransferError::ReadFailed(e)));
            }
        };

        let message = match frame::decode_frame(&self.recv_buffer[..len], false) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!("malformed frame ({} bytes): {}", len, e);
                None
            }
        };

        Some(Ok(ConnectionOutcome::DataReceived { message }))
    }

    /// Check if the loop has ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
