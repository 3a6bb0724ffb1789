//! Observable chat state.

use crate::core::{Message, Peer};

/// Everything a chat screen renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSnapshot {
    /// A connect or listen attempt is in flight.
    pub is_connecting: bool,

    /// A link to the peer is up.
    pub is_connection_established: bool,

    /// Peers found by discovery.
    pub scanned_peers: Vec<Peer>,

    /// Peers bonded with this device.
    pub paired_peers: Vec<Peer>,

    /// Conversation so far, oldest first.
    pub messages: Vec<Message>,

    /// Last user-visible error.
    pub error_message: Option<String>,
}

impl ChatSnapshot {
    /// The snapshot as published: the conversation is hidden while no link
    /// is up.
    pub fn visible(&self) -> Self {
        let mut view = self.clone();
        if !view.is_connection_established {
            view.messages.clear();
        }
        view
    }
}
