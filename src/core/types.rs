//! Value types shared by every layer.

use std::fmt;

/// A remote device, keyed by its stable hardware address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Peer {
    /// Display name reported by the radio (may be empty).
    pub name: String,
    /// Stable hardware address, e.g. `"00:11:22:AA:BB:CC"`.
    pub address: String,
}

impl Peer {
    /// Create a peer.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.name, self.address)
        }
    }
}

/// A chat message, either typed locally or decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message text.
    pub body: String,
    /// Label of the device that produced the message.
    pub sender: String,
    /// `true` if this device authored the message.
    pub from_local: bool,
}

impl Message {
    /// Create a message.
    pub fn new(body: impl Into<String>, sender: impl Into<String>, from_local: bool) -> Self {
        Self {
            body: body.into(),
            sender: sender.into(),
            from_local,
        }
    }
}

/// Item produced by a connection sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// A channel to the peer is open.
    Established,

    /// The connection attempt failed; no further items follow.
    Failed {
        /// User-visible reason.
        reason: String,
    },

    /// One inbound frame was read.
    DataReceived {
        /// Decoded message, `None` if the frame was malformed.
        message: Option<Message>,
    },
}

impl ConnectionOutcome {
    /// Shorthand for [`ConnectionOutcome::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Permission classes the radio gates operations behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Scanning for nearby peers.
    Scan,
    /// Listening, connecting, sending, and reading bonded peers.
    Connect,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan => f.write_str("scan"),
            Self::Connect => f.write_str("connect"),
        }
    }
}

/// Notification published by the radio adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A scan found a peer.
    PeerFound(Peer),

    /// The low-level link to a peer came up or went down.
    ConnectivityChanged {
        /// Whether the link is now up.
        connected: bool,
        /// Address of the peer whose link changed.
        address: String,
    },
}
