//! # peerchat
//!
//! Peer-to-peer chat over a short-range radio link.
//!
//! Two devices discover each other, open a single bidirectional byte stream
//! (one side listens, the other connects), and exchange delimited text
//! messages over it. The crate provides:
//!
//! - **Framing**: `body` + `U+241F` + `sender`, one frame per read
//! - **Lifecycle**: one active role at a time, with teardown on every exit
//!   path including cancellation
//! - **State**: discovery, connectivity, and conversation merged into one
//!   observable snapshot
//!
//! The radio itself stays behind the [`RadioAdapter`] trait.
//!
//! ## Feature Flags
//!
//! - `tcp` (default): loopback TCP stand-in for the radio
//!
//! ## Modules
//!
//! - [`core`]: Types, constants, errors, and collaborator traits
//! - [`transport`]: Message framing and the transfer session
//! - [`controller`]: Connection controller and its event sequences
//! - [`state`]: Merged chat state for a UI layer
//! - [`radio`]: TCP radio backend (requires `tcp` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use peerchat::prelude::*;
//!
//! let message = Message::new("hello", "Bob", true);
//! let bytes = encode(&message);
//!
//! assert_eq!(decode(&bytes, true), Some(message));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod controller;
pub mod state;
pub mod transport;

// Radio backends (feature-gated)
#[cfg(feature = "tcp")]
#[cfg_attr(docsrs, doc(cfg(feature = "tcp")))]
pub mod radio;

#[cfg(test)]
mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::controller::{
        ChatController, ConnectionEvents, ControllerConfig, ControllerConfigBuilder,
    };
    pub use crate::state::{ChatSnapshot, ChatState};
    pub use crate::transport::{ReceiveLoop, TransferSession, decode, encode};

    #[cfg(feature = "tcp")]
    pub use crate::radio::{TcpRadio, TcpRadioConfig, TcpRadioConfigBuilder};
}

// Re-export commonly used items at crate root
pub use crate::controller::{ChatController, ConnectionEvents, ControllerConfig};
pub use crate::core::{
    Capability, ConnectionOutcome, ControllerError, Message, Peer, PeerchatError, RadioAdapter,
};
pub use crate::state::{ChatSnapshot, ChatState};
