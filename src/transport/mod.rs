//! Transport layer: message framing and the per-channel transfer session.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Chat Controller               │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   frame codec, transfer session         │
//! ├─────────────────────────────────────────┤
//! │     Radio channel (RFCOMM-like)         │
//! └─────────────────────────────────────────┘
//! ```

pub mod frame;
mod session;

pub use frame::{decode, decode_frame, encode};
pub use session::*;
