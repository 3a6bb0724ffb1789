//! Radio adapter backends.
//!
//! Platform radios stay outside this crate. The TCP backend stands in for one
//! on a loopback or LAN network so the controller can run end to end.

mod tcp;

pub use tcp::*;
