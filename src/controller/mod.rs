//! Chat controller: connection role, discovery, and published link state.

#[allow(clippy::module_inception)]
mod controller;
mod config;
mod events;

pub use config::*;
pub use controller::ChatController;
pub use events::ConnectionEvents;
