//! Chat state for a UI layer.
//!
//! [`ChatState`] drives a [`ChatController`](crate::controller::ChatController)
//! and folds its streams into one observable [`ChatSnapshot`].

mod aggregator;
mod snapshot;

pub use aggregator::ChatState;
pub use snapshot::ChatSnapshot;
