//! Core types, constants, errors, and collaborator traits.

pub mod constants;
mod error;
mod traits;
mod types;

pub use error::*;
pub use traits::*;
pub use types::*;
