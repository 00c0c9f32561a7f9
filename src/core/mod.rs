//! Core constants, error types, and the transport abstraction.
//!
//! Everything else in the crate builds on this module. It has no I/O of its
//! own: sockets live behind the [`Transport`] trait.

mod constants;
mod error;
mod traits;

pub use constants::*;
pub use error::*;
pub use traits::*;
