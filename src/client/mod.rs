//! Client API
//!
//! Opening a client connection and running the handshake.

#[allow(clippy::module_inception)]
mod client;
mod handshake;

pub use client::*;
