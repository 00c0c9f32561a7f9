//! Server API
//!
//! Server connections, their per-peer children, and the [`ClientTable`]
//! that routes a server's traffic to them.

#[allow(clippy::module_inception)]
mod server;
mod table;

pub use server::*;
pub use table::*;
