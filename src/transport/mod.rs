//! Transport layer: packet codec, framing, and transport endpoints.
//!
//! - **Packet codec**: [`PacketHeader`], [`Packet`], [`encode`], [`decode`]
//! - **Framing**: [`FramingBuffer`] turns received bytes into whole packets
//! - **Errors**: [`TransportError`], the closed socket error taxonomy
//! - **Endpoints**: [`socket`] wraps `std::net` sockets (feature `net`),
//!   [`memory`] provides in-process endpoints with fault injection
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Connection (ack engine, reliability)  │
//! ├─────────────────────────────────────────┤
//! │   Framing buffer + packet codec         │  ← This module
//! ├─────────────────────────────────────────┤
//! │   Transport endpoint (UDP / TCP)        │
//! └─────────────────────────────────────────┘
//! ```

mod error;
mod framing;
pub mod memory;
mod packet;
#[cfg(feature = "net")]
#[cfg_attr(docsrs, doc(cfg(feature = "net")))]
pub mod socket;

pub use error::*;
pub use framing::FramingBuffer;
pub use packet::*;
