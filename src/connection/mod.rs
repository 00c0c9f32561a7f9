//! Virtual connections.
//!
//! A [`Connection`] is one end of a conversation: a client dialing out, a
//! server listening, or the server's view of one of its peers. All four share
//! the same record and the same send/read paths; the [`ConnectionKind`] tag
//! selects the few places where they differ.
//!
//! ```text
//!   send_packet ──► stamp header ──► encode ──► Transport::send
//!
//!   read_packet ◄── ack engine ◄── magic filter ◄── FramingBuffer ◄── Transport::receive
//!                       │
//!                       └──► lost reliable packet ──► send_reliable_packet
//! ```

mod config;
#[allow(clippy::module_inception)]
mod connection;

pub use config::*;
pub use connection::*;
