//! # vconn
//!
//! Virtual connections over UDP and TCP.
//!
//! Every packet carries a fixed 20-byte header with the sender's sequence
//! number and a 32-packet acknowledgment window for the other direction.
//! Acknowledgments ride along on ordinary traffic; there are no dedicated ack
//! packets and no timers. Packets sent as reliable are kept until the peer
//! acknowledges them and are resent once they fall out of the window
//! unacknowledged.
//!
//! - **Selective reliability**: per packet, not per connection
//! - **One model for both transports**: datagrams and streams look the same
//!   above the framing layer
//! - **Synchronous**: non-blocking polling, no runtime
//!
//! ## Feature Flags
//!
//! - `net` (default): [`std::net`] sockets behind the transport abstraction
//!
//! ## Modules
//!
//! - [`core`](crate::core): Constants, error types, and the [`Transport`] trait
//! - [`transport`]: Packet codec, framing, socket and in-memory endpoints
//! - [`sync`]: Acknowledgment window and reliable packet tracking
//! - [`connection`]: The [`Connection`] record and its send/read paths
//! - [`client`]: Opening client connections and the handshake
//! - [`server`]: Server connections and per-peer routing
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Duration;
//!
//! use vconn::prelude::*;
//! use vconn::transport::memory::MemoryNetwork;
//!
//! let network = MemoryNetwork::new();
//! let socket = network.bind(Protocol::Udp);
//! let server_addr = socket.local_addr();
//! let mut server = Connection::server_with_transport(socket, ConnectionConfig::default())?;
//! let mut clients = ClientTable::default();
//!
//! let mut client = Connection::client_with_transport(
//!     network.bind(Protocol::Udp),
//!     Some(server_addr),
//!     ConnectionConfig::default(),
//! )?;
//! client.send_connection_request_packet()?;
//!
//! let mut events = Vec::new();
//! clients.poll(&mut server, &mut events)?;
//! client.wait_until_connection_established(Duration::from_secs(1))?;
//!
//! client.send_reliable_packet(PacketType::Message, b"hello")?;
//! events.clear();
//! clients.poll(&mut server, &mut events)?;
//! assert!(matches!(
//!     &events[..],
//!     [ServerEvent::Packet { packet, .. }] if packet.body() == b"hello"
//! ));
//! # Ok::<(), vconn::core::ConnectionError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod connection;
pub mod core;
pub mod server;
pub mod sync;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::*;
    pub use crate::connection::*;
    pub use crate::core::*;
    pub use crate::server::*;
    pub use crate::transport::{Packet, PacketHeader, PacketType, TransportError, TransportResult};
}

// Re-export commonly used items at crate root
pub use crate::connection::{Connection, ConnectionConfig, ConnectionKind, ConnectionStatus};
pub use crate::core::{ConnectionError, ConnectionResult, Protocol, Transport};
pub use crate::server::{ClientTable, ServerEvent};
pub use crate::transport::{Packet, PacketType};
