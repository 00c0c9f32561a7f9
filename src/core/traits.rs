//! The transport abstraction.
//!
//! Connections never touch OS sockets directly. They talk to a [`Transport`],
//! a thin facade over create/accept/send/receive that reports failures through
//! the closed [`TransportError`] taxonomy instead of platform error codes.

use std::net::SocketAddr;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use crate::transport::TransportResult;

/// Socket protocol underneath a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Datagram socket: one packet per receive, no ordering or delivery guarantees.
    Udp,
    /// Stream socket: bytes may arrive split or coalesced.
    Tcp,
}

impl Protocol {
    /// Check if the protocol delivers whole datagrams.
    pub fn is_datagram(self) -> bool {
        matches!(self, Protocol::Udp)
    }
}

/// Outcome of a non-blocking receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// `len` bytes were written to the front of the buffer.
    Data {
        /// Number of bytes read.
        len: usize,
        /// Sender, when the transport knows it (datagram sockets).
        from: Option<SocketAddr>,
    },
    /// Nothing is available right now; poll again later.
    NoData,
    /// The remote closed the stream gracefully.
    Closed,
}

/// A transport endpoint.
///
/// Every method returns immediately. "Would block" is not an error: it is
/// reported as [`Received::NoData`] or `Ok(None)`. Endpoints are shared by
/// reference counting so a UDP server and its virtual per-peer connections
/// can use the same socket.
#[cfg_attr(test, automock)]
pub trait Transport: Send + Sync {
    /// Protocol of this endpoint.
    fn protocol(&self) -> Protocol;

    /// Local address of this endpoint, if it has one.
    fn local_address(&self) -> Option<SocketAddr>;

    /// Send one encoded packet. `remote` addresses unconnected datagram sockets
    /// and is ignored by stream sockets.
    fn send(&self, remote: Option<SocketAddr>, bytes: &[u8]) -> TransportResult<()>;

    /// Receive into `buf` without blocking.
    fn receive(&self, buf: &mut [u8]) -> TransportResult<Received>;

    /// Accept a pending stream peer without blocking.
    ///
    /// Returns `Ok(None)` when no peer is waiting, and always for datagram
    /// endpoints.
    fn accept(&self) -> TransportResult<Option<(Arc<dyn Transport>, SocketAddr)>>;

    /// Release the underlying socket. Later calls fail with a custom error.
    fn close(&self);
}
