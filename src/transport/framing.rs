//! Framing of received bytes into discrete packets.
//!
//! A datagram socket hands over exactly one packet per receive, but a stream
//! socket may deliver half a packet, or the tail of one packet and the head
//! of the next. [`FramingBuffer`] accumulates whatever arrives and yields
//! packets only once they are complete.

use tracing::debug;

use super::error::TransportResult;
use super::packet::{Packet, PacketError, decode, peek_packet_size};
use crate::core::{HEADER_SIZE, PACKET_SIZE, Protocol, Received};

/// Receive-side byte accumulator.
///
/// The storage is allocated once and reused for the lifetime of the
/// connection.
#[derive(Debug)]
pub struct FramingBuffer {
    buf: Box<[u8]>,
    len: usize,
    datagram: bool,
}

impl FramingBuffer {
    /// Create a buffer of `capacity` bytes framing data from `protocol`.
    ///
    /// The capacity is raised to [`PACKET_SIZE`] if smaller, so a full packet
    /// always fits.
    pub fn new(capacity: usize, protocol: Protocol) -> Self {
        Self {
            buf: vec![0u8; capacity.max(PACKET_SIZE)].into_boxed_slice(),
            len: 0,
            datagram: protocol.is_datagram(),
        }
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total storage in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Buffered bytes, oldest first.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Check if a whole packet sits at the front of the buffer.
    pub fn has_complete_packet(&self) -> bool {
        if self.len < HEADER_SIZE {
            return false;
        }
        match peek_packet_size(self.as_slice()) {
            Some(size) => self.len >= size as usize,
            None => false,
        }
    }

    /// Check if the front of the buffer cannot be the start of a packet.
    pub fn is_desynced(&self) -> bool {
        match peek_packet_size(self.as_slice()) {
            Some(size) => !(HEADER_SIZE..=PACKET_SIZE).contains(&(size as usize)),
            None => false,
        }
    }

    /// Check if asking the transport for more bytes makes sense.
    ///
    /// Only true when no complete packet is waiting and there is room left;
    /// this keeps the buffer from running ahead of the consumer.
    pub fn wants_more(&self) -> bool {
        !self.has_complete_packet() && !self.is_desynced() && self.len < self.buf.len()
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append bytes that were received elsewhere (e.g. routed from a shared
    /// server socket).
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), PacketError> {
        let available = self.buf.len() - self.len;
        if bytes.len() > available {
            return Err(PacketError::BufferFull {
                needed: bytes.len(),
                available,
            });
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    /// Let `recv` write into the spare capacity and account for what it read.
    ///
    /// Datagram buffers only ever receive into an empty buffer: leftover
    /// bytes that do not form a packet can never be completed by the next
    /// datagram, so they are discarded first.
    pub fn fill<F>(&mut self, recv: F) -> TransportResult<Received>
    where
        F: FnOnce(&mut [u8]) -> TransportResult<Received>,
    {
        if self.datagram && !self.is_empty() && !self.has_complete_packet() {
            debug!("discarding {} bytes of incomplete datagram", self.len);
            self.len = 0;
        }

        let received = recv(&mut self.buf[self.len..])?;
        if let Received::Data { len, .. } = received {
            self.len = (self.len + len).min(self.buf.len());
        }
        Ok(received)
    }

    /// Move the packet at the front of the buffer into `into`.
    ///
    /// Returns `Ok(false)` if no complete packet is buffered. Trailing bytes
    /// are shifted to the front for the next call. A packet with an unknown
    /// type is consumed and reported as an error; a nonsensical size field
    /// empties the buffer, since packet boundaries are lost.
    pub fn take_packet(&mut self, into: &mut Packet) -> Result<bool, PacketError> {
        if self.is_desynced() {
            let size = peek_packet_size(self.as_slice()).unwrap_or_default();
            self.len = 0;
            return Err(PacketError::InvalidSize(size));
        }
        if !self.has_complete_packet() {
            return Ok(false);
        }

        let size = peek_packet_size(self.as_slice()).unwrap_or_default() as usize;
        let result = decode(&self.buf[..size]).map(|(header, body)| into.set(header, body));
        self.consume(size);
        result.map(|()| true)
    }

    fn consume(&mut self, size: usize) {
        self.buf.copy_within(size..self.len, 0);
        self.len -= size;

        if self.datagram && !self.is_empty() && !self.has_complete_packet() {
            debug!("discarding {} trailing bytes of datagram", self.len);
            self.len = 0;
        }
    }
}
