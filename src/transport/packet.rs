//! Packet encoding and decoding.
//!
//! Wire format (20-byte header, then the body):
//! ```text
//! +--------+-------+-----------+-------------+-------------+-------------+------+----------+
//! | Size   | Magic | Client ID | Sequence ID | Ack ID      | Ack Field   | Type | Body     |
//! | 2 bytes| 1 byte| 4 bytes   | 4 bytes     | 4 bytes     | 4 bytes     | 1 b. | ≤1008 b. |
//! +--------+-------+-----------+-------------+-------------+-------------+------+----------+
//! ```
//!
//! Integers are written in the host's native byte order. Both ends must
//! share the same integer layout; no byte-order normalization is performed,
//! and adding one would break compatibility with existing peers.

use thiserror::Error;

use crate::core::{HEADER_SIZE, INVALID_CLIENT_ID, MAX_BODY_SIZE, PACKET_SIZE};

/// Packet type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PacketType {
    /// Unspecified.
    #[default]
    Unknown = 0,
    /// Client asks the server for a connection.
    ConnectionRequest = 1,
    /// Server accepts a client and tells it its id.
    ConnectionEstablished = 2,
    /// Courtesy notice that the sender is going away.
    ConnectionClosed = 3,
    /// Keepalive; carries acks without a body.
    Ping = 4,
    /// Application message.
    Message = 5,
}

impl PacketType {
    /// Parse a packet type from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Unknown),
            1 => Some(Self::ConnectionRequest),
            2 => Some(Self::ConnectionEstablished),
            3 => Some(Self::ConnectionClosed),
            4 => Some(Self::Ping),
            5 => Some(Self::Message),
            _ => None,
        }
    }

    /// Convert the packet type to its byte representation.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Check if this is a handshake or teardown packet.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Self::ConnectionRequest | Self::ConnectionEstablished | Self::ConnectionClosed
        )
    }
}

/// Errors that can occur while encoding or decoding packets.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Body does not fit into a single packet.
    #[error("body too large: {len} bytes, at most {max} allowed")]
    BodyTooLarge {
        /// Body length.
        len: usize,
        /// Largest allowed body.
        max: usize,
    },

    /// Not enough bytes for the declared packet.
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Size field outside `HEADER_SIZE..=PACKET_SIZE`.
    #[error("invalid packet size field: {0}")]
    InvalidSize(u16),

    /// Type byte is not a known packet type.
    #[error("invalid packet type: 0x{0:02x}")]
    InvalidType(u8),

    /// Output buffer cannot hold the packet.
    #[error("buffer full: need {needed} bytes, {available} available")]
    BufferFull {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },
}

impl PacketError {
    /// Check if the error means a byte stream lost packet boundaries.
    pub fn is_desync(&self) -> bool {
        matches!(self, PacketError::InvalidSize(_))
    }
}

/// Packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Header + body length in bytes.
    pub packet_size: u16,
    /// Session tag; packets with a foreign tag are dropped.
    pub magic: u8,
    /// Server-assigned id of the client side of the connection.
    pub sender_client_id: u32,
    /// Sender's packet counter.
    pub sender_sequence_id: u32,
    /// Newest sequence id the sender has received from us.
    pub ack_id_for_remote_packets: u32,
    /// Receipt bitmap; bit `k` stands for `ack_id_for_remote_packets - k`.
    pub ack_field_for_remote_packets: u32,
    /// What the packet is.
    pub packet_type: PacketType,
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            packet_size: HEADER_SIZE as u16,
            magic: 0,
            sender_client_id: INVALID_CLIENT_ID,
            sender_sequence_id: 0,
            ack_id_for_remote_packets: 0,
            ack_field_for_remote_packets: 0,
            packet_type: PacketType::Unknown,
        }
    }
}

impl PacketHeader {
    /// Create a header for a body of `body_len` bytes.
    pub fn new(packet_type: PacketType, magic: u8, body_len: usize) -> Self {
        Self {
            packet_size: (HEADER_SIZE + body_len.min(MAX_BODY_SIZE)) as u16,
            magic,
            packet_type,
            ..Self::default()
        }
    }

    /// Length of the body announced by the size field.
    pub fn body_len(&self) -> usize {
        (self.packet_size as usize).saturating_sub(HEADER_SIZE)
    }

    /// Serialize the header into the first [`HEADER_SIZE`] bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<(), PacketError> {
        let mut w = Writer::new(buf);
        w.put_u16(self.packet_size)?;
        w.put_u8(self.magic)?;
        w.put_u32(self.sender_client_id)?;
        w.put_u32(self.sender_sequence_id)?;
        w.put_u32(self.ack_id_for_remote_packets)?;
        w.put_u32(self.ack_field_for_remote_packets)?;
        w.put_u8(self.packet_type.as_byte())?;
        Ok(())
    }

    /// Parse a header from the front of `bytes`.
    pub fn read_from(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut r = Reader::new(bytes);
        let packet_size = r.get_u16()?;
        if !(HEADER_SIZE..=PACKET_SIZE).contains(&(packet_size as usize)) {
            return Err(PacketError::InvalidSize(packet_size));
        }

        let magic = r.get_u8()?;
        let sender_client_id = r.get_u32()?;
        let sender_sequence_id = r.get_u32()?;
        let ack_id_for_remote_packets = r.get_u32()?;
        let ack_field_for_remote_packets = r.get_u32()?;
        let type_byte = r.get_u8()?;
        let packet_type = PacketType::from_byte(type_byte).ok_or(PacketError::InvalidType(type_byte))?;

        Ok(Self {
            packet_size,
            magic,
            sender_client_id,
            sender_sequence_id,
            ack_id_for_remote_packets,
            ack_field_for_remote_packets,
            packet_type,
        })
    }
}

/// Read the size field of a packet starting at the front of `bytes`.
///
/// Returns `None` while fewer than two bytes are available.
pub fn peek_packet_size(bytes: &[u8]) -> Option<u16> {
    Reader::new(bytes).get_u16().ok()
}

/// Encode a packet into `out` and return the number of bytes written.
///
/// The size field is derived from `body`; whatever `header.packet_size` holds
/// is ignored. Nothing is written if the body exceeds [`MAX_BODY_SIZE`] or
/// `out` is too small.
pub fn encode(header: &PacketHeader, body: &[u8], out: &mut [u8]) -> Result<usize, PacketError> {
    if body.len() > MAX_BODY_SIZE {
        return Err(PacketError::BodyTooLarge {
            len: body.len(),
            max: MAX_BODY_SIZE,
        });
    }
    let total = HEADER_SIZE + body.len();
    if out.len() < total {
        return Err(PacketError::BufferFull {
            needed: total,
            available: out.len(),
        });
    }

    let header = PacketHeader {
        packet_size: total as u16,
        ..*header
    };
    header.write_to(&mut out[..HEADER_SIZE])?;
    out[HEADER_SIZE..total].copy_from_slice(body);
    Ok(total)
}

/// Decode the packet at the front of `bytes`.
///
/// Trailing bytes beyond the announced size are left alone; the size field
/// tells the caller how much was consumed.
pub fn decode(bytes: &[u8]) -> Result<(PacketHeader, &[u8]), PacketError> {
    if bytes.len() < HEADER_SIZE {
        return Err(PacketError::TooShort {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    }
    let header = PacketHeader::read_from(bytes)?;
    let total = header.packet_size as usize;
    if bytes.len() < total {
        return Err(PacketError::TooShort {
            expected: total,
            actual: bytes.len(),
        });
    }
    Ok((header, &bytes[HEADER_SIZE..total]))
}

/// A decoded packet.
///
/// The body buffer is reused when a packet is overwritten with
/// [`Packet::set`], so a connection can keep one incoming packet around
/// without allocating per read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    /// The packet header.
    pub header: PacketHeader,
    body: Vec<u8>,
}

impl Packet {
    /// Create a packet; the size field is derived from `body`.
    pub fn new(mut header: PacketHeader, body: Vec<u8>) -> Result<Self, PacketError> {
        if body.len() > MAX_BODY_SIZE {
            return Err(PacketError::BodyTooLarge {
                len: body.len(),
                max: MAX_BODY_SIZE,
            });
        }
        header.packet_size = (HEADER_SIZE + body.len()) as u16;
        Ok(Self { header, body })
    }

    /// The packet type.
    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    /// The opaque body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Overwrite this packet in place.
    pub fn set(&mut self, header: PacketHeader, body: &[u8]) {
        self.header = header;
        self.body.clear();
        self.body.extend_from_slice(body);
    }

    /// Encode into `out`, returning the number of bytes written.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<usize, PacketError> {
        encode(&self.header, &self.body, out)
    }
}

/// Bounds-checked writer over a byte slice.
struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), PacketError> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(PacketError::BufferFull {
                needed: end,
                available: self.buf.len(),
            });
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    fn put_u8(&mut self, v: u8) -> Result<(), PacketError> {
        self.put(&[v])
    }

    fn put_u16(&mut self, v: u16) -> Result<(), PacketError> {
        self.put(&v.to_ne_bytes())
    }

    fn put_u32(&mut self, v: u32) -> Result<(), PacketError> {
        self.put(&v.to_ne_bytes())
    }
}

/// Bounds-checked reader over a byte slice.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        let end = self.pos + N;
        let slice = self.bytes.get(self.pos..end).ok_or(PacketError::TooShort {
            expected: end,
            actual: self.bytes.len(),
        })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    fn get_u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take::<1>()?[0])
    }

    fn get_u16(&mut self) -> Result<u16, PacketError> {
        Ok(u16::from_ne_bytes(self.take()?))
    }

    fn get_u32(&mut self) -> Result<u32, PacketError> {
        Ok(u32::from_ne_bytes(self.take()?))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn sample_header(body_len: usize) -> PacketHeader {
        PacketHeader {
            packet_size: (HEADER_SIZE + body_len) as u16,
            magic: 0x5A,
            sender_client_id: 7,
            sender_sequence_id: 0x0102_0304,
            ack_id_for_remote_packets: 99,
            ack_field_for_remote_packets: 0xF0F0_0001,
            packet_type: PacketType::Message,
        }
    }

    #[test]
    fn test_packet_type_roundtrip() {
        for t in [
            PacketType::Unknown,
            PacketType::ConnectionRequest,
            PacketType::ConnectionEstablished,
            PacketType::ConnectionClosed,
            PacketType::Ping,
            PacketType::Message,
        ] {
            assert_eq!(PacketType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(PacketType::from_byte(6), None);
        assert_eq!(PacketType::from_byte(0xFF), None);
    }

    #[test]
    fn test_header_field_offsets() {
        let header = sample_header(3);
        let mut buf = [0u8; HEADER_SIZE];
        header.write_to(&mut buf).unwrap();

        assert_eq!(&buf[0..2], &23u16.to_ne_bytes());
        assert_eq!(buf[2], 0x5A);
        assert_eq!(&buf[3..7], &7u32.to_ne_bytes());
        assert_eq!(&buf[7..11], &0x0102_0304u32.to_ne_bytes());
        assert_eq!(&buf[11..15], &99u32.to_ne_bytes());
        assert_eq!(&buf[15..19], &0xF0F0_0001u32.to_ne_bytes());
        assert_eq!(buf[19], PacketType::Message.as_byte());
    }

    #[rstest]
    #[case::empty(0)]
    #[case::small(5)]
    #[case::max(MAX_BODY_SIZE)]
    fn test_roundtrip(#[case] body_len: usize) {
        let body: Vec<u8> = (0..body_len).map(|i| (i % 251) as u8).collect();
        let header = sample_header(body_len);
        let mut out = [0u8; PACKET_SIZE];

        let written = encode(&header, &body, &mut out).unwrap();
        assert_eq!(written, HEADER_SIZE + body_len);

        let (decoded, decoded_body) = decode(&out[..written]).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded_body, body.as_slice());
    }

    #[test]
    fn test_encode_rejects_oversized_body() {
        let body = vec![0u8; MAX_BODY_SIZE + 1];
        let mut out = [0xEEu8; PACKET_SIZE + 8];
        assert_eq!(
            encode(&sample_header(0), &body, &mut out),
            Err(PacketError::BodyTooLarge {
                len: MAX_BODY_SIZE + 1,
                max: MAX_BODY_SIZE
            })
        );
        assert!(out.iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn test_encode_rejects_small_buffer() {
        let mut out = [0u8; HEADER_SIZE + 1];
        assert!(matches!(
            encode(&sample_header(2), &[1, 2], &mut out),
            Err(PacketError::BufferFull { needed: 22, .. })
        ));
    }

    #[test]
    fn test_encode_derives_size_field() {
        let mut header = sample_header(0);
        header.packet_size = 999;
        let mut out = [0u8; PACKET_SIZE];
        let written = encode(&header, &[9, 9], &mut out).unwrap();
        assert_eq!(peek_packet_size(&out[..written]), Some(22));
    }

    #[test]
    fn test_decode_too_short() {
        assert!(matches!(
            decode(&[0u8; 10]),
            Err(PacketError::TooShort { expected: HEADER_SIZE, actual: 10 })
        ));

        let mut out = [0u8; PACKET_SIZE];
        let written = encode(&sample_header(4), &[1, 2, 3, 4], &mut out).unwrap();
        assert!(matches!(
            decode(&out[..written - 1]),
            Err(PacketError::TooShort { expected: 24, .. })
        ));
    }

    #[rstest]
    #[case::below_header(19)]
    #[case::zero(0)]
    #[case::above_max(PACKET_SIZE as u16 + 1)]
    fn test_decode_invalid_size(#[case] size: u16) {
        let mut bytes = [0u8; HEADER_SIZE];
        sample_header(0).write_to(&mut bytes).unwrap();
        bytes[0..2].copy_from_slice(&size.to_ne_bytes());
        assert_eq!(decode(&bytes), Err(PacketError::InvalidSize(size)));
    }

    #[test]
    fn test_decode_invalid_type() {
        let mut bytes = [0u8; HEADER_SIZE];
        sample_header(0).write_to(&mut bytes).unwrap();
        bytes[19] = 0x42;
        assert_eq!(decode(&bytes), Err(PacketError::InvalidType(0x42)));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut out = [0u8; PACKET_SIZE];
        let written = encode(&sample_header(1), &[7], &mut out).unwrap();
        let (header, body) = decode(&out[..written + 5]).unwrap();
        assert_eq!(header.packet_size as usize, written);
        assert_eq!(body, &[7]);
    }

    #[test]
    fn test_packet_set_reuses_buffer() {
        let mut packet = Packet::new(sample_header(0), vec![1, 2, 3]).unwrap();
        packet.set(sample_header(2), &[4, 5]);
        assert_eq!(packet.body(), &[4, 5]);
        assert_eq!(packet.header.packet_size, 22);
    }

    #[test]
    fn test_packet_new_rejects_oversized_body() {
        assert!(Packet::new(PacketHeader::default(), vec![0; MAX_BODY_SIZE + 1]).is_err());
    }

    #[test]
    fn test_peek_packet_size() {
        assert_eq!(peek_packet_size(&[]), None);
        assert_eq!(peek_packet_size(&[1]), None);
        assert_eq!(peek_packet_size(&300u16.to_ne_bytes()), Some(300));
    }
}
