//! Protocol constants.
//!
//! The sizes are part of the wire format and MUST NOT be changed without
//! breaking compatibility with existing peers.

// =============================================================================
// PACKET SIZES
// =============================================================================

/// Size of the fixed packet header in bytes.
pub const HEADER_SIZE: usize = 20;

/// Largest packet (header + body) ever put on the wire.
///
/// Small enough to avoid IP fragmentation, large enough for the biggest
/// expected application message.
pub const PACKET_SIZE: usize = 1028;

/// Largest body a single packet can carry.
pub const MAX_BODY_SIZE: usize = PACKET_SIZE - HEADER_SIZE;

// =============================================================================
// ACKNOWLEDGMENT
// =============================================================================

/// Width of the acknowledgment bitmap, in packets.
pub const ACK_WINDOW: u32 = 32;

/// First sequence number a connection hands out.
pub const FIRST_SEQUENCE_ID: u32 = 1;

// =============================================================================
// RELIABILITY
// =============================================================================

/// Default number of reliable packets tracked per connection before the
/// oldest pending one is evicted.
pub const RELIABLE_CAPACITY: usize = 64;

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Client id of a connection that has not completed the handshake.
pub const INVALID_CLIENT_ID: u32 = u32::MAX;

/// How many copies of a handshake or teardown packet are sent.
pub const DEFAULT_SPAM_COUNT: usize = 3;

/// Default session tag.
pub const DEFAULT_MAGIC: u8 = 0x5A;
