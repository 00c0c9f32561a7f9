//! Sequence numbering and the 32-packet acknowledgment windows.
//!
//! Every connection keeps two windows. The *remote* window records which of
//! the peer's packets arrived and is piggybacked on every outgoing header. The
//! *local* window is the peer's latest such report about our packets; when it
//! slides forward, sequence numbers that fall off the end without ever being
//! marked are reported as lost.
//!
//! ```text
//!   bit:     31 ............ 2   1   0
//!   seq:  id-31 ......... id-2 id-1 id
//! ```

use tracing::trace;

use crate::core::{ACK_WINDOW, FIRST_SEQUENCE_ID, INVALID_CLIENT_ID};
use crate::transport::PacketHeader;

/// Shift a window left by `gap` positions, dropping everything that falls off.
fn shift_window(field: u32, gap: u32) -> u32 {
    if gap >= ACK_WINDOW { 0 } else { field << gap }
}

/// Mask of window positions that stand for real sequence numbers (`>= 1`).
fn valid_positions(ack_id: u32) -> u32 {
    if ack_id >= ACK_WINDOW {
        u32::MAX
    } else {
        (1u32 << ack_id) - 1
    }
}

/// A set of up to 32 sequence numbers ending at `newest`.
///
/// Iterates oldest first without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceSet {
    newest: u32,
    bits: u32,
}

impl SequenceSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self { newest: 0, bits: 0 }
    }

    /// Sequence numbers `newest - k` for every set bit `k` of `bits`.
    ///
    /// Bits that would name a sequence number below 1 are ignored.
    pub fn from_window(newest: u32, bits: u32) -> Self {
        Self {
            newest,
            bits: bits & valid_positions(newest),
        }
    }

    /// Number of sequence numbers in the set.
    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Check if `sequence_id` is in the set.
    pub fn contains(&self, sequence_id: u32) -> bool {
        match self.newest.checked_sub(sequence_id) {
            Some(k) if k < ACK_WINDOW => self.bits & (1 << k) != 0,
            _ => false,
        }
    }
}

impl Iterator for SequenceSet {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.bits == 0 {
            return None;
        }
        let k = 31 - self.bits.leading_zeros();
        self.bits &= !(1 << k);
        Some(self.newest - k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len(), Some(self.len()))
    }
}

impl ExactSizeIterator for SequenceSet {}

/// What one inbound header did to the local window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AckOutcome {
    /// Our packets that scrolled out of the window unacknowledged.
    pub lost: SequenceSet,
    /// Our packets the window currently marks as received.
    pub acked: SequenceSet,
}

/// Per-connection sequence and acknowledgment state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Session tag; packets carrying another magic are dropped.
    pub magic: u8,
    /// Id assigned by the server, [`INVALID_CLIENT_ID`] until the handshake completes.
    pub client_id: u32,
    /// Sequence number of the next outgoing packet.
    pub sequence_id_for_local_packets: u32,
    /// Newest sequence number received from the remote.
    pub ack_id_for_remote_packets: u32,
    /// Receipt bitmap for the remote's packets, bit `k` = `ack_id - k`.
    pub ack_field_for_remote_packets: u32,
    /// Newest of our sequence numbers the remote reported.
    pub ack_id_for_local_packets: u32,
    /// The remote's receipt bitmap for our packets.
    pub ack_field_for_local_packets: u32,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self::new(crate::core::DEFAULT_MAGIC)
    }
}

impl ConnectionInfo {
    /// Fresh state for a connection using `magic`.
    pub fn new(magic: u8) -> Self {
        Self {
            magic,
            client_id: INVALID_CLIENT_ID,
            sequence_id_for_local_packets: FIRST_SEQUENCE_ID,
            ack_id_for_remote_packets: 0,
            ack_field_for_remote_packets: 0,
            ack_id_for_local_packets: 0,
            ack_field_for_local_packets: 0,
        }
    }

    /// Take the next outgoing sequence number.
    pub fn next_sequence_id(&mut self) -> u32 {
        let id = self.sequence_id_for_local_packets;
        self.sequence_id_for_local_packets = id.saturating_add(1);
        id
    }

    /// Fill in the identity, sequence and acknowledgment fields of an
    /// outgoing header. Consumes one sequence number.
    pub fn stamp(&mut self, header: &mut PacketHeader) {
        header.magic = self.magic;
        header.sender_client_id = self.client_id;
        header.sender_sequence_id = self.next_sequence_id();
        header.ack_id_for_remote_packets = self.ack_id_for_remote_packets;
        header.ack_field_for_remote_packets = self.ack_field_for_remote_packets;
    }

    /// Check if the remote reported receiving our packet `sequence_id`.
    pub fn is_acked(&self, sequence_id: u32) -> bool {
        SequenceSet::from_window(self.ack_id_for_local_packets, self.ack_field_for_local_packets)
            .contains(sequence_id)
    }

    /// Update both windows for an inbound, magic-matched header.
    pub fn update_for_packet(&mut self, header: &PacketHeader) -> AckOutcome {
        self.record_remote_packet(header.sender_sequence_id);
        let lost = self.merge_local_report(header.ack_id_for_remote_packets, header.ack_field_for_remote_packets);

        AckOutcome {
            lost,
            acked: SequenceSet::from_window(self.ack_id_for_local_packets, self.ack_field_for_local_packets),
        }
    }

    fn record_remote_packet(&mut self, sequence_id: u32) {
        let newest = self.ack_id_for_remote_packets;
        if sequence_id > newest {
            let gap = sequence_id - newest;
            self.ack_field_for_remote_packets = shift_window(self.ack_field_for_remote_packets, gap) | 1;
            self.ack_id_for_remote_packets = sequence_id;
        } else {
            let age = newest - sequence_id;
            if age < ACK_WINDOW {
                self.ack_field_for_remote_packets |= 1 << age;
            }
        }
    }

    /// Fold the remote's report on our packets into the local window.
    ///
    /// Returns the ids that scrolled out of the old window unacknowledged.
    /// Only the old 32-packet window is examined: when the report jumps 32 or
    /// more ahead, ids between the old window and the new one are neither
    /// reported lost nor acknowledged.
    fn merge_local_report(&mut self, report_id: u32, report_field: u32) -> SequenceSet {
        let stored = self.ack_id_for_local_packets;
        if report_id > stored {
            let gap = report_id - stored;
            let scrolling_out = if gap >= ACK_WINDOW {
                u32::MAX
            } else {
                u32::MAX << (ACK_WINDOW - gap)
            };
            let lost = SequenceSet::from_window(stored, !self.ack_field_for_local_packets & scrolling_out);

            self.ack_field_for_local_packets = shift_window(self.ack_field_for_local_packets, gap) | report_field;
            self.ack_id_for_local_packets = report_id;
            trace!(
                "local ack window advanced to {} ({} lost)",
                report_id,
                lost.len()
            );
            lost
        } else {
            // A stale report can only add information.
            let age = stored - report_id;
            if age < ACK_WINDOW {
                self.ack_field_for_local_packets |= report_field << age;
            }
            SequenceSet::empty()
        }
    }
}
