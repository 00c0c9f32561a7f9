//! Reliable delivery tracker
//!
//! Keeps a copy of every reliable packet until the remote acknowledges it.

use std::collections::VecDeque;

use crate::transport::PacketType;

/// A reliable packet that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedPacket {
    /// Sequence number the packet went out with
    pub sequence_id: u32,
    /// Packet type, reused on resend
    pub packet_type: PacketType,
    /// Payload, reused on resend
    pub body: Vec<u8>,
}

/// Insertion-ordered, capacity-bounded list of unacknowledged reliable packets.
#[derive(Debug, Clone)]
pub struct ReliableTracker {
    entries: VecDeque<TrackedPacket>,
    capacity: usize,
}

impl ReliableTracker {
    /// Create a tracker holding at most `capacity` packets (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of tracked packets
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tracked packets
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if `sequence_id` is still pending
    pub fn contains(&self, sequence_id: u32) -> bool {
        self.entries.iter().any(|e| e.sequence_id == sequence_id)
    }

    /// Track a packet that was just sent.
    ///
    /// At capacity the oldest entry is evicted first and returned. The
    /// evicted packet is not resent; only its tracking is lost.
    pub fn push(&mut self, packet: TrackedPacket) -> Option<TrackedPacket> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(packet);
        evicted
    }

    /// Stop tracking `sequence_id`, returning the entry if it was pending.
    pub fn remove(&mut self, sequence_id: u32) -> Option<TrackedPacket> {
        let index = self.entries.iter().position(|e| e.sequence_id == sequence_id)?;
        self.entries.remove(index)
    }

    /// Pending packets, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &TrackedPacket> {
        self.entries.iter()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
