//! Bounded FIFO of received packets
//!
//! The queue is the only backpressure mechanism of the stack: when a producer outpaces the
//! consumer, packets are dropped according to the [`OverflowPolicy`] instead of blocking the
//! producer.
use std::collections::VecDeque;

use crate::packet::Packet;

/// Default capacity of packet queues
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// What to do with a packet pushed onto a full queue
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the incoming packet, keeping the oldest packets queued
    #[default]
    DropNewest,
    /// Evict the packet at the front of the queue to make room for the incoming one
    DropOldest,
}

/// Result of [`PacketQueue::push`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The packet was queued
    Accepted,
    /// The queue was full and the packet was discarded
    Rejected(Packet),
    /// The packet was queued after evicting the returned packet from the front
    Evicted(Packet),
}

impl PushOutcome {
    /// Returns true if the pushed packet is now in the queue
    pub fn is_queued(&self) -> bool {
        !matches!(self, PushOutcome::Rejected(_))
    }
}

/// A capped FIFO of packets
///
/// The length never exceeds [`max_size`](Self::max_size). Packets are only ever removed from the
/// front.
#[derive(Debug)]
pub struct PacketQueue {
    packets: VecDeque<Packet>,
    max_size: usize,
    policy: OverflowPolicy,
    dropped: u64,
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE_SIZE, OverflowPolicy::default())
    }
}

impl PacketQueue {
    /// Create a new queue
    ///
    /// A `max_size` of zero is raised to one.
    pub fn new(max_size: usize, policy: OverflowPolicy) -> Self {
        let max_size = max_size.max(1);
        Self {
            packets: VecDeque::with_capacity(max_size.min(64)),
            max_size,
            policy,
            dropped: 0,
        }
    }

    /// Append a packet to the back of the queue, applying the overflow policy when full
    pub fn push(&mut self, packet: Packet) -> PushOutcome {
        if self.packets.len() < self.max_size {
            self.packets.push_back(packet);
            return PushOutcome::Accepted;
        }

        self.dropped += 1;
        match self.policy {
            OverflowPolicy::DropNewest => {
                log::warn!(
                    "Packet queue full ({} packets), dropping incoming {}",
                    self.max_size,
                    packet.header
                );
                PushOutcome::Rejected(packet)
            }
            OverflowPolicy::DropOldest => {
                // Non-empty, since max_size is at least one
                let evicted = self.packets.pop_front().unwrap_or_default();
                log::warn!(
                    "Packet queue full ({} packets), dropping oldest {}",
                    self.max_size,
                    evicted.header
                );
                self.packets.push_back(packet);
                PushOutcome::Evicted(evicted)
            }
        }
    }

    /// Get the packet at the front of the queue
    pub fn front(&self) -> Option<&Packet> {
        self.packets.front()
    }

    /// Remove and return the packet at the front of the queue
    pub fn pop(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    /// Number of queued packets
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Returns true if no packets are queued
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// The capacity of the queue
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// The overflow policy of the queue
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Total number of packets dropped due to overflow
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Iterate over queued packets, front first
    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter()
    }

    /// Remove all queued packets
    pub fn clear(&mut self) {
        self.packets.clear();
    }
}
