//! Mapping of packets onto CAN frames
//!
//! The packet header is carried in the 29-bit extended identifier:
//!
//! | bits  | field             |
//! |-------|-------------------|
//! | 27-26 | packet type       |
//! | 25    | acknowledge       |
//! | 24    | fragmented        |
//! | 23-16 | destination       |
//! | 15-8  | source            |
//! | 7-0   | packet identifier |
//!
//! Payloads of up to 8 bytes are sent in a single frame. Longer payloads are split into up to 16
//! fragments. Each fragment starts with two bytes: the 4-bit message counter and 4-bit fragment
//! index packed into the first byte, and the total payload size in the second. The remaining 6
//! bytes carry payload data.
use std::collections::VecDeque;

use hostbus_common::{
    messages::MAX_DATA_LENGTH, CanId, CanMessage, Header, Packet, Payload,
};
use snafu::Snafu;

/// Maximum number of fragments a single packet may be split into
pub const MAX_FRAGMENTS: usize = 16;
/// Number of payload bytes carried by each fragment
pub const FRAGMENT_DATA_SIZE: usize = MAX_DATA_LENGTH - 2;
/// Largest payload which can be sent over the bus
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAGMENTS * FRAGMENT_DATA_SIZE;
/// Largest packet type which fits in the identifier
pub const MAX_PACKET_TYPE: u8 = 3;

const TYPE_SHIFT: u32 = 26;
const ACK_BIT: u32 = 1 << 25;
const FRAGMENT_BIT: u32 = 1 << 24;

/// Error returned when a packet can't be represented on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum EncodeError {
    /// The packet type doesn't fit in the identifier
    #[snafu(display("Packet type {packet_type} exceeds maximum of {MAX_PACKET_TYPE}"))]
    UnsupportedType {
        /// The rejected type
        packet_type: u8,
    },
    /// The payload needs more than the maximum number of fragments
    #[snafu(display("Payload of {len} bytes exceeds maximum of {MAX_PAYLOAD_SIZE}"))]
    PayloadTooLarge {
        /// The rejected payload length
        len: usize,
    },
}

/// Build the extended CAN identifier for a header
pub fn encode_identifier(header: &Header, fragmented: bool) -> Result<u32, EncodeError> {
    if header.packet_type > MAX_PACKET_TYPE {
        return UnsupportedTypeSnafu {
            packet_type: header.packet_type,
        }
        .fail();
    }
    let mut id = (header.packet_type as u32) << TYPE_SHIFT;
    if header.is_acknowledge {
        id |= ACK_BIT;
    }
    if fragmented {
        id |= FRAGMENT_BIT;
    }
    id |= (header.destination as u32) << 16;
    id |= (header.source as u32) << 8;
    id |= header.packet_identifier as u32;
    Ok(id)
}

/// Recover the header and the fragmented flag from an extended CAN identifier
pub fn decode_identifier(id: u32) -> (Header, bool) {
    let header = Header {
        packet_type: ((id >> TYPE_SHIFT) & 0x3) as u8,
        is_acknowledge: id & ACK_BIT != 0,
        destination: (id >> 16) as u8,
        source: (id >> 8) as u8,
        packet_identifier: id as u8,
    };
    (header, id & FRAGMENT_BIT != 0)
}

fn fragment_count(size: usize) -> usize {
    size.div_ceil(FRAGMENT_DATA_SIZE)
}

/// Split a packet into the frames needed to send it
///
/// `counter` distinguishes consecutive fragmented packets with the same header; only its low 4
/// bits are used.
pub fn fragment(
    header: &Header,
    payload: &[u8],
    counter: u8,
) -> Result<Vec<CanMessage>, EncodeError> {
    if payload.len() <= MAX_DATA_LENGTH {
        let id = CanId::extended(encode_identifier(header, false)?);
        return Ok(vec![CanMessage::new(id, payload)]);
    }
    if payload.len() > MAX_PAYLOAD_SIZE {
        return PayloadTooLargeSnafu { len: payload.len() }.fail();
    }

    let id = CanId::extended(encode_identifier(header, true)?);
    let frames = payload
        .chunks(FRAGMENT_DATA_SIZE)
        .enumerate()
        .map(|(index, chunk)| {
            let mut data = [0u8; MAX_DATA_LENGTH];
            data[0] = (counter & 0x0f) << 4 | index as u8;
            data[1] = payload.len() as u8;
            data[2..2 + chunk.len()].copy_from_slice(chunk);
            CanMessage::new(id, &data[..2 + chunk.len()])
        })
        .collect();
    Ok(frames)
}

#[derive(Debug)]
struct PartialPacket {
    header: Header,
    counter: u8,
    size: usize,
    received: u16,
    buf: Vec<u8>,
}

impl PartialPacket {
    fn new(header: Header, counter: u8, size: usize) -> Self {
        Self {
            header,
            counter,
            size,
            received: 0,
            buf: vec![0; size],
        }
    }

    fn is_complete(&self) -> bool {
        let all = (1u32 << fragment_count(self.size)) - 1;
        self.received as u32 == all
    }
}

/// Rebuilds packets from received frames
///
/// Partial packets are keyed by header and message counter, so fragments of several packets may
/// be interleaved on the bus.
#[derive(Debug)]
pub struct Reassembler {
    pending: VecDeque<PartialPacket>,
    max_pending: usize,
}

/// Default limit on the number of partially received packets
pub const DEFAULT_MAX_PENDING: usize = 16;

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

impl Reassembler {
    /// Create a reassembler holding at most `max_pending` partial packets
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// Number of partially received packets
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Process a received frame, returning a packet once it is complete
    pub fn handle_frame(&mut self, msg: &CanMessage) -> Option<Packet> {
        let CanId::Extended(id) = msg.id() else {
            log::debug!("Ignoring frame with standard id {:?}", msg.id());
            return None;
        };
        if msg.is_rtr() {
            log::debug!("Ignoring remote frame 0x{id:08x}");
            return None;
        }

        let (header, fragmented) = decode_identifier(id);
        if !fragmented {
            return Some(Packet::new(header, Payload::copy_from_slice(msg.data())));
        }

        let data = msg.data();
        if data.len() < 2 {
            log::warn!("Fragment of {header} too short ({} bytes)", data.len());
            return None;
        }
        let counter = data[0] >> 4;
        let index = (data[0] & 0x0f) as usize;
        let size = data[1] as usize;
        let chunk = &data[2..];

        let count = fragment_count(size);
        if size == 0 || count > MAX_FRAGMENTS || index >= count {
            log::warn!("Invalid fragment {index} of {header} with size {size}");
            return None;
        }
        let offset = index * FRAGMENT_DATA_SIZE;
        let len = (size - offset).min(FRAGMENT_DATA_SIZE);
        if chunk.len() < len {
            log::warn!(
                "Fragment {index} of {header} carries {} bytes, expected {len}",
                chunk.len()
            );
            return None;
        }

        let position = self
            .pending
            .iter()
            .position(|p| p.header == header && p.counter == counter);
        let position = match position {
            // A repeated first fragment or a size mismatch means the sender started over
            Some(pos) if index == 0 || self.pending[pos].size != size => {
                self.pending[pos] = PartialPacket::new(header, counter, size);
                pos
            }
            Some(pos) => pos,
            None => {
                if self.pending.len() >= self.max_pending {
                    if let Some(stale) = self.pending.pop_front() {
                        log::warn!("Discarding incomplete packet {}", stale.header);
                    }
                }
                self.pending
                    .push_back(PartialPacket::new(header, counter, size));
                self.pending.len() - 1
            }
        };

        let partial = &mut self.pending[position];
        partial.buf[offset..offset + len].copy_from_slice(&chunk[..len]);
        partial.received |= 1 << index;

        if partial.is_complete() {
            let partial = self.pending.remove(position)?;
            Some(Packet::new(partial.header, partial.buf))
        } else {
            None
        }
    }

    /// Discard all partially received packets
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
