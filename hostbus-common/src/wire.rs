//! Byte encoding of packets on pub/sub transports
//!
//! Each transport message carries exactly one packet:
//!
//! | byte | content             |
//! |------|---------------------|
//! | 0    | packet type         |
//! | 1    | acknowledge (0 / 1) |
//! | 2    | destination         |
//! | 3    | source              |
//! | 4    | packet identifier   |
//! | 5..  | payload             |
//!
//! There is no length prefix; the payload size is the message length minus the header.
use bytes::Bytes;
use snafu::Snafu;

use crate::packet::{Header, Packet, Payload};

/// Number of header bytes preceding the payload
pub const HEADER_SIZE: usize = 5;

/// Error returned when a message cannot be decoded into a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum DecodeError {
    /// The message is shorter than the packet header
    #[snafu(display("Message of {len} bytes is too short to hold a packet header"))]
    TooShort {
        /// Length of the rejected message
        len: usize,
    },
}

/// Encode a packet into a newly allocated message buffer
pub fn encode(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(header.packet_type);
    buf.push(header.is_acknowledge as u8);
    buf.push(header.destination);
    buf.push(header.source);
    buf.push(header.packet_identifier);
    buf.extend_from_slice(payload);
    buf
}

/// Decode a packet from a message
///
/// The payload is copied out of `msg`. Use [`decode_bytes`] to avoid the copy when the message is
/// already held in a [`Bytes`].
pub fn decode(msg: &[u8]) -> Result<Packet, DecodeError> {
    let header = decode_header(msg)?;
    Ok(Packet {
        header,
        payload: Payload::copy_from_slice(&msg[HEADER_SIZE..]),
    })
}

/// Decode a packet, sharing the payload bytes with `msg`
pub fn decode_bytes(msg: Bytes) -> Result<Packet, DecodeError> {
    let header = decode_header(&msg)?;
    Ok(Packet {
        header,
        payload: msg.slice(HEADER_SIZE..).into(),
    })
}

fn decode_header(msg: &[u8]) -> Result<Header, DecodeError> {
    if msg.len() < HEADER_SIZE {
        return TooShortSnafu { len: msg.len() }.fail();
    }
    Ok(Header {
        packet_type: msg[0],
        is_acknowledge: msg[1] != 0,
        destination: msg[2],
        source: msg[3],
        packet_identifier: msg[4],
    })
}
