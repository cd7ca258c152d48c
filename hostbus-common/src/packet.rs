//! The packet model shared by all connectors
//!
//! A [`Packet`] is a [`Header`] carrying routing information plus a [`Payload`] of raw bytes. The
//! payload buffer is reference counted, so cloning a packet to hand it to several connectors never
//! copies the bytes.

use core::fmt;
use core::ops::Deref;

use bytes::Bytes;

/// Routing metadata for a packet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Header {
    /// Message kind
    pub packet_type: u8,
    /// Set when the packet acknowledges a previously received packet
    pub is_acknowledge: bool,
    /// Destination node id
    pub destination: u8,
    /// Source node id
    pub source: u8,
    /// Message / request id
    pub packet_identifier: u8,
}

impl Header {
    /// Create a new header
    pub const fn new(
        packet_type: u8,
        is_acknowledge: bool,
        destination: u8,
        source: u8,
        packet_identifier: u8,
    ) -> Self {
        Self {
            packet_type,
            is_acknowledge,
            destination,
            source,
            packet_identifier,
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Header{{type={}, ack={}, dst=0x{:02x}, src=0x{:02x}, id=0x{:02x}}}",
            self.packet_type,
            self.is_acknowledge,
            self.destination,
            self.source,
            self.packet_identifier
        )
    }
}

/// A shared, immutable byte buffer
///
/// Clones share the same backing storage, which is released when the last clone is dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Payload(Bytes);

impl Payload {
    /// Create an empty payload
    pub const fn empty() -> Self {
        Self(Bytes::new())
    }

    /// Create a payload by copying the given bytes
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(data))
    }

    /// Get the number of payload bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload has no bytes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the payload bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Get the underlying shared buffer
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(value: &'static [u8]) -> Self {
        Self(Bytes::from_static(value))
    }
}

impl<const N: usize> From<[u8; N]> for Payload {
    fn from(value: [u8; N]) -> Self {
        Self::copy_from_slice(&value)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// A header and payload pair, the unit forwarded between connectors
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    /// The routing header
    pub header: Header,
    /// The payload bytes
    pub payload: Payload,
}

impl Packet {
    /// Create a new packet
    pub fn new(header: Header, payload: impl Into<Payload>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }
}
