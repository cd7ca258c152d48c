//! Raw CAN frames as exchanged with bus drivers
use snafu::Snafu;

/// A CAN identifier
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CanId {
    /// A 29-bit extended identifier
    Extended(u32),
    /// An 11-bit standard identifier
    Std(u16),
}

impl CanId {
    /// Create an extended ID
    pub const fn extended(id: u32) -> CanId {
        CanId::Extended(id)
    }

    /// Create a standard ID
    pub const fn std(id: u16) -> CanId {
        CanId::Std(id)
    }

    /// Get the raw identifier value
    pub fn raw(&self) -> u32 {
        match self {
            CanId::Extended(id) => *id,
            CanId::Std(id) => *id as u32,
        }
    }

    /// Returns true for extended IDs
    pub fn is_extended(&self) -> bool {
        match self {
            CanId::Extended(_) => true,
            CanId::Std(_) => false,
        }
    }
}

/// Maximum number of data bytes in a classic CAN frame
pub const MAX_DATA_LENGTH: usize = 8;

/// Error returned when creating a frame with too much data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(display("Data length {len} exceeds maximum of {MAX_DATA_LENGTH} bytes"))]
pub struct DataTooLongError {
    /// The rejected length
    pub len: usize,
}

/// A single classic CAN frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanMessage {
    /// Data buffer; only the first `dlc` bytes are valid
    pub data: [u8; MAX_DATA_LENGTH],
    /// Number of valid data bytes
    pub dlc: u8,
    /// The frame identifier
    pub id: CanId,
    rtr: bool,
}

impl Default for CanMessage {
    fn default() -> Self {
        Self {
            data: [0; MAX_DATA_LENGTH],
            dlc: 0,
            id: CanId::Std(0),
            rtr: false,
        }
    }
}

impl CanMessage {
    /// Create a new data frame
    ///
    /// Panics if data is longer than 8 bytes, see [`CanMessage::try_new`] for a fallible version.
    pub fn new(id: CanId, data: &[u8]) -> Self {
        match Self::try_new(id, data) {
            Ok(msg) => msg,
            Err(e) => panic!("{e}"),
        }
    }

    /// Create a new data frame, failing if data is longer than 8 bytes
    pub fn try_new(id: CanId, data: &[u8]) -> Result<Self, DataTooLongError> {
        if data.len() > MAX_DATA_LENGTH {
            return DataTooLongSnafu { len: data.len() }.fail();
        }
        let mut buf = [0u8; MAX_DATA_LENGTH];
        buf[0..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            dlc: data.len() as u8,
            data: buf,
            rtr: false,
        })
    }

    /// Create a remote transmission request frame
    pub fn new_rtr(id: CanId) -> Self {
        Self {
            id,
            rtr: true,
            ..Default::default()
        }
    }

    /// Get the frame ID
    pub fn id(&self) -> CanId {
        self.id
    }

    /// Get the valid data bytes
    pub fn data(&self) -> &[u8] {
        &self.data[0..self.dlc as usize]
    }

    /// Returns true for remote transmission request frames
    pub fn is_rtr(&self) -> bool {
        self.rtr
    }
}
