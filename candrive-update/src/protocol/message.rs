//! Firmware manager request framing.
//!
//! Every request sent to the device is a single transport payload made of a
//! fixed preamble followed by the request data:
//!
//! ```text
//! +---------+--------+-------------+------------+-----------------+
//! | type_id | length | payload_crc | header_crc |     payload     |
//! +---------+--------+-------------+------------+-----------------+
//! | 4 bytes | 4 bytes|   4 bytes   |  4 bytes   |  length bytes   |
//! +---------+--------+-------------+------------+-----------------+
//! ```
//!
//! All fields are little-endian. `header_crc` covers the first 12 bytes and
//! both checksums use [`crc32_stm`].

use crate::error::{Error, Result};
use crate::protocol::crc::crc32_stm;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Size of the checksummed part of the preamble.
pub const HEADER_CRC_SPAN: usize = 12;

/// Size of the full preamble in front of the payload.
pub const PREAMBLE_SIZE: usize = 16;

/// Request types understood by the firmware manager.
///
/// The values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum MessageType {
    /// Ask for the firmware information record.
    InfoRequest = 0,
    /// Reboot the device.
    ResetRequest = 1,
    /// Announce the size and checksum of the image about to be streamed.
    HeaderRequest = 2,
    /// One page of image data.
    DataRequest = 3,
}

impl MessageType {
    /// Raw wire value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Look up a wire value.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::InfoRequest),
            1 => Some(Self::ResetRequest),
            2 => Some(Self::HeaderRequest),
            3 => Some(Self::DataRequest),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InfoRequest => write!(f, "InfoRequest"),
            Self::ResetRequest => write!(f, "ResetRequest"),
            Self::HeaderRequest => write!(f, "HeaderRequest"),
            Self::DataRequest => write!(f, "DataRequest"),
        }
    }
}

/// A decoded (or ready to encode) request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Raw type identifier.
    pub type_id: u32,
    /// Payload length in bytes.
    pub length: u32,
    /// Checksum of the payload.
    pub payload_crc: u32,
    /// Checksum of `type_id`, `length` and `payload_crc`.
    pub header_crc: u32,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a message and compute both checksums.
    ///
    /// The length field is 32 bits wide, so payloads must be shorter than
    /// 4 GiB. Longer payloads cannot be framed.
    ///
    /// # Panics
    ///
    /// Panics if the payload is 4 GiB or longer.
    pub fn new(message_type: MessageType, payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        let length = u32::try_from(payload.len())
            .unwrap_or_else(|_| panic!("payload of {} bytes exceeds the length field", payload.len()));
        let payload_crc = crc32_stm(&payload);
        let header_crc = crc32_stm(&header_bytes(message_type.as_u32(), length, payload_crc));

        Self {
            type_id: message_type.as_u32(),
            length,
            payload_crc,
            header_crc,
            payload,
        }
    }

    /// Build a message without payload.
    pub fn empty(message_type: MessageType) -> Self {
        Self::new(message_type, Vec::new())
    }

    /// Known message type, if the type id is one.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u32(self.type_id)
    }

    /// Serialize to the wire format.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PREAMBLE_SIZE + self.payload.len());
        buf.extend_from_slice(&header_bytes(self.type_id, self.length, self.payload_crc));
        buf.write_u32::<LittleEndian>(self.header_crc).unwrap();
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse and verify a wire message.
    ///
    /// The header checksum is checked before the declared length is trusted,
    /// so damage anywhere in the preamble reports as
    /// [`Error::CorruptMessage`]. Bytes beyond the declared length are
    /// ignored.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < PREAMBLE_SIZE {
            return Err(Error::TruncatedMessage {
                needed: PREAMBLE_SIZE,
                available: data.len(),
            });
        }

        let mut cursor = Cursor::new(data);
        let type_id = cursor.read_u32::<LittleEndian>()?;
        let length = cursor.read_u32::<LittleEndian>()?;
        let payload_crc = cursor.read_u32::<LittleEndian>()?;
        let header_crc = cursor.read_u32::<LittleEndian>()?;

        let actual = crc32_stm(&data[..HEADER_CRC_SPAN]);
        if actual != header_crc {
            return Err(Error::CorruptMessage {
                field: "header",
                expected: header_crc,
                actual,
            });
        }

        let needed = PREAMBLE_SIZE.saturating_add(length as usize);
        if data.len() < needed {
            return Err(Error::TruncatedMessage {
                needed,
                available: data.len(),
            });
        }

        let payload = &data[PREAMBLE_SIZE..needed];
        let actual = crc32_stm(payload);
        if actual != payload_crc {
            return Err(Error::CorruptMessage {
                field: "payload",
                expected: payload_crc,
                actual,
            });
        }

        Ok(Self {
            type_id,
            length,
            payload_crc,
            header_crc,
            payload: payload.to_vec(),
        })
    }
}

/// Encode a request of the given type.
pub fn encode(message_type: MessageType, payload: &[u8]) -> Vec<u8> {
    Message::new(message_type, payload).encode()
}

#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
fn header_bytes(type_id: u32, length: u32, payload_crc: u32) -> [u8; HEADER_CRC_SPAN] {
    let mut buf = Vec::with_capacity(HEADER_CRC_SPAN);
    buf.write_u32::<LittleEndian>(type_id).unwrap();
    buf.write_u32::<LittleEndian>(length).unwrap();
    buf.write_u32::<LittleEndian>(payload_crc).unwrap();

    let mut header = [0u8; HEADER_CRC_SPAN];
    header.copy_from_slice(&buf);
    header
}

/// Payload of a [`MessageType::HeaderRequest`].
///
/// ```text
/// +----------+--------------+-----------+
/// | reserved | total_length | total_crc |
/// +----------+--------------+-----------+
/// | 4 bytes  |   4 bytes    |  4 bytes  |
/// +----------+--------------+-----------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwareHeader {
    /// Number of image bytes that will follow in data requests.
    pub total_length: u32,
    /// Checksum of those bytes.
    pub total_crc: u32,
}

impl FirmwareHeader {
    /// Encoded size.
    pub const SIZE: usize = 12;

    /// Describe an image payload (the bytes after the image header).
    #[allow(clippy::cast_possible_truncation)]
    pub fn for_payload(payload: &[u8]) -> Self {
        Self {
            // Safe cast: firmware images are always < 4GB
            total_length: payload.len() as u32,
            total_crc: crc32_stm(payload),
        }
    }

    /// Serialize; the reserved word is always zero.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(self.total_length).unwrap();
        buf.write_u32::<LittleEndian>(self.total_crc).unwrap();
        buf
    }

    /// Parse a header request payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != Self::SIZE {
            return Err(Error::MalformedPayload {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }

        let mut cursor = Cursor::new(data);
        let _reserved = cursor.read_u32::<LittleEndian>()?;
        let total_length = cursor.read_u32::<LittleEndian>()?;
        let total_crc = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            total_length,
            total_crc,
        })
    }
}
