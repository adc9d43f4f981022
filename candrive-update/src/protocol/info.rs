//! Firmware information response.
//!
//! The device answers an info request with its packed information record,
//! sent as-is without a message preamble:
//!
//! ```text
//! +------+-------------+---------+--------+-----+-----+-----+---------+
//! | type |   version   | hw rev  |  name  | id1 | id2 | id3 | git sha |
//! +------+-------------+---------+--------+-----+-----+-----+---------+
//! |  4   |     32      |    4    |   16   |  4  |  4  |  4  |   14    |
//! +------+-------------+---------+--------+-----+-----+-----+---------+
//! ```

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// Width of the version text field.
pub const VERSION_SIZE: usize = 32;

/// Width of the name text field.
pub const NAME_SIZE: usize = 16;

/// Width of the git SHA text field.
pub const GIT_SHA_SIZE: usize = 14;

/// Total size of the information record.
pub const INFO_RESPONSE_SIZE: usize = 4 + VERSION_SIZE + 4 + NAME_SIZE + 3 * 4 + GIT_SHA_SIZE;

/// Identity reported by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Firmware version string.
    pub version: String,
    /// Board hardware revision.
    pub hardware_revision: u32,
    /// Image type name.
    pub name: String,
    /// Unique id words as hex, concatenated without padding.
    pub device_id: String,
    /// Raw unique id words.
    pub id: [u32; 3],
    /// Short git SHA of the running firmware.
    pub git_sha: String,
}

impl DeviceInfo {
    /// Decode an information record.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != INFO_RESPONSE_SIZE {
            return Err(Error::MalformedPayload {
                expected: INFO_RESPONSE_SIZE,
                actual: data.len(),
            });
        }

        let mut cursor = Cursor::new(data);
        // Echo of the request type, not interpreted
        let _type_id = cursor.read_u32::<LittleEndian>()?;
        let version = read_text::<VERSION_SIZE>(&mut cursor)?;
        let hardware_revision = cursor.read_u32::<LittleEndian>()?;
        let name = read_text::<NAME_SIZE>(&mut cursor)?;
        let id = [
            cursor.read_u32::<LittleEndian>()?,
            cursor.read_u32::<LittleEndian>()?,
            cursor.read_u32::<LittleEndian>()?,
        ];
        let git_sha = read_text::<GIT_SHA_SIZE>(&mut cursor)?;

        Ok(Self {
            version,
            hardware_revision,
            name,
            device_id: format_device_id(id),
            id,
            git_sha,
        })
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "version={}, hardware_revision={}, name={}, id={}, git_sha={}",
            self.version, self.hardware_revision, self.name, self.device_id, self.git_sha
        )
    }
}

/// Format the id words the way the device tooling always has.
///
/// Leading zero nibbles of each word are dropped, so different ids can map
/// to the same text. Use [`DeviceInfo::id`] for exact matching.
pub fn format_device_id(id: [u32; 3]) -> String {
    format!("{:x}{:x}{:x}", id[0], id[1], id[2])
}

fn read_text<const N: usize>(reader: &mut impl Read) -> Result<String> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;

    // Find NUL terminator
    let end = bytes.iter().position(|&c| c == 0).unwrap_or(N);
    Ok(String::from_utf8_lossy(&bytes[..end]).to_string())
}
