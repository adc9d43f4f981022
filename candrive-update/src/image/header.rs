//! Extended image header written by the application build.
//!
//! Newer application images reuse the reserved word of the header region
//! for a magic and header version, and follow the 12-byte region with build
//! metadata:
//!
//! ```text
//! +--------+---------+-----+------+------+---------+--------+----------+---------+
//! | magic  | hdr ver | crc | size | type | version | vector | reserved | git sha |
//! +--------+---------+-----+------+------+---------+--------+----------+---------+
//! |   2    |    2    |  4  |  4   |  4   |   32    |   4    |    4     |   14    |
//! +--------+---------+-----+------+------+---------+--------+----------+---------+
//! ```
//!
//! Images without the magic are still valid for stamping and upload, they
//! just carry no metadata.

use crate::error::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// Magic in the first half-word of an extended header.
pub const IMAGE_HEADER_MAGIC: u16 = 0xAABB;

/// Packed size of the extended header.
pub const EXTENDED_HEADER_SIZE: usize = 70;

const VERSION_SIZE: usize = 32;
const GIT_SHA_SIZE: usize = 14;

/// Kind of image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImageType {
    /// Motor controller application.
    Application,
    /// Bootloader.
    Bootloader,
    /// Unknown image type.
    Unknown(u32),
}

impl From<u32> for ImageType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Application,
            1 => Self::Bootloader,
            v => Self::Unknown(v),
        }
    }
}

impl std::fmt::Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Application => write!(f, "CANDriveApp"),
            Self::Bootloader => write!(f, "CANDriveBoot"),
            Self::Unknown(v) => write!(f, "Unknown({v})"),
        }
    }
}

/// Decoded extended header.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageHeader {
    /// Layout revision of the header.
    pub header_version: u16,
    /// Stored payload checksum.
    pub crc: u32,
    /// Stored payload size.
    pub size: u32,
    /// Image type.
    pub image_type: ImageType,
    /// Software version string.
    pub version: String,
    /// Address of the vector table.
    pub vector_address: u32,
    /// Git description of the build.
    pub git_sha: String,
}

impl ImageHeader {
    /// Decode the extended header at the start of `image`.
    ///
    /// Returns `None` when the image is too short or lacks the magic.
    pub fn parse(image: &[u8]) -> Option<Self> {
        if image.len() < EXTENDED_HEADER_SIZE {
            return None;
        }
        Self::read(&mut Cursor::new(image)).ok().flatten()
    }

    fn read<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let magic = reader.read_u16::<LittleEndian>()?;
        if magic != IMAGE_HEADER_MAGIC {
            return Ok(None);
        }

        let header_version = reader.read_u16::<LittleEndian>()?;
        let crc = reader.read_u32::<LittleEndian>()?;
        let size = reader.read_u32::<LittleEndian>()?;
        let image_type = reader.read_u32::<LittleEndian>()?.into();
        let version = read_text::<_, VERSION_SIZE>(reader)?;
        let vector_address = reader.read_u32::<LittleEndian>()?;
        let _reserved = reader.read_u32::<LittleEndian>()?;
        let git_sha = read_text::<_, GIT_SHA_SIZE>(reader)?;

        Ok(Some(Self {
            header_version,
            crc,
            size,
            image_type,
            version,
            vector_address,
            git_sha,
        }))
    }
}

fn read_text<R: Read, const N: usize>(reader: &mut R) -> Result<String> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    let end = bytes.iter().position(|&c| c == 0).unwrap_or(N);
    Ok(String::from_utf8_lossy(&bytes[..end]).to_string())
}
