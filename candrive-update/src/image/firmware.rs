//! Compiled firmware images and their integrity header.
//!
//! The first 12 bytes of an image form the header region:
//!
//! ```text
//! +------------+-----------+-----------+------------------+
//! |  reserved  |    crc    |   size    |     payload      |
//! +------------+-----------+-----------+------------------+
//! |  4 bytes   |  4 bytes  |  4 bytes  |  size bytes      |
//! +------------+-----------+-----------+------------------+
//! ```
//!
//! `crc` and `size` are little-endian and describe everything after the
//! header region. They are zero in the linker output and patched in by
//! [`stamp`] as a post-build step. The reserved word belongs to the linker
//! and is never touched.

use crate::error::{Error, Result};
use crate::protocol::crc::crc32_stm;
use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Size of the header region in front of the checksummed payload.
pub const HEADER_SIZE: usize = 12;

/// Offset of the payload checksum.
pub const CRC_OFFSET: usize = 4;

/// Offset of the payload size.
pub const SIZE_OFFSET: usize = 8;

/// Values written into an image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StampInfo {
    /// Checksum of the payload.
    pub crc: u32,
    /// Payload size in bytes.
    pub size: u32,
}

impl StampInfo {
    /// Compute the header values for an image.
    #[allow(clippy::cast_possible_truncation)]
    pub fn for_image(image: &[u8]) -> Result<Self> {
        let payload = payload(image)?;
        Ok(Self {
            crc: crc32_stm(payload),
            // Safe cast: firmware images are always < 4GB
            size: payload.len() as u32,
        })
    }

    fn header_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        LittleEndian::write_u32(&mut buf[..4], self.crc);
        LittleEndian::write_u32(&mut buf[4..], self.size);
        buf
    }
}

/// Payload of an image, the bytes after the header region.
pub fn payload(image: &[u8]) -> Result<&[u8]> {
    if image.len() < HEADER_SIZE {
        return Err(Error::InvalidImage(format!(
            "image is {} bytes, header region needs {HEADER_SIZE}",
            image.len()
        )));
    }
    Ok(&image[HEADER_SIZE..])
}

/// Write size and checksum into the header region of `image`.
pub fn stamp_in_place(image: &mut [u8]) -> Result<StampInfo> {
    let info = StampInfo::for_image(image)?;
    image[CRC_OFFSET..HEADER_SIZE].copy_from_slice(&info.header_bytes());
    Ok(info)
}

/// Return a copy of `image` with size and checksum written into its header.
///
/// Stamping is idempotent: the header region is not part of the checksum.
pub fn stamp(image: &[u8]) -> Result<Vec<u8>> {
    let mut stamped = image.to_vec();
    stamp_in_place(&mut stamped)?;
    Ok(stamped)
}

/// Stamp an image file on disk.
///
/// Only the eight header bytes at offset 4 are rewritten.
pub fn stamp_file<P: AsRef<Path>>(path: P) -> Result<StampInfo> {
    let path = path.as_ref();

    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    let info = StampInfo::for_image(&data)?;

    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(CRC_OFFSET as u64))?;
    file.write_all(&info.header_bytes())?;
    file.flush()?;

    debug!(
        "Stamped {}: size {}, crc {:#010x}",
        path.display(),
        info.size,
        info.crc
    );
    Ok(info)
}

/// Check that the stored header matches the payload.
///
/// This is the same check the bootloader runs before jumping to an image.
pub fn verify(image: &[u8]) -> Result<()> {
    let actual = StampInfo::for_image(image)?;
    let stored_size = LittleEndian::read_u32(&image[SIZE_OFFSET..HEADER_SIZE]);
    let stored_crc = LittleEndian::read_u32(&image[CRC_OFFSET..SIZE_OFFSET]);

    if stored_size != actual.size {
        return Err(Error::InvalidImage(format!(
            "header size {stored_size} does not match payload size {}",
            actual.size
        )));
    }

    if stored_crc != actual.crc {
        return Err(Error::CrcMismatch {
            expected: stored_crc,
            actual: actual.crc,
        });
    }

    Ok(())
}

/// A firmware image loaded into memory.
#[derive(Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Load an image from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading image from: {}", path.display());

        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;

        Self::from_bytes(data)
    }

    /// Wrap raw image bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        payload(&data)?;
        Ok(Self { data })
    }

    /// Whole image including the header region.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the image and return its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Bytes after the header region.
    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_SIZE..]
    }

    /// Checksum stored in the header.
    pub fn stored_crc(&self) -> u32 {
        LittleEndian::read_u32(&self.data[CRC_OFFSET..SIZE_OFFSET])
    }

    /// Payload size stored in the header.
    pub fn stored_size(&self) -> u32 {
        LittleEndian::read_u32(&self.data[SIZE_OFFSET..HEADER_SIZE])
    }

    /// Stamp the header in place.
    pub fn stamp(&mut self) -> Result<StampInfo> {
        stamp_in_place(&mut self.data)
    }

    /// Check the stored header against the payload.
    pub fn verify(&self) -> Result<()> {
        verify(&self.data)
    }
}

impl AsRef<[u8]> for FirmwareImage {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for FirmwareImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmwareImage")
            .field("stored_crc", &format_args!("{:#010x}", self.stored_crc()))
            .field("stored_size", &self.stored_size())
            .field("data_len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_image(payload_len: usize) -> Vec<u8> {
        let mut image = vec![0x11, 0x22, 0x33, 0x44, 0, 0, 0, 0, 0, 0, 0, 0];
        image.extend((0..payload_len).map(|i| (i * 7 % 256) as u8));
        image
    }

    #[test]
    fn test_stamp_too_short() {
        assert!(matches!(stamp(&[0u8; 11]), Err(Error::InvalidImage(_))));
        assert!(matches!(stamp(&[]), Err(Error::InvalidImage(_))));
    }

    #[test]
    fn test_stamp_header_only() {
        let stamped = stamp(&[0u8; 12]).unwrap();
        assert_eq!(&stamped[4..8], &0xFFFF_FFFFu32.to_le_bytes());
        assert_eq!(&stamped[8..12], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_stamp_writes_crc_and_size() {
        let image = raw_image(1000);
        let stamped = stamp(&image).unwrap();

        assert_eq!(stamped.len(), image.len());
        assert_eq!(&stamped[..4], &image[..4]);
        assert_eq!(&stamped[12..], &image[12..]);
        assert_eq!(
            LittleEndian::read_u32(&stamped[4..8]),
            crc32_stm(&stamped[12..])
        );
        assert_eq!(LittleEndian::read_u32(&stamped[8..12]), 1000);
    }

    #[test]
    fn test_stamp_is_idempotent() {
        for len in [0, 1, 3, 4, 1024, 2500] {
            let once = stamp(&raw_image(len)).unwrap();
            let twice = stamp(&once).unwrap();
            assert_eq!(once, twice, "payload length {len}");
        }
    }

    #[test]
    fn test_verify() {
        let image = raw_image(77);
        assert!(verify(&image).is_err());

        let mut stamped = stamp(&image).unwrap();
        assert!(verify(&stamped).is_ok());

        stamped[40] ^= 0x01;
        assert!(matches!(verify(&stamped), Err(Error::CrcMismatch { .. })));

        let mut truncated = stamp(&image).unwrap();
        truncated.pop();
        assert!(matches!(verify(&truncated), Err(Error::InvalidImage(_))));
    }

    #[test]
    fn test_firmware_image_accessors() {
        assert!(FirmwareImage::from_bytes(vec![0; 4]).is_err());

        let mut image = FirmwareImage::from_bytes(raw_image(300)).unwrap();
        assert_eq!(image.payload().len(), 300);
        assert_eq!(image.stored_size(), 0);

        let info = image.stamp().unwrap();
        assert_eq!(info.size, 300);
        assert_eq!(image.stored_size(), 300);
        assert_eq!(image.stored_crc(), info.crc);
        assert!(image.verify().is_ok());
    }

    #[test]
    fn test_stamp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.bin");
        let image = raw_image(2048);
        std::fs::write(&path, &image).unwrap();

        let info = stamp_file(&path).unwrap();
        let on_disk = std::fs::read(&path).unwrap();

        assert_eq!(on_disk, stamp(&image).unwrap());
        assert_eq!(info, StampInfo::for_image(&image).unwrap());
        assert!(FirmwareImage::from_file(&path).unwrap().verify().is_ok());
    }
}
