//! Firmware image handling.
//!
//! - [`firmware`]: header region stamping and verification
//! - [`header`]: extended build metadata carried by application images

pub mod firmware;
pub mod header;

pub use firmware::{FirmwareImage, HEADER_SIZE, StampInfo, stamp, stamp_file, stamp_in_place, verify};
pub use header::{IMAGE_HEADER_MAGIC, ImageHeader, ImageType};
