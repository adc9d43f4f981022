//! # candrive-update
//!
//! Firmware image integrity and over-the-link update for CANDrive motor
//! controllers.
//!
//! This crate provides the host side of the CANDrive firmware manager,
//! including:
//!
//! - STM32 hardware CRC-32 checksum calculation
//! - Image header stamping and verification
//! - Firmware manager request framing
//! - Paged image transfer with a non-bricking abort policy
//!
//! The segmented transport (ISO-TP over CAN) is not part of this crate. Any
//! type implementing [`Transport`] can carry a session, and [`Link`] adapts a
//! cooperative [`Stack`] to it.
//!
//! ## Features
//!
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use candrive_update::{FaultFlag, FirmwareImage, Link, Stack, TransferSession};
//!
//! fn run<S: Stack>(stack: S, fault: FaultFlag) -> Result<(), Box<dyn std::error::Error>> {
//!     // Stamp the linker output
//!     candrive_update::stamp_file("candrive_app.bin")?;
//!     let image = FirmwareImage::from_file("candrive_app.bin")?;
//!     image.verify()?;
//!
//!     // The stack's error callback raises `fault`
//!     let mut session = TransferSession::new(Link::new(stack, fault));
//!
//!     if let Some(info) = session.query_info()? {
//!         println!("Running {} {}", info.name, info.version);
//!     }
//!
//!     session.upgrade(image.as_bytes(), |sent, total| {
//!         println!("{sent}/{total} pages sent");
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod image;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
pub use image::{FirmwareImage, ImageHeader, ImageType, StampInfo, stamp, stamp_file, verify};
pub use protocol::{DeviceInfo, FirmwareHeader, Message, MessageType, crc32_stm};
pub use session::{PAGE_SIZE, Phase, Progress, SessionConfig, TransferSession};
pub use transport::{FaultFlag, Link, LinkConfig, Stack, Transport};
