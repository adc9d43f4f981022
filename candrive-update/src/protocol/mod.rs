//! Protocol implementations.

pub mod crc;
pub mod info;
pub mod message;

// Re-export common types
pub use crc::crc32_stm;
pub use info::{DeviceInfo, INFO_RESPONSE_SIZE};
pub use message::{FirmwareHeader, Message, MessageType, PREAMBLE_SIZE, encode};
