//! Error types for candrive-update.

use std::io;
use thiserror::Error;

/// Result type for candrive-update operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for candrive-update operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (image files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Image is too short to hold the header region, or its header is inconsistent.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Stored image checksum does not match the payload.
    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// Checksum stored in the image header.
        expected: u32,
        /// Checksum computed over the payload.
        actual: u32,
    },

    /// Message checksum verification failed.
    #[error("Corrupt message: {field} CRC {actual:#010x} does not match transmitted {expected:#010x}")]
    CorruptMessage {
        /// Which checksum failed ("header" or "payload").
        field: &'static str,
        /// Checksum carried by the message.
        expected: u32,
        /// Checksum recomputed over the received bytes.
        actual: u32,
    },

    /// Declared message length is inconsistent with the received bytes.
    #[error("Truncated message: need {needed} bytes, got {available}")]
    TruncatedMessage {
        /// Bytes required by the preamble and declared length.
        needed: usize,
        /// Bytes actually received.
        available: usize,
    },

    /// Fixed-width payload has the wrong size.
    #[error("Malformed payload: expected {expected} bytes, got {actual}")]
    MalformedPayload {
        /// Expected payload width.
        expected: usize,
        /// Actual payload width.
        actual: usize,
    },

    /// No response or completion within the wait budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Link-level error reported by the transport.
    #[error("Transport fault: {0}")]
    TransportFault(String),

    /// Firmware upgrade stopped before all pages were sent.
    #[error("Transfer aborted after {pages_sent}/{total_pages} pages: {source}")]
    AbortedTransfer {
        /// Pages acknowledged by the transport before the failure.
        pages_sent: usize,
        /// Pages the image was split into.
        total_pages: usize,
        /// Failure that stopped the transfer.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Whether this error means the link gave up (fault or timeout) rather
    /// than the data being bad.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::TransportFault(_))
    }
}
