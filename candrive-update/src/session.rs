//! Firmware update session.
//!
//! A [`TransferSession`] drives the firmware manager on a device over any
//! [`Transport`]: query the running firmware, stream a new image, reset.
//!
//! An upgrade goes through these phases:
//!
//! ```text
//! Idle -> SendingHeader -> StreamingData(0..n) -> QueryingInfo -> ResettingDevice -> Completed
//!              |                  |
//!              +------------------+--> Aborted
//! ```
//!
//! `upgrade` starts at the header. To see what the device runs before the
//! transfer, call [`TransferSession::query_info`] first, which passes through
//! `QueryingInfo` and returns to the phase it started in.
//!
//! A failed send during the transfer aborts immediately and never resets the
//! device, so the bootloader keeps running the previous image. A failed reset
//! request after a complete transfer still ends in `Completed`, and the error
//! is returned.
//!
//! ## Example
//!
//! ```rust,no_run
//! use candrive_update::{FirmwareImage, TransferSession, Transport};
//!
//! fn update<T: Transport>(transport: T) -> candrive_update::Result<()> {
//!     let image = FirmwareImage::from_file("candrive_app.bin")?;
//!     let mut session = TransferSession::new(transport);
//!
//!     if let Some(info) = session.query_info()? {
//!         println!("Running: {info}");
//!     }
//!
//!     session.upgrade(image.as_bytes(), |sent, total| {
//!         println!("{sent}/{total} pages sent");
//!     })?;
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::image::firmware::payload;
use crate::image::header::ImageHeader;
use crate::protocol::info::DeviceInfo;
use crate::protocol::message::{FirmwareHeader, Message, MessageType};
use crate::transport::Transport;
use log::{debug, info, trace, warn};
use std::time::Duration;

/// Image bytes carried by one data request.
pub const PAGE_SIZE: usize = 1024;

/// Default wait for the info response.
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// How long to wait for a response.
    pub response_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Set the response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

/// Where a session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Phase {
    /// Nothing in progress.
    Idle,
    /// Waiting for the information record.
    QueryingInfo,
    /// Announcing the image.
    SendingHeader,
    /// Sending the page at `page_index`.
    StreamingData {
        /// Zero-based index of the page being sent.
        page_index: usize,
    },
    /// Asking the device to reboot.
    ResettingDevice,
    /// Every page of the last upgrade was sent and the reset was attempted.
    Completed,
    /// Last upgrade stopped before all pages were sent.
    Aborted,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::QueryingInfo => write!(f, "querying info"),
            Self::SendingHeader => write!(f, "sending header"),
            Self::StreamingData { page_index } => write!(f, "streaming page {page_index}"),
            Self::ResettingDevice => write!(f, "resetting device"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Transfer progress of the current or last upgrade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Progress {
    /// Pages handed to the transport successfully.
    pub pages_sent: usize,
    /// Pages the image payload was split into.
    pub total_pages: usize,
    /// Payload bytes in the pages sent.
    pub bytes_sent: usize,
}

impl Progress {
    /// Whether every page has been sent.
    pub fn is_complete(&self) -> bool {
        self.pages_sent == self.total_pages
    }
}

/// Number of data requests needed for `len` payload bytes.
pub fn page_count(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE)
}

/// Firmware update session over a transport.
pub struct TransferSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    phase: Phase,
    progress: Progress,
    device_info: Option<DeviceInfo>,
}

impl<T: Transport> TransferSession<T> {
    /// Create a session with the default configuration.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: SessionConfig::default(),
            phase: Phase::Idle,
            progress: Progress::default(),
            device_info: None,
        }
    }

    /// Use a custom configuration.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Progress of the current or last upgrade.
    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Information from the last successful query.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    /// Get a reference to the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the session and return the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Ask the device for its firmware information.
    ///
    /// Returns `Ok(None)` when the device does not answer in time or the
    /// link reports a fault. A response that does not decode is an error.
    pub fn query_info(&mut self) -> Result<Option<DeviceInfo>> {
        let previous = self.phase;
        self.phase = Phase::QueryingInfo;
        let result = self.fetch_info();
        self.phase = previous;

        match result {
            Ok(info) => {
                self.device_info = info.clone();
                Ok(info)
            },
            Err(e) => {
                self.device_info = None;
                Err(e)
            },
        }
    }

    fn fetch_info(&mut self) -> Result<Option<DeviceInfo>> {
        debug!("Requesting firmware information");

        let response = self
            .send(MessageType::InfoRequest, &[])
            .and_then(|()| self.transport.receive(self.config.response_timeout));

        match response {
            Ok(Some(data)) => {
                let info = DeviceInfo::from_bytes(&data)?;
                info!("Device: {info}");
                Ok(Some(info))
            },
            Ok(None) => {
                warn!(
                    "No firmware information within {:?}",
                    self.config.response_timeout
                );
                Ok(None)
            },
            Err(e) if e.is_link_failure() => {
                warn!("Firmware information unavailable: {e}");
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }

    /// Reboot the device.
    ///
    /// Sent regardless of the session phase.
    pub fn reset(&mut self) -> Result<()> {
        info!("Resetting device...");
        self.send(MessageType::ResetRequest, &[])
    }

    /// Stream a stamped image to the device and reset it.
    ///
    /// `image` is the whole file including its 12-byte header region; only
    /// the bytes after it are transferred. `progress` is called with
    /// `(pages_sent, total_pages)` after every page.
    ///
    /// The first failed send ends the transfer with
    /// [`Error::AbortedTransfer`] and the device is not reset. If only the
    /// final reset request fails, its error is returned and the phase is
    /// [`Phase::Completed`].
    pub fn upgrade<F>(&mut self, image: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let data = payload(image)?;
        let total_pages = page_count(data.len());

        if let Some(header) = ImageHeader::parse(image) {
            info!(
                "Image: {} {} ({}), vector table at {:#010x}",
                header.image_type, header.version, header.git_sha, header.vector_address
            );
        }

        self.progress = Progress {
            pages_sent: 0,
            total_pages,
            bytes_sent: 0,
        };

        let header = FirmwareHeader::for_payload(data);
        info!(
            "Upgrading firmware: {} bytes, crc {:#010x}, {} pages",
            header.total_length, header.total_crc, total_pages
        );

        self.phase = Phase::SendingHeader;
        if let Err(e) = self.send(MessageType::HeaderRequest, &header.to_bytes()) {
            return Err(self.abort(e));
        }

        for (page_index, page) in data.chunks(PAGE_SIZE).enumerate() {
            self.phase = Phase::StreamingData { page_index };
            trace!("Page {page_index}: {} bytes", page.len());

            if let Err(e) = self.send(MessageType::DataRequest, page) {
                return Err(self.abort(e));
            }

            self.progress.pages_sent += 1;
            self.progress.bytes_sent += page.len();
            debug!("{}/{} pages sent", self.progress.pages_sent, total_pages);
            progress(self.progress.pages_sent, total_pages);
        }

        info!("Firmware transfer done");

        match self.query_info() {
            Ok(Some(_)) => {},
            Ok(None) => warn!("Device did not report its firmware after the transfer"),
            Err(e) => warn!("Could not read firmware information after the transfer: {e}"),
        }

        self.phase = Phase::ResettingDevice;
        let reset = self.reset();
        // The image is on the device either way; it boots on the next reset
        self.phase = Phase::Completed;

        if let Err(e) = reset {
            warn!("Firmware transferred but the reset request failed: {e}");
            return Err(e);
        }

        info!("Upgrade complete!");
        Ok(())
    }

    fn abort(&mut self, source: Error) -> Error {
        warn!(
            "Abort firmware upgrade after {}/{} pages: {source}",
            self.progress.pages_sent, self.progress.total_pages
        );
        self.phase = Phase::Aborted;
        Error::AbortedTransfer {
            pages_sent: self.progress.pages_sent,
            total_pages: self.progress.total_pages,
            source: Box::new(source),
        }
    }

    fn send(&mut self, message_type: MessageType, payload: &[u8]) -> Result<()> {
        let frame = Message::new(message_type, payload).encode();
        trace!("Sending {message_type} ({} bytes)", frame.len());
        self.transport.send(&frame)
    }
}

impl<T: Transport> std::fmt::Debug for TransferSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSession")
            .field("config", &self.config)
            .field("phase", &self.phase)
            .field("progress", &self.progress)
            .field("device_info", &self.device_info)
            .finish_non_exhaustive()
    }
}
