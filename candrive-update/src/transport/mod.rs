//! Transport abstraction for the segmented point-to-point link.
//!
//! The update session only needs whole-payload send and receive. Segmenting,
//! flow control and bus access belong to the stack underneath.
//!
//! ```text
//! +------------------+
//! | TransferSession  |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | Transport trait  |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+     +------------+
//! |    Link<S>       |<----| FaultFlag  |
//! +--------+---------+     +-----+------+
//!          |                     ^
//!          v                     | error callback
//! +--------+---------+           |
//! |  Stack (ISO-TP)  +-----------+
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use candrive_update::transport::Transport;
//! use std::time::Duration;
//!
//! fn ping<T: Transport>(transport: &mut T) -> candrive_update::Result<()> {
//!     transport.send(b"ping")?;
//!     if let Some(reply) = transport.receive(Duration::from_secs(1))? {
//!         println!("Received: {:?}", reply);
//!     }
//!     Ok(())
//! }
//! ```

pub mod link;

use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use link::{Link, LinkConfig, Stack};

/// Whole-payload transport consumed by the update session.
pub trait Transport {
    /// Send one payload, blocking until the stack has put it on the wire.
    ///
    /// Fails with [`Error::TransportFault`](crate::Error::TransportFault)
    /// when the stack reports an error, or [`Error::Timeout`](crate::Error::Timeout)
    /// when the transmission does not finish in time.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for one payload.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        (**self).send(data)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        (**self).receive(timeout)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        (**self).send(data)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        (**self).receive(timeout)
    }
}

/// Sticky error indication shared between a stack's error callback and the
/// adapter polling it.
///
/// Once raised the flag stays raised until [`FaultFlag::clear`] is called at
/// the start of the next request. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct FaultFlag {
    raised: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
}

impl FaultFlag {
    /// Create a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. The first reason since the last clear is kept.
    pub fn raise(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert_with(|| reason.into());
        }
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Whether the flag has been raised since the last clear.
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Lower the flag and forget the reason.
    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.reason.lock() {
            *slot = None;
        }
    }

    /// Reason given when the flag was raised.
    pub fn take_reason(&self) -> Option<String> {
        self.reason.lock().ok().and_then(|mut slot| slot.take())
    }
}
