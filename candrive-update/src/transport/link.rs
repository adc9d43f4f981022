//! Polling adapter over a cooperative segmented stack.
//!
//! ISO-TP stacks for CAN are usually driven by the caller: queue a payload,
//! then keep calling `process()` until the segments are out, and poll for
//! reassembled payloads the same way. [`Link`] turns such a stack into a
//! blocking [`Transport`] with bounded waits.

use super::{FaultFlag, Transport};
use crate::error::{Error, Result};
use log::{debug, trace};
use std::thread;
use std::time::{Duration, Instant};

/// Default wait-frame budget handed to the stack.
const DEFAULT_MAX_WAIT_FRAMES: u32 = 5;

/// Default upper bound for one transmission.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval used when the stack does not suggest one.
const DEFAULT_SLEEP_TIME: Duration = Duration::from_millis(1);

/// Cooperative segmented transport stack.
///
/// Errors detected while segmenting or reassembling are not returned from
/// these methods; the stack raises the [`FaultFlag`] it was built with.
pub trait Stack {
    /// Queue one payload for transmission.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Whether a queued payload is still being transmitted.
    fn transmitting(&self) -> bool;

    /// Run one step of the stack: move frames in and out.
    fn process(&mut self) -> Result<()>;

    /// Whether a reassembled payload is ready.
    fn available(&self) -> bool;

    /// Take the next reassembled payload.
    fn recv(&mut self) -> Option<Vec<u8>>;

    /// Suggested delay between two [`Stack::process`] calls.
    fn sleep_time(&self) -> Duration {
        DEFAULT_SLEEP_TIME
    }

    /// Limit the number of wait flow-control frames accepted from the peer.
    fn set_max_wait_frames(&mut self, _frames: u32) {}
}

/// Link configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkConfig {
    /// Wait flow-control frames accepted before the stack gives up.
    pub max_wait_frames: u32,
    /// Upper bound for one transmission.
    pub send_timeout: Duration,
    /// Fixed poll interval. `None` uses the stack's suggestion.
    pub poll_interval: Option<Duration>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_wait_frames: DEFAULT_MAX_WAIT_FRAMES,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            poll_interval: None,
        }
    }
}

impl LinkConfig {
    /// Set the wait-frame budget.
    #[must_use]
    pub fn with_max_wait_frames(mut self, frames: u32) -> Self {
        self.max_wait_frames = frames;
        self
    }

    /// Set the transmission timeout.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Use a fixed poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
}

/// Blocking [`Transport`] over a [`Stack`].
///
/// Each [`Transport::send`] starts a new request: the fault flag is lowered
/// and payloads still waiting in the stack are dropped.
pub struct Link<S: Stack> {
    stack: S,
    fault: FaultFlag,
    config: LinkConfig,
}

impl<S: Stack> Link<S> {
    /// Wrap a stack whose error callback raises `fault`.
    pub fn new(stack: S, fault: FaultFlag) -> Self {
        Self::with_config(stack, fault, LinkConfig::default())
    }

    /// Wrap a stack with a custom configuration.
    pub fn with_config(mut stack: S, fault: FaultFlag, config: LinkConfig) -> Self {
        stack.set_max_wait_frames(config.max_wait_frames);
        Self {
            stack,
            fault,
            config,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Get the fault flag shared with the stack.
    pub fn fault(&self) -> &FaultFlag {
        &self.fault
    }

    /// Get a reference to the underlying stack.
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Get a mutable reference to the underlying stack.
    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    /// Consume the link and return the stack.
    pub fn into_stack(self) -> S {
        self.stack
    }

    fn check_fault(&self) -> Result<()> {
        if self.fault.is_raised() {
            let reason = self
                .fault
                .take_reason()
                .unwrap_or_else(|| "stack reported an error".to_string());
            return Err(Error::TransportFault(reason));
        }
        Ok(())
    }

    fn discard_stale(&mut self) {
        while self.stack.available() {
            match self.stack.recv() {
                Some(data) => debug!("Dropping stale payload of {} bytes", data.len()),
                None => break,
            }
        }
    }

    fn idle(&self) {
        let interval = self
            .config
            .poll_interval
            .unwrap_or_else(|| self.stack.sleep_time());
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
}

impl<S: Stack> Transport for Link<S> {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.fault.clear();
        // Late replies to an earlier request must not answer this one
        self.discard_stale();
        trace!("Link send: {} bytes", data.len());

        self.stack.send(data)?;

        let start = Instant::now();
        while self.stack.transmitting() {
            self.check_fault()?;
            if start.elapsed() >= self.config.send_timeout {
                return Err(Error::Timeout(format!(
                    "transmission of {} bytes not finished after {:?}",
                    data.len(),
                    self.config.send_timeout
                )));
            }
            self.stack.process()?;
            self.idle();
        }

        self.check_fault()
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let start = Instant::now();

        loop {
            if self.stack.available() {
                if let Some(data) = self.stack.recv() {
                    trace!("Link receive: {} bytes", data.len());
                    return Ok(Some(data));
                }
            }

            self.check_fault()?;

            if start.elapsed() >= timeout {
                debug!("Nothing received within {timeout:?}");
                return Ok(None);
            }

            self.stack.process()?;
            self.idle();
        }
    }
}

impl<S: Stack> std::fmt::Debug for Link<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("config", &self.config)
            .field("fault", &self.fault.is_raised())
            .finish_non_exhaustive()
    }
}
