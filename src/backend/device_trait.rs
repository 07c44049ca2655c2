//! DeviceBackend trait for the streaming device layer
//!
//! This module provides the contract the flow graph expects from a
//! buffer-oriented acquisition device (IIO-like): a health check, buffer
//! creation for a set of enabled channels, refills and per-channel sample
//! access. Both real backends and [`super::MockDevice`] implement it.

use crate::error::Result;
use crate::types::DataFormat;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default time a refill may block before the device is considered gone
pub const DEFAULT_DEVICE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Static description of one device channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    /// Channel identifier, e.g. `voltage0`
    pub name: String,
    /// Raw sample encoding
    pub format: DataFormat,
    /// Scale attribute in millivolts per count, if the device exposes one
    pub scale: Option<f64>,
}

impl ChannelInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: DataFormat::default(),
            scale: None,
        }
    }

    pub fn with_format(mut self, format: DataFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }
}

/// Refill statistics kept by a device backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStats {
    /// Successful refills
    pub refills: u64,
    /// Refills that returned an error
    pub failed_refills: u64,
    /// Samples delivered per channel, summed over all refills
    pub samples_delivered: u64,
    /// Duration of the last successful refill in microseconds
    pub last_refill_us: u64,
    /// Longest refill observed in microseconds
    pub max_refill_us: u64,
}

impl DeviceStats {
    pub fn record_success(&mut self, samples: usize, time_us: u64) {
        self.refills += 1;
        self.samples_delivered += samples as u64;
        self.last_refill_us = time_us;
        self.max_refill_us = self.max_refill_us.max(time_us);
    }

    pub fn record_failure(&mut self) {
        self.failed_refills += 1;
    }

    /// Percentage of refills that succeeded
    pub fn success_rate(&self) -> f64 {
        let total = self.refills + self.failed_refills;
        if total == 0 {
            100.0
        } else {
            (self.refills as f64 / total as f64) * 100.0
        }
    }
}

/// Unified interface for acquisition devices
///
/// Implementations must be `Send`; the flow graph shares them between the
/// GUI thread (health checks, buffer setup) and the refill worker through
/// [`SharedDevice`].
#[cfg_attr(test, mockall::automock)]
pub trait DeviceBackend: Send {
    /// Connection URI, used as the resource lock key
    fn uri(&self) -> String;

    /// Channels exposed by the device
    fn channels(&self) -> Vec<ChannelInfo>;

    /// Current sampling frequency in Hz
    fn sample_rate(&self) -> f64;

    /// Cheap reachability check performed before starting a capture
    fn ping(&mut self) -> Result<()>;

    /// Allocate a capture buffer of `size` samples for `channels`
    fn create_buffer(&mut self, channels: &[String], size: usize) -> Result<()>;

    /// Release the capture buffer
    fn destroy_buffer(&mut self);

    /// Pull the next block of samples into the buffer.
    ///
    /// Returns the number of samples captured per channel.
    fn refill(&mut self) -> Result<usize>;

    /// Copy the samples of `channel` from the last refill into `out`.
    ///
    /// Returns false when the channel is not part of the buffer.
    fn read_channel(&self, channel: &str, out: &mut Vec<f32>) -> bool;

    /// Set the refill timeout
    fn set_timeout(&mut self, timeout: Duration);

    /// Refill statistics
    fn stats(&self) -> DeviceStats;
}

/// A device shared between the flow graph and its sinks.
#[derive(Clone)]
pub struct SharedDevice {
    uri: String,
    inner: Arc<Mutex<Box<dyn DeviceBackend>>>,
}

impl SharedDevice {
    pub fn new(device: Box<dyn DeviceBackend>) -> Self {
        Self {
            uri: device.uri(),
            inner: Arc::new(Mutex::new(device)),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Lock the device; a poisoned lock still hands out the device since
    /// the backend keeps no invariants across a panicking caller.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn DeviceBackend>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn same_device(&self, other: &SharedDevice) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for SharedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDevice").field("uri", &self.uri).finish()
    }
}
