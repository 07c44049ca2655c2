//! Mock Device Implementation for Testing
//!
//! A synthetic buffer-oriented device that can be used to drive the whole
//! acquisition pipeline without hardware. Each channel produces samples
//! from a [`MockDataPattern`]; refills advance a sample clock so consecutive
//! frames are continuous.
//!
//! # Failure injection
//!
//! [`MockDeviceControl`] toggles ping, buffer-creation and refill failures at
//! runtime, after the device has been moved into a [`super::SharedDevice`].
//!
//! # Example
//!
//! ```ignore
//! use scopy_acq::backend::{MockDataPattern, MockDevice};
//!
//! let device = MockDevice::new("local:mock0", 1_000_000.0)
//!     .with_channel("voltage0", MockDataPattern::Sine { frequency: 1000.0, amplitude: 1000.0, offset: 0.0 })
//!     .with_channel("voltage1", MockDataPattern::Constant(12.0))
//!     .with_chunk_size(256);
//! ```

use crate::error::{AcqError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::device_trait::{ChannelInfo, DeviceBackend, DeviceStats, DEFAULT_DEVICE_TIMEOUT};

/// Pattern for generating mock samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockDataPattern {
    /// Constant value
    Constant(f64),
    /// Sine wave
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Square wave alternating between `offset` and `offset + amplitude`
    Square {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Linear ramp that resets every period
    Sawtooth { frequency: f64, amplitude: f64 },
    /// Counter that increments by `step` per sample and wraps at `max`
    Counter { step: f64, min: f64, max: f64 },
    /// Uniform noise in `[-amplitude, amplitude]`
    Noise { amplitude: f64 },
}

impl Default for MockDataPattern {
    fn default() -> Self {
        MockDataPattern::Sine {
            frequency: 1.0,
            amplitude: 1000.0,
            offset: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct MockChannel {
    info: ChannelInfo,
    pattern: MockDataPattern,
    counter_value: f64,
}

impl MockChannel {
    fn generate(&mut self, t: f64, rng: &mut XorShift) -> f32 {
        let value = match self.pattern {
            MockDataPattern::Constant(v) => v,
            MockDataPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin(),
            MockDataPattern::Square {
                frequency,
                amplitude,
                offset,
            } => {
                let period = 1.0 / frequency;
                if (t % period) < period / 2.0 {
                    offset
                } else {
                    offset + amplitude
                }
            }
            MockDataPattern::Sawtooth {
                frequency,
                amplitude,
            } => {
                let period = 1.0 / frequency;
                amplitude * ((t % period) / period)
            }
            MockDataPattern::Counter { step, min, max } => {
                let current = self.counter_value;
                self.counter_value += step;
                if self.counter_value > max {
                    self.counter_value = min;
                }
                current
            }
            MockDataPattern::Noise { amplitude } => (rng.next_f64() - 0.5) * 2.0 * amplitude,
        };
        value as f32
    }
}

/// Small xorshift generator so noise is reproducible per device.
#[derive(Debug, Clone)]
struct XorShift(u64);

impl XorShift {
    fn next_f64(&mut self) -> f64 {
        let mut s = self.0;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.0 = s;
        (s as f64) / (u64::MAX as f64)
    }
}

#[derive(Debug)]
struct MockBuffer {
    channels: Vec<String>,
    size: usize,
    users: u32,
    data: HashMap<String, Vec<f32>>,
}

/// Runtime switches shared with a [`MockDevice`].
#[derive(Debug, Clone, Default)]
pub struct MockDeviceControl {
    fail_ping: Arc<AtomicBool>,
    fail_buffer: Arc<AtomicBool>,
    fail_refill: Arc<AtomicBool>,
    refill_delay_us: Arc<AtomicU64>,
}

impl MockDeviceControl {
    pub fn set_ping_failure(&self, fail: bool) {
        self.fail_ping.store(fail, Ordering::SeqCst);
    }

    pub fn set_buffer_failure(&self, fail: bool) {
        self.fail_buffer.store(fail, Ordering::SeqCst);
    }

    pub fn set_refill_failure(&self, fail: bool) {
        self.fail_refill.store(fail, Ordering::SeqCst);
    }

    /// Make every refill block for `delay` to emulate a slow device.
    pub fn set_refill_delay(&self, delay: Duration) {
        self.refill_delay_us
            .store(delay.as_micros() as u64, Ordering::SeqCst);
    }
}

/// Mock device backend for testing without real hardware
pub struct MockDevice {
    uri: String,
    sample_rate: f64,
    channels: Vec<MockChannel>,
    /// Samples per refill; `None` fills the whole buffer each time
    chunk_size: Option<usize>,
    buffer: Option<MockBuffer>,
    sample_clock: u64,
    timeout: Duration,
    control: MockDeviceControl,
    rng: XorShift,
    stats: DeviceStats,
}

impl MockDevice {
    pub fn new(uri: impl Into<String>, sample_rate: f64) -> Self {
        Self {
            uri: uri.into(),
            sample_rate,
            channels: Vec::new(),
            chunk_size: None,
            buffer: None,
            sample_clock: 0,
            timeout: DEFAULT_DEVICE_TIMEOUT,
            control: MockDeviceControl::default(),
            rng: XorShift(0x2545_F491_4F6C_DD1D),
            stats: DeviceStats::default(),
        }
    }

    pub fn with_channel(self, name: &str, pattern: MockDataPattern) -> Self {
        self.with_channel_info(ChannelInfo::new(name), pattern)
    }

    pub fn with_channel_info(mut self, info: ChannelInfo, pattern: MockDataPattern) -> Self {
        let counter_value = match pattern {
            MockDataPattern::Counter { min, .. } => min,
            _ => 0.0,
        };
        self.channels.push(MockChannel {
            info,
            pattern,
            counter_value,
        });
        self
    }

    /// Deliver at most `chunk` samples per refill.
    pub fn with_chunk_size(mut self, chunk: usize) -> Self {
        self.chunk_size = Some(chunk.max(1));
        self
    }

    /// Handle for toggling failures after the device is shared.
    pub fn control(&self) -> MockDeviceControl {
        self.control.clone()
    }

    /// Number of live buffer users (one per started sink).
    pub fn buffer_users(&self) -> u32 {
        self.buffer.as_ref().map(|b| b.users).unwrap_or(0)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl DeviceBackend for MockDevice {
    fn uri(&self) -> String {
        self.uri.clone()
    }

    fn channels(&self) -> Vec<ChannelInfo> {
        self.channels.iter().map(|c| c.info.clone()).collect()
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn ping(&mut self) -> Result<()> {
        if self.control.fail_ping.load(Ordering::SeqCst) {
            return Err(AcqError::DeviceUnreachable {
                uri: self.uri.clone(),
            });
        }
        Ok(())
    }

    fn create_buffer(&mut self, channels: &[String], size: usize) -> Result<()> {
        if self.control.fail_buffer.load(Ordering::SeqCst) {
            return Err(AcqError::BufferCreation(format!(
                "{}: cannot allocate {} samples",
                self.uri, size
            )));
        }
        if let Some(unknown) = channels
            .iter()
            .find(|name| !self.channels.iter().any(|c| &c.info.name == *name))
        {
            return Err(AcqError::BufferCreation(format!(
                "{}: unknown channel {}",
                self.uri, unknown
            )));
        }

        match self.buffer.as_mut() {
            Some(buffer) => {
                // Shared by several sinks: widen to the union of channels.
                for name in channels {
                    if !buffer.channels.contains(name) {
                        buffer.channels.push(name.clone());
                    }
                }
                buffer.size = buffer.size.max(size);
                buffer.users += 1;
            }
            None => {
                self.buffer = Some(MockBuffer {
                    channels: channels.to_vec(),
                    size,
                    users: 1,
                    data: HashMap::new(),
                });
            }
        }
        tracing::debug!("{}: buffer of {} samples for {:?}", self.uri, size, channels);
        Ok(())
    }

    fn destroy_buffer(&mut self) {
        let release = match self.buffer.as_mut() {
            Some(buffer) => {
                buffer.users = buffer.users.saturating_sub(1);
                buffer.users == 0
            }
            None => false,
        };
        if release {
            self.buffer = None;
            tracing::debug!("{}: buffer released", self.uri);
        }
    }

    fn refill(&mut self) -> Result<usize> {
        let started = Instant::now();
        let delay = self.control.refill_delay_us.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_micros(delay));
        }
        if self.control.fail_refill.load(Ordering::SeqCst) {
            self.stats.record_failure();
            return Err(AcqError::Device(format!("{}: refill failed", self.uri)));
        }

        let Some(buffer) = self.buffer.as_mut() else {
            self.stats.record_failure();
            return Err(AcqError::Device(format!("{}: no buffer", self.uri)));
        };

        let count = self.chunk_size.map_or(buffer.size, |c| c.min(buffer.size));
        let clock = self.sample_clock;
        for channel in self.channels.iter_mut() {
            if !buffer.channels.contains(&channel.info.name) {
                continue;
            }
            let samples = buffer.data.entry(channel.info.name.clone()).or_default();
            samples.clear();
            for i in 0..count {
                let t = (clock + i as u64) as f64 / self.sample_rate;
                samples.push(channel.generate(t, &mut self.rng));
            }
        }
        self.sample_clock += count as u64;
        self.stats
            .record_success(count, started.elapsed().as_micros() as u64);
        Ok(count)
    }

    fn read_channel(&self, channel: &str, out: &mut Vec<f32>) -> bool {
        match self.buffer.as_ref().and_then(|b| b.data.get(channel)) {
            Some(samples) => {
                out.clear();
                out.extend_from_slice(samples);
                true
            }
            None => false,
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn stats(&self) -> DeviceStats {
        self.stats.clone()
    }
}
