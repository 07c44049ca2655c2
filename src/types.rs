//! Core data types shared across the acquisition pipeline
//!
//! - [`SamplingInfo`] - the sink's structural capture parameters
//! - [`DataFormat`] - raw sample encoding of a device channel
//! - [`YMode`] / [`YAxisScaling`] - how raw counts are presented on the Y axis
//! - [`InstrumentKind`] - time-domain or frequency-domain instrument

use serde::{Deserialize, Serialize};

/// Default buffer size used until a settings value arrives
pub const DEFAULT_BUFFER_SIZE: usize = 32;

/// Capture parameters of one sink.
///
/// Changing `sample_rate`, `buffer_size`, `plot_size` or `complex_mode` is a
/// structural change: the sink must be rebuilt before it delivers frames with
/// the new parameters. `single_shot` and `freq_offset` are applied in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingInfo {
    pub sample_rate: f64,
    pub buffer_size: usize,
    pub plot_size: usize,
    pub complex_mode: bool,
    pub single_shot: bool,
    pub freq_offset: f64,
}

impl Default for SamplingInfo {
    fn default() -> Self {
        Self {
            sample_rate: 1.0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            plot_size: DEFAULT_BUFFER_SIZE,
            complex_mode: false,
            single_shot: false,
            freq_offset: 0.0,
        }
    }
}

impl SamplingInfo {
    /// Whether going from `self` to `other` requires a rebuild.
    pub fn requires_rebuild(&self, other: &SamplingInfo) -> bool {
        self.sample_rate != other.sample_rate
            || self.buffer_size != other.buffer_size
            || self.plot_size != other.plot_size
            || self.complex_mode != other.complex_mode
    }

    /// Frequency resolution of an FFT over `buffer_size` points.
    pub fn resolution_bandwidth(&self) -> f64 {
        if self.buffer_size == 0 {
            0.0
        } else {
            self.sample_rate / self.buffer_size as f64
        }
    }
}

/// Raw sample encoding of a device channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataFormat {
    /// Significant bits per sample
    pub bits: u8,
    /// Two's complement samples
    pub signed: bool,
}

impl Default for DataFormat {
    fn default() -> Self {
        Self {
            bits: 12,
            signed: true,
        }
    }
}

impl DataFormat {
    /// Raw count range `(min, max)` representable by this format.
    pub fn count_range(&self) -> (f64, f64) {
        let bits = self.bits.min(63) as u32;
        if self.signed {
            let half = (1u64 << bits.saturating_sub(1)) as f64;
            (-half, half)
        } else {
            (0.0, (1u64 << bits) as f64)
        }
    }
}

/// Y axis presentation of a time channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YMode {
    /// Raw ADC counts
    #[default]
    Count,
    /// Fraction of the converter's full scale
    FullScale,
    /// Physical units using the channel scale attribute
    Scale,
}

impl YMode {
    /// Map the stored preference index onto a mode.
    pub fn from_index(index: i64) -> Self {
        match index {
            1 => YMode::FullScale,
            2 => YMode::Scale,
            _ => YMode::Count,
        }
    }

    pub fn index(&self) -> i64 {
        match self {
            YMode::Count => 0,
            YMode::FullScale => 1,
            YMode::Scale => 2,
        }
    }

    /// Scale/offset block parameters and Y range for this mode.
    ///
    /// `channel_scale` is the device scale attribute in millivolts per count;
    /// when absent, `Scale` behaves like `Count`.
    pub fn scaling(&self, format: &DataFormat, channel_scale: Option<f64>) -> YAxisScaling {
        let (cmin, cmax) = format.count_range();
        match self {
            YMode::Count => YAxisScaling {
                scale: 1.0,
                offset: 0.0,
                y_min: cmin,
                y_max: cmax,
            },
            YMode::FullScale => {
                let scale = 1.0 / (1u64 << format.bits.min(63)) as f64;
                let (y_min, y_max) = if format.signed { (-0.5, 0.5) } else { (0.0, 1.0) };
                YAxisScaling {
                    scale,
                    offset: 0.0,
                    y_min,
                    y_max,
                }
            }
            YMode::Scale => {
                let scale = channel_scale.unwrap_or(1.0) / 1000.0;
                YAxisScaling {
                    scale,
                    offset: 0.0,
                    y_min: cmin * scale,
                    y_max: cmax * scale,
                }
            }
        }
    }
}

/// Result of [`YMode::scaling`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YAxisScaling {
    pub scale: f64,
    pub offset: f64,
    pub y_min: f64,
    pub y_max: f64,
}

/// Which kind of view an instrument drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Time,
    Frequency,
}

impl InstrumentKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            InstrumentKind::Time => "time",
            InstrumentKind::Frequency => "fft",
        }
    }
}
