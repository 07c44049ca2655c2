//! Time-domain measurements over one captured frame
//!
//! Level measurements (min, max, mean, RMS, ...) use every finite sample.
//! Horizontal measurements (period, frequency, widths, duty) come from the
//! crossings of a reference level with hysteresis and need more than one
//! full period in the frame.
//!
//! Low and High are the settled levels of the signal when a histogram shows
//! them clearly, otherwise the frame's min and max.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Histogram resolution used to find the settled levels
const HISTOGRAM_BINS: usize = 256;

/// A settled level must be this many times more frequent than the extreme
/// bin on its side.
const SETTLE_RATIO: usize = 5;

/// Default hysteresis as a fraction of the frame's peak-to-peak
pub const DEFAULT_HYSTERESIS_RATIO: f64 = 0.1;

/// One measurement a channel can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureKind {
    Period,
    Frequency,
    Min,
    Max,
    PeakToPeak,
    Mean,
    CycleMean,
    Rms,
    CycleRms,
    AcRms,
    Area,
    CycleArea,
    Low,
    High,
    Amplitude,
    Middle,
    PositiveOvershoot,
    NegativeOvershoot,
    PositiveWidth,
    NegativeWidth,
    PositiveDuty,
    NegativeDuty,
}

impl MeasureKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            MeasureKind::Period => "Period",
            MeasureKind::Frequency => "Frequency",
            MeasureKind::Min => "Min",
            MeasureKind::Max => "Max",
            MeasureKind::PeakToPeak => "Peak-peak",
            MeasureKind::Mean => "Mean",
            MeasureKind::CycleMean => "Cycle Mean",
            MeasureKind::Rms => "RMS",
            MeasureKind::CycleRms => "Cycle RMS",
            MeasureKind::AcRms => "AC RMS",
            MeasureKind::Area => "Area",
            MeasureKind::CycleArea => "Cycle Area",
            MeasureKind::Low => "Low",
            MeasureKind::High => "High",
            MeasureKind::Amplitude => "Amplitude",
            MeasureKind::Middle => "Middle",
            MeasureKind::PositiveOvershoot => "+Over",
            MeasureKind::NegativeOvershoot => "-Over",
            MeasureKind::PositiveWidth => "+Width",
            MeasureKind::NegativeWidth => "-Width",
            MeasureKind::PositiveDuty => "+Duty",
            MeasureKind::NegativeDuty => "-Duty",
        }
    }

    /// Unit of the value, for samples in volts.
    pub fn unit(&self) -> &'static str {
        match self {
            MeasureKind::Period
            | MeasureKind::PositiveWidth
            | MeasureKind::NegativeWidth => "s",
            MeasureKind::Frequency => "Hz",
            MeasureKind::Area | MeasureKind::CycleArea => "Vs",
            MeasureKind::PositiveOvershoot
            | MeasureKind::NegativeOvershoot
            | MeasureKind::PositiveDuty
            | MeasureKind::NegativeDuty => "%",
            _ => "V",
        }
    }

    /// True for measurements taken along the time axis.
    pub fn is_horizontal(&self) -> bool {
        matches!(
            self,
            MeasureKind::Period
                | MeasureKind::Frequency
                | MeasureKind::PositiveWidth
                | MeasureKind::NegativeWidth
                | MeasureKind::PositiveDuty
                | MeasureKind::NegativeDuty
        )
    }

    pub fn all() -> &'static [MeasureKind] {
        &[
            MeasureKind::Period,
            MeasureKind::Frequency,
            MeasureKind::Min,
            MeasureKind::Max,
            MeasureKind::PeakToPeak,
            MeasureKind::Mean,
            MeasureKind::CycleMean,
            MeasureKind::Rms,
            MeasureKind::CycleRms,
            MeasureKind::AcRms,
            MeasureKind::Area,
            MeasureKind::CycleArea,
            MeasureKind::Low,
            MeasureKind::High,
            MeasureKind::Amplitude,
            MeasureKind::Middle,
            MeasureKind::PositiveOvershoot,
            MeasureKind::NegativeOvershoot,
            MeasureKind::PositiveWidth,
            MeasureKind::NegativeWidth,
            MeasureKind::PositiveDuty,
            MeasureKind::NegativeDuty,
        ]
    }
}

/// Reference level for period detection. `None` fields are derived from
/// the frame: the level defaults to Middle, the hysteresis to
/// [`DEFAULT_HYSTERESIS_RATIO`] of the peak-to-peak.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CrossingLevel {
    pub level: Option<f64>,
    pub hysteresis: Option<f64>,
}

/// A confirmed pass through the reference level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    /// Sample closest to the level
    pub index: usize,
    pub rising: bool,
}

/// Find level crossings with hysteresis.
///
/// A crossing counts once the signal has moved from one side of the
/// `level ± hysteresis / 2` band to the other; it is placed on the sample
/// closest to `level`. Crossings alternate between rising and falling.
pub fn detect_crossings(data: &[f64], level: f64, hysteresis: f64) -> Vec<Crossing> {
    let half = hysteresis.abs() / 2.0;
    let (low, high) = (level - half, level + half);
    let mut crossings = Vec::new();
    let Some(&first) = data.first() else {
        return crossings;
    };

    // Unknown until the signal has left the band once
    let mut above = if first >= high {
        Some(true)
    } else if first <= low {
        Some(false)
    } else {
        None
    };
    let mut at_level = 0;
    for i in 1..data.len() {
        let (prev, v) = (data[i - 1], data[i]);
        if (prev < level) != (v < level) {
            at_level = if (prev - level).abs() < (v - level).abs() {
                i - 1
            } else {
                i
            };
        }
        if v >= high && above != Some(true) {
            if above == Some(false) {
                crossings.push(Crossing {
                    index: at_level,
                    rising: true,
                });
            }
            above = Some(true);
        } else if v <= low && above != Some(false) {
            if above == Some(true) {
                crossings.push(Crossing {
                    index: at_level,
                    rising: false,
                });
            }
            above = Some(false);
        }
    }
    crossings
}

/// Results of one [`measure`] pass. Measurements the frame cannot support
/// (no full period, zero sample rate) are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    values: BTreeMap<MeasureKind, f64>,
}

impl Measurements {
    pub fn get(&self, kind: MeasureKind) -> Option<f64> {
        self.values.get(&kind).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MeasureKind, f64)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keep only the kinds `keep` accepts.
    pub fn retain(&mut self, mut keep: impl FnMut(MeasureKind) -> bool) {
        self.values.retain(|k, _| keep(*k));
    }

    fn set(&mut self, kind: MeasureKind, value: f64) {
        if value.is_finite() {
            self.values.insert(kind, value);
        }
    }
}

/// Running statistics of one measurement across frames.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeasureStats {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    sum: f64,
}

impl MeasureStats {
    pub fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.count += 1;
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Measure one frame sampled at `sample_rate`.
pub fn measure(data: &[f32], sample_rate: f64, crossing: CrossingLevel) -> Measurements {
    let samples: Vec<f64> = data
        .iter()
        .filter(|v| v.is_finite())
        .map(|&v| v as f64)
        .collect();
    let mut out = Measurements::default();
    let Some(&first) = samples.first() else {
        return out;
    };

    let n = samples.len() as f64;
    let (mut min, mut max, mut sum, mut sqr_sum) = (first, first, 0.0, 0.0);
    for &v in &samples {
        min = min.min(v);
        max = max.max(v);
        sum += v;
        sqr_sum += v * v;
    }
    let mean = sum / n;

    out.set(MeasureKind::Min, min);
    out.set(MeasureKind::Max, max);
    out.set(MeasureKind::PeakToPeak, (max - min).abs());
    out.set(MeasureKind::Mean, mean);
    out.set(MeasureKind::Rms, (sqr_sum / n).sqrt());
    out.set(MeasureKind::AcRms, (sqr_sum / n - mean * mean).max(0.0).sqrt());
    if sample_rate > 0.0 {
        out.set(MeasureKind::Area, sum / sample_rate);
    }

    let (low, high) = settled_levels(&samples, min, max).unwrap_or((min, max));
    let amplitude = high - low;
    let middle = low + amplitude / 2.0;
    out.set(MeasureKind::Low, low);
    out.set(MeasureKind::High, high);
    out.set(MeasureKind::Middle, middle);
    out.set(MeasureKind::Amplitude, amplitude);
    if amplitude > 0.0 {
        out.set(MeasureKind::PositiveOvershoot, (max - high) / amplitude * 100.0);
        out.set(MeasureKind::NegativeOvershoot, (low - min) / amplitude * 100.0);
    }

    if sample_rate > 0.0 {
        let level = crossing.level.unwrap_or(middle);
        let hysteresis = crossing
            .hysteresis
            .unwrap_or((max - min) * DEFAULT_HYSTERESIS_RATIO);
        let crossings = detect_crossings(&samples, level, hysteresis);
        measure_cycles(&samples, &crossings, sample_rate, &mut out);
    }
    out
}

fn measure_cycles(samples: &[f64], crossings: &[Crossing], sample_rate: f64, out: &mut Measurements) {
    if crossings.len() < 3 {
        return;
    }
    // Crossings alternate, so i and i + 2 bound one full period.
    let spans: usize = crossings.windows(3).map(|w| w[2].index - w[0].index).sum();
    let period_samples = spans as f64 / (crossings.len() - 2) as f64;
    if period_samples <= 0.0 {
        return;
    }
    let period = period_samples / sample_rate;
    out.set(MeasureKind::Period, period);
    out.set(MeasureKind::Frequency, 1.0 / period);

    let cycle = &samples[crossings[0].index..crossings[2].index];
    if !cycle.is_empty() {
        let len = cycle.len() as f64;
        let sum: f64 = cycle.iter().sum();
        let sqr_sum: f64 = cycle.iter().map(|v| v * v).sum();
        out.set(MeasureKind::CycleMean, sum / len);
        out.set(MeasureKind::CycleRms, (sqr_sum / len).sqrt());
        out.set(MeasureKind::CycleArea, sum / sample_rate);
    }

    let Some(rise) = crossings.iter().position(|c| c.rising) else {
        return;
    };
    let Some(fall) = crossings.get(rise + 1) else {
        return;
    };
    let width = ((fall.index - crossings[rise].index) as f64 / sample_rate).min(period);
    let duty = width / period * 100.0;
    out.set(MeasureKind::PositiveWidth, width);
    out.set(MeasureKind::NegativeWidth, period - width);
    out.set(MeasureKind::PositiveDuty, duty);
    out.set(MeasureKind::NegativeDuty, 100.0 - duty);
}

/// Most frequent value in the lower and upper half of the range, if both
/// stand out from the extremes.
fn settled_levels(samples: &[f64], min: f64, max: f64) -> Option<(f64, f64)> {
    let span = max - min;
    if span <= 0.0 {
        return None;
    }
    let last = HISTOGRAM_BINS - 1;
    let mut counts = [0usize; HISTOGRAM_BINS];
    let mut sums = [0f64; HISTOGRAM_BINS];
    for &v in samples {
        let bin = ((((v - min) / span) * last as f64).round() as usize).min(last);
        counts[bin] += 1;
        sums[bin] += v;
    }

    let middle = last / 2;
    let low = busiest(&counts[..=middle]);
    let high = middle + busiest(&counts[middle..]);
    if counts[low] < SETTLE_RATIO * counts[0] || counts[high] < SETTLE_RATIO * counts[last] {
        return None;
    }
    Some((
        sums[low] / counts[low] as f64,
        sums[high] / counts[high] as f64,
    ))
}

/// Index of the first largest count.
fn busiest(counts: &[usize]) -> usize {
    let mut best = 0;
    for (i, &c) in counts.iter().enumerate() {
        if c > counts[best] {
            best = i;
        }
    }
    best
}
