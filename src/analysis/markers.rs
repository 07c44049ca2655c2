//! Spectrum markers
//!
//! Markers are computed over one FFT frame (`x` in Hz, `y` in dB). A real
//! frame holds the one-sided spectrum with DC at bin 0; a complex frame is
//! fft-shifted with DC in the middle.

use serde::{Deserialize, Serialize};

use super::fft::peak_bin;

/// Markers placed on a new spectrum channel
pub const DEFAULT_MARKER_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerMode {
    #[default]
    None,
    /// The strongest local maxima
    Peak,
    /// User-placed frequencies
    Fixed,
    /// DC, the fundamental and its harmonics
    SingleTone,
    /// DC, the fundamental and its image across DC
    Image,
}

impl MarkerMode {
    pub fn display_name(&self) -> &'static str {
        match self {
            MarkerMode::None => "None",
            MarkerMode::Peak => "Peak",
            MarkerMode::Fixed => "Fixed",
            MarkerMode::SingleTone => "Single Tone",
            MarkerMode::Image => "Image",
        }
    }

    pub fn all() -> &'static [MarkerMode] {
        &[
            MarkerMode::None,
            MarkerMode::Peak,
            MarkerMode::Fixed,
            MarkerMode::SingleTone,
            MarkerMode::Image,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub name: String,
    pub x: f64,
    pub y: f64,
    /// Bin the marker sits on; fixed markers between bins have none
    pub index: Option<usize>,
}

impl Marker {
    fn at(name: impl Into<String>, x: &[f32], y: &[f32], index: usize) -> Self {
        Self {
            name: name.into(),
            x: x[index] as f64,
            y: y[index] as f64,
            index: Some(index),
        }
    }
}

/// Indices of local maxima, strongest first.
pub fn find_peaks(y: &[f32]) -> Vec<usize> {
    let mut peaks: Vec<usize> = (1..y.len().saturating_sub(1))
        .filter(|&i| y[i - 1] < y[i] && y[i] > y[i + 1])
        .collect();
    peaks.sort_by(|&a, &b| y[b].partial_cmp(&y[a]).unwrap_or(std::cmp::Ordering::Equal));
    peaks
}

/// Strongest bin within `range` bins of `index`.
fn peak_near(y: &[f32], index: usize, range: usize) -> Option<usize> {
    if index >= y.len() {
        return None;
    }
    let start = index.saturating_sub(range);
    let end = (index + range).min(y.len() - 1);
    peak_bin(&y[start..=end]).map(|(i, _)| start + i)
}

/// Linear interpolation of `y` at `at`, clamped to the ends of `x`.
pub fn value_at(x: &[f32], y: &[f32], at: f64) -> Option<f64> {
    let len = x.len().min(y.len());
    if len == 0 {
        return None;
    }
    let upper = x[..len].partition_point(|&v| (v as f64) < at);
    if upper == 0 {
        return Some(y[0] as f64);
    }
    if upper == len {
        return Some(y[len - 1] as f64);
    }
    let (x0, x1) = (x[upper - 1] as f64, x[upper] as f64);
    let (y0, y1) = (y[upper - 1] as f64, y[upper] as f64);
    if x1 == x0 {
        return Some(y1);
    }
    Some(y0 + (y1 - y0) * (at - x0) / (x1 - x0))
}

/// Place up to `count` markers of `mode` on one frame.
///
/// `fixed` holds the frequencies of fixed markers and is ignored by the
/// other modes.
pub fn compute_markers(
    mode: MarkerMode,
    count: usize,
    x: &[f32],
    y: &[f32],
    complex: bool,
    fixed: &[f64],
) -> Vec<Marker> {
    let len = x.len().min(y.len());
    let (x, y) = (&x[..len], &y[..len]);
    if len == 0 || count == 0 {
        return Vec::new();
    }

    match mode {
        MarkerMode::None => Vec::new(),
        MarkerMode::Peak => find_peaks(y)
            .into_iter()
            .take(count)
            .enumerate()
            .map(|(i, index)| Marker::at(format!("P{}", i), x, y, index))
            .collect(),
        MarkerMode::Fixed => fixed
            .iter()
            .take(count)
            .enumerate()
            .filter_map(|(i, &at)| {
                value_at(x, y, at).map(|value| Marker {
                    name: format!("F{}", i),
                    x: at,
                    y: value,
                    index: None,
                })
            })
            .collect(),
        MarkerMode::SingleTone => {
            let dc = if complex { len / 2 } else { 0 };
            let mut markers = vec![Marker::at("DC", x, y, dc)];
            let Some(&fund) = find_peaks(y).first() else {
                return markers;
            };
            markers.push(Marker::at("Fund", x, y, fund));

            let offset = fund as isize - dc as isize;
            // Search window never reaches back to the previous harmonic
            let range = ((len as f64).log2() as usize).min(offset.unsigned_abs() / 2);
            for harmonic in 2.. {
                if markers.len() >= count {
                    break;
                }
                let target = dc as isize + offset * harmonic as isize;
                let Some(index) = usize::try_from(target)
                    .ok()
                    .and_then(|t| peak_near(y, t, range))
                else {
                    break;
                };
                markers.push(Marker::at(format!("{}H", harmonic), x, y, index));
            }
            markers.truncate(count);
            markers
        }
        MarkerMode::Image => {
            let dc = if complex { len / 2 } else { 0 };
            let mut markers = vec![Marker::at("DC", x, y, dc)];
            if let Some(&fund) = find_peaks(y).first() {
                markers.push(Marker::at("Fund", x, y, fund));
                let image = 2 * dc as isize - fund as isize;
                if let Ok(image) = usize::try_from(image) {
                    if image < len {
                        markers.push(Marker::at("Imag", x, y, image));
                    }
                }
            }
            markers.truncate(count);
            markers
        }
    }
}
