//! FFT (Fast Fourier Transform) spectrum computation
//!
//! Backs the FFT processing block of frequency-domain signal paths:
//! - Window functions (rectangular, Hann, Hamming, Blackman, flat-top)
//! - One-sided power spectrum for real input
//! - Two-sided, fft-shifted power spectrum for complex (I/Q) input
//! - Power to dB conversion with a floor

use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Power floor in dB used for empty bins
pub const POWER_FLOOR_DB: f64 = -200.0;

/// Window function type for FFT preprocessing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunction {
    /// Rectangular window (no windowing)
    Rectangular,
    /// Hann window (good general purpose)
    Hann,
    /// Hamming window (reduced side lobes)
    #[default]
    Hamming,
    /// Blackman window (very low side lobes)
    Blackman,
    /// Flat-top window (accurate amplitude measurement)
    FlatTop,
}

impl WindowFunction {
    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            WindowFunction::Rectangular => "Rectangular",
            WindowFunction::Hann => "Hann",
            WindowFunction::Hamming => "Hamming",
            WindowFunction::Blackman => "Blackman",
            WindowFunction::FlatTop => "Flat-Top",
        }
    }

    /// Get all window functions
    pub fn all() -> &'static [WindowFunction] {
        &[
            WindowFunction::Rectangular,
            WindowFunction::Hann,
            WindowFunction::Hamming,
            WindowFunction::Blackman,
            WindowFunction::FlatTop,
        ]
    }

    /// Compute window coefficient at position i out of n samples
    pub fn coefficient(&self, i: usize, n: usize) -> f64 {
        let n_f = n as f64;
        let i_f = i as f64;

        match self {
            WindowFunction::Rectangular => 1.0,
            WindowFunction::Hann => 0.5 * (1.0 - (2.0 * PI * i_f / n_f).cos()),
            WindowFunction::Hamming => 0.54 - 0.46 * (2.0 * PI * i_f / n_f).cos(),
            WindowFunction::Blackman => {
                // Exactly 0 at the endpoints; clamp the -epsilon rounding.
                (0.42 - 0.5 * (2.0 * PI * i_f / n_f).cos() + 0.08 * (4.0 * PI * i_f / n_f).cos())
                    .max(0.0)
            }
            WindowFunction::FlatTop => {
                let a0 = 0.21557895;
                let a1 = 0.41663158;
                let a2 = 0.277263158;
                let a3 = 0.083578947;
                let a4 = 0.006947368;
                a0 - a1 * (2.0 * PI * i_f / n_f).cos() + a2 * (4.0 * PI * i_f / n_f).cos()
                    - a3 * (6.0 * PI * i_f / n_f).cos()
                    + a4 * (8.0 * PI * i_f / n_f).cos()
            }
        }
    }

    /// Generate window coefficients for n samples
    pub fn generate(&self, n: usize) -> Vec<f64> {
        (0..n).map(|i| self.coefficient(i, n)).collect()
    }
}

/// Input frame for [`SpectrumAnalyzer::power_spectrum`].
#[derive(Debug, Clone, Copy)]
pub enum SpectrumInput<'a> {
    Real(&'a [f32]),
    Complex(&'a [Complex<f32>]),
}

impl SpectrumInput<'_> {
    pub fn len(&self) -> usize {
        match self {
            SpectrumInput::Real(s) => s.len(),
            SpectrumInput::Complex(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of output bins produced for this input
    pub fn bin_count(&self) -> usize {
        match self {
            SpectrumInput::Real(s) => s.len() / 2,
            SpectrumInput::Complex(s) => s.len(),
        }
    }
}

/// Reusable spectrum engine.
///
/// Keeps the FFT planner and the last window so steady-state frames do not
/// re-plan or regenerate coefficients.
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f64>,
    window_cache: Option<(WindowFunction, usize, Vec<f64>, f64)>,
    scratch: Vec<Complex<f64>>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            window_cache: None,
            scratch: Vec::new(),
        }
    }

    fn window(&mut self, window: WindowFunction, n: usize) -> (&[f64], f64) {
        let stale = !matches!(&self.window_cache, Some((w, len, _, _)) if *w == window && *len == n);
        if stale {
            let coeffs = window.generate(n);
            let sum: f64 = coeffs.iter().sum();
            self.window_cache = Some((window, n, coeffs, sum));
        }
        match &self.window_cache {
            Some((_, _, coeffs, sum)) => (coeffs.as_slice(), *sum),
            None => (&[], 0.0),
        }
    }

    /// Compute the linear power spectrum of one frame into `out`.
    ///
    /// Real input yields `n / 2` one-sided bins starting at DC. Complex input
    /// yields `n` bins ordered from `-fs/2` to `fs/2` (fft-shifted). Power is
    /// normalized by the squared window sum so a full-scale tone reads its
    /// amplitude squared regardless of the window.
    pub fn power_spectrum(
        &mut self,
        input: SpectrumInput<'_>,
        window: WindowFunction,
        out: &mut Vec<f64>,
    ) {
        out.clear();
        let n = input.len();
        if n < 2 {
            return;
        }

        let (coeffs, sum) = self.window(window, n);
        let coeffs = coeffs.to_vec();
        let norm = if sum > 0.0 { 1.0 / (sum * sum) } else { 0.0 };

        self.scratch.clear();
        match input {
            SpectrumInput::Real(samples) => self.scratch.extend(
                samples
                    .iter()
                    .zip(coeffs.iter())
                    .map(|(&s, &w)| Complex::new(s as f64 * w, 0.0)),
            ),
            SpectrumInput::Complex(samples) => self.scratch.extend(
                samples
                    .iter()
                    .zip(coeffs.iter())
                    .map(|(s, &w)| Complex::new(s.re as f64 * w, s.im as f64 * w)),
            ),
        }

        let fft = self.planner.plan_fft_forward(n);
        fft.process(&mut self.scratch);

        match input {
            SpectrumInput::Real(_) => {
                out.extend(self.scratch.iter().take(n / 2).enumerate().map(|(k, c)| {
                    let p = c.norm_sqr() * norm;
                    // Fold the negative half onto the positive bins
                    if k == 0 {
                        p
                    } else {
                        2.0 * p
                    }
                }));
            }
            SpectrumInput::Complex(_) => {
                let half = n / 2;
                out.extend(
                    self.scratch[n - half..]
                        .iter()
                        .chain(self.scratch[..n - half].iter())
                        .map(|c| c.norm_sqr() * norm),
                );
            }
        }
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a linear power value to dB with [`POWER_FLOOR_DB`] as the floor.
pub fn power_to_db(power: f64) -> f64 {
    if power > 1e-20 {
        10.0 * power.log10()
    } else {
        POWER_FLOOR_DB
    }
}

/// Index and value of the strongest bin.
pub fn peak_bin(spectrum: &[f32]) -> Option<(usize, f32)> {
    spectrum
        .iter()
        .copied()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
}
