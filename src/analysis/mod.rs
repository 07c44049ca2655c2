//! Analysis module for signal processing
//!
//! This module provides the math behind the FFT block and the channel
//! tools:
//! - Window functions
//! - One-sided (real) and fft-shifted (complex) power spectra
//! - dB conversion and peak detection
//! - Spectrum markers
//! - Time-domain measurements

pub mod fft;
pub mod markers;
pub mod measure;

pub use fft::{
    peak_bin, power_to_db, SpectrumAnalyzer, SpectrumInput, WindowFunction, POWER_FLOOR_DB,
};
pub use markers::{compute_markers, find_peaks, Marker, MarkerMode, DEFAULT_MARKER_COUNT};
pub use measure::{
    detect_crossings, measure, Crossing, CrossingLevel, MeasureKind, MeasureStats, Measurements,
};
