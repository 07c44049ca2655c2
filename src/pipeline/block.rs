//! Processing blocks: the stages a signal path chains together.
//!
//! A block is either a source (reads one device channel, or two channels
//! combined into an I/Q stream) or a processing stage (scale/offset, FFT).
//! Blocks carry an enabled flag that is only consulted at build time.
//!
//! Processing parameters live in a [`ParamCell`] shared with the owning
//! channel component, so window/averaging/offset changes reach a running
//! stage without a rebuild. Structural parameters (buffer size, complex
//! mode) are baked into a [`Stage`] when the path is compiled.

use crate::analysis::fft::{power_to_db, SpectrumAnalyzer, SpectrumInput, WindowFunction};
use crate::backend::SharedDevice;
use crate::pipeline::error::{PipelineError, PipelineResult};
use rustfft::num_complex::Complex32;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Samples flowing between stages of one signal path.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleStream {
    Real(Vec<f32>),
    Complex(Vec<Complex32>),
}

impl SampleStream {
    pub fn len(&self) -> usize {
        match self {
            SampleStream::Real(v) => v.len(),
            SampleStream::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            SampleStream::Real(_) => "real",
            SampleStream::Complex(_) => "complex",
        }
    }
}

/// A parameter set shared between a component and a running stage.
#[derive(Debug, Default)]
pub struct ParamCell<T: Copy>(Arc<Mutex<T>>);

impl<T: Copy> ParamCell<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    pub fn get(&self) -> T {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, value: T) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.0.lock().unwrap_or_else(|e| e.into_inner()));
    }
}

impl<T: Copy> Clone for ParamCell<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// `y = x * scale + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleOffsetParams {
    pub scale: f64,
    pub offset: f64,
}

impl Default for ScaleOffsetParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: 0.0,
        }
    }
}

/// Hot-swappable FFT parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FftParams {
    pub window: WindowFunction,
    /// Number of spectra averaged together; 1 disables averaging
    pub averaging: usize,
    /// Added to every bin after dB conversion
    pub power_offset: f64,
}

impl Default for FftParams {
    fn default() -> Self {
        Self {
            window: WindowFunction::Hamming,
            averaging: 1,
            power_offset: 0.0,
        }
    }
}

/// What a block does.
#[derive(Debug, Clone)]
pub enum BlockOp {
    /// Reads one channel of a device buffer
    DeviceSource { device: SharedDevice, channel: String },
    /// Combines two channels of one device into an I/Q stream
    ComplexSource {
        device: SharedDevice,
        i: String,
        q: String,
    },
    ScaleOffset(ParamCell<ScaleOffsetParams>),
    Fft(ParamCell<FftParams>),
}

/// One block of a signal path.
#[derive(Debug, Clone)]
pub struct ProcessingBlock {
    name: String,
    op: BlockOp,
    enabled: bool,
}

impl ProcessingBlock {
    pub fn new(name: impl Into<String>, op: BlockOp) -> Self {
        Self {
            name: name.into(),
            op,
            enabled: true,
        }
    }

    pub fn device_source(device: SharedDevice, channel: impl Into<String>) -> Self {
        let channel = channel.into();
        Self::new(
            format!("src:{}", channel),
            BlockOp::DeviceSource { device, channel },
        )
    }

    pub fn complex_source(device: SharedDevice, i: impl Into<String>, q: impl Into<String>) -> Self {
        let (i, q) = (i.into(), q.into());
        Self::new(
            format!("src:{}-{}", i, q),
            BlockOp::ComplexSource { device, i, q },
        )
    }

    pub fn scale_offset(params: ParamCell<ScaleOffsetParams>) -> Self {
        Self::new("scale_offset", BlockOp::ScaleOffset(params))
    }

    pub fn fft(params: ParamCell<FftParams>) -> Self {
        Self::new("fft", BlockOp::Fft(params))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &BlockOp {
        &self.op
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Takes effect on the next build.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_source(&self) -> bool {
        matches!(
            self.op,
            BlockOp::DeviceSource { .. } | BlockOp::ComplexSource { .. }
        )
    }

    /// Device read by this block, if it is a source.
    pub fn device(&self) -> Option<&SharedDevice> {
        match &self.op {
            BlockOp::DeviceSource { device, .. } | BlockOp::ComplexSource { device, .. } => {
                Some(device)
            }
            _ => None,
        }
    }

    /// Device channels read by this block.
    pub fn source_channels(&self) -> Vec<String> {
        match &self.op {
            BlockOp::DeviceSource { channel, .. } => vec![channel.clone()],
            BlockOp::ComplexSource { i, q, .. } => vec![i.clone(), q.clone()],
            _ => Vec::new(),
        }
    }

    /// Instantiate the runtime stage for a processing block.
    ///
    /// Sources have no stage; they are read by the compiled path directly.
    pub(crate) fn instantiate(&self, buffer_size: usize) -> Option<Stage> {
        match &self.op {
            BlockOp::ScaleOffset(params) => Some(Stage::ScaleOffset(params.clone())),
            BlockOp::Fft(params) => Some(Stage::Fft(FftStage::new(params.clone(), buffer_size))),
            BlockOp::DeviceSource { .. } | BlockOp::ComplexSource { .. } => None,
        }
    }
}

/// Runtime state of a processing block inside a built flow graph.
pub(crate) enum Stage {
    ScaleOffset(ParamCell<ScaleOffsetParams>),
    Fft(FftStage),
}

impl Stage {
    /// Run one chunk through the stage. `None` means the stage is still
    /// accumulating and nothing flows downstream this cycle.
    pub(crate) fn process(&mut self, input: SampleStream) -> PipelineResult<Option<SampleStream>> {
        match self {
            Stage::ScaleOffset(params) => {
                let p = params.get();
                let (scale, offset) = (p.scale as f32, p.offset as f32);
                match input {
                    SampleStream::Real(mut v) => {
                        for s in v.iter_mut() {
                            *s = *s * scale + offset;
                        }
                        Ok(Some(SampleStream::Real(v)))
                    }
                    other => Err(PipelineError::BlockMismatch {
                        block: "scale_offset".to_string(),
                        input: other.kind(),
                    }),
                }
            }
            Stage::Fft(stage) => Ok(stage.push(input)),
        }
    }
}

/// Accumulates `size` samples, then emits one dB spectrum.
pub(crate) struct FftStage {
    params: ParamCell<FftParams>,
    size: usize,
    real: Vec<f32>,
    complex: Vec<Complex32>,
    analyzer: SpectrumAnalyzer,
    power: Vec<f64>,
    history: VecDeque<Vec<f64>>,
}

impl FftStage {
    fn new(params: ParamCell<FftParams>, size: usize) -> Self {
        Self {
            params,
            size: size.max(2),
            real: Vec::with_capacity(size),
            complex: Vec::new(),
            analyzer: SpectrumAnalyzer::new(),
            power: Vec::new(),
            history: VecDeque::new(),
        }
    }

    fn push(&mut self, input: SampleStream) -> Option<SampleStream> {
        let params = self.params.get();
        match input {
            SampleStream::Real(v) => {
                self.real.extend_from_slice(&v);
                if self.real.len() < self.size {
                    return None;
                }
                let frame_start = self.real.len() - self.size;
                self.analyzer.power_spectrum(
                    SpectrumInput::Real(&self.real[frame_start..]),
                    params.window,
                    &mut self.power,
                );
                self.real.clear();
            }
            SampleStream::Complex(v) => {
                self.complex.extend_from_slice(&v);
                if self.complex.len() < self.size {
                    return None;
                }
                let frame_start = self.complex.len() - self.size;
                self.analyzer.power_spectrum(
                    SpectrumInput::Complex(&self.complex[frame_start..]),
                    params.window,
                    &mut self.power,
                );
                self.complex.clear();
            }
        }

        let depth = params.averaging.max(1);
        self.history.push_back(self.power.clone());
        while self.history.len() > depth {
            self.history.pop_front();
        }

        let count = self.history.len() as f64;
        let bins = self.power.len();
        let spectrum = (0..bins)
            .map(|k| {
                let avg = self.history.iter().map(|p| p[k]).sum::<f64>() / count;
                (power_to_db(avg) + params.power_offset) as f32
            })
            .collect();
        Some(SampleStream::Real(spectrum))
    }
}
