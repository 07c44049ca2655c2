//! Signal paths: ordered chains of processing blocks bound to one source.
//!
//! A path is registered with one [`super::TopBlock`] for its whole life. Its
//! enabled flag is shared with the sink through a [`SignalPathHandle`]: the
//! sink reads it every frame, while build participation only changes on the
//! next build.

use crate::backend::SharedDevice;
use crate::pipeline::block::{ProcessingBlock, SampleStream, Stage};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::SignalPathId;
use crate::types::SamplingInfo;
use rustfft::num_complex::Complex32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An ordered sequence of processing blocks.
#[derive(Debug)]
pub struct SignalPath {
    name: String,
    blocks: Vec<ProcessingBlock>,
    enabled: Arc<AtomicBool>,
}

impl SignalPath {
    /// Paths start disabled; channel components enable them on start.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            enabled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_block(mut self, block: ProcessingBlock) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn append(&mut self, block: ProcessingBlock) {
        self.blocks.push(block);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blocks(&self) -> &[ProcessingBlock] {
        &self.blocks
    }

    pub fn block_mut(&mut self, index: usize) -> Option<&mut ProcessingBlock> {
        self.blocks.get_mut(index)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Only affects build participation after the next rebuild.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn handle(&self, id: SignalPathId) -> SignalPathHandle {
        SignalPathHandle {
            id,
            name: self.name.clone(),
            enabled: Arc::clone(&self.enabled),
        }
    }

    /// Device feeding this path.
    pub fn device(&self) -> Option<&SharedDevice> {
        self.blocks
            .iter()
            .find(|b| b.is_source() && b.is_enabled())
            .and_then(|b| b.device())
    }

    /// Turn the path into its runtime form for one build.
    ///
    /// The first enabled block must be a source. Disabled processing blocks
    /// are left out of the chain.
    pub fn compile(&self, id: SignalPathId, info: &SamplingInfo) -> PipelineResult<CompiledPath> {
        let mut enabled = self.blocks.iter().filter(|b| b.is_enabled());
        let source_block = enabled
            .next()
            .filter(|b| b.is_source())
            .ok_or_else(|| PipelineError::MissingSource {
                path: self.name.clone(),
            })?;
        let device = source_block
            .device()
            .cloned()
            .ok_or_else(|| PipelineError::MissingSource {
                path: self.name.clone(),
            })?;
        let channels = source_block.source_channels();
        let source = match channels.as_slice() {
            [channel] => PathSource::Real {
                device,
                channel: channel.clone(),
            },
            [i, q] => PathSource::Complex {
                device,
                i: i.clone(),
                q: q.clone(),
            },
            _ => {
                return Err(PipelineError::MissingSource {
                    path: self.name.clone(),
                })
            }
        };

        let mut stages = Vec::new();
        for block in enabled {
            if block.is_source() {
                return Err(PipelineError::BlockMismatch {
                    block: block.name().to_string(),
                    input: "chained source",
                });
            }
            if let Some(stage) = block.instantiate(info.buffer_size) {
                stages.push(stage);
            }
        }

        Ok(CompiledPath {
            id,
            name: self.name.clone(),
            source,
            stages,
            scratch_i: Vec::new(),
            scratch_q: Vec::new(),
        })
    }
}

/// Cheap reference to a registered path held by channel bindings.
#[derive(Debug, Clone)]
pub struct SignalPathHandle {
    pub id: SignalPathId,
    pub name: String,
    enabled: Arc<AtomicBool>,
}

impl SignalPathHandle {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum PathSource {
    Real {
        device: SharedDevice,
        channel: String,
    },
    Complex {
        device: SharedDevice,
        i: String,
        q: String,
    },
}

/// A signal path wired into a built flow graph.
pub struct CompiledPath {
    pub id: SignalPathId,
    pub name: String,
    pub(crate) source: PathSource,
    stages: Vec<Stage>,
    scratch_i: Vec<f32>,
    scratch_q: Vec<f32>,
}

impl std::fmt::Debug for CompiledPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPath")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl CompiledPath {
    pub fn device(&self) -> &SharedDevice {
        match &self.source {
            PathSource::Real { device, .. } | PathSource::Complex { device, .. } => device,
        }
    }

    /// Device channels that must be part of the device buffer.
    pub fn channels(&self) -> Vec<String> {
        match &self.source {
            PathSource::Real { channel, .. } => vec![channel.clone()],
            PathSource::Complex { i, q, .. } => vec![i.clone(), q.clone()],
        }
    }

    /// Read the samples of the last refill and run them through the stages.
    ///
    /// The device must already have been refilled for this cycle.
    pub fn run(&mut self) -> PipelineResult<Option<SampleStream>> {
        let input = match &self.source {
            PathSource::Real { device, channel } => {
                let dev = device.lock();
                if !dev.read_channel(channel, &mut self.scratch_i) {
                    return Err(missing_channel(device, channel));
                }
                SampleStream::Real(self.scratch_i.clone())
            }
            PathSource::Complex { device, i, q } => {
                let dev = device.lock();
                if !dev.read_channel(i, &mut self.scratch_i) {
                    return Err(missing_channel(device, i));
                }
                if !dev.read_channel(q, &mut self.scratch_q) {
                    return Err(missing_channel(device, q));
                }
                SampleStream::Complex(
                    self.scratch_i
                        .iter()
                        .zip(self.scratch_q.iter())
                        .map(|(&re, &im)| Complex32::new(re, im))
                        .collect(),
                )
            }
        };

        let mut stream = input;
        for stage in self.stages.iter_mut() {
            match stage.process(stream)? {
                Some(next) => stream = next,
                None => return Ok(None),
            }
        }
        Ok(Some(stream))
    }
}

fn missing_channel(device: &SharedDevice, channel: &str) -> PipelineError {
    PipelineError::Device {
        uri: device.uri().to_string(),
        message: format!("channel {} is not part of the buffer", channel),
    }
}
