//! Sinks: terminal consumers of the flow graph.
//!
//! ```text
//! Disarmed ──arm──► Armed ──start──► Capturing ──refill──► Capturing
//!    ▲                                    │
//!    └────────────── disarm ◄── Finished ◄┘ (single shot)
//! ```
//!
//! Both variants share [`Sink`], which holds the compiled signal paths, the
//! name → input map and the device buffers behind one mutex. That mutex is
//! held across `update_data`, `set_data` and every build callback, so a
//! rebuild never observes a half-updated frame. The variant-specific part is
//! a [`Framing`]: a sample ring for the time sink, the latest spectrum for
//! the frequency sink.

mod base;
pub mod freq;
pub mod ring;
pub mod time;

pub use base::{ChannelBinding, Framing, Sink};
pub use freq::{complex_channel_pair, frequency_axis, ComplexPair, FreqFraming, FreqSink};
pub use ring::SampleRing;
pub use time::{time_axis, TimeFraming, TimeSink};

use crate::pipeline::channel_data::ChannelData;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::id::{SignalPathId, SinkInput};
use crate::pipeline::signal_path::SignalPathHandle;
use crate::pipeline::top_block::SharedTopBlock;
use crate::types::{InstrumentKind, SamplingInfo};
use crossbeam_channel::Receiver;
use std::sync::Arc;

/// Capture state of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkState {
    #[default]
    Disarmed,
    Armed,
    Capturing,
    Finished,
}

/// Notifications a sink publishes to its controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Armed,
    Disarmed,
    /// Device buffers exist and refills may begin
    Ready,
    /// Single-shot target reached
    Finished,
    SamplingInfoChanged {
        buffer_size: usize,
        sample_rate: f64,
        complex_mode: bool,
    },
    /// Another instrument in the sync cluster changed the buffer size
    RequestBufferSize(usize),
    /// Another instrument in the sync cluster changed single shot
    RequestSingleShot(bool),
}

/// Common interface of the time- and frequency-domain sinks.
///
/// Every method takes `&self`; `update_data` runs on the refill worker while
/// the others run on the controller thread.
pub trait DataProvider: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> InstrumentKind;
    fn top(&self) -> &SharedTopBlock;

    /// Attach to the top block's lifecycle.
    fn arm(&self);
    /// Detach and release device buffers. Safe when never armed.
    fn disarm(&self);
    fn state(&self) -> SinkState;

    /// Refill the device buffers once and run the signal paths.
    ///
    /// Returns the number of new samples per channel.
    fn update_data(&self) -> PipelineResult<usize>;
    /// Hand the latest frame to every enabled, connected channel.
    fn set_data(&self, copy: bool);
    fn finished(&self) -> bool;

    fn sampling_info(&self) -> SamplingInfo;
    /// Apply new sampling parameters. Structural changes on an armed sink
    /// go through disarm, reconfigure, rearm and a rebuild.
    fn set_sampling_info(&self, info: SamplingInfo) -> PipelineResult<()>;
    fn rolling_mode(&self) -> bool;
    fn set_rolling_mode(&self, rolling: bool) -> PipelineResult<()>;

    fn set_buffer_size(&self, size: usize) -> PipelineResult<()> {
        let mut info = self.sampling_info();
        info.buffer_size = size;
        self.set_sampling_info(info)
    }

    fn set_single_shot(&self, single_shot: bool) -> PipelineResult<()> {
        let mut info = self.sampling_info();
        info.single_shot = single_shot;
        self.set_sampling_info(info)
    }

    fn sync_mode(&self) -> bool;
    fn set_sync_mode(&self, sync: bool);
    /// Ask the owning controller to apply a buffer size.
    fn request_buffer_size(&self, size: usize);
    /// Ask the owning controller to apply single shot.
    fn request_single_shot(&self, single_shot: bool);

    fn bind_channel(&self, handle: SignalPathHandle, data: Arc<ChannelData>);
    fn unbind_channel(&self, path: SignalPathId) -> bool;
    /// Input index assigned to `path_name` at the last build.
    fn input_index(&self, path_name: &str) -> Option<SinkInput>;
    /// Samples captured since the last start.
    fn samples_captured(&self) -> usize;

    fn subscribe(&self) -> Receiver<SinkEvent>;
}
