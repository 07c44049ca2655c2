//! Flow-graph pipeline: signal paths, top block and sinks.
//!
//! Samples are pulled, not pushed. Each refill cycle the sink refills every
//! device it reads from once, then runs its compiled signal paths over the
//! fresh buffers and publishes one frame per input.
//!
//! # Architecture
//!
//! ```text
//! [DeviceSource] ──► [ScaleOffset] ──────────► TimeSink ──► ChannelData
//! [ComplexSource] ─► [Fft] ──────────────────► FreqSink ──► ChannelData
//! ```
//!
//! # Design
//!
//! - **Arena of paths**: `TopBlock` stores paths in a `Vec` indexed by
//!   `SignalPathId`, reusing freed slots.
//! - **Batched builds**: `suspend_build` / `unsuspend_build` collapse many
//!   structural edits into one rebuild.
//! - **Structural vs processing parameters**: buffer size and complex mode
//!   require a rebuild; window, averaging and scale/offset are pushed live
//!   through `ParamCell`s.
//! - **One lock per sink**: build callbacks and refills serialize on it.

pub mod block;
pub mod channel_data;
pub mod error;
pub mod id;
pub mod signal_path;
pub mod sink;
pub mod top_block;

pub use block::{
    BlockOp, FftParams, ParamCell, ProcessingBlock, SampleStream, ScaleOffsetParams,
};
pub use channel_data::ChannelData;
pub use error::{PipelineError, PipelineResult};
pub use id::{ObserverId, SignalPathId, SinkInput};
pub use signal_path::{CompiledPath, SignalPath, SignalPathHandle};
pub use sink::{
    complex_channel_pair, ComplexPair, DataProvider, FreqSink, SampleRing, SinkEvent, SinkState,
    TimeSink,
};
pub use top_block::{lock_top, FlowGraphObserver, SharedTopBlock, TopBlock, TopBlockEvent};
