//! Pipeline-specific error types.

use crate::pipeline::id::SignalPathId;
use thiserror::Error;

/// Errors that can occur within the flow-graph system.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Signal path {0:?} is not registered")]
    UnknownPath(SignalPathId),

    #[error("Signal path {path} has no source block")]
    MissingSource { path: String },

    #[error("Block {block} cannot accept {input} samples")]
    BlockMismatch { block: String, input: &'static str },

    #[error("Device {uri} failed: {message}")]
    Device { uri: String, message: String },

    #[error("Device {uri} did not answer the health check")]
    PingFailed { uri: String },

    #[error("Flow graph is not built")]
    NotBuilt,

    #[error("Channel send error")]
    ChannelSend,

    #[error("Channel receive error")]
    ChannelRecv,
}

impl PipelineError {
    /// Failures coming from the device layer end the current capture.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::Device { .. } | PipelineError::PingFailed { .. }
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
