//! Plot collaborator interface.

use crate::pipeline::ChannelData;
use std::sync::Arc;

/// Receives the channel curves after each update.
///
/// Called on the controller thread. The frames behind `curves` stay valid
/// until the next call.
#[cfg_attr(test, mockall::automock)]
pub trait PlotManager: Send {
    fn replot(&mut self, curves: &[Arc<ChannelData>]);
}

/// Plot manager that only counts frames; used by the headless binary.
#[derive(Debug, Default)]
pub struct FrameCounter {
    pub frames: u64,
    pub last_points: usize,
}

impl PlotManager for FrameCounter {
    fn replot(&mut self, curves: &[Arc<ChannelData>]) {
        self.frames += 1;
        self.last_points = curves.iter().map(|c| c.len()).sum();
    }
}
