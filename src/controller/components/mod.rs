//! Builtin components: the ones created from acquisition tree nodes and the
//! channel tools fed from their data.

mod device;
mod fft_channel;
mod import_channel;
mod marker;
mod measurement;
mod time_channel;
mod xy_channel;

pub use device::DeviceComponent;
pub use fft_channel::{FftChannelComponent, FftSource, FFT_Y_MAX, FFT_Y_MIN};
pub use import_channel::ImportChannelComponent;
pub use marker::MarkerComponent;
pub use measurement::MeasurementComponent;
pub use time_channel::TimeChannelComponent;
pub use xy_channel::XyChannelComponent;

use crate::controller::component::ComponentContext;
use crate::error::Result;
use crate::pipeline::{lock_top, ChannelData, SignalPath, SignalPathId};
use std::sync::Arc;

/// Register `path` with the top block and bind its output to `data`.
fn register_path(
    ctx: &ComponentContext<'_>,
    path: SignalPath,
    data: &Arc<ChannelData>,
) -> Result<SignalPathId> {
    let handle = {
        let mut top = lock_top(ctx.top);
        let id = top.register_signal_path(path);
        top.path(id)?.handle(id)
    };
    let id = handle.id;
    ctx.sink.bind_channel(handle, Arc::clone(data));
    Ok(id)
}

/// Change build participation; the caller owns the rebuild.
fn set_path_enabled(ctx: &ComponentContext<'_>, id: SignalPathId, enabled: bool) -> Result<()> {
    lock_top(ctx.top).path(id)?.set_enabled(enabled);
    Ok(())
}

fn unregister_path(ctx: &ComponentContext<'_>, id: SignalPathId) {
    ctx.sink.unbind_channel(id);
    lock_top(ctx.top).unregister_signal_path(id);
}
