//! Time-domain channel: device source followed by scale/offset.

use super::{register_path, set_path_enabled, unregister_path};
use crate::acq_tree::{FloatChannelNode, ImportChannelNode};
use crate::backend::{ChannelInfo, SharedDevice};
use crate::controller::component::{Component, ComponentContext};
use crate::controller::id_alloc::PlotColor;
use crate::error::{AcqError, Result};
use crate::pipeline::{
    ChannelData, ParamCell, ProcessingBlock, ScaleOffsetParams, SignalPath, SignalPathId,
};
use crate::types::YMode;
use std::sync::Arc;

#[derive(Debug)]
pub struct TimeChannelComponent {
    name: String,
    path_name: String,
    device: SharedDevice,
    info: ChannelInfo,
    path_id: SignalPathId,
    scale: ParamCell<ScaleOffsetParams>,
    y_mode: YMode,
    y_range: (f64, f64),
    data: Arc<ChannelData>,
    color: PlotColor,
    enabled: bool,
}

impl TimeChannelComponent {
    /// `instrument` prefixes the signal path name so the instrument's sink
    /// picks it up.
    pub fn new(instrument: &str, node: &FloatChannelNode, color: PlotColor) -> Self {
        let name = node.info.name.clone();
        let (y_min, y_max) = node.info.format.count_range();
        Self {
            path_name: format!("{}_{}", instrument, name),
            data: Arc::new(ChannelData::new(name.clone())),
            name,
            device: node.device.clone(),
            info: node.info.clone(),
            path_id: SignalPathId::INVALID,
            scale: ParamCell::new(ScaleOffsetParams::default()),
            y_mode: YMode::Count,
            y_range: (y_min, y_max),
            color,
            enabled: true,
        }
    }

    pub fn path_id(&self) -> SignalPathId {
        self.path_id
    }

    pub fn path_name(&self) -> &str {
        &self.path_name
    }

    pub fn color(&self) -> PlotColor {
        self.color
    }

    pub fn y_mode(&self) -> YMode {
        self.y_mode
    }

    /// Y axis range for the current mode.
    pub fn y_range(&self) -> (f64, f64) {
        self.y_range
    }

    /// Current scale/offset applied to raw samples.
    pub fn scale_offset(&self) -> ScaleOffsetParams {
        self.scale.get()
    }

    /// Applied to the running path without a rebuild.
    pub fn set_y_mode(&mut self, mode: YMode) {
        let scaling = mode.scaling(&self.info.format, self.info.scale);
        self.scale.set(ScaleOffsetParams {
            scale: scaling.scale,
            offset: scaling.offset,
        });
        self.y_mode = mode;
        self.y_range = (scaling.y_min, scaling.y_max);
        tracing::debug!("{}: y mode {:?}", self.name, mode);
    }

    /// Copy of the channel's current frame as reference data.
    pub fn snapshot(&self) -> Result<ImportChannelNode> {
        let (x, y) = self.data.to_vecs();
        if y.is_empty() {
            return Err(AcqError::Config(format!(
                "{} has no captured data to snapshot",
                self.name
            )));
        }
        Ok(ImportChannelNode {
            x: Arc::from(x),
            y: Arc::from(y),
        })
    }
}

impl Component for TimeChannelComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn on_init(&mut self, ctx: &ComponentContext<'_>) -> Result<()> {
        self.set_y_mode(ctx.prefs.adc_default_y_mode);
        let path = SignalPath::new(self.path_name.clone())
            .with_block(ProcessingBlock::device_source(
                self.device.clone(),
                self.info.name.clone(),
            ))
            .with_block(ProcessingBlock::scale_offset(self.scale.clone()));
        self.path_id = register_path(ctx, path, &self.data)?;
        Ok(())
    }

    fn on_start(&mut self, ctx: &ComponentContext<'_>) -> Result<()> {
        set_path_enabled(ctx, self.path_id, true)
    }

    fn on_stop(&mut self, ctx: &ComponentContext<'_>) {
        if let Err(e) = set_path_enabled(ctx, self.path_id, false) {
            tracing::warn!("{}: {}", self.name, e);
        }
    }

    fn on_deinit(&mut self, ctx: &ComponentContext<'_>) {
        if self.path_id.is_valid() {
            unregister_path(ctx, self.path_id);
            self.path_id = SignalPathId::INVALID;
        }
    }

    fn channel_data(&self) -> Option<Arc<ChannelData>> {
        Some(Arc::clone(&self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockDevice;
    use crate::types::DataFormat;

    fn node() -> FloatChannelNode {
        let device = SharedDevice::new(Box::new(MockDevice::new("local:t", 100.0)));
        FloatChannelNode {
            device,
            info: ChannelInfo::new("voltage0")
                .with_format(DataFormat {
                    bits: 12,
                    signed: true,
                })
                .with_scale(0.5),
        }
    }

    #[test]
    fn test_path_name_carries_instrument_prefix() {
        let c = TimeChannelComponent::new("adc_time", &node(), PlotColor(1, 2, 3));
        assert_eq!(c.path_name(), "adc_time_voltage0");
        assert_eq!(c.name(), "voltage0");
        assert!(!c.path_id().is_valid());
    }

    #[test]
    fn test_y_mode_updates_scale_and_range() {
        let mut c = TimeChannelComponent::new("adc_time", &node(), PlotColor(1, 2, 3));
        c.set_y_mode(YMode::Scale);
        let params = c.scale_offset();
        assert!((params.scale - 0.0005).abs() < 1e-12);
        assert_eq!(c.y_mode(), YMode::Scale);

        c.set_y_mode(YMode::FullScale);
        assert_eq!(c.y_range(), (-0.5, 0.5));
    }

    #[test]
    fn test_snapshot_needs_data() {
        let c = TimeChannelComponent::new("adc_time", &node(), PlotColor(1, 2, 3));
        assert!(c.snapshot().is_err());

        let x: Arc<[f32]> = Arc::from(vec![0.0, 1.0]);
        let y: Arc<[f32]> = Arc::from(vec![3.0, 4.0]);
        c.channel_data().unwrap().on_new_data(&x, &y, 2, false);
        let snap = c.snapshot().unwrap();
        assert_eq!(&*snap.y, &[3.0, 4.0]);
        // The snapshot does not share the live frame
        assert!(!Arc::ptr_eq(&snap.y, &y));
    }
}
