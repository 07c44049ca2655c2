//! Frequency-domain channel: real or I/Q source followed by an FFT.
//!
//! Window, averaging and power offset live in a [`ParamCell`] shared with the
//! running FFT stage, so changing them never rebuilds the graph.

use super::{register_path, set_path_enabled, unregister_path};
use crate::analysis::WindowFunction;
use crate::backend::SharedDevice;
use crate::controller::component::{Component, ComponentContext};
use crate::controller::id_alloc::PlotColor;
use crate::error::Result;
use crate::pipeline::{
    ChannelData, ComplexPair, FftParams, ParamCell, ProcessingBlock, SignalPath, SignalPathId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lower edge of the spectrum plot in dB
pub const FFT_Y_MIN: f64 = -140.0;
/// Upper edge of the spectrum plot in dB
pub const FFT_Y_MAX: f64 = 20.0;

/// Where an FFT channel takes its samples from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FftSource {
    Real { channel: String },
    Complex(ComplexPair),
}

#[derive(Debug)]
pub struct FftChannelComponent {
    name: String,
    path_name: String,
    device: SharedDevice,
    source: FftSource,
    path_id: SignalPathId,
    params: ParamCell<FftParams>,
    complex_mode: Arc<AtomicBool>,
    data: Arc<ChannelData>,
    color: PlotColor,
    enabled: bool,
}

impl FftChannelComponent {
    /// `complex_mode` is the instrument-wide flag; it decides whether real or
    /// complex channels are active.
    pub fn new(
        instrument: &str,
        device: SharedDevice,
        source: FftSource,
        complex_mode: Arc<AtomicBool>,
        color: PlotColor,
    ) -> Self {
        let name = match &source {
            FftSource::Real { channel } => channel.clone(),
            FftSource::Complex(pair) => pair.name(),
        };
        Self {
            path_name: format!("{}_{}", instrument, name),
            data: Arc::new(ChannelData::new(name.clone())),
            name,
            device,
            source,
            path_id: SignalPathId::INVALID,
            params: ParamCell::new(FftParams::default()),
            complex_mode,
            color,
            enabled: true,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self.source, FftSource::Complex(_))
    }

    pub fn source(&self) -> &FftSource {
        &self.source
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

    /// The user-facing switch, independent of complex mode.
    pub fn user_enabled(&self) -> bool {
        self.enabled
    }

    pub fn y_range(&self) -> (f64, f64) {
        (FFT_Y_MIN, FFT_Y_MAX)
    }

    pub fn params(&self) -> FftParams {
        self.params.get()
    }

    pub fn set_window(&self, window: WindowFunction) {
        self.params.update(|p| p.window = window);
    }

    pub fn set_averaging(&self, averaging: usize) {
        self.params.update(|p| p.averaging = averaging.max(1));
    }

    pub fn set_power_offset(&self, offset: f64) {
        self.params.update(|p| p.power_offset = offset);
    }

    fn source_block(&self) -> ProcessingBlock {
        match &self.source {
            FftSource::Real { channel } => {
                ProcessingBlock::device_source(self.device.clone(), channel.clone())
            }
            FftSource::Complex(pair) => {
                ProcessingBlock::complex_source(self.device.clone(), pair.i.clone(), pair.q.clone())
            }
        }
    }
}

impl Component for FftChannelComponent {
    fn name(&self) -> &str {
        &self.name
    }

    /// Real channels only run outside complex mode and complex channels
    /// only inside it.
    fn enabled(&self) -> bool {
        self.enabled && !(self.is_complex() ^ self.complex_mode.load(Ordering::Acquire))
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn on_init(&mut self, ctx: &ComponentContext<'_>) -> Result<()> {
        let path = SignalPath::new(self.path_name.clone())
            .with_block(self.source_block())
            .with_block(ProcessingBlock::fft(self.params.clone()));
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

    fn device() -> SharedDevice {
        SharedDevice::new(Box::new(MockDevice::new("local:f", 1000.0)))
    }

    #[test]
    fn test_enabled_follows_complex_mode() {
        let mode = Arc::new(AtomicBool::new(false));
        let real = FftChannelComponent::new(
            "adc_fft",
            device(),
            FftSource::Real {
                channel: "voltage0".into(),
            },
            Arc::clone(&mode),
            PlotColor(0, 0, 0),
        );
        let complex = FftChannelComponent::new(
            "adc_fft",
            device(),
            FftSource::Complex(ComplexPair {
                i: "voltage2i".into(),
                q: "voltage2q".into(),
            }),
            Arc::clone(&mode),
            PlotColor(0, 0, 0),
        );
        assert!(real.enabled());
        assert!(!complex.enabled());

        mode.store(true, Ordering::Release);
        assert!(!real.enabled());
        assert!(complex.enabled());
        assert_eq!(complex.name(), "voltage2i-voltage2q");
        assert_eq!(complex.path_name(), "adc_fft_voltage2i-voltage2q");
    }

    #[test]
    fn test_user_disable_wins() {
        let mode = Arc::new(AtomicBool::new(false));
        let mut real = FftChannelComponent::new(
            "adc_fft",
            device(),
            FftSource::Real {
                channel: "voltage0".into(),
            },
            mode,
            PlotColor(0, 0, 0),
        );
        real.set_enabled(false);
        assert!(!real.enabled());
        assert!(!real.user_enabled());
    }

    #[test]
    fn test_params_are_hot_swapped() {
        let c = FftChannelComponent::new(
            "adc_fft",
            device(),
            FftSource::Real {
                channel: "voltage0".into(),
            },
            Arc::new(AtomicBool::new(false)),
            PlotColor(0, 0, 0),
        );
        c.set_window(WindowFunction::Blackman);
        c.set_averaging(0);
        c.set_power_offset(-3.0);
        let p = c.params();
        assert_eq!(p.window, WindowFunction::Blackman);
        assert_eq!(p.averaging, 1);
        assert_eq!(p.power_offset, -3.0);
        assert_eq!(c.y_range(), (-140.0, 20.0));
    }
}
