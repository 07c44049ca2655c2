//! Spectrum markers of one FFT channel.

use crate::analysis::{compute_markers, Marker, MarkerMode, DEFAULT_MARKER_COUNT};
use crate::controller::component::{Component, ComponentContext};
use crate::error::Result;
use crate::pipeline::ChannelData;
use std::sync::Arc;

#[derive(Debug)]
pub struct MarkerComponent {
    name: String,
    channel: String,
    source: Arc<ChannelData>,
    complex: bool,
    mode: MarkerMode,
    count: usize,
    /// Frequencies of fixed markers, one per marker
    fixed: Vec<f64>,
    markers: Vec<Marker>,
    seen_frames: u64,
    enabled: bool,
}

impl MarkerComponent {
    /// `complex` tells where DC sits in the source's frames.
    pub fn new(source: Arc<ChannelData>, complex: bool, mode: MarkerMode) -> Self {
        let channel = source.name().to_string();
        Self {
            name: format!("{} markers", channel),
            channel,
            source,
            complex,
            mode,
            count: DEFAULT_MARKER_COUNT,
            fixed: vec![0.0; DEFAULT_MARKER_COUNT],
            markers: Vec::new(),
            seen_frames: 0,
            enabled: true,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn mode(&self) -> MarkerMode {
        self.mode
    }

    /// Switching to fixed markers pins them where the current markers are.
    pub fn set_mode(&mut self, mode: MarkerMode) {
        if mode == MarkerMode::Fixed && self.mode != MarkerMode::Fixed {
            for (slot, marker) in self.fixed.iter_mut().zip(&self.markers) {
                *slot = marker.x;
            }
        }
        self.mode = mode;
        self.recompute();
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn set_count(&mut self, count: usize) {
        self.count = count;
        self.fixed.resize(count, 0.0);
        self.recompute();
    }

    /// Move fixed marker `index`. Returns false if there is no such marker.
    pub fn set_fixed_frequency(&mut self, index: usize, frequency: f64) -> bool {
        let Some(slot) = self.fixed.get_mut(index) else {
            return false;
        };
        *slot = frequency;
        self.recompute();
        true
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Recompute markers if the source has a new frame.
    pub fn refresh(&mut self) -> bool {
        let frames = self.source.frames();
        if frames == self.seen_frames {
            return false;
        }
        self.seen_frames = frames;
        self.recompute();
        true
    }

    fn recompute(&mut self) {
        let (mode, count, complex) = (self.mode, self.count, self.complex);
        let fixed = &self.fixed;
        self.markers = self
            .source
            .with_data(|x, y| compute_markers(mode, count, x, y, complex, fixed));
    }
}

impl Component for MarkerComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn on_start(&mut self, _ctx: &ComponentContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_stop(&mut self, _ctx: &ComponentContext<'_>) {}

    fn on_update(&mut self, _ctx: &ComponentContext<'_>) {
        self.refresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 32-bin spectrum, 10 Hz per bin, tones at bins 4 and 8.
    fn push_spectrum(data: &ChannelData) {
        let x: Vec<f32> = (0..32).map(|i| i as f32 * 10.0).collect();
        let mut y = vec![-100.0f32; 32];
        y[4] = -10.0;
        y[8] = -30.0;
        let (x, y): (Arc<[f32]>, Arc<[f32]>) = (x.into(), y.into());
        data.on_new_data(&x, &y, 32, true);
    }

    #[test]
    fn test_markers_follow_new_frames() {
        let data = Arc::new(ChannelData::new("voltage0"));
        let mut m = MarkerComponent::new(Arc::clone(&data), false, MarkerMode::Peak);
        assert_eq!(m.name(), "voltage0 markers");
        assert!(!m.refresh());
        assert!(m.markers().is_empty());

        push_spectrum(&data);
        assert!(m.refresh());
        assert_eq!(m.markers().len(), 2);
        assert_eq!(m.markers()[0].x, 40.0);
        assert!(!m.refresh());
    }

    #[test]
    fn test_fixed_mode_pins_current_markers() {
        let data = Arc::new(ChannelData::new("voltage0"));
        let mut m = MarkerComponent::new(Arc::clone(&data), false, MarkerMode::Peak);
        push_spectrum(&data);
        m.refresh();

        m.set_mode(MarkerMode::Fixed);
        let xs: Vec<f64> = m.markers().iter().map(|mk| mk.x).collect();
        // Two peaks, then the unplaced markers at 0 Hz
        assert_eq!(xs, [40.0, 80.0, 0.0, 0.0, 0.0]);

        assert!(m.set_fixed_frequency(2, 45.0));
        assert_eq!(m.markers()[2].y, -55.0);
        assert!(!m.set_fixed_frequency(9, 1.0));
    }

    #[test]
    fn test_count_limits_markers() {
        let data = Arc::new(ChannelData::new("voltage0"));
        let mut m = MarkerComponent::new(Arc::clone(&data), false, MarkerMode::SingleTone);
        push_spectrum(&data);
        m.refresh();
        let bins: Vec<_> = m.markers().iter().map(|mk| mk.index).collect();
        assert_eq!(bins.len(), 5);
        assert_eq!(&bins[..3], [Some(0), Some(4), Some(8)]);

        m.set_count(2);
        let names: Vec<&str> = m.markers().iter().map(|mk| mk.name.as_str()).collect();
        assert_eq!(names, ["DC", "Fund"]);
    }
}
