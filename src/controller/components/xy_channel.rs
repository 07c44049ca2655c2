//! XY channel: one time channel's samples plotted against another's.

use crate::controller::component::{Component, ComponentContext};
use crate::controller::id_alloc::PlotColor;
use crate::error::Result;
use crate::pipeline::ChannelData;
use std::sync::Arc;

#[derive(Debug)]
pub struct XyChannelComponent {
    name: String,
    x_source: Arc<ChannelData>,
    y_source: Arc<ChannelData>,
    data: Arc<ChannelData>,
    /// Source frame counts at the last refresh
    seen_frames: (u64, u64),
    color: PlotColor,
    enabled: bool,
}

impl XyChannelComponent {
    pub fn new(x_source: Arc<ChannelData>, y_source: Arc<ChannelData>, color: PlotColor) -> Self {
        let name = format!("{}-{}", x_source.name(), y_source.name());
        Self {
            data: Arc::new(ChannelData::new(name.clone())),
            name,
            x_source,
            y_source,
            seen_frames: (0, 0),
            color,
            enabled: true,
        }
    }

    pub fn color(&self) -> PlotColor {
        self.color
    }

    /// Channel names of the X and Y sources
    pub fn sources(&self) -> (&str, &str) {
        (self.x_source.name(), self.y_source.name())
    }

    /// Pair the sources' current frames point by point if either changed.
    pub fn refresh(&mut self) -> bool {
        let frames = (self.x_source.frames(), self.y_source.frames());
        if frames == self.seen_frames {
            return false;
        }
        self.seen_frames = frames;

        let x = self.x_source.with_data(|_, y| y.to_vec());
        let y = self.y_source.with_data(|_, y| y.to_vec());
        let size = x.len().min(y.len());
        let (x, y): (Arc<[f32]>, Arc<[f32]>) = (x.into(), y.into());
        self.data.on_new_data(&x, &y, size, false);
        true
    }
}

impl Component for XyChannelComponent {
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

    fn channel_data(&self) -> Option<Arc<ChannelData>> {
        Some(Arc::clone(&self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(data: &ChannelData, y: Vec<f32>) {
        let x: Vec<f32> = (0..y.len()).map(|i| i as f32).collect();
        let size = y.len();
        let (x, y): (Arc<[f32]>, Arc<[f32]>) = (x.into(), y.into());
        data.on_new_data(&x, &y, size, true);
    }

    #[test]
    fn test_pairs_samples_of_both_sources() {
        let a = Arc::new(ChannelData::new("voltage0"));
        let b = Arc::new(ChannelData::new("voltage1"));
        let mut xy = XyChannelComponent::new(Arc::clone(&a), Arc::clone(&b), PlotColor(0, 0, 0));
        assert_eq!(xy.name(), "voltage0-voltage1");
        assert!(!xy.refresh());

        push(&a, vec![1.0, 2.0, 3.0]);
        push(&b, vec![-1.0, -2.0, -3.0, -4.0]);
        assert!(xy.refresh());
        let (x, y) = xy.channel_data().unwrap().to_vecs();
        // Shorter source bounds the curve
        assert_eq!(x, vec![1.0, 2.0, 3.0]);
        assert_eq!(y, vec![-1.0, -2.0, -3.0]);
        assert!(!xy.refresh());
    }

    #[test]
    fn test_follows_either_source() {
        let a = Arc::new(ChannelData::new("voltage0"));
        let b = Arc::new(ChannelData::new("voltage1"));
        let mut xy = XyChannelComponent::new(Arc::clone(&a), Arc::clone(&b), PlotColor(0, 0, 0));
        push(&a, vec![1.0]);
        push(&b, vec![2.0]);
        xy.refresh();

        push(&b, vec![5.0]);
        assert!(xy.refresh());
        assert_eq!(xy.channel_data().unwrap().to_vecs().1, vec![5.0]);
    }
}
