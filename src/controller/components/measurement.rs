//! Time-domain measurements of one channel, refreshed on every new frame.

use crate::analysis::{measure, CrossingLevel, MeasureKind, MeasureStats, Measurements};
use crate::controller::component::{Component, ComponentContext};
use crate::error::Result;
use crate::pipeline::ChannelData;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug)]
pub struct MeasurementComponent {
    name: String,
    channel: String,
    source: Arc<ChannelData>,
    crossing: CrossingLevel,
    shown: BTreeSet<MeasureKind>,
    tracked: BTreeSet<MeasureKind>,
    latest: Measurements,
    stats: BTreeMap<MeasureKind, MeasureStats>,
    /// Source frame count at the last refresh
    seen_frames: u64,
    enabled: bool,
}

impl MeasurementComponent {
    /// Nothing is shown until kinds are enabled.
    pub fn new(source: Arc<ChannelData>) -> Self {
        let channel = source.name().to_string();
        Self {
            name: format!("{} measurements", channel),
            channel,
            source,
            crossing: CrossingLevel::default(),
            shown: BTreeSet::new(),
            tracked: BTreeSet::new(),
            latest: Measurements::default(),
            stats: BTreeMap::new(),
            seen_frames: 0,
            enabled: true,
        }
    }

    /// Name of the measured channel
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn enable(&mut self, kind: MeasureKind) {
        self.shown.insert(kind);
    }

    pub fn disable(&mut self, kind: MeasureKind) {
        self.shown.remove(&kind);
        self.latest.retain(|k| k != kind);
    }

    pub fn enable_all(&mut self) {
        self.shown.extend(MeasureKind::all().iter().copied());
    }

    pub fn is_shown(&self, kind: MeasureKind) -> bool {
        self.shown.contains(&kind)
    }

    /// Start collecting statistics of `kind` from the next frame on.
    pub fn enable_stats(&mut self, kind: MeasureKind) {
        if self.tracked.insert(kind) {
            self.stats.remove(&kind);
        }
    }

    pub fn disable_stats(&mut self, kind: MeasureKind) {
        self.tracked.remove(&kind);
        self.stats.remove(&kind);
    }

    pub fn clear_stats(&mut self) {
        self.stats.clear();
    }

    pub fn stats(&self, kind: MeasureKind) -> Option<MeasureStats> {
        self.stats.get(&kind).copied()
    }

    pub fn crossing(&self) -> CrossingLevel {
        self.crossing
    }

    pub fn set_crossing(&mut self, crossing: CrossingLevel) {
        self.crossing = crossing;
    }

    /// Shown measurements of the last measured frame
    pub fn latest(&self) -> &Measurements {
        &self.latest
    }

    /// Measure the source's current frame if it is new. Returns whether a
    /// frame was measured.
    pub fn refresh(&mut self, sample_rate: f64) -> bool {
        let frames = self.source.frames();
        if frames == self.seen_frames {
            return false;
        }
        self.seen_frames = frames;
        if self.shown.is_empty() && self.tracked.is_empty() {
            return false;
        }

        let crossing = self.crossing;
        let all = self
            .source
            .with_data(|_, y| measure(y, sample_rate, crossing));
        for &kind in &self.tracked {
            if let Some(value) = all.get(kind) {
                self.stats.entry(kind).or_default().push(value);
            }
        }
        self.latest = all;
        let shown = &self.shown;
        self.latest.retain(|k| shown.contains(&k));
        true
    }
}

impl Component for MeasurementComponent {
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

    fn on_update(&mut self, ctx: &ComponentContext<'_>) {
        self.refresh(ctx.sink.sampling_info().sample_rate);
    }
}
