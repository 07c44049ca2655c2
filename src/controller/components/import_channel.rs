//! Reference channel built from an import node.

use crate::acq_tree::ImportChannelNode;
use crate::controller::component::{Component, ComponentContext};
use crate::controller::id_alloc::PlotColor;
use crate::error::Result;
use crate::pipeline::ChannelData;
use std::sync::Arc;

/// Static curve; its data is copied in once at init.
#[derive(Debug)]
pub struct ImportChannelComponent {
    name: String,
    source: ImportChannelNode,
    data: Arc<ChannelData>,
    color: PlotColor,
    enabled: bool,
}

impl ImportChannelComponent {
    pub fn new(name: impl Into<String>, source: ImportChannelNode, color: PlotColor) -> Self {
        let name = name.into();
        Self {
            data: Arc::new(ChannelData::new(name.clone())),
            name,
            source,
            color,
            enabled: true,
        }
    }

    pub fn color(&self) -> PlotColor {
        self.color
    }
}

impl Component for ImportChannelComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn on_init(&mut self, _ctx: &ComponentContext<'_>) -> Result<()> {
        // The node may be reclaimed later; keep a private copy.
        let len = self.source.y.len();
        self.data
            .on_new_data(&self.source.x, &self.source.y, len, true);
        Ok(())
    }

    fn on_start(&mut self, _ctx: &ComponentContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_stop(&mut self, _ctx: &ComponentContext<'_>) {}

    fn channel_data(&self) -> Option<Arc<ChannelData>> {
        Some(Arc::clone(&self.data))
    }
}
