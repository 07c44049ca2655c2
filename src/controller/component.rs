//! Component abstraction for instrument controllers.
//!
//! Two-layer design, as for flow-graph blocks:
//! - **`Component` trait** for components supplied from outside the crate
//!   (and test doubles).
//! - **`BuiltinComponent` enum** for the device and channel components the
//!   controller creates itself from tree nodes, and the tools (markers,
//!   measurements, XY) layered over channel data.
//!
//! `AnyComponent` wraps either so the controller drives both uniformly.
//! Controllers run `on_start` over their components in registration order
//! and `on_stop` in reverse.

use crate::config::{PreferenceChanged, Preferences};
use crate::error::Result;
use crate::pipeline::{ChannelData, DataProvider, SharedTopBlock};
use std::sync::Arc;

use super::components::{
    DeviceComponent, FftChannelComponent, ImportChannelComponent, MarkerComponent,
    MeasurementComponent, TimeChannelComponent, XyChannelComponent,
};

/// What a component sees of its controller during lifecycle hooks.
pub struct ComponentContext<'a> {
    /// Flow graph the instrument's signal paths are registered with
    pub top: &'a SharedTopBlock,
    /// The instrument's sink
    pub sink: &'a dyn DataProvider,
    pub prefs: &'a Preferences,
}

/// Lifecycle of one piece of an instrument.
pub trait Component: Send {
    fn name(&self) -> &str;

    /// Disabled components are skipped by `on_start`.
    fn enabled(&self) -> bool {
        true
    }

    fn set_enabled(&mut self, _enabled: bool) {}

    /// Called once when the component joins the controller.
    fn on_init(&mut self, _ctx: &ComponentContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_start(&mut self, ctx: &ComponentContext<'_>) -> Result<()>;

    fn on_stop(&mut self, ctx: &ComponentContext<'_>);

    /// Called once when the component leaves the controller.
    fn on_deinit(&mut self, _ctx: &ComponentContext<'_>) {}

    fn on_preference(&mut self, _change: &PreferenceChanged, _ctx: &ComponentContext<'_>) {}

    /// Called on started components after every channel received the
    /// latest frame.
    fn on_update(&mut self, _ctx: &ComponentContext<'_>) {}

    /// Plot data of channel components.
    fn channel_data(&self) -> Option<Arc<ChannelData>> {
        None
    }
}

/// Enum dispatch for the components the controller creates itself.
#[derive(Debug)]
pub enum BuiltinComponent {
    Device(DeviceComponent),
    TimeChannel(TimeChannelComponent),
    FftChannel(FftChannelComponent),
    ImportChannel(ImportChannelComponent),
    Measurement(MeasurementComponent),
    Markers(MarkerComponent),
    XyChannel(XyChannelComponent),
}

macro_rules! dispatch {
    ($self:expr, $c:ident => $body:expr) => {
        match $self {
            BuiltinComponent::Device($c) => $body,
            BuiltinComponent::TimeChannel($c) => $body,
            BuiltinComponent::FftChannel($c) => $body,
            BuiltinComponent::ImportChannel($c) => $body,
            BuiltinComponent::Measurement($c) => $body,
            BuiltinComponent::Markers($c) => $body,
            BuiltinComponent::XyChannel($c) => $body,
        }
    };
}

impl BuiltinComponent {
    pub fn name(&self) -> &str {
        dispatch!(self, c => c.name())
    }

    pub fn enabled(&self) -> bool {
        dispatch!(self, c => c.enabled())
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        dispatch!(self, c => c.set_enabled(enabled))
    }

    pub fn on_init(&mut self, ctx: &ComponentContext<'_>) -> Result<()> {
        dispatch!(self, c => c.on_init(ctx))
    }

    pub fn on_start(&mut self, ctx: &ComponentContext<'_>) -> Result<()> {
        dispatch!(self, c => c.on_start(ctx))
    }

    pub fn on_stop(&mut self, ctx: &ComponentContext<'_>) {
        dispatch!(self, c => c.on_stop(ctx))
    }

    pub fn on_deinit(&mut self, ctx: &ComponentContext<'_>) {
        dispatch!(self, c => c.on_deinit(ctx))
    }

    pub fn on_preference(&mut self, change: &PreferenceChanged, ctx: &ComponentContext<'_>) {
        dispatch!(self, c => c.on_preference(change, ctx))
    }

    pub fn on_update(&mut self, ctx: &ComponentContext<'_>) {
        dispatch!(self, c => c.on_update(ctx))
    }

    pub fn channel_data(&self) -> Option<Arc<ChannelData>> {
        dispatch!(self, c => c.channel_data())
    }
}

/// Either a builtin component or an external one.
pub enum AnyComponent {
    Builtin(BuiltinComponent),
    Plugin(Box<dyn Component>),
}

impl AnyComponent {
    pub fn name(&self) -> &str {
        match self {
            AnyComponent::Builtin(c) => c.name(),
            AnyComponent::Plugin(c) => c.name(),
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            AnyComponent::Builtin(c) => c.enabled(),
            AnyComponent::Plugin(c) => c.enabled(),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        match self {
            AnyComponent::Builtin(c) => c.set_enabled(enabled),
            AnyComponent::Plugin(c) => c.set_enabled(enabled),
        }
    }

    pub fn on_init(&mut self, ctx: &ComponentContext<'_>) -> Result<()> {
        match self {
            AnyComponent::Builtin(c) => c.on_init(ctx),
            AnyComponent::Plugin(c) => c.on_init(ctx),
        }
    }

    pub fn on_start(&mut self, ctx: &ComponentContext<'_>) -> Result<()> {
        match self {
            AnyComponent::Builtin(c) => c.on_start(ctx),
            AnyComponent::Plugin(c) => c.on_start(ctx),
        }
    }

    pub fn on_stop(&mut self, ctx: &ComponentContext<'_>) {
        match self {
            AnyComponent::Builtin(c) => c.on_stop(ctx),
            AnyComponent::Plugin(c) => c.on_stop(ctx),
        }
    }

    pub fn on_deinit(&mut self, ctx: &ComponentContext<'_>) {
        match self {
            AnyComponent::Builtin(c) => c.on_deinit(ctx),
            AnyComponent::Plugin(c) => c.on_deinit(ctx),
        }
    }

    pub fn on_preference(&mut self, change: &PreferenceChanged, ctx: &ComponentContext<'_>) {
        match self {
            AnyComponent::Builtin(c) => c.on_preference(change, ctx),
            AnyComponent::Plugin(c) => c.on_preference(change, ctx),
        }
    }

    pub fn on_update(&mut self, ctx: &ComponentContext<'_>) {
        match self {
            AnyComponent::Builtin(c) => c.on_update(ctx),
            AnyComponent::Plugin(c) => c.on_update(ctx),
        }
    }

    pub fn channel_data(&self) -> Option<Arc<ChannelData>> {
        match self {
            AnyComponent::Builtin(c) => c.channel_data(),
            AnyComponent::Plugin(c) => c.channel_data(),
        }
    }

    pub fn as_builtin(&self) -> Option<&BuiltinComponent> {
        match self {
            AnyComponent::Builtin(c) => Some(c),
            AnyComponent::Plugin(_) => None,
        }
    }

    pub fn as_builtin_mut(&mut self) -> Option<&mut BuiltinComponent> {
        match self {
            AnyComponent::Builtin(c) => Some(c),
            AnyComponent::Plugin(_) => None,
        }
    }
}

impl std::fmt::Debug for AnyComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyComponent::Builtin(c) => f.debug_tuple("Builtin").field(c).finish(),
            AnyComponent::Plugin(c) => f.debug_tuple("Plugin").field(&c.name()).finish(),
        }
    }
}
