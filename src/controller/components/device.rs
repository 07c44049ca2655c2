//! Device component: sample rate provider and refill timeout.

use crate::backend::SharedDevice;
use crate::config::{keys, PreferenceChanged};
use crate::controller::component::{Component, ComponentContext};
use crate::error::Result;

/// Wraps one device node of the instrument's subtree.
#[derive(Debug)]
pub struct DeviceComponent {
    name: String,
    device: SharedDevice,
    sample_rate: f64,
}

impl DeviceComponent {
    pub fn new(device: SharedDevice) -> Self {
        Self {
            name: device.uri().to_string(),
            device,
            sample_rate: 0.0,
        }
    }

    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    /// Sample rate read at the last init or start.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Read the sample rate back from the device.
    pub fn refresh_sample_rate(&mut self) -> f64 {
        self.sample_rate = self.device.lock().sample_rate();
        self.sample_rate
    }
}

impl Component for DeviceComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_init(&mut self, ctx: &ComponentContext<'_>) -> Result<()> {
        let mut dev = self.device.lock();
        dev.set_timeout(ctx.prefs.acq_timeout());
        self.sample_rate = dev.sample_rate();
        tracing::debug!("device {}: {} Hz", self.name, self.sample_rate);
        Ok(())
    }

    fn on_start(&mut self, ctx: &ComponentContext<'_>) -> Result<()> {
        let mut dev = self.device.lock();
        dev.set_timeout(ctx.prefs.acq_timeout());
        self.sample_rate = dev.sample_rate();
        Ok(())
    }

    fn on_stop(&mut self, _ctx: &ComponentContext<'_>) {}

    fn on_preference(&mut self, change: &PreferenceChanged, ctx: &ComponentContext<'_>) {
        if change.key == keys::ACQ_TIMEOUT_MS {
            self.device.lock().set_timeout(ctx.prefs.acq_timeout());
        }
    }
}
