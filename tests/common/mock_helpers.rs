//! Mock construction helpers

use crossbeam_channel::{bounded, Receiver, Sender};
use scopy_acq::config::Preferences;
use scopy_acq::controller::{Component, ComponentContext};
use scopy_acq::Result;
use std::sync::{Arc, Mutex};

/// Create test channels with default size
pub fn create_test_channels<T, U>() -> (Sender<T>, Receiver<T>, Sender<U>, Receiver<U>) {
    let (tx1, rx1) = bounded(16);
    let (tx2, rx2) = bounded(16);
    (tx1, rx1, tx2, rx2)
}

/// Preferences that keep controller tests fast.
pub fn test_preferences() -> Preferences {
    Preferences {
        general_plot_target_fps: 1000.0,
        adc_default_buffer_size: 64,
        adc_default_plot_size: 64,
        ..Preferences::default()
    }
}

/// Shared log of lifecycle calls, e.g. `"start A"`.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Component that records its lifecycle calls.
pub struct RecordingComponent {
    name: String,
    enabled: bool,
    fail_start: bool,
    log: CallLog,
}

impl RecordingComponent {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            fail_start: false,
            log: Arc::clone(log),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_start = true;
        self
    }

    fn record(&self, call: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{} {}", call, self.name));
    }
}

impl Component for RecordingComponent {
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
        self.record("init");
        Ok(())
    }

    fn on_start(&mut self, _ctx: &ComponentContext<'_>) -> Result<()> {
        self.record("start");
        if self.fail_start {
            return Err(scopy_acq::AcqError::Device(format!("{} refused to start", self.name)));
        }
        Ok(())
    }

    fn on_stop(&mut self, _ctx: &ComponentContext<'_>) {
        self.record("stop");
    }

    fn on_deinit(&mut self, _ctx: &ComponentContext<'_>) {
        self.record("deinit");
    }
}
