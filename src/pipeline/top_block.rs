//! Top block: owns the signal paths and drives build/teardown/start/stop.
//!
//! # Lifecycle
//!
//! ```text
//! register paths ──► build ──► start ──► stop ──► teardown
//!                      ▲                             │
//!                      └────────── rebuild ──────────┘
//! ```
//!
//! Sinks attach as [`FlowGraphObserver`]s and are notified synchronously
//! while the top block is locked. Lock order is top block, then sink, then
//! device; observers must never lock the top block from a callback.
//!
//! `suspend_build` / `unsuspend_build` count nested batches. Builds requested
//! while suspended are dropped; the final `unsuspend_build` rebuilds once.

use crate::backend::SharedDevice;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{ObserverId, SignalPathId};
use crate::pipeline::signal_path::SignalPath;
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Lifecycle hooks a sink receives from its top block.
pub trait FlowGraphObserver: Send + Sync {
    /// Graph built; `paths` are the enabled, registered paths.
    fn on_built(&self, paths: &[(SignalPathId, &SignalPath)]);
    fn on_teardown(&self);
    /// Streaming is about to start; allocate device buffers.
    fn on_started(&self) -> PipelineResult<()>;
    fn on_stopped(&self);
}

/// Notifications published by a top block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopBlockEvent {
    Built { paths: usize },
    TornDown,
    Started,
    Stopped,
}

/// Shared handle used by sinks and controllers.
pub type SharedTopBlock = Arc<Mutex<TopBlock>>;

/// Lock a shared top block, tolerating poison.
pub fn lock_top(top: &SharedTopBlock) -> MutexGuard<'_, TopBlock> {
    top.lock().unwrap_or_else(|e| e.into_inner())
}

/// Flow graph manager.
pub struct TopBlock {
    name: String,
    paths: Vec<Option<SignalPath>>,
    free_slots: Vec<u32>,
    observers: Vec<(ObserverId, Weak<dyn FlowGraphObserver>)>,
    next_observer: u32,
    suspend_count: u32,
    built: bool,
    running: bool,
    build_count: u64,
    subscribers: Vec<Sender<TopBlockEvent>>,
}

impl TopBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            paths: Vec::new(),
            free_slots: Vec::new(),
            observers: Vec::new(),
            next_observer: 0,
            suspend_count: 0,
            built: false,
            running: false,
            build_count: 0,
            subscribers: Vec::new(),
        }
    }

    pub fn shared(name: impl Into<String>) -> SharedTopBlock {
        Arc::new(Mutex::new(Self::new(name)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_count > 0
    }

    /// Number of builds performed so far.
    pub fn build_count(&self) -> u64 {
        self.build_count
    }

    pub fn subscribe(&mut self) -> Receiver<TopBlockEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: TopBlockEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ------------------------------------------------------------------
    // Signal paths
    // ------------------------------------------------------------------

    /// Add a path to the set considered at the next build.
    pub fn register_signal_path(&mut self, path: SignalPath) -> SignalPathId {
        tracing::debug!("{}: register signal path {}", self.name, path.name());
        match self.free_slots.pop() {
            Some(slot) => {
                self.paths[slot as usize] = Some(path);
                SignalPathId(slot)
            }
            None => {
                self.paths.push(Some(path));
                SignalPathId((self.paths.len() - 1) as u32)
            }
        }
    }

    /// Remove a path; returns it if it was registered.
    pub fn unregister_signal_path(&mut self, id: SignalPathId) -> Option<SignalPath> {
        let path = self.paths.get_mut(id.index())?.take()?;
        self.free_slots.push(id.0);
        tracing::debug!("{}: unregister signal path {}", self.name, path.name());
        Some(path)
    }

    pub fn path(&self, id: SignalPathId) -> PipelineResult<&SignalPath> {
        self.paths
            .get(id.index())
            .and_then(|p| p.as_ref())
            .ok_or(PipelineError::UnknownPath(id))
    }

    pub fn path_mut(&mut self, id: SignalPathId) -> PipelineResult<&mut SignalPath> {
        self.paths
            .get_mut(id.index())
            .and_then(|p| p.as_mut())
            .ok_or(PipelineError::UnknownPath(id))
    }

    pub fn paths(&self) -> impl Iterator<Item = (SignalPathId, &SignalPath)> {
        self.paths
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (SignalPathId(i as u32), p)))
    }

    pub fn path_count(&self) -> usize {
        self.paths.iter().filter(|p| p.is_some()).count()
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn attach(&mut self, observer: Weak<dyn FlowGraphObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        id
    }

    /// Drop an observer without touching the graph.
    pub fn detach(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        before != self.observers.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .iter()
            .filter(|(_, o)| o.strong_count() > 0)
            .count()
    }

    /// Detach a sink that is done with this graph.
    ///
    /// The last sink out stops and tears down the graph; otherwise the
    /// remaining sinks get a rebuild without the departed one.
    pub fn release(&mut self, id: ObserverId) -> PipelineResult<()> {
        if !self.detach(id) {
            return Ok(());
        }
        if self.observer_count() == 0 {
            self.stop();
            self.teardown();
            Ok(())
        } else {
            self.request_rebuild()
        }
    }

    fn live_observers(&mut self) -> Vec<Arc<dyn FlowGraphObserver>> {
        self.observers.retain(|(_, o)| o.strong_count() > 0);
        self.observers.iter().filter_map(|(_, o)| o.upgrade()).collect()
    }

    // ------------------------------------------------------------------
    // Build control
    // ------------------------------------------------------------------

    pub fn suspend_build(&mut self) {
        self.suspend_count += 1;
    }

    /// Leave one suspended batch; the outermost one rebuilds the graph.
    pub fn unsuspend_build(&mut self) -> PipelineResult<()> {
        if self.suspend_count == 0 {
            return Ok(());
        }
        self.suspend_count -= 1;
        if self.suspend_count == 0 {
            self.rebuild()
        } else {
            Ok(())
        }
    }

    /// Rebuild now, or let the enclosing batch do it.
    pub fn request_rebuild(&mut self) -> PipelineResult<()> {
        if self.is_suspended() {
            tracing::trace!("{}: rebuild deferred while suspended", self.name);
            return Ok(());
        }
        self.rebuild()
    }

    /// Connect every registered, enabled path to the attached sinks.
    pub fn build(&mut self) -> PipelineResult<()> {
        if self.is_suspended() {
            return Ok(());
        }
        let observers = self.live_observers();
        let enabled: Vec<(SignalPathId, &SignalPath)> =
            self.paths().filter(|(_, p)| p.is_enabled()).collect();
        let count = enabled.len();
        for observer in &observers {
            observer.on_built(&enabled);
        }
        self.built = true;
        self.build_count += 1;
        tracing::debug!("{}: built with {} signal paths", self.name, count);
        self.emit(TopBlockEvent::Built { paths: count });
        Ok(())
    }

    /// Disconnect everything. Safe to call when already torn down.
    pub fn teardown(&mut self) {
        if !self.built {
            return;
        }
        for observer in self.live_observers() {
            observer.on_teardown();
        }
        self.built = false;
        tracing::debug!("{}: torn down", self.name);
        self.emit(TopBlockEvent::TornDown);
    }

    /// Teardown then build, restarting streaming if it was running.
    pub fn rebuild(&mut self) -> PipelineResult<()> {
        let was_running = self.running;
        if was_running {
            self.stop();
        }
        self.teardown();
        self.build()?;
        if was_running {
            self.start()?;
        }
        Ok(())
    }

    /// Devices feeding the enabled paths, each listed once.
    pub fn devices(&self) -> Vec<SharedDevice> {
        let mut devices: Vec<SharedDevice> = Vec::new();
        for (_, path) in self.paths().filter(|(_, p)| p.is_enabled()) {
            if let Some(dev) = path.device() {
                if !devices.iter().any(|d| d.same_device(dev)) {
                    devices.push(dev.clone());
                }
            }
        }
        devices
    }

    // ------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------

    /// Start streaming. Every device is pinged first; an unreachable device
    /// leaves the graph stopped.
    pub fn start(&mut self) -> PipelineResult<()> {
        if self.running {
            return Ok(());
        }
        if !self.built {
            self.build()?;
        }
        for device in self.devices() {
            if let Err(e) = device.lock().ping() {
                tracing::warn!("{}: ping {} failed: {}", self.name, device.uri(), e);
                return Err(PipelineError::PingFailed {
                    uri: device.uri().to_string(),
                });
            }
        }

        let observers = self.live_observers();
        for (i, observer) in observers.iter().enumerate() {
            if let Err(e) = observer.on_started() {
                for started in &observers[..i] {
                    started.on_stopped();
                }
                tracing::error!("{}: start failed: {}", self.name, e);
                return Err(e);
            }
        }
        self.running = true;
        tracing::info!("{}: started", self.name);
        self.emit(TopBlockEvent::Started);
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        for observer in self.live_observers() {
            observer.on_stopped();
        }
        self.running = false;
        tracing::info!("{}: stopped", self.name);
        self.emit(TopBlockEvent::Stopped);
    }
}

impl std::fmt::Debug for TopBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopBlock")
            .field("name", &self.name)
            .field("paths", &self.path_count())
            .field("built", &self.built)
            .field("running", &self.running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockDataPattern, MockDevice};
    use crate::pipeline::block::ProcessingBlock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingObserver {
        built: AtomicUsize,
        last_paths: AtomicUsize,
        teardowns: AtomicUsize,
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start: bool,
    }

    impl FlowGraphObserver for CountingObserver {
        fn on_built(&self, paths: &[(SignalPathId, &SignalPath)]) {
            self.built.fetch_add(1, Ordering::SeqCst);
            self.last_paths.store(paths.len(), Ordering::SeqCst);
        }
        fn on_teardown(&self) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }
        fn on_started(&self) -> PipelineResult<()> {
            if self.fail_start {
                return Err(PipelineError::Device {
                    uri: "local:t".to_string(),
                    message: "no buffer".to_string(),
                });
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn on_stopped(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn enabled_path(name: &str, dev: &SharedDevice) -> SignalPath {
        let path = SignalPath::new(name)
            .with_block(ProcessingBlock::device_source(dev.clone(), "voltage0"));
        path.set_enabled(true);
        path
    }

    fn device() -> (SharedDevice, crate::backend::MockDeviceControl) {
        let mock = MockDevice::new("local:t", 10.0)
            .with_channel("voltage0", MockDataPattern::Constant(1.0));
        let control = mock.control();
        (SharedDevice::new(Box::new(mock)), control)
    }

    fn attach(top: &mut TopBlock, obs: &Arc<CountingObserver>) -> ObserverId {
        let dyn_obs: Arc<dyn FlowGraphObserver> = obs.clone();
        top.attach(Arc::downgrade(&dyn_obs))
    }

    #[test]
    fn test_suspended_batch_builds_once() {
        let (dev, _) = device();
        let mut top = TopBlock::new("adc");
        let obs = Arc::new(CountingObserver::default());
        attach(&mut top, &obs);

        top.suspend_build();
        for i in 0..5 {
            top.register_signal_path(enabled_path(&format!("adc_time_ch{}", i), &dev));
            top.request_rebuild().unwrap();
        }
        assert_eq!(top.build_count(), 0);
        top.unsuspend_build().unwrap();

        assert_eq!(top.build_count(), 1);
        assert_eq!(obs.built.load(Ordering::SeqCst), 1);
        assert_eq!(obs.last_paths.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_nested_suspend() {
        let mut top = TopBlock::new("adc");
        top.suspend_build();
        top.suspend_build();
        top.unsuspend_build().unwrap();
        assert_eq!(top.build_count(), 0);
        top.unsuspend_build().unwrap();
        assert_eq!(top.build_count(), 1);
        // Unbalanced resume is a no-op
        top.unsuspend_build().unwrap();
        assert_eq!(top.build_count(), 1);
    }

    #[test]
    fn test_register_does_not_build() {
        let (dev, _) = device();
        let mut top = TopBlock::new("adc");
        let id = top.register_signal_path(enabled_path("adc_time_voltage0", &dev));
        assert_eq!(top.build_count(), 0);
        assert!(top.unregister_signal_path(id).is_some());
        assert!(top.unregister_signal_path(id).is_none());
        assert!(matches!(top.path(id), Err(PipelineError::UnknownPath(_))));
    }

    #[test]
    fn test_disabled_paths_not_built() {
        let (dev, _) = device();
        let mut top = TopBlock::new("adc");
        let obs = Arc::new(CountingObserver::default());
        attach(&mut top, &obs);

        top.register_signal_path(enabled_path("adc_time_a", &dev));
        let b = top.register_signal_path(enabled_path("adc_time_b", &dev));
        top.path(b).unwrap().set_enabled(false);
        top.build().unwrap();
        assert_eq!(obs.last_paths.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut top = TopBlock::new("adc");
        let obs = Arc::new(CountingObserver::default());
        attach(&mut top, &obs);
        let rx = top.subscribe();

        top.build().unwrap();
        top.teardown();
        top.teardown();
        assert_eq!(obs.teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(rx.try_recv().unwrap(), TopBlockEvent::Built { paths: 0 });
        assert_eq!(rx.try_recv().unwrap(), TopBlockEvent::TornDown);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_start_fails_on_ping() {
        let (dev, control) = device();
        let mut top = TopBlock::new("adc");
        let obs = Arc::new(CountingObserver::default());
        attach(&mut top, &obs);
        top.register_signal_path(enabled_path("adc_time_voltage0", &dev));

        control.set_ping_failure(true);
        let err = top.start().unwrap_err();
        assert!(matches!(err, PipelineError::PingFailed { .. }));
        assert!(!top.is_running());
        assert_eq!(obs.starts.load(Ordering::SeqCst), 0);

        control.set_ping_failure(false);
        top.start().unwrap();
        assert!(top.is_running());
    }

    #[test]
    fn test_start_rolls_back_started_observers() {
        let mut top = TopBlock::new("adc");
        let ok = Arc::new(CountingObserver::default());
        let bad = Arc::new(CountingObserver {
            fail_start: true,
            ..CountingObserver::default()
        });
        attach(&mut top, &ok);
        attach(&mut top, &bad);

        assert!(top.start().is_err());
        assert!(!top.is_running());
        assert_eq!(ok.starts.load(Ordering::SeqCst), 1);
        assert_eq!(ok.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rebuild_while_running_restarts() {
        let mut top = TopBlock::new("adc");
        let obs = Arc::new(CountingObserver::default());
        attach(&mut top, &obs);
        top.start().unwrap();

        top.rebuild().unwrap();
        assert!(top.is_running());
        assert_eq!(obs.stops.load(Ordering::SeqCst), 1);
        assert_eq!(obs.starts.load(Ordering::SeqCst), 2);
        assert_eq!(obs.built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_release_last_observer_tears_down() {
        let mut top = TopBlock::new("adc");
        let a = Arc::new(CountingObserver::default());
        let b = Arc::new(CountingObserver::default());
        let ida = attach(&mut top, &a);
        let idb = attach(&mut top, &b);
        top.start().unwrap();

        top.release(ida).unwrap();
        assert!(top.is_running());
        assert_eq!(b.built.load(Ordering::SeqCst), 2);

        top.release(idb).unwrap();
        assert!(!top.is_running());
        assert!(!top.is_built());
    }

    #[test]
    fn test_dropped_observer_is_pruned() {
        let mut top = TopBlock::new("adc");
        {
            let obs = Arc::new(CountingObserver::default());
            attach(&mut top, &obs);
            assert_eq!(top.observer_count(), 1);
        }
        assert_eq!(top.observer_count(), 0);
        top.build().unwrap();
    }
}
