//! Acquisition controller
//!
//! One controller drives one instrument: it owns the instrument's sink, the
//! components built from the acquisition tree, the device resource locks and
//! the refill/redraw cycle.
//!
//! ```text
//!            start()                      stop() / finished / disarm
//!   Idle ─────────────► Running ──────────────────────────────► Idle
//!                        │  ▲
//!          pause_updates │  │ resume_updates / sink Ready
//!                        ▼  │
//!                  UpdatesStopped ⇄ UpdatesRunning
//! ```
//!
//! # Refill / redraw decoupling
//!
//! Refills run on a [`RefillWorker`] thread. The controller thread calls
//! [`AcquisitionController::poll`] on every tick; a finished refill marks a
//! frame as ready, and the next tick past the redraw deadline hands it to the
//! channels and the plot. Only then is the next refill dispatched, so at most
//! one refill per instrument is ever in flight and a slow device lowers the
//! frame rate instead of queueing work.

use crate::acq_tree::{
    lock_tree, AcqNodeId, AcqNodeKind, ImportChannelNode, SharedAcqTree, TreeEventKind,
    TreeSubscription,
};
use crate::analysis::{MarkerMode, WindowFunction};
use crate::backend::SharedDevice;
use crate::config::{keys, ChannelSession, InstrumentSession, PreferenceChanged, Preferences};
use crate::error::{AcqError, Result};
use crate::pipeline::{
    complex_channel_pair, lock_top, ChannelData, DataProvider, FreqSink, PipelineError,
    SharedTopBlock, SinkEvent, SinkState, TimeSink,
};
use crate::sync::{lock_sync, SharedSyncController};
use crate::types::{InstrumentKind, YMode};
use crossbeam_channel::{Receiver, Sender};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::component::{AnyComponent, BuiltinComponent, Component, ComponentContext};
use super::components::{
    DeviceComponent, FftChannelComponent, FftSource, ImportChannelComponent, MarkerComponent,
    MeasurementComponent, TimeChannelComponent, XyChannelComponent,
};
use super::id_alloc::{ComponentId, IdAllocator};
use super::plot::PlotManager;
use super::refill::{RefillMessage, RefillWorker};
use super::resource_lock::ResourceManager;

/// Name prefix of reference channels created by [`AcquisitionController::snapshot`]
pub const SNAPSHOT_PREFIX: &str = "REF - ";

/// Notifications for whoever owns the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Started,
    Stopped,
    /// A device failed; the connection must be re-established
    RequestDisconnect { uri: String },
    /// A frame was handed to the channels
    Replotted { frame: u64 },
}

/// Builds the lifecycle context from disjoint fields so the component list
/// can be borrowed mutably alongside it.
macro_rules! context {
    ($self:ident) => {
        ComponentContext {
            top: &$self.top,
            sink: &*$self.sink,
            prefs: &$self.prefs,
        }
    };
}

#[derive(Debug)]
struct ComponentEntry {
    id: ComponentId,
    /// Tree nodes the component was built from; empty for plugins
    nodes: Vec<AcqNodeId>,
    /// Channels a tool reads from; removing one removes the tool
    sources: Vec<ComponentId>,
    component: AnyComponent,
    started: bool,
}

#[derive(Debug)]
struct UpdateState {
    running: bool,
    /// Held across sink Ready events; set by `pause_updates`
    paused: bool,
    /// Tags refill requests; bumped whenever the cycle is cancelled
    generation: u64,
    in_flight: bool,
    frame_ready: bool,
    interval: Duration,
    next_update: Option<Instant>,
    frames: u64,
}

pub struct AcquisitionController {
    name: String,
    kind: InstrumentKind,
    tree: SharedAcqTree,
    top_node: AcqNodeId,
    top: SharedTopBlock,
    sink: Arc<dyn DataProvider>,
    prefs: Preferences,
    pref_rx: Option<Receiver<PreferenceChanged>>,
    resources: ResourceManager,
    sync: Option<SharedSyncController>,
    sync_enabled: bool,
    plot: Option<Box<dyn PlotManager>>,

    ids: IdAllocator,
    components: Vec<ComponentEntry>,
    /// Frequency instruments: channel arrivals per device URI, for I/Q pairing
    arrivals: HashMap<String, Vec<(AcqNodeId, String)>>,
    complex_mode: Arc<AtomicBool>,
    sample_rate_override: Option<f64>,
    fft_window: WindowFunction,
    fft_averaging: usize,
    power_offset: f64,

    /// Resource locks as (uri, owner)
    held: Vec<(String, String)>,
    started: bool,
    updates: UpdateState,

    worker: RefillWorker,
    sink_events: Receiver<SinkEvent>,
    tree_events: TreeSubscription,
    subscribers: Vec<Sender<ControllerEvent>>,
}

impl AcquisitionController {
    /// Create the controller for instrument `name` on the top block at
    /// `top_node`, and build components for every node already in the tree.
    pub fn new(
        name: impl Into<String>,
        kind: InstrumentKind,
        tree: SharedAcqTree,
        top_node: AcqNodeId,
        prefs: Preferences,
        resources: ResourceManager,
    ) -> Result<Self> {
        let name = name.into();
        let (top, tree_events, existing) = {
            let mut t = lock_tree(&tree);
            let top = match t.get(top_node).map(|n| &n.kind) {
                Some(AcqNodeKind::TopBlock(top)) => top.clone(),
                _ => {
                    return Err(AcqError::Config(format!(
                        "{:?} is not a top block node",
                        top_node
                    )))
                }
            };
            let root = t.root();
            let subscription = t.subscribe(root);
            (top, subscription, t.breadth_first(root))
        };

        let sink: Arc<dyn DataProvider> = match kind {
            InstrumentKind::Time => TimeSink::new(name.clone(), top.clone()),
            InstrumentKind::Frequency => FreqSink::new(name.clone(), top.clone()),
        };
        let mut info = sink.sampling_info();
        info.buffer_size = prefs.adc_default_buffer_size;
        info.plot_size = prefs.adc_default_plot_size;
        sink.set_sampling_info(info)?;
        let sink_events = sink.subscribe();
        let worker = RefillWorker::spawn(Arc::clone(&sink));

        let updates = UpdateState {
            running: false,
            paused: false,
            generation: 0,
            in_flight: false,
            frame_ready: false,
            interval: prefs.frame_interval(),
            next_update: None,
            frames: 0,
        };

        let mut controller = Self {
            name,
            kind,
            tree,
            top_node,
            top,
            sink,
            prefs,
            pref_rx: None,
            resources,
            sync: None,
            sync_enabled: false,
            plot: None,
            ids: IdAllocator::new(),
            components: Vec::new(),
            arrivals: HashMap::new(),
            complex_mode: Arc::new(AtomicBool::new(false)),
            sample_rate_override: None,
            fft_window: WindowFunction::default(),
            fft_averaging: 1,
            power_offset: 0.0,
            held: Vec::new(),
            started: false,
            updates,
            worker,
            sink_events,
            tree_events,
            subscribers: Vec::new(),
        };
        for node in existing {
            controller.add_node(node);
        }
        tracing::info!(
            "{}: created with {} components",
            controller.name,
            controller.components.len()
        );
        Ok(controller)
    }

    /// Follow preference changes from a [`crate::config::PreferenceStore`].
    pub fn with_preferences(mut self, changes: Receiver<PreferenceChanged>) -> Self {
        self.pref_rx = Some(changes);
        self
    }

    pub fn with_plot(mut self, plot: Box<dyn PlotManager>) -> Self {
        self.plot = Some(plot);
        self
    }

    /// Join a sync cluster; the controller enters sync mode.
    pub fn with_sync(mut self, sync: SharedSyncController) -> Result<Self> {
        self.sync = Some(sync);
        self.set_sync_mode(true)?;
        Ok(self)
    }

    // ==================== Accessors ====================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    pub fn sink(&self) -> &Arc<dyn DataProvider> {
        &self.sink
    }

    pub fn top(&self) -> &SharedTopBlock {
        &self.top
    }

    pub fn top_node(&self) -> AcqNodeId {
        self.top_node
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn updates_running(&self) -> bool {
        self.updates.running
    }

    /// Current redraw interval.
    pub fn update_interval(&self) -> Duration {
        self.updates.interval
    }

    /// Frames handed to the channels since creation.
    pub fn frames(&self) -> u64 {
        self.updates.frames
    }

    pub fn complex_mode(&self) -> bool {
        self.complex_mode.load(Ordering::Acquire)
    }

    pub fn sync_mode(&self) -> bool {
        self.sync_enabled
    }

    pub fn sample_rate_override(&self) -> Option<f64> {
        self.sample_rate_override
    }

    pub fn subscribe(&mut self) -> Receiver<ControllerEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.components.iter().map(|e| e.id).collect()
    }

    pub fn component(&self, id: ComponentId) -> Option<&AnyComponent> {
        self.entry(id).map(|e| &e.component)
    }

    /// First component named `name`.
    pub fn find_component(&self, name: &str) -> Option<ComponentId> {
        self.components
            .iter()
            .find(|e| e.component.name() == name)
            .map(|e| e.id)
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Plot data of every enabled channel component.
    pub fn curves(&self) -> Vec<Arc<ChannelData>> {
        self.components
            .iter()
            .filter(|e| e.component.enabled())
            .filter_map(|e| e.component.channel_data())
            .collect()
    }

    fn entry(&self, id: ComponentId) -> Option<&ComponentEntry> {
        self.components.iter().find(|e| e.id == id)
    }

    fn entry_mut(&mut self, id: ComponentId) -> Option<&mut ComponentEntry> {
        self.components.iter_mut().find(|e| e.id == id)
    }

    fn emit(&mut self, event: ControllerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock_owner(&self) -> String {
        match (&self.sync, self.sync_enabled) {
            (Some(sync), true) => lock_sync(sync).owner_token().to_string(),
            _ => self.name.clone(),
        }
    }

    fn device_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = Vec::new();
        for entry in &self.components {
            if let Some(BuiltinComponent::Device(d)) = entry.component.as_builtin() {
                let uri = d.device().uri().to_string();
                if !uris.contains(&uri) {
                    uris.push(uri);
                }
            }
        }
        uris
    }

    // ==================== Start / Stop ====================

    /// Lock the instrument's devices and start capturing.
    ///
    /// On failure the controller is left idle with every lock released; a
    /// device failure also emits [`ControllerEvent::RequestDisconnect`].
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        // Lifecycle events left over from the previous run must not be read
        // as belonging to this one.
        self.drain_sink_events();

        let owner = self.lock_owner();
        let uris = self.device_uris();
        for uri in &uris {
            if let Err(e) = self.resources.try_lock(uri, &owner) {
                tracing::warn!("{}: cannot start: {}", self.name, e);
                self.release_resources();
                return Err(e);
            }
            self.held.push((uri.clone(), owner.clone()));
        }

        if let Err(e) = self.start_capture() {
            tracing::error!("{}: start failed: {}", self.name, e);
            self.teardown_capture();
            let fallback = self.held.first().map(|(uri, _)| uri.clone());
            self.release_resources();
            if e.is_fatal_to_capture() {
                if let Some(uri) = failing_uri(&e).or(fallback) {
                    self.emit(ControllerEvent::RequestDisconnect { uri });
                }
            }
            return Err(e);
        }

        self.started = true;
        tracing::info!("{}: started", self.name);
        self.emit(ControllerEvent::Started);
        Ok(())
    }

    /// Stop capturing and release the device locks. No-op when idle.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.teardown_capture();
        self.release_resources();
        self.started = false;
        tracing::info!("{}: stopped", self.name);
        self.emit(ControllerEvent::Stopped);
    }

    fn start_capture(&mut self) -> Result<()> {
        self.refresh_sample_rate()?;
        let armed = self.arm_sink();

        lock_top(&self.top).suspend_build();
        let started = self.start_components();
        let rebuilt = lock_top(&self.top).unsuspend_build();
        started?;
        rebuilt?;

        // A pending sync member waits for the last member to start the graph.
        if armed {
            lock_top(&self.top).start()?;
        }
        Ok(())
    }

    /// Run `on_start` over the enabled components in registration order.
    fn start_components(&mut self) -> Result<()> {
        let ctx = context!(self);
        for entry in self.components.iter_mut() {
            if !entry.component.enabled() || entry.started {
                continue;
            }
            entry.component.on_start(&ctx)?;
            entry.started = true;
        }
        Ok(())
    }

    /// Undo everything `start_capture` did; safe on a partial start.
    fn teardown_capture(&mut self) {
        self.stop_updates();
        lock_top(&self.top).suspend_build();
        {
            let ctx = context!(self);
            for entry in self.components.iter_mut().rev() {
                if entry.started {
                    entry.component.on_stop(&ctx);
                    entry.started = false;
                }
            }
        }
        self.disarm_sink();
        if let Err(e) = lock_top(&self.top).unsuspend_build() {
            tracing::warn!("{}: rebuild after stop failed: {}", self.name, e);
        }
    }

    fn release_resources(&mut self) {
        for (uri, owner) in self.held.drain(..) {
            self.resources.unlock(&uri, &owner);
        }
    }

    /// Returns false while the sync cluster is still waiting for members.
    fn arm_sink(&self) -> bool {
        match (&self.sync, self.sync_enabled) {
            (Some(sync), true) => lock_sync(sync).arm(&self.name),
            _ => {
                self.sink.arm();
                true
            }
        }
    }

    fn disarm_sink(&self) {
        match (&self.sync, self.sync_enabled) {
            (Some(sync), true) => lock_sync(sync).disarm(&self.name),
            _ => self.sink.disarm(),
        }
    }

    /// Push the override or the first device's rate into the sink.
    fn refresh_sample_rate(&mut self) -> Result<()> {
        let rate = match self.sample_rate_override {
            Some(rate) => Some(rate),
            None => self.components.iter_mut().find_map(|e| {
                match e.component.as_builtin_mut() {
                    Some(BuiltinComponent::Device(d)) => Some(d.refresh_sample_rate()),
                    _ => None,
                }
            }),
        };
        let Some(rate) = rate.filter(|r| *r > 0.0) else {
            return Ok(());
        };
        let mut info = self.sink.sampling_info();
        if info.sample_rate != rate {
            info.sample_rate = rate;
            self.sink.set_sampling_info(info)?;
        }
        Ok(())
    }

    /// Bring started flags in line with enabled flags. The caller holds a
    /// suspended build.
    fn reconcile_components(&mut self) {
        let ctx = context!(self);
        for entry in self.components.iter_mut() {
            let enabled = entry.component.enabled();
            if enabled && !entry.started {
                match entry.component.on_start(&ctx) {
                    Ok(()) => entry.started = true,
                    Err(e) => tracing::warn!("{}: {}", entry.component.name(), e),
                }
            } else if !enabled && entry.started {
                entry.component.on_stop(&ctx);
                entry.started = false;
            }
        }
    }

    // ==================== Updates ====================

    /// Start the redraw cycle: one synchronous update, then refills.
    pub fn start_updates(&mut self) {
        self.updates.interval = self.prefs.frame_interval();
        self.updates.generation += 1;
        self.updates.running = true;
        self.updates.in_flight = false;
        self.updates.frame_ready = false;
        tracing::debug!(
            "{}: updates every {:?}",
            self.name,
            self.updates.interval
        );
        self.update();
        self.updates.next_update = Some(Instant::now() + self.updates.interval);
        self.dispatch_refill();
    }

    /// Cancel the cycle. A refill already running completes on the worker
    /// and its frame is dropped.
    pub fn stop_updates(&mut self) {
        if self.updates.running {
            tracing::debug!("{}: updates stopped", self.name);
        }
        self.updates.running = false;
        self.updates.generation += 1;
        self.updates.in_flight = false;
        self.updates.frame_ready = false;
        self.updates.next_update = None;
    }

    /// Stop redrawing without stopping the capture.
    pub fn pause_updates(&mut self) {
        self.updates.paused = true;
        self.stop_updates();
    }

    pub fn resume_updates(&mut self) {
        self.updates.paused = false;
        if self.started && !self.updates.running && self.sink.state() == SinkState::Capturing {
            self.start_updates();
        }
    }

    fn dispatch_refill(&mut self) {
        if !self.updates.running || self.updates.in_flight || self.updates.frame_ready {
            return;
        }
        if self.worker.request(self.updates.generation) {
            self.updates.in_flight = true;
        }
    }

    /// Hand the latest frame to the channels, refresh the tools over them
    /// and replot.
    fn update(&mut self) {
        self.sink.set_data(false);
        self.updates.frames += 1;
        let frame = self.updates.frames;
        {
            let ctx = context!(self);
            for entry in self.components.iter_mut().filter(|e| e.started) {
                entry.component.on_update(&ctx);
            }
        }

        let curves = self.curves();
        if let Some(plot) = self.plot.as_mut() {
            plot.replot(&curves);
        }
        self.emit(ControllerEvent::Replotted { frame });

        if self.sink.finished() {
            tracing::info!("{}: single shot complete", self.name);
            self.stop();
        }
    }

    // ==================== Event loop ====================

    /// One scheduler tick. Returns the number of messages handled.
    pub fn poll(&mut self) -> usize {
        self.poll_at(Instant::now())
    }

    /// [`Self::poll`] with an explicit clock.
    pub fn poll_at(&mut self, now: Instant) -> usize {
        let mut handled = self.drain_preferences();
        handled += self.drain_worker();
        handled += self.drain_sink_events();
        handled += self.drain_tree_events();

        if self.updates.running
            && self.updates.frame_ready
            && self.updates.next_update.map_or(true, |t| now >= t)
        {
            self.updates.frame_ready = false;
            self.update();
            self.updates.next_update = Some(now + self.updates.interval);
        }
        self.dispatch_refill();
        handled
    }

    fn drain_preferences(&mut self) -> usize {
        let changes: Vec<PreferenceChanged> = match &self.pref_rx {
            Some(rx) => rx.try_iter().collect(),
            None => return 0,
        };
        for change in &changes {
            if let Err(e) = self.prefs.apply_change(&change.key, &change.value) {
                tracing::warn!("{}: ignoring preference {}: {}", self.name, change.key, e);
                continue;
            }
            if change.key == keys::PLOT_TARGET_FPS {
                self.updates.interval = self.prefs.frame_interval();
                tracing::debug!("{}: redraw interval {:?}", self.name, self.updates.interval);
            }
            let ctx = context!(self);
            for entry in self.components.iter_mut() {
                entry.component.on_preference(change, &ctx);
            }
        }
        changes.len()
    }

    fn drain_worker(&mut self) -> usize {
        let mut handled = 0;
        while let Some(message) = self.worker.try_recv() {
            handled += 1;
            self.handle_refill_message(message);
        }
        handled
    }

    fn handle_refill_message(&mut self, message: RefillMessage) {
        if message.generation() != self.updates.generation {
            tracing::trace!("{}: dropping stale refill result", self.name);
            return;
        }
        self.updates.in_flight = false;
        match message {
            RefillMessage::FrameReady {
                samples, elapsed, ..
            } => {
                tracing::trace!("{}: {} samples in {:?}", self.name, samples, elapsed);
                self.updates.frame_ready = true;
            }
            // Any refill failure ends the capture; only device failures name
            // a connection to drop.
            RefillMessage::RefillFailed { uri, error, .. } => {
                tracing::error!("{}: refill failed: {}", self.name, error);
                self.stop();
                if let Some(uri) = uri {
                    self.emit(ControllerEvent::RequestDisconnect { uri });
                }
            }
        }
    }

    fn drain_sink_events(&mut self) -> usize {
        let events: Vec<SinkEvent> = self.sink_events.try_iter().collect();
        for event in &events {
            self.handle_sink_event(event);
        }
        events.len()
    }

    fn handle_sink_event(&mut self, event: &SinkEvent) {
        match event {
            SinkEvent::Ready => {
                if self.started && !self.updates.running && !self.updates.paused {
                    self.start_updates();
                }
            }
            SinkEvent::Finished => {
                // The finishing frame is still plotted; update() stops.
                tracing::debug!("{}: sink finished", self.name);
            }
            SinkEvent::Disarmed => {
                // A reconfigure rearms synchronously; only a disarm from the
                // sync cluster leaves the sink disarmed.
                if self.started && self.sink.state() == SinkState::Disarmed {
                    tracing::info!("{}: disarmed by sync cluster", self.name);
                    self.stop();
                }
            }
            SinkEvent::RequestBufferSize(size) => {
                if let Err(e) = self.sink.set_buffer_size(*size) {
                    tracing::warn!("{}: buffer size {}: {}", self.name, size, e);
                }
            }
            SinkEvent::RequestSingleShot(single_shot) => {
                if let Err(e) = self.sink.set_single_shot(*single_shot) {
                    tracing::warn!("{}: single shot: {}", self.name, e);
                }
            }
            SinkEvent::Armed | SinkEvent::SamplingInfoChanged { .. } => {
                tracing::trace!("{}: {:?}", self.name, event);
            }
        }
    }

    fn drain_tree_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.tree_events.try_recv() {
            match event.kind {
                TreeEventKind::NewChild => self.add_node(event.node),
                TreeEventKind::Deleted => self.remove_node(event.node),
            }
            self.tree_events.ack(&event);
            handled += 1;
        }
        if handled > 0 {
            let freed = lock_tree(&self.tree).reclaim();
            if freed > 0 {
                tracing::debug!("{}: reclaimed {} tree nodes", self.name, freed);
            }
        }
        handled
    }

    // ==================== Components ====================

    /// Create the component for a tree node, if the node is of interest.
    fn add_node(&mut self, node: AcqNodeId) {
        if self.components.iter().any(|e| e.nodes.contains(&node)) {
            return;
        }
        let (name, kind, under_top) = {
            let tree = lock_tree(&self.tree);
            if tree.is_retired(node) {
                return;
            }
            let Some(n) = tree.get(node) else {
                return;
            };
            (
                n.name.clone(),
                n.kind.clone(),
                tree.ancestors(node).contains(&self.top_node),
            )
        };

        match kind {
            AcqNodeKind::DeviceSource(device) if under_top => {
                let component = BuiltinComponent::Device(DeviceComponent::new(device));
                self.insert_component(vec![node], AnyComponent::Builtin(component));
            }
            AcqNodeKind::FloatChannel(channel) if under_top => match self.kind {
                InstrumentKind::Time => {
                    let color = self.ids.next_color();
                    let component = TimeChannelComponent::new(&self.name, &channel, color);
                    self.insert_component(
                        vec![node],
                        AnyComponent::Builtin(BuiltinComponent::TimeChannel(component)),
                    );
                }
                InstrumentKind::Frequency => {
                    let source = FftSource::Real {
                        channel: channel.info.name.clone(),
                    };
                    self.add_fft_component(vec![node], channel.device.clone(), source);
                    self.track_arrival(node, channel.device, channel.info.name);
                }
            },
            AcqNodeKind::ImportChannel(data) => {
                let color = self.ids.next_color();
                let component = ImportChannelComponent::new(name, data, color);
                self.insert_component(
                    vec![node],
                    AnyComponent::Builtin(BuiltinComponent::ImportChannel(component)),
                );
            }
            _ => {}
        }
    }

    /// Every second channel of a device is paired with the one before it
    /// into a complex channel.
    fn track_arrival(&mut self, node: AcqNodeId, device: SharedDevice, channel: String) {
        let arrivals = self
            .arrivals
            .entry(device.uri().to_string())
            .or_default();
        arrivals.push((node, channel));
        if arrivals.len() % 2 != 0 {
            return;
        }
        let names: Vec<String> = arrivals.iter().map(|(_, n)| n.clone()).collect();
        let nodes: Vec<AcqNodeId> = arrivals[arrivals.len() - 2..]
            .iter()
            .map(|(id, _)| *id)
            .collect();
        if let Some(pair) = complex_channel_pair(&names) {
            tracing::debug!("{}: complex channel {}", self.name, pair.name());
            self.add_fft_component(nodes, device, FftSource::Complex(pair));
        }
    }

    fn add_fft_component(&mut self, nodes: Vec<AcqNodeId>, device: SharedDevice, source: FftSource) {
        let color = self.ids.next_color();
        let component = FftChannelComponent::new(
            &self.name,
            device,
            source,
            Arc::clone(&self.complex_mode),
            color,
        );
        component.set_window(self.fft_window);
        component.set_averaging(self.fft_averaging);
        component.set_power_offset(self.power_offset);
        self.insert_component(
            nodes,
            AnyComponent::Builtin(BuiltinComponent::FftChannel(component)),
        );
    }

    /// Initialize and register a component; a running instrument starts it
    /// right away.
    fn insert_component(
        &mut self,
        nodes: Vec<AcqNodeId>,
        mut component: AnyComponent,
    ) -> Option<ComponentId> {
        {
            let ctx = context!(self);
            if let Err(e) = component.on_init(&ctx) {
                tracing::warn!("{}: dropping {}: {}", self.name, component.name(), e);
                return None;
            }
        }
        let id = self.ids.next_id();
        tracing::debug!("{}: added {} as {:?}", self.name, component.name(), id);
        self.components.push(ComponentEntry {
            id,
            nodes,
            sources: Vec::new(),
            component,
            started: false,
        });

        if self.started {
            lock_top(&self.top).suspend_build();
            self.reconcile_components();
            if let Err(e) = lock_top(&self.top).unsuspend_build() {
                tracing::warn!("{}: rebuild failed: {}", self.name, e);
            }
        }
        Some(id)
    }

    /// Drop the components built from `node` or anything below it.
    fn remove_node(&mut self, node: AcqNodeId) {
        let gone: HashSet<AcqNodeId> = lock_tree(&self.tree)
            .breadth_first(node)
            .into_iter()
            .collect();
        let ids: Vec<ComponentId> = self
            .components
            .iter()
            .filter(|e| e.nodes.iter().any(|n| gone.contains(n)))
            .map(|e| e.id)
            .collect();
        for arrivals in self.arrivals.values_mut() {
            arrivals.retain(|(n, _)| !gone.contains(n));
        }
        for id in ids {
            self.remove_component(id);
        }
    }

    /// Add an externally supplied component.
    pub fn add_component(&mut self, component: Box<dyn Component>) -> Option<ComponentId> {
        self.insert_component(Vec::new(), AnyComponent::Plugin(component))
    }

    /// Stop, deinit and drop a component. Returns false for unknown ids.
    pub fn remove_component(&mut self, id: ComponentId) -> bool {
        let Some(pos) = self.components.iter().position(|e| e.id == id) else {
            return false;
        };
        lock_top(&self.top).suspend_build();
        let mut entry = self.components.remove(pos);
        {
            let ctx = context!(self);
            if entry.started {
                entry.component.on_stop(&ctx);
            }
            entry.component.on_deinit(&ctx);
        }
        if let Err(e) = lock_top(&self.top).unsuspend_build() {
            tracing::warn!("{}: rebuild failed: {}", self.name, e);
        }
        tracing::debug!("{}: removed {}", self.name, entry.component.name());

        let dependents: Vec<ComponentId> = self
            .components
            .iter()
            .filter(|e| e.sources.contains(&id))
            .map(|e| e.id)
            .collect();
        for dependent in dependents {
            self.remove_component(dependent);
        }
        true
    }

    // ==================== Channel tools ====================

    /// Register a tool reading from `sources`.
    fn insert_tool(
        &mut self,
        sources: Vec<ComponentId>,
        component: BuiltinComponent,
    ) -> Result<ComponentId> {
        let name = component.name().to_string();
        let id = self
            .insert_component(Vec::new(), AnyComponent::Builtin(component))
            .ok_or_else(|| AcqError::Config(format!("{}: could not add {}", self.name, name)))?;
        if let Some(entry) = self.entry_mut(id) {
            entry.sources = sources;
        }
        Ok(id)
    }

    fn time_channel_data(&self, id: ComponentId) -> Result<Arc<ChannelData>> {
        match self.entry(id).and_then(|e| e.component.as_builtin()) {
            Some(c @ BuiltinComponent::TimeChannel(_)) => c
                .channel_data()
                .ok_or_else(|| AcqError::Config(format!("{:?} has no data", id))),
            _ => Err(AcqError::Config(format!(
                "{:?} is not a time channel",
                id
            ))),
        }
    }

    /// Measure a time channel on every redraw. Kinds are enabled on the
    /// returned component through [`Self::measurement_mut`].
    pub fn add_measurement(&mut self, channel: ComponentId) -> Result<ComponentId> {
        let data = self.time_channel_data(channel)?;
        let component = MeasurementComponent::new(data);
        self.insert_tool(vec![channel], BuiltinComponent::Measurement(component))
    }

    pub fn measurement(&self, id: ComponentId) -> Option<&MeasurementComponent> {
        match self.entry(id)?.component.as_builtin()? {
            BuiltinComponent::Measurement(m) => Some(m),
            _ => None,
        }
    }

    pub fn measurement_mut(&mut self, id: ComponentId) -> Option<&mut MeasurementComponent> {
        match self.entry_mut(id)?.component.as_builtin_mut()? {
            BuiltinComponent::Measurement(m) => Some(m),
            _ => None,
        }
    }

    /// Place markers on a spectrum channel.
    pub fn add_markers(&mut self, channel: ComponentId, mode: MarkerMode) -> Result<ComponentId> {
        let (data, complex) = match self.entry(channel).and_then(|e| e.component.as_builtin()) {
            Some(BuiltinComponent::FftChannel(c)) => (c.channel_data(), c.is_complex()),
            _ => {
                return Err(AcqError::Config(format!(
                    "{:?} is not a spectrum channel",
                    channel
                )))
            }
        };
        let data =
            data.ok_or_else(|| AcqError::Config(format!("{:?} has no data", channel)))?;
        let component = MarkerComponent::new(data, complex, mode);
        self.insert_tool(vec![channel], BuiltinComponent::Markers(component))
    }

    pub fn markers(&self, id: ComponentId) -> Option<&MarkerComponent> {
        match self.entry(id)?.component.as_builtin()? {
            BuiltinComponent::Markers(m) => Some(m),
            _ => None,
        }
    }

    pub fn markers_mut(&mut self, id: ComponentId) -> Option<&mut MarkerComponent> {
        match self.entry_mut(id)?.component.as_builtin_mut()? {
            BuiltinComponent::Markers(m) => Some(m),
            _ => None,
        }
    }

    /// Plot time channel `y` against time channel `x` as a new curve.
    pub fn add_xy(&mut self, x: ComponentId, y: ComponentId) -> Result<ComponentId> {
        let x_data = self.time_channel_data(x)?;
        let y_data = self.time_channel_data(y)?;
        let color = self.ids.next_color();
        let component = XyChannelComponent::new(x_data, y_data, color);
        self.insert_tool(vec![x, y], BuiltinComponent::XyChannel(component))
    }

    // ==================== Settings ====================

    /// Set the buffer size, and share it with the sync cluster.
    pub fn set_buffer_size(&mut self, size: usize) -> Result<()> {
        self.sink.set_buffer_size(size)?;
        if let (Some(sync), true) = (&self.sync, self.sync_enabled) {
            lock_sync(sync).set_buffer_size(&self.name, size);
        }
        Ok(())
    }

    /// Enabling single shot on an idle instrument starts it.
    pub fn set_single_shot(&mut self, single_shot: bool) -> Result<()> {
        self.sink.set_single_shot(single_shot)?;
        if let (Some(sync), true) = (&self.sync, self.sync_enabled) {
            lock_sync(sync).set_single_shot(&self.name, single_shot);
        }
        if single_shot && !self.started {
            self.start()?;
        }
        Ok(())
    }

    pub fn set_rolling_mode(&mut self, rolling: bool) -> Result<()> {
        self.sink.set_rolling_mode(rolling)?;
        Ok(())
    }

    /// Replace the device sample rate; `None` goes back to the device's.
    pub fn set_sample_rate_override(&mut self, rate: Option<f64>) -> Result<()> {
        self.sample_rate_override = rate;
        if self.started {
            self.refresh_sample_rate()?;
        }
        Ok(())
    }

    /// Join or leave the sync cluster given by [`Self::with_sync`].
    pub fn set_sync_mode(&mut self, enabled: bool) -> Result<()> {
        if enabled == self.sync_enabled {
            return Ok(());
        }
        let Some(sync) = &self.sync else {
            return Err(AcqError::Config(format!(
                "{} has no sync controller",
                self.name
            )));
        };
        if self.started {
            return Err(AcqError::Config(format!(
                "{}: stop before changing sync mode",
                self.name
            )));
        }
        if enabled {
            lock_sync(sync).add_instrument(Arc::clone(&self.sink))?;
        } else {
            lock_sync(sync).remove_instrument(&self.name);
        }
        self.sync_enabled = enabled;
        Ok(())
    }

    /// Switch frequency instruments between real and complex channels.
    pub fn set_complex_mode(&mut self, complex: bool) -> Result<()> {
        if self.kind != InstrumentKind::Frequency {
            return Err(AcqError::Config(format!(
                "{} is not a frequency instrument",
                self.name
            )));
        }
        if self.complex_mode.swap(complex, Ordering::AcqRel) == complex {
            return Ok(());
        }
        tracing::info!("{}: complex mode {}", self.name, complex);

        lock_top(&self.top).suspend_build();
        if self.started {
            self.reconcile_components();
        }
        let mut info = self.sink.sampling_info();
        info.complex_mode = complex;
        let result = self.sink.set_sampling_info(info);
        let rebuilt = lock_top(&self.top).unsuspend_build();
        result?;
        rebuilt?;
        Ok(())
    }

    /// Enable or disable a channel. A running instrument rebuilds once.
    pub fn set_channel_enabled(&mut self, id: ComponentId, enabled: bool) -> Result<bool> {
        let Some(entry) = self.entry_mut(id) else {
            return Ok(false);
        };
        entry.component.set_enabled(enabled);
        if self.started {
            lock_top(&self.top).suspend_build();
            self.reconcile_components();
            lock_top(&self.top).unsuspend_build()?;
        }
        Ok(true)
    }

    /// Returns false unless `id` is a time channel.
    pub fn set_y_mode(&mut self, id: ComponentId, mode: YMode) -> bool {
        match self
            .entry_mut(id)
            .and_then(|e| e.component.as_builtin_mut())
        {
            Some(BuiltinComponent::TimeChannel(c)) => {
                c.set_y_mode(mode);
                true
            }
            _ => false,
        }
    }

    fn fft_channels(&self) -> impl Iterator<Item = &FftChannelComponent> {
        self.components
            .iter()
            .filter_map(|e| match e.component.as_builtin() {
                Some(BuiltinComponent::FftChannel(c)) => Some(c),
                _ => None,
            })
    }

    pub fn set_fft_window(&mut self, window: WindowFunction) {
        self.fft_window = window;
        self.fft_channels().for_each(|c| c.set_window(window));
    }

    pub fn set_fft_averaging(&mut self, averaging: usize) {
        self.fft_averaging = averaging.max(1);
        let averaging = self.fft_averaging;
        self.fft_channels().for_each(|c| c.set_averaging(averaging));
    }

    pub fn set_power_offset(&mut self, offset: f64) {
        self.power_offset = offset;
        self.fft_channels().for_each(|c| c.set_power_offset(offset));
    }

    /// Freeze a time channel's current frame into a reference channel under
    /// the tree root. The controller picks the new node up on its next poll.
    pub fn snapshot(&mut self, id: ComponentId) -> Result<AcqNodeId> {
        let (name, data): (String, ImportChannelNode) = match self
            .entry(id)
            .and_then(|e| e.component.as_builtin())
        {
            Some(BuiltinComponent::TimeChannel(c)) => {
                (format!("{}{}", SNAPSHOT_PREFIX, c.name()), c.snapshot()?)
            }
            _ => {
                return Err(AcqError::Config(format!(
                    "{:?} is not a time channel",
                    id
                )))
            }
        };
        let mut tree = lock_tree(&self.tree);
        let root = tree.root();
        let node = tree.create(name, AcqNodeKind::ImportChannel(data));
        tree.add_tree_child(root, node)?;
        Ok(node)
    }

    // ==================== Sessions ====================

    /// Current settings as a saveable session.
    pub fn session(&self) -> InstrumentSession {
        let info = self.sink.sampling_info();
        let mut session = InstrumentSession::new(self.name.clone(), self.kind);
        session.buffer_size = info.buffer_size;
        session.plot_size = info.plot_size;
        session.single_shot = info.single_shot;
        session.complex_mode = info.complex_mode;
        session.sample_rate_override = self.sample_rate_override;
        session.rolling = self.sink.rolling_mode();
        session.sync_mode = self.sync_enabled;
        session.fft_window = self.fft_window;
        session.fft_averaging = self.fft_averaging;
        session.power_offset = self.power_offset;

        for entry in &self.components {
            let channel = match entry.component.as_builtin() {
                Some(BuiltinComponent::TimeChannel(c)) => ChannelSession {
                    enabled: entry.component.enabled(),
                    y_mode: Some(c.y_mode()),
                },
                Some(BuiltinComponent::FftChannel(c)) => ChannelSession::enabled(c.user_enabled()),
                _ => continue,
            };
            session
                .channels
                .insert(entry.component.name().to_string(), channel);
        }
        session
    }

    /// Restore saved settings. Channels the session does not know keep
    /// their current state.
    pub fn apply_session(&mut self, session: &InstrumentSession) -> Result<()> {
        if session.kind != self.kind {
            return Err(AcqError::Config(format!(
                "session {} is for a {:?} instrument",
                session.name, session.kind
            )));
        }
        if session.sync_mode != self.sync_enabled && self.sync.is_some() && !self.started {
            self.set_sync_mode(session.sync_mode)?;
        }

        lock_top(&self.top).suspend_build();
        let result = self.apply_session_settings(session);
        let rebuilt = lock_top(&self.top).unsuspend_build();
        result?;
        rebuilt?;
        tracing::info!("{}: session {} applied", self.name, session.name);
        Ok(())
    }

    fn apply_session_settings(&mut self, session: &InstrumentSession) -> Result<()> {
        self.sink.set_rolling_mode(session.rolling)?;
        self.set_buffer_size(session.buffer_size)?;
        let mut info = self.sink.sampling_info();
        info.plot_size = session.plot_size;
        info.single_shot = session.single_shot;
        self.sink.set_sampling_info(info)?;
        self.sample_rate_override = session.sample_rate_override;
        if self.started {
            self.refresh_sample_rate()?;
        }

        self.set_fft_window(session.fft_window);
        self.set_fft_averaging(session.fft_averaging);
        self.set_power_offset(session.power_offset);

        for entry in self.components.iter_mut() {
            let Some(saved) = session.channels.get(entry.component.name()) else {
                continue;
            };
            entry.component.set_enabled(saved.enabled);
            if let (Some(BuiltinComponent::TimeChannel(c)), Some(mode)) =
                (entry.component.as_builtin_mut(), saved.y_mode)
            {
                c.set_y_mode(mode);
            }
        }

        if self.kind == InstrumentKind::Frequency {
            self.set_complex_mode(session.complex_mode)?;
        }
        if self.started {
            self.reconcile_components();
        }
        Ok(())
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        self.stop();
        let ids = self.component_ids();
        for id in ids {
            self.remove_component(id);
        }
        if let (Some(sync), true) = (&self.sync, self.sync_enabled) {
            lock_sync(sync).remove_instrument(&self.name);
        }
        self.worker.shutdown();
    }
}

impl std::fmt::Debug for AcquisitionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionController")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("started", &self.started)
            .field("components", &self.components.len())
            .field("updates", &self.updates)
            .finish()
    }
}

/// Device URI named by a capture failure.
fn failing_uri(err: &AcqError) -> Option<String> {
    match err {
        AcqError::DeviceUnreachable { uri } => Some(uri.clone()),
        AcqError::Pipeline(PipelineError::Device { uri, .. })
        | AcqError::Pipeline(PipelineError::PingFailed { uri }) => Some(uri.clone()),
        AcqError::WithContext { source, .. } => failing_uri(source),
        _ => None,
    }
}
