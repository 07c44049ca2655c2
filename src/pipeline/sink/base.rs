//! Shared sink machinery used by the time and frequency variants.

use super::{DataProvider, SinkEvent, SinkState};
use crate::backend::SharedDevice;
use crate::pipeline::block::SampleStream;
use crate::pipeline::channel_data::ChannelData;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{ObserverId, SignalPathId, SinkInput};
use crate::pipeline::signal_path::{CompiledPath, SignalPath, SignalPathHandle};
use crate::pipeline::top_block::{lock_top, FlowGraphObserver, SharedTopBlock};
use crate::types::{InstrumentKind, SamplingInfo};
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Variant-specific frame shaping.
pub trait Framing: Default + Send + 'static {
    const KIND: InstrumentKind;

    /// Derive dependent sampling fields before they are stored.
    fn normalize(info: &mut SamplingInfo, rolling: bool);
    /// Size the per-input state for a new build or capture.
    fn reset(&mut self, inputs: usize, info: &SamplingInfo);
    /// Accept the output of one input's signal path.
    fn push(
        &mut self,
        input: SinkInput,
        stream: SampleStream,
        rolling: bool,
    ) -> PipelineResult<usize>;
    /// Publish the pushed samples as immutable frames.
    fn commit(&mut self, info: &SamplingInfo);
    fn frame(&self, input: SinkInput) -> Option<(Arc<[f32]>, Arc<[f32]>)>;
    /// Single-shot target reached.
    fn complete(&self) -> bool;
    fn clear(&mut self);
}

/// A plot channel fed by one signal path.
#[derive(Debug, Clone)]
pub struct ChannelBinding {
    pub handle: SignalPathHandle,
    pub data: Arc<ChannelData>,
}

struct SinkCore<F> {
    state: SinkState,
    info: SamplingInfo,
    rolling: bool,
    observer: Option<ObserverId>,
    paths: Vec<CompiledPath>,
    index: HashMap<String, SinkInput>,
    devices: Vec<SharedDevice>,
    buffers_live: bool,
    framing: F,
    bindings: Vec<ChannelBinding>,
    subscribers: Vec<Sender<SinkEvent>>,
    captured: usize,
}

impl<F: Framing> SinkCore<F> {
    fn emit(&mut self, event: SinkEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn release_buffers(&mut self) {
        if self.buffers_live {
            for device in &self.devices {
                device.lock().destroy_buffer();
            }
            self.buffers_live = false;
        }
    }

    fn disconnect(&mut self) {
        self.release_buffers();
        self.paths.clear();
        self.index.clear();
        self.devices.clear();
        self.framing.clear();
    }

    fn info_changed(&mut self) {
        let info = self.info;
        self.emit(SinkEvent::SamplingInfoChanged {
            buffer_size: info.buffer_size,
            sample_rate: info.sample_rate,
            complex_mode: info.complex_mode,
        });
    }
}

/// Sink parameterized by its framing.
pub struct Sink<F: Framing> {
    name: String,
    top: SharedTopBlock,
    self_ref: Weak<Sink<F>>,
    sync_mode: AtomicBool,
    core: Mutex<SinkCore<F>>,
}

impl<F: Framing> Sink<F> {
    /// Create a sink for the instrument `name`; it collects the signal paths
    /// named `{name}_...`.
    pub fn new(name: impl Into<String>, top: SharedTopBlock) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|self_ref| Self {
            name,
            top,
            self_ref: self_ref.clone(),
            sync_mode: AtomicBool::new(false),
            core: Mutex::new(SinkCore {
                state: SinkState::Disarmed,
                info: SamplingInfo::default(),
                rolling: false,
                observer: None,
                paths: Vec::new(),
                index: HashMap::new(),
                devices: Vec::new(),
                buffers_live: false,
                framing: F::default(),
                bindings: Vec::new(),
                subscribers: Vec::new(),
                captured: 0,
            }),
        })
    }

    fn lock_core(&self) -> MutexGuard<'_, SinkCore<F>> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Paths are named `{sink}_{channel}`.
    fn accepts(&self, path: &SignalPath) -> bool {
        path.is_enabled()
            && path
                .name()
                .strip_prefix(self.name.as_str())
                .is_some_and(|rest| rest.starts_with('_'))
    }

    /// Structural change on an armed sink.
    ///
    /// The sink leaves the graph, applies `apply` with no paths connected,
    /// rejoins and asks the top block for a rebuild, which a suspended top
    /// block defers. Frames produced before the rebuild are discarded with
    /// the old paths.
    fn reconfigure(&self, apply: impl FnOnce(&mut SinkCore<F>)) -> PipelineResult<()> {
        let observer = {
            let mut core = self.lock_core();
            core.disconnect();
            core.state = SinkState::Disarmed;
            core.emit(SinkEvent::Disarmed);
            core.observer.take()
        };
        if let Some(id) = observer {
            lock_top(&self.top).detach(id);
        }

        {
            let mut core = self.lock_core();
            apply(&mut core);
            core.info_changed();
        }
        tracing::debug!("{}: reconfigured, rearming", self.name);

        // Only armed sinks get here, and a sync member is armed only while
        // its cluster is, so rearming restores what the cluster granted.
        self.arm();
        lock_top(&self.top).request_rebuild()
    }
}

impl<F: Framing> DataProvider for Sink<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> InstrumentKind {
        F::KIND
    }

    fn top(&self) -> &SharedTopBlock {
        &self.top
    }

    fn arm(&self) {
        if self.lock_core().observer.is_some() {
            return;
        }
        let weak: Weak<dyn FlowGraphObserver> = self.self_ref.clone();
        let id = lock_top(&self.top).attach(weak);

        let mut core = self.lock_core();
        core.observer = Some(id);
        core.state = SinkState::Armed;
        core.emit(SinkEvent::Armed);
        tracing::debug!("{}: armed", self.name);
    }

    fn disarm(&self) {
        let observer = {
            let mut core = self.lock_core();
            core.disconnect();
            core.state = SinkState::Disarmed;
            core.emit(SinkEvent::Disarmed);
            core.observer.take()
        };
        if let Some(id) = observer {
            if let Err(e) = lock_top(&self.top).release(id) {
                tracing::warn!("{}: rebuild after disarm failed: {}", self.name, e);
            }
            tracing::debug!("{}: disarmed", self.name);
        }
    }

    fn state(&self) -> SinkState {
        self.lock_core().state
    }

    fn update_data(&self) -> PipelineResult<usize> {
        let mut guard = self.lock_core();
        if guard.state != SinkState::Capturing {
            return Ok(0);
        }
        let core = &mut *guard;

        let mut fresh = 0;
        for device in &core.devices {
            let count = device
                .lock()
                .refill()
                .map_err(|e| PipelineError::Device {
                    uri: device.uri().to_string(),
                    message: e.to_string(),
                })?;
            fresh = fresh.max(count);
        }

        for (i, path) in core.paths.iter_mut().enumerate() {
            if let Some(stream) = path.run()? {
                core.framing
                    .push(SinkInput(i as u32), stream, core.rolling)?;
            }
        }
        core.framing.commit(&core.info);
        core.captured += fresh;

        if core.info.single_shot && core.framing.complete() {
            core.state = SinkState::Finished;
            core.emit(SinkEvent::Finished);
            tracing::debug!("{}: single shot finished after {} samples", self.name, core.captured);
        }
        Ok(fresh)
    }

    fn set_data(&self, copy: bool) {
        let core = self.lock_core();
        for binding in &core.bindings {
            if !binding.handle.is_enabled() {
                continue;
            }
            // Enabled after the last build: picked up by the next one.
            let Some(input) = core.index.get(&binding.handle.name) else {
                tracing::trace!("{}: {} not connected yet", self.name, binding.handle.name);
                continue;
            };
            if let Some((x, y)) = core.framing.frame(*input) {
                binding.data.on_new_data(&x, &y, y.len(), copy);
            }
        }
    }

    fn finished(&self) -> bool {
        self.lock_core().state == SinkState::Finished
    }

    fn sampling_info(&self) -> SamplingInfo {
        self.lock_core().info
    }

    fn set_sampling_info(&self, info: SamplingInfo) -> PipelineResult<()> {
        let mut info = info;
        {
            let mut core = self.lock_core();
            F::normalize(&mut info, core.rolling);
            if core.info == info {
                return Ok(());
            }
            let structural = core.info.requires_rebuild(&info);
            if !structural || core.observer.is_none() {
                core.info = info;
                if structural {
                    core.framing.clear();
                }
                core.info_changed();
                return Ok(());
            }
        }
        self.reconfigure(|core| core.info = info)
    }

    fn rolling_mode(&self) -> bool {
        self.lock_core().rolling
    }

    fn set_rolling_mode(&self, rolling: bool) -> PipelineResult<()> {
        {
            let mut core = self.lock_core();
            if core.rolling == rolling {
                return Ok(());
            }
            if core.observer.is_none() {
                core.rolling = rolling;
                let mut info = core.info;
                F::normalize(&mut info, rolling);
                core.info = info;
                return Ok(());
            }
        }
        self.reconfigure(|core| {
            core.rolling = rolling;
            let mut info = core.info;
            F::normalize(&mut info, rolling);
            core.info = info;
        })
    }

    fn sync_mode(&self) -> bool {
        self.sync_mode.load(Ordering::Acquire)
    }

    fn set_sync_mode(&self, sync: bool) {
        self.sync_mode.store(sync, Ordering::Release);
    }

    fn request_buffer_size(&self, size: usize) {
        self.lock_core().emit(SinkEvent::RequestBufferSize(size));
    }

    fn request_single_shot(&self, single_shot: bool) {
        self.lock_core().emit(SinkEvent::RequestSingleShot(single_shot));
    }

    fn bind_channel(&self, handle: SignalPathHandle, data: Arc<ChannelData>) {
        let mut core = self.lock_core();
        core.bindings.retain(|b| b.handle.id != handle.id);
        core.bindings.push(ChannelBinding { handle, data });
    }

    fn unbind_channel(&self, path: SignalPathId) -> bool {
        let mut core = self.lock_core();
        let before = core.bindings.len();
        core.bindings.retain(|b| b.handle.id != path);
        before != core.bindings.len()
    }

    fn input_index(&self, path_name: &str) -> Option<SinkInput> {
        self.lock_core().index.get(path_name).copied()
    }

    fn samples_captured(&self) -> usize {
        self.lock_core().captured
    }

    fn subscribe(&self) -> Receiver<SinkEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.lock_core().subscribers.push(tx);
        rx
    }
}

impl<F: Framing> FlowGraphObserver for Sink<F> {
    fn on_built(&self, paths: &[(SignalPathId, &SignalPath)]) {
        let mut guard = self.lock_core();
        if guard.observer.is_none() {
            return;
        }
        let core = &mut *guard;
        core.disconnect();

        let info = core.info;
        for (id, path) in paths.iter().filter(|(_, p)| self.accepts(p)) {
            match path.compile(*id, &info) {
                Ok(compiled) => {
                    let input = SinkInput(core.paths.len() as u32);
                    core.index.insert(path.name().to_string(), input);
                    if !core.devices.iter().any(|d| d.same_device(compiled.device())) {
                        core.devices.push(compiled.device().clone());
                    }
                    core.paths.push(compiled);
                }
                Err(e) => tracing::warn!("{}: skipping {}: {}", self.name, path.name(), e),
            }
        }
        core.framing.reset(core.paths.len(), &info);
        tracing::debug!("{}: connected {} signal paths", self.name, core.paths.len());
    }

    fn on_teardown(&self) {
        self.lock_core().disconnect();
    }

    fn on_started(&self) -> PipelineResult<()> {
        let mut guard = self.lock_core();
        if guard.observer.is_none() {
            return Ok(());
        }
        let core = &mut *guard;

        let size = core.info.buffer_size;
        for (n, device) in core.devices.iter().enumerate() {
            let mut channels: Vec<String> = Vec::new();
            for path in core.paths.iter().filter(|p| p.device().same_device(device)) {
                for channel in path.channels() {
                    if !channels.contains(&channel) {
                        channels.push(channel);
                    }
                }
            }
            if let Err(e) = device.lock().create_buffer(&channels, size) {
                for created in &core.devices[..n] {
                    created.lock().destroy_buffer();
                }
                return Err(PipelineError::Device {
                    uri: device.uri().to_string(),
                    message: e.to_string(),
                });
            }
        }
        core.buffers_live = true;
        core.captured = 0;
        let inputs = core.paths.len();
        core.framing.reset(inputs, &core.info);
        core.state = SinkState::Capturing;
        core.emit(SinkEvent::Ready);
        Ok(())
    }

    fn on_stopped(&self) {
        let mut core = self.lock_core();
        core.release_buffers();
        if core.observer.is_some() && core.state != SinkState::Disarmed {
            core.state = SinkState::Armed;
        }
    }
}

impl<F: Framing> std::fmt::Debug for Sink<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("name", &self.name)
            .field("kind", &F::KIND)
            .finish()
    }
}
