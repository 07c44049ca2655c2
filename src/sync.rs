//! Sync controller
//!
//! Instruments that read the same physical device at the same time form a
//! cluster. The cluster shares one buffer size and one single-shot flag
//! (last writer wins) and is armed as a unit: arm requests are held until
//! every member has asked, then every sink is armed together.
//!
//! Members are told about shared parameter changes through their sink's
//! `request_*` events rather than direct setters, so each controller applies
//! them in its own rebuild cycle.
//!
//! Lock order: sync controller, then sink, then top block. Never call in
//! here while holding a top block lock.

use crate::error::{AcqError, Result};
use crate::pipeline::DataProvider;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle; each instrument controller in the cluster holds one.
pub type SharedSyncController = Arc<Mutex<SyncController>>;

pub fn lock_sync(sync: &SharedSyncController) -> MutexGuard<'_, SyncController> {
    sync.lock().unwrap_or_else(|e| e.into_inner())
}

struct Member {
    sink: Arc<dyn DataProvider>,
    arm_requested: bool,
}

pub struct SyncController {
    /// Resource lock owner shared by every member
    token: String,
    members: Vec<Member>,
    buffer_size: Option<usize>,
    single_shot: bool,
    armed: bool,
}

impl SyncController {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            members: Vec::new(),
            buffer_size: None,
            single_shot: false,
            armed: false,
        }
    }

    pub fn shared(token: impl Into<String>) -> SharedSyncController {
        Arc::new(Mutex::new(Self::new(token)))
    }

    /// Owner name members use for the device resource lock, so that they
    /// can hold the same URI together.
    pub fn owner_token(&self) -> &str {
        &self.token
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.sink.name() == name)
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Shared buffer size, once any member has set one.
    pub fn buffer_size(&self) -> Option<usize> {
        self.buffer_size
    }

    pub fn single_shot(&self) -> bool {
        self.single_shot
    }

    // ==================== Registration ====================

    /// Join `sink` to the cluster. Every member must run on the same top
    /// block.
    pub fn add_instrument(&mut self, sink: Arc<dyn DataProvider>) -> Result<()> {
        if self.contains(sink.name()) {
            return Ok(());
        }
        if let Some(first) = self.members.first() {
            if !Arc::ptr_eq(first.sink.top(), sink.top()) {
                return Err(AcqError::Config(format!(
                    "{} does not share the top block of the sync cluster",
                    sink.name()
                )));
            }
        }
        sink.set_sync_mode(true);
        if let Some(size) = self.buffer_size {
            sink.request_buffer_size(size);
        }
        tracing::info!("sync {}: added {}", self.token, sink.name());
        self.members.push(Member {
            sink,
            arm_requested: false,
        });
        Ok(())
    }

    /// Leave the cluster. Returns false if `name` was not a member.
    pub fn remove_instrument(&mut self, name: &str) -> bool {
        let Some(pos) = self.members.iter().position(|m| m.sink.name() == name) else {
            return false;
        };
        let member = self.members.remove(pos);
        member.sink.set_sync_mode(false);
        if self.members.is_empty() {
            self.armed = false;
        }
        tracing::info!("sync {}: removed {}", self.token, name);
        true
    }

    // ==================== Shared parameters ====================

    /// Record `size` and ask every other member to apply it.
    pub fn set_buffer_size(&mut self, from: &str, size: usize) {
        if self.buffer_size == Some(size) {
            return;
        }
        self.buffer_size = Some(size);
        tracing::debug!("sync {}: buffer size {} from {}", self.token, size, from);
        for member in self.members.iter().filter(|m| m.sink.name() != from) {
            member.sink.request_buffer_size(size);
        }
    }

    pub fn set_single_shot(&mut self, from: &str, single_shot: bool) {
        if self.single_shot == single_shot {
            return;
        }
        self.single_shot = single_shot;
        tracing::debug!("sync {}: single shot {} from {}", self.token, single_shot, from);
        for member in self.members.iter().filter(|m| m.sink.name() != from) {
            member.sink.request_single_shot(single_shot);
        }
    }

    // ==================== Arm / disarm ====================

    /// Arm request from member `name`.
    ///
    /// Returns true once the whole cluster is armed; the caller then starts
    /// the shared top block. Unknown names arm nothing.
    pub fn arm(&mut self, name: &str) -> bool {
        let Some(pos) = self.members.iter().position(|m| m.sink.name() == name) else {
            tracing::warn!("sync {}: arm request from non-member {}", self.token, name);
            return false;
        };
        if self.armed {
            self.members[pos].sink.arm();
            return true;
        }

        self.members[pos].arm_requested = true;
        let pending = self.members.iter().filter(|m| !m.arm_requested).count();
        if pending > 0 {
            tracing::debug!("sync {}: {} waiting for {} members", self.token, name, pending);
            return false;
        }

        for member in &mut self.members {
            member.sink.arm();
            member.arm_requested = false;
        }
        self.armed = true;
        tracing::info!("sync {}: cluster armed ({} members)", self.token, self.members.len());
        true
    }

    /// Disarm request from member `name`. Disarming an armed cluster
    /// disarms every member.
    pub fn disarm(&mut self, name: &str) {
        if self.armed {
            self.armed = false;
            for member in &mut self.members {
                member.arm_requested = false;
                member.sink.disarm();
            }
            tracing::info!("sync {}: cluster disarmed by {}", self.token, name);
            return;
        }
        if let Some(member) = self.members.iter_mut().find(|m| m.sink.name() == name) {
            member.arm_requested = false;
            member.sink.disarm();
        }
    }
}

impl std::fmt::Debug for SyncController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.members.iter().map(|m| m.sink.name()).collect();
        f.debug_struct("SyncController")
            .field("token", &self.token)
            .field("members", &names)
            .field("buffer_size", &self.buffer_size)
            .field("single_shot", &self.single_shot)
            .field("armed", &self.armed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FreqSink, SinkEvent, SinkState, TimeSink, TopBlock};

    fn pair() -> (Arc<TimeSink>, Arc<FreqSink>) {
        let top = TopBlock::shared("adc");
        (
            TimeSink::new("adc_time", top.clone()),
            FreqSink::new("adc_fft", top),
        )
    }

    #[test]
    fn test_arm_waits_for_every_member() {
        let (time, freq) = pair();
        let mut sync = SyncController::new("adc_sync");
        sync.add_instrument(time.clone()).unwrap();
        sync.add_instrument(freq.clone()).unwrap();
        assert!(time.sync_mode());

        assert!(!sync.arm("adc_time"));
        assert_eq!(time.state(), SinkState::Disarmed);

        assert!(sync.arm("adc_fft"));
        assert!(sync.is_armed());
        assert_eq!(time.state(), SinkState::Armed);
        assert_eq!(freq.state(), SinkState::Armed);
    }

    #[test]
    fn test_reconfiguring_member_keeps_cluster_armed() {
        let (time, freq) = pair();
        let mut sync = SyncController::new("adc_sync");
        sync.add_instrument(time.clone()).unwrap();
        sync.add_instrument(freq.clone()).unwrap();
        sync.arm("adc_time");
        sync.arm("adc_fft");
        let events = time.subscribe();

        time.set_buffer_size(128).unwrap();
        let events: Vec<SinkEvent> = events.try_iter().collect();
        assert!(events.contains(&SinkEvent::Disarmed));
        assert!(events.contains(&SinkEvent::Armed));
        assert!(sync.is_armed());
        assert_eq!(time.state(), SinkState::Armed);
        assert_eq!(freq.state(), SinkState::Armed);

        // The cluster can still be taken down as a unit
        sync.disarm("adc_fft");
        assert_eq!(time.state(), SinkState::Disarmed);
    }

    #[test]
    fn test_disarm_propagates_to_cluster() {
        let (time, freq) = pair();
        let mut sync = SyncController::new("adc_sync");
        sync.add_instrument(time.clone()).unwrap();
        sync.add_instrument(freq.clone()).unwrap();
        sync.arm("adc_time");
        sync.arm("adc_fft");

        sync.disarm("adc_fft");
        assert!(!sync.is_armed());
        assert_eq!(time.state(), SinkState::Disarmed);
        assert_eq!(freq.state(), SinkState::Disarmed);
    }

    #[test]
    fn test_buffer_size_notifies_other_members() {
        let (time, freq) = pair();
        let time_events = time.subscribe();
        let freq_events = freq.subscribe();
        let mut sync = SyncController::new("adc_sync");
        sync.add_instrument(time.clone()).unwrap();
        sync.add_instrument(freq.clone()).unwrap();

        sync.set_buffer_size("adc_time", 4096);
        assert_eq!(sync.buffer_size(), Some(4096));
        assert!(freq_events
            .try_iter()
            .any(|e| e == SinkEvent::RequestBufferSize(4096)));
        assert!(!time_events
            .try_iter()
            .any(|e| matches!(e, SinkEvent::RequestBufferSize(_))));

        // Last writer wins
        sync.set_single_shot("adc_fft", true);
        assert!(sync.single_shot());
        assert!(time_events
            .try_iter()
            .any(|e| e == SinkEvent::RequestSingleShot(true)));
    }

    #[test]
    fn test_rejects_foreign_top_block() {
        let (time, _) = pair();
        let other = FreqSink::new("dac_fft", TopBlock::shared("dac"));
        let mut sync = SyncController::new("adc_sync");
        sync.add_instrument(time).unwrap();
        assert!(sync.add_instrument(other).is_err());
        assert_eq!(sync.len(), 1);
    }

    #[test]
    fn test_remove_instrument() {
        let (time, freq) = pair();
        let mut sync = SyncController::new("adc_sync");
        sync.add_instrument(time.clone()).unwrap();
        sync.add_instrument(freq).unwrap();

        assert!(sync.remove_instrument("adc_time"));
        assert!(!time.sync_mode());
        assert!(!sync.remove_instrument("adc_time"));

        // The remaining member arms alone
        assert!(sync.arm("adc_fft"));
    }
}
