//! Refill worker thread
//!
//! Each controller owns one worker that calls `update_data` on its sink,
//! off the controller thread. Requests and results carry the generation of
//! the update cycle that asked for them; the controller drops results from
//! cycles it has since cancelled.
//!
//! ```text
//! controller ──Refill{gen}──► worker ──update_data()──► sink
//!      ▲                        │
//!      └──FrameReady{gen} ◄─────┘
//! ```

use crate::pipeline::DataProvider;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How long the worker waits for a request before re-checking its running flag
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Requests from the controller to its worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillRequest {
    Refill { generation: u64 },
    Shutdown,
}

/// Results from the worker
#[derive(Debug, Clone, PartialEq)]
pub enum RefillMessage {
    FrameReady {
        generation: u64,
        samples: usize,
        elapsed: Duration,
    },
    RefillFailed {
        generation: u64,
        /// Device to disconnect, for device-layer failures
        uri: Option<String>,
        error: String,
    },
}

impl RefillMessage {
    pub fn generation(&self) -> u64 {
        match self {
            RefillMessage::FrameReady { generation, .. }
            | RefillMessage::RefillFailed { generation, .. } => *generation,
        }
    }
}

/// Handle to a running refill thread.
pub struct RefillWorker {
    request_tx: Sender<RefillRequest>,
    message_rx: Receiver<RefillMessage>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RefillWorker {
    pub fn spawn(sink: Arc<dyn DataProvider>) -> Self {
        // One slot: at most one refill is queued behind the running one.
        let (request_tx, request_rx) = bounded(1);
        let (message_tx, message_rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));

        let thread_running = Arc::clone(&running);
        let name = format!("refill-{}", sink.name());
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || run(sink, request_rx, message_tx, thread_running))
            .map_err(|e| tracing::error!("failed to spawn refill worker: {}", e))
            .ok();

        Self {
            request_tx,
            message_rx,
            running,
            handle,
        }
    }

    /// Queue one refill. Returns false if the queue slot is taken or the
    /// worker is gone.
    pub fn request(&self, generation: u64) -> bool {
        match self.request_tx.try_send(RefillRequest::Refill { generation }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("refill worker is not running");
                false
            }
        }
    }

    pub fn try_recv(&self) -> Option<RefillMessage> {
        self.message_rx.try_recv().ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.handle.is_some()
    }

    /// Stop the thread and wait for it.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.request_tx.try_send(RefillRequest::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("refill worker panicked");
            }
        }
    }
}

impl Drop for RefillWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    sink: Arc<dyn DataProvider>,
    request_rx: Receiver<RefillRequest>,
    message_tx: Sender<RefillMessage>,
    running: Arc<AtomicBool>,
) {
    tracing::debug!("{}: refill worker started", sink.name());
    while running.load(Ordering::Acquire) {
        let generation = match request_rx.recv_timeout(IDLE_POLL) {
            Ok(RefillRequest::Refill { generation }) => generation,
            Ok(RefillRequest::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let started = Instant::now();
        let message = match sink.update_data() {
            Ok(samples) => RefillMessage::FrameReady {
                generation,
                samples,
                elapsed: started.elapsed(),
            },
            Err(e) => {
                tracing::warn!("{}: refill failed: {}", sink.name(), e);
                let uri = match &e {
                    crate::pipeline::PipelineError::Device { uri, .. }
                    | crate::pipeline::PipelineError::PingFailed { uri } => Some(uri.clone()),
                    _ => None,
                };
                RefillMessage::RefillFailed {
                    generation,
                    uri,
                    error: e.to_string(),
                }
            }
        };
        if message_tx.send(message).is_err() {
            break;
        }
    }
    tracing::debug!("{}: refill worker stopped", sink.name());
}
