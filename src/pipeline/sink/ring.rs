//! Fixed-capacity sample ring backing the time-domain sink.

use std::collections::VecDeque;
use std::sync::Arc;

/// Newest-`capacity` sample store.
///
/// In sweep mode (not rolling) a full ring is cleared before the next chunk
/// lands, so the plot redraws from the left edge. In rolling mode the oldest
/// samples fall off the front.
#[derive(Debug, Clone)]
pub struct SampleRing {
    data: VecDeque<f32>,
    capacity: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    pub fn push(&mut self, samples: &[f32], rolling: bool) {
        if !rolling && self.is_full() {
            self.data.clear();
        }
        self.data.extend(samples.iter().copied());
        let excess = self.data.len().saturating_sub(self.capacity);
        self.data.drain(..excess);
    }

    /// Snapshot the ring as an immutable frame.
    pub fn to_frame(&self) -> Arc<[f32]> {
        self.data.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}
