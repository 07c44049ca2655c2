//! Channel data: the frame hand-off between the sink and a plot curve.
//!
//! Two ownership modes:
//! - **copy**: the previous frame is dropped, then the input is deep-copied
//!   into storage owned by this buffer (reference data, snapshots).
//! - **alias**: the buffer keeps another reference to the sink's frame
//!   arrays without allocating. The sink publishes a fresh frame each
//!   refill, so an aliased frame stays valid until the next hand-off.

use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
enum Storage {
    #[default]
    Empty,
    Owned {
        x: Box<[f32]>,
        y: Box<[f32]>,
    },
    Aliased {
        x: Arc<[f32]>,
        y: Arc<[f32]>,
    },
}

#[derive(Debug, Default)]
struct Inner {
    storage: Storage,
    size: usize,
    frames: u64,
}

/// Per-channel sample frame consumed by the plot.
#[derive(Debug)]
pub struct ChannelData {
    name: String,
    inner: Mutex<Inner>,
}

impl ChannelData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the current frame with `size` points of `x`/`y`.
    pub fn on_new_data(&self, x: &Arc<[f32]>, y: &Arc<[f32]>, size: usize, copy: bool) {
        let size = size.min(x.len()).min(y.len());
        let mut inner = self.lock();
        // Release the previous frame before taking the new one.
        inner.storage = Storage::Empty;
        inner.storage = if copy {
            Storage::Owned {
                x: x[..size].into(),
                y: y[..size].into(),
            }
        } else {
            Storage::Aliased {
                x: Arc::clone(x),
                y: Arc::clone(y),
            }
        };
        inner.size = size;
        inner.frames += 1;
    }

    /// Run `f` over the current frame.
    pub fn with_data<R>(&self, f: impl FnOnce(&[f32], &[f32]) -> R) -> R {
        let inner = self.lock();
        let size = inner.size;
        match &inner.storage {
            Storage::Empty => f(&[], &[]),
            Storage::Owned { x, y } => f(&x[..size], &y[..size]),
            Storage::Aliased { x, y } => f(&x[..size], &y[..size]),
        }
    }

    /// Owned copies of the current frame.
    pub fn to_vecs(&self) -> (Vec<f32>, Vec<f32>) {
        self.with_data(|x, y| (x.to_vec(), y.to_vec()))
    }

    pub fn len(&self) -> usize {
        self.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the current frame is a private copy.
    pub fn is_owned(&self) -> bool {
        matches!(self.lock().storage, Storage::Owned { .. })
    }

    /// True when the current frame aliases `y`.
    pub fn aliases(&self, y: &Arc<[f32]>) -> bool {
        match &self.lock().storage {
            Storage::Aliased { y: held, .. } => Arc::ptr_eq(held, y),
            _ => false,
        }
    }

    /// Number of frames handed over so far.
    pub fn frames(&self) -> u64 {
        self.lock().frames
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.storage = Storage::Empty;
        inner.size = 0;
    }
}
