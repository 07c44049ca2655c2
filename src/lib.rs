//! # scopy-acq: streaming acquisition pipeline
//!
//! Pulls samples from buffer-oriented acquisition devices, runs them through
//! per-channel signal paths and hands time-domain and frequency-domain frames
//! to plot consumers at a bounded redraw rate.
//!
//! ## Architecture
//!
//! - **Acquisition tree**: arena-owned topology of top blocks, devices and
//!   channels; controllers react to its change events
//! - **Pipeline**: signal paths registered with a top block, compiled into
//!   time and frequency sinks on every build
//! - **Controllers**: one per instrument; start/stop, device resource locks,
//!   refill on a worker thread and redraw on the controller thread
//! - **Sync**: instruments sharing one device arm together and share buffer
//!   size and single-shot settings
//!
//! ## Configuration
//!
//! Preferences and saved instrument sessions live in the platform data
//! directory under `scopy-acq`:
//!
//! - **Linux**: `~/.local/share/scopy-acq/`
//! - **macOS**: `~/Library/Application Support/scopy-acq/`
//! - **Windows**: `%APPDATA%\scopy-acq\`
//!
//! ## Example
//!
//! ```ignore
//! use scopy_acq::acq_tree::{lock_tree, AcqNodeKind, AcqTree};
//! use scopy_acq::controller::{AcquisitionController, ResourceManager};
//! use scopy_acq::pipeline::TopBlock;
//! use scopy_acq::types::InstrumentKind;
//!
//! let tree = AcqTree::shared();
//! let top_node = {
//!     let mut t = lock_tree(&tree);
//!     let root = t.root();
//!     let top = t.create("adc", AcqNodeKind::TopBlock(TopBlock::shared("adc")));
//!     t.add_tree_child(root, top)?;
//!     top
//! };
//!
//! let mut adc = AcquisitionController::new(
//!     "adc_time",
//!     InstrumentKind::Time,
//!     tree,
//!     top_node,
//!     Default::default(),
//!     ResourceManager::new(),
//! )?;
//! adc.start()?;
//! adc.poll();
//! ```

pub mod acq_tree;
pub mod analysis;
pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod pipeline;
pub mod sync;
pub mod types;

// Re-export commonly used types
pub use acq_tree::{AcqNodeId, AcqNodeKind, AcqTree, SharedAcqTree};
pub use config::{InstrumentSession, PreferenceStore, Preferences};
pub use controller::{AcquisitionController, ControllerEvent, ResourceManager};
pub use error::{AcqError, Result};
pub use pipeline::{DataProvider, TopBlock};
pub use sync::{SharedSyncController, SyncController};
pub use types::{InstrumentKind, SamplingInfo, YMode};
