//! Instrument controllers
//!
//! An [`AcquisitionController`] runs one instrument (time or frequency
//! domain) on a shared top block:
//!
//! - builds [`Component`]s from the acquisition tree and keeps them in
//!   registration order
//! - takes the device [`ResourceManager`] locks on start and releases them
//!   on stop
//! - decouples device refills (on a [`RefillWorker`]) from redraws (paced by
//!   the target FPS preference)
//! - keeps markers, measurements and XY curves current with each redraw
//!
//! # Example
//!
//! ```ignore
//! use scopy_acq::controller::{AcquisitionController, ResourceManager};
//! use scopy_acq::types::InstrumentKind;
//!
//! let mut adc = AcquisitionController::new(
//!     "adc_time",
//!     InstrumentKind::Time,
//!     tree.clone(),
//!     top_node,
//!     prefs.clone(),
//!     ResourceManager::new(),
//! )?;
//! adc.start()?;
//! loop {
//!     adc.poll();
//!     std::thread::sleep(std::time::Duration::from_millis(1));
//! }
//! ```

pub mod acquisition;
pub mod component;
pub mod components;
pub mod id_alloc;
pub mod plot;
pub mod refill;
pub mod resource_lock;

pub use acquisition::{AcquisitionController, ControllerEvent, SNAPSHOT_PREFIX};
pub use component::{AnyComponent, BuiltinComponent, Component, ComponentContext};
pub use components::{
    DeviceComponent, FftChannelComponent, FftSource, ImportChannelComponent, MarkerComponent,
    MeasurementComponent, TimeChannelComponent, XyChannelComponent,
};
pub use id_alloc::{ComponentId, IdAllocator, PlotColor};
pub use plot::{FrameCounter, PlotManager};
pub use refill::{RefillMessage, RefillRequest, RefillWorker};
pub use resource_lock::ResourceManager;
