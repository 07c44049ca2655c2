//! Device backend layer
//!
//! The flow graph talks to acquisition hardware only through the
//! [`DeviceBackend`] trait. Devices are shared between the top block (health
//! checks, buffer setup) and the sinks' refill worker through
//! [`SharedDevice`].
//!
//! # Components
//!
//! - [`DeviceBackend`] - create-buffer / refill / per-channel sample access
//! - [`MockDevice`] - synthetic device with failure injection
//! - [`DeviceStats`] - refill statistics
//!
//! # Example
//!
//! ```ignore
//! use scopy_acq::backend::{MockDataPattern, MockDevice, SharedDevice};
//!
//! let device = SharedDevice::new(Box::new(
//!     MockDevice::new("local:mock0", 1000.0)
//!         .with_channel("voltage0", MockDataPattern::default()),
//! ));
//!
//! let mut dev = device.lock();
//! dev.ping()?;
//! dev.create_buffer(&["voltage0".to_string()], 256)?;
//! let captured = dev.refill()?;
//! ```

pub mod device_trait;
pub mod mock_device;

pub use device_trait::{
    ChannelInfo, DeviceBackend, DeviceStats, SharedDevice, DEFAULT_DEVICE_TIMEOUT,
};
pub use mock_device::{MockDataPattern, MockDevice, MockDeviceControl};
