//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use scopy_acq::controller::AcquisitionController;
use std::time::{Duration, Instant};

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Poll `controllers` until `done` holds or the test timeout expires.
///
/// Returns whether `done` was reached.
pub fn poll_until(
    controllers: &mut [&mut AcquisitionController],
    mut done: impl FnMut(&[&mut AcquisitionController]) -> bool,
) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        for controller in controllers.iter_mut() {
            controller.poll();
        }
        if done(controllers) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}
