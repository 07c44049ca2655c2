//! Integration tests for sync clusters
//!
//! A time and a frequency instrument share one top block and one device.

mod common;

use common::builders::{TestRig, TreeBuilder};
use common::mock_helpers::test_preferences;
use common::poll_until;
use scopy_acq::controller::{AcquisitionController, ControllerEvent, ResourceManager};
use scopy_acq::pipeline::{lock_top, SinkState};
use scopy_acq::sync::{lock_sync, SyncController};
use scopy_acq::types::InstrumentKind;
use scopy_acq::SharedSyncController;
use serial_test::serial;

struct Cluster {
    rig: TestRig,
    sync: SharedSyncController,
    resources: ResourceManager,
    time: AcquisitionController,
    fft: AcquisitionController,
}

fn cluster() -> Cluster {
    let rig = TreeBuilder::new("adc")
        .device("local:dev0", &["voltage0", "voltage1"])
        .build();
    let sync = SyncController::shared("adc_sync");
    let resources = ResourceManager::new();
    let controller = |name: &str, kind| {
        AcquisitionController::new(
            name,
            kind,
            rig.tree.clone(),
            rig.top_node,
            test_preferences(),
            resources.clone(),
        )
        .unwrap()
        .with_sync(sync.clone())
        .unwrap()
    };
    let time = controller("adc_time", InstrumentKind::Time);
    let fft = controller("adc_fft", InstrumentKind::Frequency);
    Cluster {
        rig,
        sync,
        resources,
        time,
        fft,
    }
}

#[test]
fn test_members_join_in_sync_mode() {
    let c = cluster();
    assert!(c.time.sync_mode());
    assert!(c.fft.sync_mode());
    assert!(c.time.sink().sync_mode());
    let sync = lock_sync(&c.sync);
    assert_eq!(sync.len(), 2);
    assert!(sync.contains("adc_time"));
    assert!(sync.contains("adc_fft"));
}

#[test]
#[serial]
fn test_first_member_waits_for_the_cluster() {
    let mut c = cluster();

    c.time.start().unwrap();
    assert!(c.time.is_started());
    assert!(!lock_sync(&c.sync).is_armed());
    assert_eq!(c.time.sink().state(), SinkState::Disarmed);
    assert!(!lock_top(&c.rig.top).is_running());
    // Members share the owner token, so both may hold the device
    assert_eq!(c.resources.holder("local:dev0").as_deref(), Some("adc_sync"));

    c.fft.start().unwrap();
    assert!(lock_sync(&c.sync).is_armed());
    assert!(lock_top(&c.rig.top).is_running());
    assert_eq!(c.time.sink().state(), SinkState::Capturing);
    assert_eq!(c.fft.sink().state(), SinkState::Capturing);

    assert!(poll_until(&mut [&mut c.time, &mut c.fft], |cs| {
        cs.iter().all(|ctl| ctl.frames() >= 3)
    }));
    c.time.stop();
    c.fft.stop();
}

#[test]
#[serial]
fn test_stopping_one_member_stops_the_cluster() {
    let mut c = cluster();
    let fft_events = c.fft.subscribe();
    c.time.start().unwrap();
    c.fft.start().unwrap();
    assert!(poll_until(&mut [&mut c.time, &mut c.fft], |cs| {
        cs.iter().all(|ctl| ctl.updates_running())
    }));

    c.time.stop();
    assert!(!lock_sync(&c.sync).is_armed());
    assert_eq!(c.fft.sink().state(), SinkState::Disarmed);

    // The other member notices on its next tick
    c.fft.poll();
    assert!(!c.fft.is_started());
    assert!(fft_events.try_iter().any(|e| e == ControllerEvent::Stopped));
    assert!(!c.resources.is_locked("local:dev0"));
    assert!(!lock_top(&c.rig.top).is_running());
}

#[test]
fn test_buffer_size_is_shared() {
    let mut c = cluster();
    c.time.set_buffer_size(128).unwrap();
    assert_eq!(lock_sync(&c.sync).buffer_size(), Some(128));
    assert_eq!(c.fft.sink().sampling_info().buffer_size, 64);

    c.fft.poll();
    assert_eq!(c.fft.sink().sampling_info().buffer_size, 128);
    assert_eq!(c.time.sink().sampling_info().buffer_size, 128);
}

#[test]
fn test_leaving_the_cluster() {
    let mut c = cluster();
    c.fft.set_sync_mode(false).unwrap();
    assert!(!c.fft.sync_mode());
    assert!(!c.fft.sink().sync_mode());
    assert_eq!(lock_sync(&c.sync).len(), 1);

    // Running instruments cannot switch
    c.fft.start().unwrap();
    assert!(c.fft.set_sync_mode(true).is_err());
    c.fft.stop();
}

#[test]
fn test_cluster_rejects_foreign_top_block() {
    let c = cluster();
    let other = TreeBuilder::new("dac")
        .device("local:dev1", &["voltage0"])
        .build();
    let result = AcquisitionController::new(
        "dac_time",
        InstrumentKind::Time,
        other.tree.clone(),
        other.top_node,
        test_preferences(),
        ResourceManager::new(),
    )
    .unwrap()
    .with_sync(c.sync.clone());
    assert!(result.is_err());
    assert_eq!(lock_sync(&c.sync).len(), 2);
}
