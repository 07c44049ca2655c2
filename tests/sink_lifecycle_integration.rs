//! Integration tests for sinks attached to a shared top block
//!
//! Covers arm/disarm, reconfiguration of a running sink and frame delivery
//! to bound channels.

use scopy_acq::backend::{MockDataPattern, MockDevice, SharedDevice};
use scopy_acq::pipeline::{
    lock_top, ChannelData, DataProvider, FreqSink, ProcessingBlock, SharedTopBlock, SignalPath,
    SinkEvent, SinkState, TimeSink, TopBlock,
};
use scopy_acq::types::SamplingInfo;
use std::sync::Arc;

fn device(chunk: Option<usize>) -> SharedDevice {
    let mut mock = MockDevice::new("local:dev0", 1.0).with_channel(
        "voltage0",
        MockDataPattern::Counter {
            step: 1.0,
            min: 0.0,
            max: 1e9,
        },
    );
    if let Some(chunk) = chunk {
        mock = mock.with_chunk_size(chunk);
    }
    SharedDevice::new(Box::new(mock))
}

/// Register an enabled path named `name` and bind it to a fresh channel.
fn bound_channel(
    top: &SharedTopBlock,
    sink: &dyn DataProvider,
    dev: &SharedDevice,
    name: &str,
    block: Option<ProcessingBlock>,
) -> Arc<ChannelData> {
    let mut path = SignalPath::new(name).with_block(ProcessingBlock::device_source(dev.clone(), "voltage0"));
    if let Some(block) = block {
        path = path.with_block(block);
    }
    path.set_enabled(true);
    let handle = {
        let mut t = lock_top(top);
        let id = t.register_signal_path(path);
        t.path(id).unwrap().handle(id)
    };
    let data = Arc::new(ChannelData::new(name));
    sink.bind_channel(handle, data.clone());
    data
}

fn info(buffer_size: usize) -> SamplingInfo {
    SamplingInfo {
        sample_rate: 1.0,
        buffer_size,
        ..SamplingInfo::default()
    }
}

#[test]
fn test_reconfigure_running_sink_rearms_with_new_size() {
    let top = TopBlock::shared("adc");
    let dev = device(None);
    let sink = TimeSink::new("adc_time", top.clone());
    sink.set_sampling_info(info(64)).unwrap();
    let data = bound_channel(&top, &*sink, &dev, "adc_time_voltage0", None);
    sink.arm();
    lock_top(&top).start().unwrap();
    sink.update_data().unwrap();
    sink.set_data(false);
    assert_eq!(data.len(), 64);

    let events = sink.subscribe();
    let builds = lock_top(&top).build_count();
    sink.set_buffer_size(32).unwrap();

    let events: Vec<SinkEvent> = events.try_iter().collect();
    let position = |wanted: &SinkEvent| events.iter().position(|e| e == wanted).unwrap();
    assert!(position(&SinkEvent::Disarmed) < position(&SinkEvent::Armed));
    assert!(position(&SinkEvent::Armed) < position(&SinkEvent::Ready));
    assert_eq!(lock_top(&top).build_count(), builds + 1);
    assert!(lock_top(&top).is_running());
    assert_eq!(sink.state(), SinkState::Capturing);

    assert_eq!(sink.update_data().unwrap(), 32);
    sink.set_data(false);
    assert_eq!(data.len(), 32);
}

#[test]
fn test_single_shot_after_reconfigure() {
    let top = TopBlock::shared("adc");
    let dev = device(Some(5));
    let sink = TimeSink::new("adc_time", top.clone());
    sink.set_sampling_info(info(32)).unwrap();
    bound_channel(&top, &*sink, &dev, "adc_time_voltage0", None);
    sink.arm();
    lock_top(&top).start().unwrap();

    for _ in 0..5 {
        sink.update_data().unwrap();
        assert!(!sink.finished());
    }

    let mut shot = info(16);
    shot.single_shot = true;
    sink.set_sampling_info(shot).unwrap();
    assert_eq!(sink.samples_captured(), 0);

    let mut cycles = 0;
    while !sink.finished() {
        sink.update_data().unwrap();
        cycles += 1;
        assert!(cycles < 10);
    }
    // 5 + 5 + 5 + 5 first reaches 16
    assert_eq!(cycles, 4);
    assert_eq!(sink.samples_captured(), 20);
}

#[test]
fn test_last_sink_out_stops_the_graph() {
    let top = TopBlock::shared("adc");
    let dev = device(None);
    let time = TimeSink::new("adc_time", top.clone());
    let freq = FreqSink::new("adc_fft", top.clone());
    time.set_sampling_info(info(64)).unwrap();
    freq.set_sampling_info(info(64)).unwrap();
    bound_channel(&top, &*time, &dev, "adc_time_voltage0", None);
    bound_channel(
        &top,
        &*freq,
        &dev,
        "adc_fft_voltage0",
        Some(ProcessingBlock::fft(Default::default())),
    );
    time.arm();
    freq.arm();
    lock_top(&top).start().unwrap();
    assert_eq!(lock_top(&top).observer_count(), 2);
    // Each sink picks up only its own instrument's paths
    assert!(time.input_index("adc_fft_voltage0").is_none());
    assert!(freq.input_index("adc_fft_voltage0").is_some());

    time.disarm();
    assert!(lock_top(&top).is_running());
    assert_eq!(freq.state(), SinkState::Capturing);

    freq.disarm();
    assert!(!lock_top(&top).is_running());
    assert!(!lock_top(&top).is_built());
    assert_eq!(lock_top(&top).observer_count(), 0);
}

#[test]
fn test_sink_ignores_paths_of_longer_instrument_names() {
    let top = TopBlock::shared("adc");
    let dev = device(None);
    let time = TimeSink::new("adc_time", top.clone());
    let time2 = TimeSink::new("adc_time2", top.clone());
    time.set_sampling_info(info(64)).unwrap();
    time2.set_sampling_info(info(64)).unwrap();
    bound_channel(&top, &*time, &dev, "adc_time_voltage0", None);
    bound_channel(&top, &*time2, &dev, "adc_time2_voltage0", None);
    time.arm();
    time2.arm();
    lock_top(&top).start().unwrap();

    assert!(time.input_index("adc_time_voltage0").is_some());
    assert!(time.input_index("adc_time2_voltage0").is_none());
    assert!(time2.input_index("adc_time2_voltage0").is_some());
    assert!(time2.input_index("adc_time_voltage0").is_none());
}

#[test]
fn test_frequency_sink_delivers_half_spectrum() {
    let top = TopBlock::shared("adc");
    let dev = device(None);
    let sink = FreqSink::new("adc_fft", top.clone());
    sink.set_sampling_info(info(64)).unwrap();
    let data = bound_channel(
        &top,
        &*sink,
        &dev,
        "adc_fft_voltage0",
        Some(ProcessingBlock::fft(Default::default())),
    );
    sink.arm();
    lock_top(&top).start().unwrap();

    sink.update_data().unwrap();
    sink.set_data(true);
    assert!(data.is_owned());
    assert_eq!(data.len(), 32);
    data.with_data(|x, _| {
        assert_eq!(x[0], 0.0);
        assert!(x[31] < 0.5);
    });
}

#[test]
fn test_disarmed_sink_ignores_refills() {
    let top = TopBlock::shared("adc");
    let dev = device(None);
    let sink = TimeSink::new("adc_time", top.clone());
    bound_channel(&top, &*sink, &dev, "adc_time_voltage0", None);
    assert_eq!(sink.state(), SinkState::Disarmed);
    assert_eq!(sink.update_data().unwrap(), 0);

    // Armed but not started: still no data
    sink.arm();
    assert_eq!(sink.state(), SinkState::Armed);
    assert_eq!(sink.update_data().unwrap(), 0);
}
