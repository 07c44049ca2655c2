//! Time-domain sink: one sample ring per input.

use super::base::{Framing, Sink};
use super::ring::SampleRing;
use crate::pipeline::block::SampleStream;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::SinkInput;
use crate::types::{InstrumentKind, SamplingInfo};
use std::sync::Arc;

/// Time sink for the `Time` instrument.
pub type TimeSink = Sink<TimeFraming>;

/// `x[i] = i / sample_rate`
pub fn time_axis(sample_rate: f64, len: usize) -> Vec<f32> {
    let rate = if sample_rate > 0.0 { sample_rate } else { 1.0 };
    (0..len).map(|i| (i as f64 / rate) as f32).collect()
}

#[derive(Debug)]
pub struct TimeFraming {
    rings: Vec<SampleRing>,
    frames: Vec<Arc<[f32]>>,
    x: Arc<[f32]>,
    x_rate: f64,
}

impl Default for TimeFraming {
    fn default() -> Self {
        Self {
            rings: Vec::new(),
            frames: Vec::new(),
            x: Arc::from(Vec::new()),
            x_rate: 0.0,
        }
    }
}

impl Framing for TimeFraming {
    const KIND: InstrumentKind = InstrumentKind::Time;

    fn normalize(info: &mut SamplingInfo, rolling: bool) {
        // Sweep mode shows exactly one buffer.
        if !rolling {
            info.plot_size = info.buffer_size;
        }
    }

    fn reset(&mut self, inputs: usize, info: &SamplingInfo) {
        self.rings = (0..inputs).map(|_| SampleRing::new(info.plot_size)).collect();
        self.frames = vec![Arc::from(Vec::new()); inputs];
    }

    fn push(
        &mut self,
        input: SinkInput,
        stream: SampleStream,
        rolling: bool,
    ) -> PipelineResult<usize> {
        let ring = self
            .rings
            .get_mut(input.index())
            .ok_or(PipelineError::NotBuilt)?;
        match stream {
            SampleStream::Real(samples) => {
                ring.push(&samples, rolling);
                Ok(samples.len())
            }
            SampleStream::Complex(_) => Err(PipelineError::BlockMismatch {
                block: "time sink".to_string(),
                input: "complex",
            }),
        }
    }

    fn commit(&mut self, info: &SamplingInfo) {
        let mut longest = 0;
        for (ring, frame) in self.rings.iter().zip(self.frames.iter_mut()) {
            *frame = ring.to_frame();
            longest = longest.max(frame.len());
        }
        if self.x.len() != longest || self.x_rate != info.sample_rate {
            self.x = time_axis(info.sample_rate, longest).into();
            self.x_rate = info.sample_rate;
        }
    }

    fn frame(&self, input: SinkInput) -> Option<(Arc<[f32]>, Arc<[f32]>)> {
        let y = self.frames.get(input.index())?;
        Some((Arc::clone(&self.x), Arc::clone(y)))
    }

    fn complete(&self) -> bool {
        self.rings.first().is_some_and(|r| r.is_full())
    }

    fn clear(&mut self) {
        self.rings.clear();
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockDataPattern, MockDevice, SharedDevice};
    use crate::pipeline::block::ProcessingBlock;
    use crate::pipeline::channel_data::ChannelData;
    use crate::pipeline::signal_path::SignalPath;
    use crate::pipeline::sink::{DataProvider, SinkEvent, SinkState};
    use crate::pipeline::top_block::{lock_top, TopBlock};

    fn counter_device(chunk: usize) -> SharedDevice {
        SharedDevice::new(Box::new(
            MockDevice::new("local:time", 1.0)
                .with_channel(
                    "voltage0",
                    MockDataPattern::Counter {
                        step: 1.0,
                        min: 0.0,
                        max: 1e9,
                    },
                )
                .with_chunk_size(chunk),
        ))
    }

    fn running_sink(info: SamplingInfo, chunk: usize) -> (Arc<TimeSink>, Arc<ChannelData>) {
        let top = TopBlock::shared("adc");
        let dev = counter_device(chunk);
        let path = SignalPath::new("adc_time_voltage0")
            .with_block(ProcessingBlock::device_source(dev, "voltage0"));
        path.set_enabled(true);
        let handle = {
            let mut t = lock_top(&top);
            let id = t.register_signal_path(path);
            t.path(id).unwrap().handle(id)
        };

        let sink = TimeSink::new("adc_time", top.clone());
        sink.set_sampling_info(info).unwrap();
        let data = Arc::new(ChannelData::new("voltage0"));
        sink.bind_channel(handle, data.clone());
        sink.arm();
        lock_top(&top).start().unwrap();
        (sink, data)
    }

    #[test]
    fn test_time_axis() {
        assert_eq!(time_axis(4.0, 3), vec![0.0, 0.25, 0.5]);
        assert_eq!(time_axis(0.0, 2), vec![0.0, 1.0]);
    }

    #[test]
    fn test_continuous_capture_never_finishes() {
        let info = SamplingInfo {
            sample_rate: 1.0,
            buffer_size: 32,
            ..SamplingInfo::default()
        };
        let (sink, _) = running_sink(info, 8);
        for _ in 0..5 {
            assert_eq!(sink.update_data().unwrap(), 8);
            assert!(!sink.finished());
        }
    }

    #[test]
    fn test_single_shot_finishes_on_target_cycle() {
        let info = SamplingInfo {
            sample_rate: 1.0,
            buffer_size: 16,
            single_shot: true,
            ..SamplingInfo::default()
        };
        let (sink, _) = running_sink(info, 5);
        let events = sink.subscribe();

        let mut total = 0;
        let mut cycles = 0;
        while !sink.finished() {
            total += sink.update_data().unwrap();
            cycles += 1;
            assert!(cycles < 10);
        }
        assert_eq!(cycles, 4);
        assert!(total >= 16);
        assert_eq!(sink.state(), SinkState::Finished);
        assert_eq!(events.try_recv().unwrap(), SinkEvent::Finished);

        // Finished sinks stop pulling data
        assert_eq!(sink.update_data().unwrap(), 0);
    }

    #[test]
    fn test_set_data_aliases_frame() {
        let info = SamplingInfo {
            sample_rate: 2.0,
            buffer_size: 4,
            ..SamplingInfo::default()
        };
        let (sink, data) = running_sink(info, 4);
        sink.update_data().unwrap();
        sink.set_data(false);

        assert!(!data.is_owned());
        let (x, y) = data.to_vecs();
        assert_eq!(y, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(x, vec![0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_rolling_mode_keeps_plot_size() {
        let top = TopBlock::shared("adc");
        let sink = TimeSink::new("adc_time", top);
        sink.set_rolling_mode(true).unwrap();
        let info = SamplingInfo {
            buffer_size: 8,
            plot_size: 64,
            ..SamplingInfo::default()
        };
        sink.set_sampling_info(info).unwrap();
        assert_eq!(sink.sampling_info().plot_size, 64);

        sink.set_rolling_mode(false).unwrap();
        assert_eq!(sink.sampling_info().plot_size, 8);
    }
}
