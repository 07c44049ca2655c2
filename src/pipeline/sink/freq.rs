//! Frequency-domain sink: latest spectrum per input, plus I/Q pairing.

use super::base::{Framing, Sink};
use crate::pipeline::block::SampleStream;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::SinkInput;
use crate::types::{InstrumentKind, SamplingInfo};
use std::sync::Arc;

/// Frequency sink for the `Frequency` instrument.
pub type FreqSink = Sink<FreqFraming>;

/// Bin frequencies of a spectrum with `bins` points.
///
/// Bins are spaced `sample_rate / buffer_size` apart starting at
/// `freq_offset`; complex spectra are centered, so they start half a sample
/// rate lower.
pub fn frequency_axis(info: &SamplingInfo, bins: usize) -> Vec<f32> {
    let n = info.buffer_size.max(1) as f64;
    let step = info.sample_rate / n;
    let start = if info.complex_mode {
        info.freq_offset - info.sample_rate / 2.0
    } else {
        info.freq_offset
    };
    (0..bins).map(|i| (start + i as f64 * step) as f32).collect()
}

/// I and Q channel names of a complex channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexPair {
    pub i: String,
    pub q: String,
}

impl ComplexPair {
    /// Display name of the combined channel.
    pub fn name(&self) -> String {
        format!("{}-{}", self.i, self.q)
    }
}

/// Pair the two most recently added channels as I/Q.
///
/// If the newer channel's name ends in `i` (any case) it is the I channel;
/// otherwise the older one is, whatever the names look like.
pub fn complex_channel_pair(names: &[String]) -> Option<ComplexPair> {
    let [.., older, newer] = names else {
        return None;
    };
    // TODO: reject pairs whose names carry no i/q suffix once device
    // channel metadata exposes the modifier directly.
    let pair = if newer.to_lowercase().ends_with('i') {
        ComplexPair {
            i: newer.clone(),
            q: older.clone(),
        }
    } else {
        ComplexPair {
            i: older.clone(),
            q: newer.clone(),
        }
    };
    Some(pair)
}

#[derive(Debug)]
pub struct FreqFraming {
    pending: Vec<Option<Vec<f32>>>,
    spectra: Vec<Option<Arc<[f32]>>>,
    x: Arc<[f32]>,
    x_key: Option<(usize, u64, u64, bool, usize)>,
}

impl Default for FreqFraming {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            spectra: Vec::new(),
            x: Arc::from(Vec::new()),
            x_key: None,
        }
    }
}

impl Framing for FreqFraming {
    const KIND: InstrumentKind = InstrumentKind::Frequency;

    fn normalize(info: &mut SamplingInfo, _rolling: bool) {
        info.plot_size = info.buffer_size;
    }

    fn reset(&mut self, inputs: usize, _info: &SamplingInfo) {
        self.pending = vec![None; inputs];
        self.spectra = vec![None; inputs];
    }

    fn push(
        &mut self,
        input: SinkInput,
        stream: SampleStream,
        _rolling: bool,
    ) -> PipelineResult<usize> {
        let slot = self
            .pending
            .get_mut(input.index())
            .ok_or(PipelineError::NotBuilt)?;
        match stream {
            SampleStream::Real(bins) => {
                let n = bins.len();
                *slot = Some(bins);
                Ok(n)
            }
            SampleStream::Complex(_) => Err(PipelineError::BlockMismatch {
                block: "frequency sink".to_string(),
                input: "complex",
            }),
        }
    }

    fn commit(&mut self, info: &SamplingInfo) {
        let mut longest = 0;
        for (pending, spectrum) in self.pending.iter_mut().zip(self.spectra.iter_mut()) {
            if let Some(bins) = pending.take() {
                *spectrum = Some(bins.into());
            }
            if let Some(s) = spectrum {
                longest = longest.max(s.len());
            }
        }
        let key = (
            info.buffer_size,
            info.sample_rate.to_bits(),
            info.freq_offset.to_bits(),
            info.complex_mode,
            longest,
        );
        if self.x_key != Some(key) {
            self.x = frequency_axis(info, longest).into();
            self.x_key = Some(key);
        }
    }

    fn frame(&self, input: SinkInput) -> Option<(Arc<[f32]>, Arc<[f32]>)> {
        let y = self.spectra.get(input.index())?.as_ref()?;
        Some((Arc::clone(&self.x), Arc::clone(y)))
    }

    fn complete(&self) -> bool {
        !self.spectra.is_empty() && self.spectra.iter().all(|s| s.is_some())
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.spectra.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pair_by_suffix_in_order() {
        let pair = complex_channel_pair(&names(&["voltage2i", "voltage2q"])).unwrap();
        assert_eq!(pair.i, "voltage2i");
        assert_eq!(pair.q, "voltage2q");
    }

    #[test]
    fn test_pair_by_suffix_reversed() {
        let pair = complex_channel_pair(&names(&["voltage2q", "voltage2I"])).unwrap();
        assert_eq!(pair.i, "voltage2I");
        assert_eq!(pair.q, "voltage2q");
        assert_eq!(pair.name(), "voltage2I-voltage2q");
    }

    #[test]
    fn test_pair_falls_back_to_arrival_order() {
        let pair =
            complex_channel_pair(&names(&["voltage0", "voltage1", "voltage2", "voltage3"])).unwrap();
        assert_eq!(pair.i, "voltage2");
        assert_eq!(pair.q, "voltage3");
    }

    #[test]
    fn test_pair_needs_two_channels() {
        assert!(complex_channel_pair(&names(&["voltage0"])).is_none());
        assert!(complex_channel_pair(&[]).is_none());
    }

    #[test]
    fn test_frequency_axis_real_and_complex() {
        let mut info = SamplingInfo {
            sample_rate: 1000.0,
            buffer_size: 10,
            ..SamplingInfo::default()
        };
        assert_eq!(frequency_axis(&info, 3), vec![0.0, 100.0, 200.0]);

        info.complex_mode = true;
        info.freq_offset = 50.0;
        assert_eq!(frequency_axis(&info, 2), vec![-450.0, -350.0]);
    }

    #[test]
    fn test_complete_when_every_input_has_a_spectrum() {
        let info = SamplingInfo::default();
        let mut framing = FreqFraming::default();
        framing.reset(2, &info);
        framing
            .push(SinkInput(0), SampleStream::Real(vec![-10.0; 4]), false)
            .unwrap();
        framing.commit(&info);
        assert!(!framing.complete());
        assert!(framing.frame(SinkInput(1)).is_none());

        framing
            .push(SinkInput(1), SampleStream::Real(vec![-20.0; 4]), false)
            .unwrap();
        framing.commit(&info);
        assert!(framing.complete());
        let (x, y) = framing.frame(SinkInput(1)).unwrap();
        assert_eq!(x.len(), 4);
        assert_eq!(&*y, &[-20.0; 4]);
    }
}
