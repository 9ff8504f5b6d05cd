//! Anti-aliased integer decimation

use super::butterworth;
use super::iir::{Filter, IirFilterFixed};

/// Order of each anti-alias section
const SECTION_ORDER: usize = 10;
const SECTION_SIZE: usize = SECTION_ORDER + 1;
/// Anti-alias cutoff relative to the new Nyquist frequency
const CUTOFF_RATIO: f64 = 0.95;

type Section = IirFilterFixed<SECTION_SIZE>;

/// Low-pass filters a stream and keeps every Nth sample.
///
/// Three 10th-order Butterworth sections are used instead of a single
/// 30th-order one, which would be numerically unstable in transfer-function form.
pub struct DownsampleHelper {
    factor: usize,
    sections: [Section; 3],
    // filtered samples; `next_index` is the position of the next decimated sample
    buffer: Vec<f32>,
    next_index: usize,
}

impl DownsampleHelper {
    pub fn new(factor: usize) -> Self {
        let factor = factor.max(1);
        Self {
            factor,
            sections: Self::design(factor),
            buffer: Vec::new(),
            next_index: 0,
        }
    }

    fn design(factor: usize) -> [Section; 3] {
        let params = butterworth::low_pass(SECTION_ORDER, CUTOFF_RATIO / factor as f64);
        let section = Section::new(&params);
        [section.clone(), section.clone(), section]
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Change the decimation factor; rebuilds the filters and drops all state
    pub fn set_factor(&mut self, factor: usize) {
        let factor = factor.max(1);
        if factor == self.factor {
            return;
        }
        self.factor = factor;
        self.sections = Self::design(factor);
        self.buffer.clear();
        self.next_index = 0;
    }

    /// Filter `samples` into the internal buffer.
    ///
    /// # Returns
    /// Number of decimated samples ready to be drained
    pub fn push_data(&mut self, samples: &[f32]) -> usize {
        self.compact();

        let start = self.buffer.len();
        self.buffer.extend_from_slice(samples);
        for section in &mut self.sections {
            section.apply(&mut self.buffer[start..]);
        }

        self.available()
    }

    /// Number of decimated samples that can be drained right now
    pub fn available(&self) -> usize {
        let len = self.buffer.len();
        if self.next_index >= len {
            0
        } else {
            (len - self.next_index).div_ceil(self.factor)
        }
    }

    /// Drain up to `dest.len()` decimated samples.
    ///
    /// # Returns
    /// Number of samples written to `dest`
    pub fn downsample(&mut self, dest: &mut [f32]) -> usize {
        let count = dest.len().min(self.available());
        for out in &mut dest[..count] {
            *out = self.buffer[self.next_index];
            self.next_index += self.factor;
        }
        count
    }

    /// Drain exactly `N` decimated samples, if that many are ready
    pub fn downsample_fixed<const N: usize>(&mut self) -> Option<[f32; N]> {
        if self.available() < N {
            return None;
        }
        let mut result = [0.0; N];
        self.downsample(&mut result);
        Some(result)
    }

    /// Zero the filter state and discard buffered samples
    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
        self.buffer.clear();
        self.next_index = 0;
    }

    // drop the consumed prefix once it dominates the buffer
    fn compact(&mut self) {
        let consumed = self.next_index.min(self.buffer.len());
        if consumed == 0 || consumed * 2 < self.buffer.len() {
            return;
        }
        self.buffer.drain(..consumed);
        self.next_index -= consumed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, rate: f32, len: usize) -> Vec<f32> {
        (0..len).map(|i| (2.0 * PI * freq * i as f32 / rate).sin()).collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    fn drain_all(helper: &mut DownsampleHelper) -> Vec<f32> {
        let mut out = vec![0.0; helper.available()];
        let n = helper.downsample(&mut out);
        out.truncate(n);
        out
    }

    #[test]
    fn test_decimation_count() {
        let mut helper = DownsampleHelper::new(3);
        assert_eq!(helper.push_data(&[0.0; 10]), 4);
        assert_eq!(drain_all(&mut helper).len(), 4);
        // phase continues: next pick is at absolute index 12
        assert_eq!(helper.push_data(&[0.0; 2]), 0);
        assert_eq!(helper.push_data(&[0.0; 1]), 1);
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        let input = sine(700.0, 48000.0, 4000);

        let mut whole = DownsampleHelper::new(4);
        whole.push_data(&input);
        let expected = drain_all(&mut whole);

        let mut chunked = DownsampleHelper::new(4);
        let mut got = Vec::new();
        for chunk in input.chunks(37) {
            chunked.push_data(chunk);
            got.extend(drain_all(&mut chunked));
        }

        assert_eq!(got.len(), expected.len());
        for (a, b) in got.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_repetition_reconstructs_low_tone() {
        let rate = 48000.0;
        let factor = 2;
        let input = sine(1000.0, rate, 24000);

        let mut helper = DownsampleHelper::new(factor);
        helper.push_data(&input);
        let decimated = drain_all(&mut helper);
        assert_eq!(decimated.len(), input.len() / factor);

        let upsampled: Vec<f32> = decimated
            .iter()
            .flat_map(|&v| std::iter::repeat(v).take(factor))
            .collect();

        // skip the filter transient, then compare energy with the original
        let settled = &upsampled[4800..];
        assert!((rms(settled) - rms(&input[4800..])).abs() < 0.02);

        // repetition keeps the waveform close once the group delay is accounted for
        let delay = (0..64)
            .min_by(|&a, &b| {
                let err = |d: usize| -> f32 {
                    settled[..4000]
                        .iter()
                        .zip(&input[4800 - d..])
                        .map(|(x, y)| (x - y).abs())
                        .sum()
                };
                err(a).total_cmp(&err(b))
            })
            .unwrap_or(0);
        let max_error = settled[..4000]
            .iter()
            .zip(&input[4800 - delay..])
            .map(|(x, y)| (x - y).abs())
            .fold(0.0_f32, f32::max);
        assert!(max_error < 0.3, "max error {max_error}");
    }

    #[test]
    fn test_rejects_tone_above_new_nyquist() {
        let mut helper = DownsampleHelper::new(4);
        helper.push_data(&sine(9000.0, 48000.0, 48000));
        let decimated = drain_all(&mut helper);
        assert!(rms(&decimated[2000..]) < 0.01);
    }

    #[test]
    fn test_fixed_and_reset() {
        let mut helper = DownsampleHelper::new(2);
        helper.push_data(&[1.0; 7]);
        assert!(helper.downsample_fixed::<8>().is_none());
        assert!(helper.downsample_fixed::<4>().is_some());
        assert_eq!(helper.available(), 0);

        helper.reset();
        assert_eq!(helper.available(), 0);
        helper.push_data(&[0.0; 4]);
        assert_eq!(helper.downsample_fixed::<2>(), Some([0.0, 0.0]));
    }

    #[test]
    fn test_set_factor_clears_state() {
        let mut helper = DownsampleHelper::new(2);
        helper.push_data(&[0.5; 9]);
        helper.set_factor(2);
        assert_eq!(helper.available(), 5);
        helper.set_factor(3);
        assert_eq!(helper.factor(), 3);
        assert_eq!(helper.available(), 0);
    }
}
