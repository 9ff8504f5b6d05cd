//! Multi-resolution FFT chain
//!
//! Cascade 0 analyzes the stream at full rate. Every following cascade sees
//! the stream of its predecessor decimated by two with pairwise averaging, so
//! with the same FFT size each cascade halves both the analyzed band and the
//! bin width.

use std::time::Instant;

use super::fft::{FftError, RealFft};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeParams {
    /// Transform length shared by every cascade
    pub fft_size: usize,
    /// Samples consumed between consecutive transforms
    pub input_stride: usize,
    pub cascades_count: usize,
}

#[derive(Debug, Clone)]
struct Cascade {
    // pending samples, shifted left by the stride after each block
    buffer: Vec<f32>,
    // first half of a pair waiting for its partner
    odd: Option<f32>,
    values: Vec<f32>,
    successor: Option<usize>,
}

impl Cascade {
    fn new(bins: usize) -> Self {
        Self {
            buffer: Vec::new(),
            odd: None,
            values: vec![0.0; bins],
            successor: None,
        }
    }

    fn clear_input(&mut self) {
        self.buffer.clear();
        self.odd = None;
    }

    /// Resize values to `bins`, mapping old values by index scaling
    fn remap_values(&mut self, bins: usize) {
        let old_len = self.values.len();
        if old_len == bins {
            return;
        }
        if old_len == 0 || bins < 2 {
            self.values = vec![0.0; bins];
            return;
        }

        let scale = (old_len - 1) as f64 / (bins - 1) as f64;
        let mut values: Vec<f32> = (0..bins)
            .map(|i| self.values[((i as f64 * scale).round() as usize).min(old_len - 1)])
            .collect();
        values[0] = 0.0;
        self.values = values;
    }

    /// Run every full block currently buffered
    fn drain_blocks<E, F>(
        &mut self,
        index: usize,
        fft: &mut RealFft,
        params: &CascadeParams,
        kill_time: Instant,
        sink: &mut F,
    ) -> Result<(), E>
    where
        F: FnMut(usize, &[f32]) -> Result<(), E>,
    {
        let stride = params.input_stride.clamp(1, params.fft_size);
        let mut consumed = 0;
        let mut result = Ok(());
        while self.buffer.len() - consumed >= params.fft_size {
            // past the deadline the block is still consumed, the old values are re-emitted
            if Instant::now() <= kill_time {
                fft.process(&self.buffer[consumed..consumed + params.fft_size]);
                fft.fill_magnitudes(&mut self.values);
            }
            consumed += stride;
            result = sink(index, &self.values);
            if result.is_err() {
                break;
            }
        }
        self.buffer.drain(..consumed);
        result
    }
}

/// Append `input` averaged in pairs to `out`, carrying an unpaired sample in `odd`
fn decimate_pairwise(odd: &mut Option<f32>, input: &[f32], out: &mut Vec<f32>) {
    for &sample in input {
        match odd.take() {
            None => *odd = Some(sample),
            Some(first) => out.push((first + sample) * 0.5),
        }
    }
}

/// Arena of cascades sharing one [`RealFft`]
pub struct FftCascade {
    params: CascadeParams,
    fft: RealFft,
    cascades: Vec<Cascade>,
    incoming: Vec<f32>,
    forward: Vec<f32>,
}

impl FftCascade {
    pub fn new(params: CascadeParams, window: Vec<f32>) -> Result<Self, FftError> {
        let fft = RealFft::new(params.fft_size, window)?;
        let mut cascade = Self {
            params,
            fft,
            cascades: Vec::new(),
            incoming: Vec::new(),
            forward: Vec::new(),
        };
        cascade.rebuild(params);
        Ok(cascade)
    }

    /// Apply new parameters. Pending input is dropped; values survive,
    /// resampled to the new bin count.
    pub fn set_params(&mut self, params: CascadeParams, window: Vec<f32>) -> Result<(), FftError> {
        self.fft.set_params(params.fft_size, window)?;
        self.rebuild(params);
        Ok(())
    }

    fn rebuild(&mut self, params: CascadeParams) {
        let bins = params.fft_size / 2;
        let count = params.cascades_count.max(1);
        self.params = CascadeParams {
            cascades_count: count,
            ..params
        };

        self.cascades.truncate(count);
        while self.cascades.len() < count {
            self.cascades.push(Cascade::new(bins));
        }
        for (index, cascade) in self.cascades.iter_mut().enumerate() {
            cascade.clear_input();
            cascade.remap_values(bins);
            cascade.successor = (index + 1 < count).then_some(index + 1);
        }
    }

    pub fn params(&self) -> &CascadeParams {
        &self.params
    }

    pub fn cascades_count(&self) -> usize {
        self.cascades.len()
    }

    /// Most recent magnitudes of cascade `index`
    pub fn values(&self, index: usize) -> &[f32] {
        &self.cascades[index].values
    }

    /// Full-rate samples covered by one chunk of cascade `index`
    pub fn equivalent_wave_size(&self, index: usize) -> usize {
        self.params.input_stride << index
    }

    /// Feed samples through the chain.
    ///
    /// `sink` receives `(cascade, magnitudes)` once per block, in block order
    /// within each cascade. Samples that do not complete a block are kept
    /// for the next call.
    pub fn process<E, F>(&mut self, wave: &[f32], kill_time: Instant, mut sink: F) -> Result<(), E>
    where
        F: FnMut(usize, &[f32]) -> Result<(), E>,
    {
        if wave.is_empty() {
            return Ok(());
        }

        let mut incoming = std::mem::take(&mut self.incoming);
        let mut forward = std::mem::take(&mut self.forward);
        incoming.clear();
        incoming.extend_from_slice(wave);

        let mut next = Some(0);
        let mut result = Ok(());
        while let Some(index) = next {
            if incoming.is_empty() {
                break;
            }

            let cascade = &mut self.cascades[index];
            cascade.buffer.extend_from_slice(&incoming);

            forward.clear();
            if cascade.successor.is_some() {
                decimate_pairwise(&mut cascade.odd, &incoming, &mut forward);
            }

            result = cascade.drain_blocks(index, &mut self.fft, &self.params, kill_time, &mut sink);
            if result.is_err() {
                break;
            }

            std::mem::swap(&mut incoming, &mut forward);
            next = cascade.successor;
        }

        self.incoming = incoming;
        self.forward = forward;
        result
    }

    /// Feed `count` zero samples
    pub fn process_silence<E, F>(&mut self, count: usize, kill_time: Instant, mut sink: F) -> Result<(), E>
    where
        F: FnMut(usize, &[f32]) -> Result<(), E>,
    {
        let zeros = vec![0.0; count.min(self.params.fft_size)];
        let mut remaining = count;
        while remaining > 0 {
            let len = remaining.min(zeros.len());
            self.process(&zeros[..len], kill_time, &mut sink)?;
            remaining -= len;
        }
        Ok(())
    }

    /// Zero values and drop all pending input
    pub fn reset(&mut self) {
        for cascade in &mut self.cascades {
            cascade.clear_input();
            cascade.values.fill(0.0);
        }
    }
}
