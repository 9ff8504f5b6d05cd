//! Windowed real FFT using realfft
//!
//! Produces `size / 2` magnitudes scaled so that a full-scale sine reads
//! as its RMS value in the closest bin.

use std::f32::consts::SQRT_2;
use std::sync::Arc;

use num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FftError {
    #[error("FFT size {0} is not allowed: it must be even and factor into 2, 3 and 5 only")]
    InvalidSize(usize),

    #[error("window length {found} does not match FFT size {expected}")]
    WindowSizeMismatch { expected: usize, found: usize },
}

/// Whether `size` is a valid transform length
pub fn is_allowed_size(size: usize) -> bool {
    if size < 2 || size % 2 != 0 {
        return false;
    }
    let mut rest = size;
    for factor in [2, 3, 5] {
        while rest % factor == 0 {
            rest /= factor;
        }
    }
    rest == 1
}

/// Smallest allowed size that is not below `size`
pub fn next_fast_size(size: usize) -> usize {
    let mut candidate = size.max(2);
    while !is_allowed_size(candidate) {
        candidate += 1;
    }
    candidate
}

/// Fixed-size forward transform with an optional window
pub struct RealFft {
    size: usize,
    r2c: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input_buffer: Vec<f32>,
    output_buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl RealFft {
    /// # Arguments
    /// * `size` - Transform length, see [`is_allowed_size`]
    /// * `window` - Either `size` coefficients or empty for no window
    pub fn new(size: usize, window: Vec<f32>) -> Result<Self, FftError> {
        Self::validate(size, &window)?;
        let r2c = RealFftPlanner::<f32>::new().plan_fft_forward(size);
        let scratch = r2c.make_scratch_vec();
        let output_buffer = r2c.make_output_vec();

        Ok(Self {
            size,
            r2c,
            window,
            input_buffer: vec![0.0; size],
            output_buffer,
            scratch,
        })
    }

    fn validate(size: usize, window: &[f32]) -> Result<(), FftError> {
        if !is_allowed_size(size) {
            return Err(FftError::InvalidSize(size));
        }
        if !window.is_empty() && window.len() != size {
            return Err(FftError::WindowSizeMismatch {
                expected: size,
                found: window.len(),
            });
        }
        Ok(())
    }

    /// Replace size and window, replanning only when the size changes
    pub fn set_params(&mut self, size: usize, window: Vec<f32>) -> Result<(), FftError> {
        Self::validate(size, &window)?;
        if size != self.size {
            *self = Self::new(size, window)?;
        } else {
            self.window = window;
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of magnitudes produced, DC included
    pub fn bins_count(&self) -> usize {
        self.size / 2
    }

    /// Window and transform `wave`, zero-padding or truncating it to the FFT size
    pub fn process(&mut self, wave: &[f32]) {
        let len = wave.len().min(self.size);
        self.input_buffer[..len].copy_from_slice(&wave[..len]);
        self.input_buffer[len..].fill(0.0);

        if !self.window.is_empty() {
            for (sample, w) in self.input_buffer.iter_mut().zip(&self.window) {
                *sample *= w;
            }
        }

        if let Err(err) = self
            .r2c
            .process_with_scratch(&mut self.input_buffer, &mut self.output_buffer, &mut self.scratch)
        {
            log::error!("FFT failed: {err}");
            self.output_buffer.fill(Complex::new(0.0, 0.0));
        }
    }

    /// Magnitude of the DC bin
    pub fn dc(&self) -> f32 {
        self.output_buffer[0].norm() / self.size as f32
    }

    /// Magnitude of bin `index`; bin 0 is the DC term
    pub fn bin_magnitude(&self, index: usize) -> f32 {
        if index == 0 {
            return self.dc();
        }
        self.output_buffer[index].norm() * SQRT_2 / self.size as f32
    }

    /// Write all `size / 2` magnitudes into `dest`
    pub fn fill_magnitudes(&self, dest: &mut [f32]) {
        let count = dest.len().min(self.bins_count());
        for (index, out) in dest[..count].iter_mut().enumerate() {
            *out = self.bin_magnitude(index);
        }
    }
}
