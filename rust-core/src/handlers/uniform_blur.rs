//! Gaussian blur across neighbouring bands

use std::collections::HashMap;
use std::time::Instant;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{
    ConfigError, DataSize, HandlerData, HandlerError, HandlerInfo, ProcessContext, SoundHandler,
};

/// User radius units per band
const RADIUS_SCALE: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniformBlurParams {
    /// Blur radius of cascade 0
    pub radius: f64,
    /// Radius multiplier applied per cascade
    pub radius_adaptation: f64,
}

impl Default for UniformBlurParams {
    fn default() -> Self {
        Self {
            radius: 1.0,
            radius_adaptation: 2.0,
        }
    }
}

/// Normalized kernel of `2 * radius + 1` taps with sigma `radius / 3`
fn gaussian_kernel(radius: usize) -> Vec<f64> {
    let sigma = radius as f64 / 3.0;
    let power_factor = 1.0 / (2.0 * sigma * sigma);
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let r = i as f64 - radius as f64;
            (-r * r * power_factor).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

pub struct UniformBlur {
    params: UniformBlurParams,
    data: HandlerData,
    weights: Option<Array2<f32>>,
    kernels: HashMap<usize, Vec<f64>>,
    scratch: Vec<f32>,
}

impl UniformBlur {
    pub fn new(name: &str, params: UniformBlurParams) -> Self {
        Self {
            params,
            data: HandlerData::new(name),
            weights: None,
            kernels: HashMap::new(),
            scratch: Vec::new(),
        }
    }

    /// Rounded radius in bands for `cascade`
    pub fn radius_for(&self, cascade: usize) -> usize {
        let base = (self.params.radius * RADIUS_SCALE).max(0.0);
        let adaptation = self.params.radius_adaptation.max(0.0);
        (base * adaptation.powi(cascade as i32)).round() as usize
    }

    fn blur(kernel: &[f64], radius: usize, source: &[f32], dest: &mut [f32]) {
        let bands = source.len();
        for (i, out) in dest.iter_mut().enumerate().take(bands) {
            let band_start = i.saturating_sub(radius);
            let kernel_start = (band_start + radius) - i;
            *out = kernel[kernel_start..]
                .iter()
                .zip(&source[band_start..])
                .map(|(k, &v)| k * v as f64)
                .sum::<f64>() as f32;
        }
    }

    fn blur_layers(
        &mut self,
        source: &HandlerData,
        kill_time: Instant,
        scratch: &mut [f32],
    ) -> Result<(), HandlerError> {
        let layers = source.layers_count().min(self.data.layers_count());
        for layer in 0..layers {
            let radius = self.radius_for(layer);
            if radius < 1 {
                for chunk in source.chunks(layer) {
                    self.data.push_layer(layer, chunk)?;
                }
                continue;
            }

            let kernel = self
                .kernels
                .entry(radius)
                .or_insert_with(|| gaussian_kernel(radius));
            for chunk in source.chunks(layer) {
                if Instant::now() > kill_time {
                    self.data.push_layer(layer, chunk)?;
                    continue;
                }
                Self::blur(kernel, radius, chunk, scratch);
                self.data.push_layer(layer, scratch)?;
            }
        }
        Ok(())
    }
}

impl SoundHandler for UniformBlur {
    fn configure(
        &mut self,
        _sample_rate: f64,
        source: Option<&dyn SoundHandler>,
    ) -> Result<DataSize, ConfigError> {
        let handler = self.data.name().to_string();
        let source = source.ok_or(ConfigError::MissingSource {
            handler: handler.clone(),
        })?;
        let weights = source.band_weights().ok_or(ConfigError::InvalidSource {
            handler,
            expected: "BandResampler",
        })?;

        self.weights = Some(weights.clone());
        let size = source.data().size().clone();
        self.data.set_size(size.clone());
        Ok(size)
    }

    fn process(
        &mut self,
        ctx: &ProcessContext<'_>,
        source: Option<&dyn SoundHandler>,
    ) -> Result<(), HandlerError> {
        let Some(source) = source else {
            return Ok(());
        };

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(self.data.size().values_count, 0.0);
        let result = self.blur_layers(source.data(), ctx.kill_time, &mut scratch);
        self.scratch = scratch;
        result
    }

    fn data(&self) -> &HandlerData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut HandlerData {
        &mut self.data
    }

    fn info(&self) -> HandlerInfo {
        HandlerInfo::None
    }

    fn band_weights(&self) -> Option<&Array2<f32>> {
        self.weights.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{BandResampler, BandResamplerParams, FftAnalyzer, FftParams};
    use std::time::Duration;

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(3);
        assert_eq!(kernel.len(), 7);
        assert!((kernel.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((kernel[0] - kernel[6]).abs() < 1e-15);
        assert!(kernel[3] > kernel[2]);
    }

    #[test]
    fn test_radius_per_cascade() {
        let blur = UniformBlur::new("blur", UniformBlurParams::default());
        // 0.25, 0.5, 1, 2, 4
        assert_eq!(blur.radius_for(0), 0);
        assert_eq!(blur.radius_for(1), 1);
        assert_eq!(blur.radius_for(2), 1);
        assert_eq!(blur.radius_for(3), 2);
        assert_eq!(blur.radius_for(4), 4);
    }

    #[test]
    fn test_blur_spreads_impulse() {
        let kernel = gaussian_kernel(1);
        let mut dest = [0.0; 5];
        UniformBlur::blur(&kernel, 1, &[0.0, 0.0, 1.0, 0.0, 0.0], &mut dest);
        assert!((dest[2] as f64 - kernel[1]).abs() < 1e-6);
        assert!((dest[1] as f64 - kernel[0]).abs() < 1e-6);
        assert!((dest[3] as f64 - kernel[2]).abs() < 1e-6);
        assert_eq!(dest[0], 0.0);

        // edges lose the weight that falls outside
        let mut edge = [0.0; 3];
        UniformBlur::blur(&kernel, 1, &[1.0, 1.0, 1.0], &mut edge);
        assert!((edge[1] - 1.0).abs() < 1e-6);
        assert!(edge[0] < 1.0);
    }

    #[test]
    fn test_pipeline_keeps_shape_and_forwards_weights() {
        let mut fft = FftAnalyzer::new(
            "fft",
            FftParams {
                cascades_count: 3,
                ..FftParams::default()
            },
        );
        fft.configure(48000.0, None).unwrap();
        let mut bands = BandResampler::new(
            "bands",
            BandResamplerParams::new("log(16, 40, 16000)".parse().unwrap()),
        );
        bands.configure(48000.0, Some(&fft)).unwrap();

        let mut blur = UniformBlur::new(
            "blur",
            UniformBlurParams {
                radius: 8.0,
                radius_adaptation: 1.0,
            },
        );
        let size = blur.configure(48000.0, Some(&bands)).unwrap();
        assert_eq!(&size, bands.data().size());
        assert_eq!(blur.band_weights(), bands.band_weights());

        let wave: Vec<f32> = (0..4000).map(|i| ((i % 48) as f32 / 48.0) - 0.5).collect();
        let ctx = ProcessContext::new(&wave, far());
        fft.process(&ctx, None).unwrap();
        bands.process(&ctx, Some(&fft)).unwrap();
        blur.process(&ctx, Some(&bands)).unwrap();

        for layer in 0..3 {
            assert_eq!(blur.data().chunk_count(layer), bands.data().chunk_count(layer));
        }
        assert_ne!(blur.data().latest(0), bands.data().latest(0));
    }

    #[test]
    fn test_small_radius_passes_through() {
        let mut fft = FftAnalyzer::new("fft", FftParams::default());
        fft.configure(48000.0, None).unwrap();
        let mut bands = BandResampler::new(
            "bands",
            BandResamplerParams::new("linear(8, 100, 900)".parse().unwrap()),
        );
        bands.configure(48000.0, Some(&fft)).unwrap();
        let mut blur = UniformBlur::new(
            "blur",
            UniformBlurParams {
                radius: 1.0,
                radius_adaptation: 1.0,
            },
        );
        blur.configure(48000.0, Some(&bands)).unwrap();

        let wave: Vec<f32> = (0..960).map(|i| (i as f32 * 0.3).sin()).collect();
        let ctx = ProcessContext::new(&wave, far());
        fft.process(&ctx, None).unwrap();
        bands.process(&ctx, Some(&fft)).unwrap();
        blur.process(&ctx, Some(&bands)).unwrap();
        assert_eq!(blur.data().latest(0), bands.data().latest(0));
    }
}
