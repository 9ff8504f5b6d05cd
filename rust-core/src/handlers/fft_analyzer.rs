//! Root handler: runs the FFT cascade over the channel wave

use serde::{Deserialize, Deserializer, Serialize};

use super::{
    ConfigError, DataSize, FftInfo, HandlerData, HandlerError, HandlerInfo, ProcessContext,
    SoundHandler,
};
use crate::spectrum::{next_fast_size, CascadeParams, FftCascade, WindowFunction};

const MIN_FFT_SIZE: usize = 16;
const MAX_CASCADES: usize = 20;

/// FFT analyzer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FftParams {
    /// Requested bin width of cascade 0 in Hz
    pub bin_width: f64,

    /// `n` means each sample is analyzed `n` times; 1 disables overlap
    pub overlap_boost: f64,

    pub cascades_count: usize,

    #[serde(deserialize_with = "lenient_window")]
    pub window: WindowFunction,
}

impl Default for FftParams {
    fn default() -> Self {
        Self {
            bin_width: 100.0,
            overlap_boost: 2.0,
            cascades_count: 5,
            window: WindowFunction::Hann,
        }
    }
}

fn lenient_window<'de, D: Deserializer<'de>>(deserializer: D) -> Result<WindowFunction, D::Error> {
    let descriptor = String::deserialize(deserializer)?;
    Ok(WindowFunction::parse_lenient(&descriptor))
}

pub struct FftAnalyzer {
    params: FftParams,
    data: HandlerData,
    cascade: Option<FftCascade>,
    info: Option<FftInfo>,
    overlap: f64,
}

impl FftAnalyzer {
    pub fn new(name: &str, params: FftParams) -> Self {
        Self {
            params,
            data: HandlerData::new(name),
            cascade: None,
            info: None,
            overlap: 0.0,
        }
    }

    pub fn cascade(&self) -> Option<&FftCascade> {
        self.cascade.as_ref()
    }

    fn cascades_count(&self) -> usize {
        let requested = self.params.cascades_count;
        if !(1..=MAX_CASCADES).contains(&requested) {
            let clamped = requested.clamp(1, MAX_CASCADES);
            log::warn!(
                "{}: cascades_count must be in range [1, {MAX_CASCADES}] but {requested} found, assume {clamped}",
                self.data.name()
            );
            return clamped;
        }
        requested
    }
}

impl SoundHandler for FftAnalyzer {
    fn configure(
        &mut self,
        sample_rate: f64,
        source: Option<&dyn SoundHandler>,
    ) -> Result<DataSize, ConfigError> {
        let name = self.data.name().to_string();
        if source.is_some() {
            return Err(ConfigError::UnexpectedSource { handler: name });
        }
        let bin_width = self.params.bin_width;
        if bin_width.is_nan() || bin_width <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                handler: name,
                reason: format!("bin_width must be > 0 but {bin_width} found"),
            });
        }
        if bin_width <= 1.0 {
            log::warn!("{name}: bin_width {bin_width} is dangerously small, use values > 1");
        }

        let boost = self.params.overlap_boost.max(1.0);
        self.overlap = (boost - 1.0) / boost;

        let fft_size = next_fast_size(MIN_FFT_SIZE.max((sample_rate / bin_width) as usize));
        let input_stride = ((fft_size as f64 * (1.0 - self.overlap)) as usize).clamp(MIN_FFT_SIZE, fft_size);
        let cascades_count = self.cascades_count();

        let params = CascadeParams {
            fft_size,
            input_stride,
            cascades_count,
        };
        let window = self.params.window.generate(fft_size);
        let cascade = match self.cascade.take() {
            Some(mut cascade) => cascade.set_params(params, window).map(|_| cascade),
            None => FftCascade::new(params, window),
        }
        .map_err(|source| ConfigError::Fft {
            handler: name,
            source,
        })?;

        let eq_wave_sizes = (0..cascades_count)
            .map(|index| cascade.equivalent_wave_size(index))
            .collect();
        self.cascade = Some(cascade);
        self.info = Some(FftInfo {
            fft_size,
            sample_rate,
            cascades_count,
        });

        let size = DataSize::new(fft_size / 2, eq_wave_sizes);
        self.data.set_size(size.clone());
        Ok(size)
    }

    fn process(
        &mut self,
        ctx: &ProcessContext<'_>,
        _source: Option<&dyn SoundHandler>,
    ) -> Result<(), HandlerError> {
        let Some(cascade) = self.cascade.as_mut() else {
            return Ok(());
        };
        let data = &mut self.data;
        let sink = |layer: usize, values: &[f32]| data.push_layer(layer, values);
        if ctx.silent {
            cascade.process_silence(ctx.wave.len(), ctx.kill_time, sink)
        } else {
            cascade.process(ctx.wave, ctx.kill_time, sink)
        }
    }

    fn data(&self) -> &HandlerData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut HandlerData {
        &mut self.data
    }

    fn info(&self) -> HandlerInfo {
        match (&self.cascade, &self.info) {
            (Some(cascade), Some(info)) => HandlerInfo::Fft {
                size: info.fft_size,
                cascades_count: info.cascades_count,
                overlap: self.overlap,
                sample_rate: info.sample_rate,
                dc: (0..cascade.cascades_count())
                    .map(|index| cascade.values(index).first().copied().unwrap_or(0.0))
                    .collect(),
            },
            _ => HandlerInfo::None,
        }
    }

    fn fft_info(&self) -> Option<FftInfo> {
        self.info
    }
}
