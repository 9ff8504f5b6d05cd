//! Resamples FFT bins of every cascade onto a fixed band table
//!
//! Band grammar: `linear(count, min, max)`, `log(count, min, max)` or
//! `custom(f1, f2, ...)`. Arguments may be separated by commas or spaces.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    ConfigError, DataSize, FftInfo, HandlerData, HandlerError, HandlerInfo, ProcessContext,
    SoundHandler,
};
use crate::spectrum::MonotoneCubic;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BandParseError {
    #[error("malformed band description: {0}")]
    Syntax(String),

    #[error("unknown band type '{0}', expected linear, log or custom")]
    UnknownKind(String),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("{kind} must have 3 arguments (count, min, max) but {found} found")]
    ArgumentCount { kind: String, found: usize },

    #[error("band count must be >= 1")]
    InvalidCount,

    #[error("max must be > min but {min} and {max} found")]
    InvalidRange { min: f64, max: f64 },

    #[error("frequencies must be > 0 but {0} found")]
    NonPositive(f64),

    #[error("need at least 2 distinct frequencies but {0} found")]
    TooFewEdges(usize),
}

/// Sorted, de-duplicated band edges; `N + 1` edges describe `N` bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BandTable {
    source: String,
    edges: Vec<f64>,
}

impl BandTable {
    /// Build from raw frequencies: sorts them and drops near-duplicates
    pub fn from_edges(mut freqs: Vec<f64>) -> Result<Self, BandParseError> {
        freqs.sort_by(f64::total_cmp);

        let mut edges: Vec<f64> = Vec::with_capacity(freqs.len());
        for value in freqs {
            if value.is_nan() || value <= 0.0 {
                return Err(BandParseError::NonPositive(value));
            }
            if edges.last().is_some_and(|&last| value - last < f32::EPSILON as f64) {
                continue;
            }
            edges.push(value);
        }

        if edges.len() < 2 {
            return Err(BandParseError::TooFewEdges(edges.len()));
        }

        let source = format!(
            "custom({})",
            edges.iter().map(f64::to_string).collect::<Vec<_>>().join(", ")
        );
        Ok(Self { source, edges })
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn bands_count(&self) -> usize {
        self.edges.len() - 1
    }

    /// Lower and upper edge of `band`
    pub fn band(&self, band: usize) -> (f64, f64) {
        (self.edges[band], self.edges[band + 1])
    }
}

fn parse_number(token: &str) -> Result<f64, BandParseError> {
    token
        .parse::<f64>()
        .map_err(|_| BandParseError::InvalidNumber(token.to_string()))
}

impl FromStr for BandTable {
    type Err = BandParseError;

    fn from_str(descriptor: &str) -> Result<Self, Self::Err> {
        let trimmed = descriptor.trim();
        let syntax = || BandParseError::Syntax(trimmed.to_string());

        let open = trimmed.find('(').ok_or_else(syntax)?;
        let inner = trimmed[open + 1..].strip_suffix(')').ok_or_else(syntax)?;
        let kind = trimmed[..open].trim().to_ascii_lowercase();
        let args: Vec<&str> = inner
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .collect();

        let freqs = match kind.as_str() {
            "custom" => args.iter().map(|token| parse_number(token)).collect::<Result<Vec<_>, _>>()?,
            "linear" | "log" => {
                if args.len() != 3 {
                    return Err(BandParseError::ArgumentCount {
                        kind,
                        found: args.len(),
                    });
                }
                let count = args[0]
                    .parse::<usize>()
                    .map_err(|_| BandParseError::InvalidNumber(args[0].to_string()))?;
                if count < 1 {
                    return Err(BandParseError::InvalidCount);
                }
                let min = parse_number(args[1])?;
                let max = parse_number(args[2])?;
                if min <= 0.0 {
                    return Err(BandParseError::NonPositive(min));
                }
                if max <= min {
                    return Err(BandParseError::InvalidRange { min, max });
                }

                if kind == "linear" {
                    let delta = max - min;
                    (0..=count)
                        .map(|i| min + delta * i as f64 / count as f64)
                        .collect()
                } else {
                    let step = (max / min).log2() / count as f64;
                    (0..=count).map(|i| min * (step * i as f64).exp2()).collect()
                }
            }
            _ => return Err(BandParseError::UnknownKind(kind)),
        };

        let mut table = Self::from_edges(freqs)?;
        table.source = trimmed.to_string();
        Ok(table)
    }
}

impl fmt::Display for BandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for BandTable {
    type Error = BandParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BandTable> for String {
    fn from(table: BandTable) -> Self {
        table.source
    }
}

fn default_cubic_interpolation() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandResamplerParams {
    pub bands: BandTable,

    /// Interpolate bands narrower than a bin instead of picking the nearest bin
    #[serde(default = "default_cubic_interpolation")]
    pub cubic_interpolation: bool,
}

impl BandResamplerParams {
    pub fn new(bands: BandTable) -> Self {
        Self {
            bands,
            cubic_interpolation: true,
        }
    }
}

pub struct BandResampler {
    params: BandResamplerParams,
    data: HandlerData,
    fft: Option<FftInfo>,
    // rows are cascades, columns are bands
    weights: Array2<f32>,
    cubic: MonotoneCubic,
    scratch: Vec<f32>,
}

impl BandResampler {
    pub fn new(name: &str, params: BandResamplerParams) -> Self {
        Self {
            params,
            data: HandlerData::new(name),
            fft: None,
            weights: Array2::zeros((0, 0)),
            cubic: MonotoneCubic::default(),
            scratch: Vec::new(),
        }
    }

    pub fn bands(&self) -> &BandTable {
        &self.params.bands
    }

    /// Fraction of each band covered by each cascade's bin range
    fn compute_weights(&mut self, info: &FftInfo) {
        let table = &self.params.bands;
        let bins = (info.fft_size / 2) as f64;
        self.weights = Array2::from_shape_fn((info.cascades_count, table.bands_count()), |(cascade, band)| {
            let bin_width = info.bin_width(cascade);
            let (low, high) = table.band(band);
            let covered_low = low.max(-bin_width * 0.5);
            let covered_high = high.min((bins - 0.5) * bin_width);
            if covered_high <= covered_low {
                0.0
            } else {
                ((covered_high - covered_low) / (high - low)) as f32
            }
        });
    }

    /// Compute one value per band from the magnitudes of one cascade.
    ///
    /// Bin `j` is centred at `j * bin_width`. A band averages the bins whose
    /// centres lie in `[low, high)`; bands narrower than a bin are
    /// interpolated at their centre when cubic interpolation is on, or take
    /// the nearest bin otherwise. Bands above the last bin are zero.
    pub fn sample_cascade(&mut self, source: &[f32], dest: &mut [f32], bin_width: f64) {
        dest.fill(0.0);
        let bins = source.len();
        if bins == 0 || bin_width <= 0.0 {
            return;
        }

        let cubic_enabled = self.params.cubic_interpolation;
        let mut fitted = false;
        let table = &self.params.bands;

        for (band, out) in dest.iter_mut().enumerate().take(table.bands_count()) {
            let (low, high) = table.band(band);

            if cubic_enabled && high - low < bin_width {
                if !fitted {
                    self.cubic.fit(source);
                    fitted = true;
                }
                let center = (low + high) * 0.5 / bin_width;
                *out = self.cubic.value_at(center).max(0.0) as f32;
                continue;
            }

            let first = (low / bin_width).ceil() as usize;
            if first >= bins {
                break;
            }
            let end = ((high / bin_width).ceil() as usize).min(bins);
            *out = if end > first {
                source[first..end].iter().sum::<f32>() / (end - first) as f32
            } else {
                let nearest = ((low + high) * 0.5 / bin_width).round() as usize;
                source[nearest.min(bins - 1)]
            };
        }
    }

    fn resample_layers(
        &mut self,
        source: &HandlerData,
        info: FftInfo,
        kill_time: Instant,
        scratch: &mut [f32],
    ) -> Result<(), HandlerError> {
        let layers = source.layers_count().min(self.data.layers_count());
        for layer in 0..layers {
            let bin_width = info.bin_width(layer);
            for chunk in source.chunks(layer) {
                if Instant::now() > kill_time {
                    self.data.repeat_last(layer)?;
                    continue;
                }
                self.sample_cascade(chunk, scratch, bin_width);
                self.data.push_layer(layer, scratch)?;
            }
        }
        Ok(())
    }
}

impl SoundHandler for BandResampler {
    fn configure(
        &mut self,
        _sample_rate: f64,
        source: Option<&dyn SoundHandler>,
    ) -> Result<DataSize, ConfigError> {
        let handler = self.data.name().to_string();
        let source = source.ok_or(ConfigError::MissingSource {
            handler: handler.clone(),
        })?;
        let info = source.fft_info().ok_or(ConfigError::InvalidSource {
            handler,
            expected: "FftAnalyzer",
        })?;

        self.fft = Some(info);
        self.compute_weights(&info);

        let size = DataSize::new(
            self.params.bands.bands_count(),
            source.data().size().eq_wave_sizes.clone(),
        );
        self.data.set_size(size.clone());
        Ok(size)
    }

    fn process(
        &mut self,
        ctx: &ProcessContext<'_>,
        source: Option<&dyn SoundHandler>,
    ) -> Result<(), HandlerError> {
        let (Some(source), Some(info)) = (source, self.fft) else {
            return Ok(());
        };

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(self.params.bands.bands_count(), 0.0);
        let result = self.resample_layers(source.data(), info, ctx.kill_time, &mut scratch);
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
        HandlerInfo::Bands {
            edges: self.params.bands.edges().to_vec(),
        }
    }

    fn band_weights(&self) -> Option<&Array2<f32>> {
        self.fft.is_some().then_some(&self.weights)
    }
}
