//! Sound handlers: the processing graph of a channel
//!
//! A handler consumes either the channel's wave or the chunks of one source
//! handler, and writes its own chunks into a [`HandlerData`]. Handlers run in
//! configuration order, so a source always runs before its consumers.

pub mod band_cascade;
pub mod band_resampler;
pub mod block;
pub mod data;
pub mod fft_analyzer;
pub mod loudness;
pub mod time_resampler;
pub mod uniform_blur;
pub mod value_transformer;

use std::time::Instant;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spectrum::FftError;

pub use band_cascade::{BandCascadeParams, BandCascadeTransformer, MixFunction};
pub use band_resampler::{BandParseError, BandResampler, BandResamplerParams, BandTable};
pub use block::{BlockHandler, BlockKind, BlockParams};
pub use data::{DataSize, HandlerData, MAX_BUFFER_SIZE};
pub use fft_analyzer::{FftAnalyzer, FftParams};
pub use loudness::{Loudness, LoudnessParams};
pub use time_resampler::{TimeResampler, TimeResamplerParams};
pub use uniform_blur::{UniformBlur, UniformBlurParams};
pub use value_transformer::{ValueTransformer, ValueTransformerParams};

/// Runtime failure of a handler
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    #[error("handler '{handler}' exceeded {MAX_BUFFER_SIZE} buffered values")]
    TooManyValues { handler: String },
}

/// Failure to build a handler graph
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("handler '{handler}' needs a source")]
    MissingSource { handler: String },

    #[error("handler '{handler}' does not take a source")]
    UnexpectedSource { handler: String },

    #[error("handler '{handler}': source '{source_name}' is not defined before it")]
    UnknownSource { handler: String, source_name: String },

    #[error("handler '{handler}': invalid source, need {expected}")]
    InvalidSource {
        handler: String,
        expected: &'static str,
    },

    #[error("handler name '{0}' is used twice")]
    DuplicateName(String),

    #[error("handler '{handler}': {reason}")]
    InvalidParameter { handler: String, reason: String },

    #[error("handler '{handler}': {source}")]
    Fft { handler: String, source: FftError },
}

/// Inputs of one handler invocation
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext<'a> {
    /// Resampled and filtered channel samples
    pub wave: &'a [f32],
    /// The wave is known to be all zeros
    pub silent: bool,
    pub kill_time: Instant,
}

impl<'a> ProcessContext<'a> {
    pub fn new(wave: &'a [f32], kill_time: Instant) -> Self {
        Self {
            wave,
            silent: false,
            kill_time,
        }
    }
}

/// Static description of an FFT source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FftInfo {
    pub fft_size: usize,
    pub sample_rate: f64,
    pub cascades_count: usize,
}

impl FftInfo {
    /// Bin width of `cascade` in Hz
    pub fn bin_width(&self, cascade: usize) -> f64 {
        self.sample_rate / self.fft_size as f64 / (1u64 << cascade) as f64
    }
}

pub trait SoundHandler: Send {
    /// Prepare for `sample_rate` and return the output shape
    fn configure(
        &mut self,
        sample_rate: f64,
        source: Option<&dyn SoundHandler>,
    ) -> Result<DataSize, ConfigError>;

    /// Append this invocation's chunks; the chunk buffer was drained beforehand
    fn process(
        &mut self,
        ctx: &ProcessContext<'_>,
        source: Option<&dyn SoundHandler>,
    ) -> Result<(), HandlerError>;

    fn data(&self) -> &HandlerData;

    fn data_mut(&mut self) -> &mut HandlerData;

    /// Values published next to the data
    fn info(&self) -> HandlerInfo {
        HandlerInfo::None
    }

    fn fft_info(&self) -> Option<FftInfo> {
        None
    }

    /// Per cascade (rows) and band (columns) weights, for handlers producing bands
    fn band_weights(&self) -> Option<&Array2<f32>> {
        None
    }
}

/// Handler properties as published in a snapshot
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HandlerInfo {
    #[default]
    None,
    Fft {
        size: usize,
        cascades_count: usize,
        overlap: f64,
        sample_rate: f64,
        /// DC magnitude per cascade
        dc: Vec<f32>,
    },
    Bands {
        edges: Vec<f64>,
    },
    Block {
        block_size: usize,
        attack_ms: f64,
        decay_ms: f64,
    },
}

/// `name` or `name N`; a missing index means 1 and index 0 is treated as 1
fn indexed_prop(prop: &str, name: &str) -> Option<usize> {
    let rest = prop.strip_prefix(name)?;
    if rest.is_empty() {
        return Some(1);
    }
    if !rest.starts_with(' ') {
        return None;
    }
    rest.trim().parse::<usize>().ok().map(|index| index.max(1))
}

/// Value at 1-based `index`, or `"0"` when out of range
fn print_indexed<T: ToString>(index: usize, count: usize, value: impl Fn(usize) -> T) -> String {
    if index > count {
        "0".to_string()
    } else {
        value(index - 1).to_string()
    }
}

impl HandlerInfo {
    /// Look up a property by name, case-insensitively
    pub fn prop(&self, name: &str) -> Option<String> {
        let name = name.trim().to_ascii_lowercase();
        match self {
            Self::None => None,
            Self::Fft {
                size,
                cascades_count,
                overlap,
                sample_rate,
                dc,
            } => {
                let cascades = *cascades_count;
                let rate_of = |cascade: usize| sample_rate / (1u64 << cascade) as f64;
                match name.as_str() {
                    "size" => Some(size.to_string()),
                    "cascades count" => Some(cascades.to_string()),
                    "overlap" => Some(overlap.to_string()),
                    _ => {
                        if let Some(index) = indexed_prop(&name, "nyquist frequency") {
                            Some(print_indexed(index, cascades, |c| rate_of(c) * 0.5))
                        } else if let Some(index) = indexed_prop(&name, "dc") {
                            Some(print_indexed(index, cascades, |c| {
                                dc.get(c).copied().unwrap_or(0.0)
                            }))
                        } else {
                            indexed_prop(&name, "resolution").map(|index| {
                                print_indexed(index, cascades, |c| rate_of(c) / *size as f64)
                            })
                        }
                    }
                }
            }
            Self::Bands { edges } => {
                let bands = edges.len().saturating_sub(1);
                if name == "bands count" {
                    return Some(bands.to_string());
                }
                if let Some(index) = indexed_prop(&name, "lower bound") {
                    return Some(print_indexed(index, bands, |b| edges[b]));
                }
                if let Some(index) = indexed_prop(&name, "upper bound") {
                    return Some(print_indexed(index, bands, |b| edges[b + 1]));
                }
                indexed_prop(&name, "central frequency")
                    .map(|index| print_indexed(index, bands, |b| (edges[b] + edges[b + 1]) * 0.5))
            }
            Self::Block {
                block_size,
                attack_ms,
                decay_ms,
            } => match name.as_str() {
                "block size" => Some(block_size.to_string()),
                "attack" => Some(attack_ms.to_string()),
                "decay" => Some(decay_ms.to_string()),
                _ => None,
            },
        }
    }
}

/// Handler type and parameters, tagged by `type` in serialized form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HandlerParams {
    Fft(FftParams),
    BandResampler(BandResamplerParams),
    BandCascade(BandCascadeParams),
    UniformBlur(UniformBlurParams),
    BlockRms(BlockParams),
    BlockPeak(BlockParams),
    Loudness(LoudnessParams),
    ValueTransformer(ValueTransformerParams),
    TimeResampler(TimeResamplerParams),
}

impl HandlerParams {
    /// Instantiate an unconfigured handler
    pub fn build(&self, name: &str) -> Box<dyn SoundHandler> {
        match self {
            Self::Fft(params) => Box::new(FftAnalyzer::new(name, params.clone())),
            Self::BandResampler(params) => Box::new(BandResampler::new(name, params.clone())),
            Self::BandCascade(params) => Box::new(BandCascadeTransformer::new(name, params.clone())),
            Self::UniformBlur(params) => Box::new(UniformBlur::new(name, params.clone())),
            Self::BlockRms(params) => Box::new(BlockHandler::new(name, BlockKind::Rms, params.clone())),
            Self::BlockPeak(params) => {
                Box::new(BlockHandler::new(name, BlockKind::Peak, params.clone()))
            }
            Self::Loudness(params) => Box::new(Loudness::new(name, params.clone())),
            Self::ValueTransformer(params) => Box::new(ValueTransformer::new(name, params.clone())),
            Self::TimeResampler(params) => Box::new(TimeResampler::new(name, params.clone())),
        }
    }
}

/// One named node of the handler graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerSpec {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(flatten)]
    pub params: HandlerParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexed_prop_parsing() {
        assert_eq!(indexed_prop("lower bound", "lower bound"), Some(1));
        assert_eq!(indexed_prop("lower bound 3", "lower bound"), Some(3));
        assert_eq!(indexed_prop("lower bound 0", "lower bound"), Some(1));
        assert_eq!(indexed_prop("lower boundary", "lower bound"), None);
        assert_eq!(indexed_prop("lower bound x", "lower bound"), None);
    }

    #[test]
    fn test_band_props() {
        let info = HandlerInfo::Bands {
            edges: vec![100.0, 200.0, 400.0],
        };
        assert_eq!(info.prop("bands count").as_deref(), Some("2"));
        assert_eq!(info.prop("Lower Bound").as_deref(), Some("100"));
        assert_eq!(info.prop("upper bound 2").as_deref(), Some("400"));
        assert_eq!(info.prop("central frequency 2").as_deref(), Some("300"));
        assert_eq!(info.prop("central frequency 3").as_deref(), Some("0"));
        assert_eq!(info.prop("size"), None);
    }

    #[test]
    fn test_fft_props() {
        let info = HandlerInfo::Fft {
            size: 480,
            cascades_count: 2,
            overlap: 0.5,
            sample_rate: 48000.0,
            dc: vec![0.25, 0.5],
        };
        assert_eq!(info.prop("size").as_deref(), Some("480"));
        assert_eq!(info.prop("cascades count").as_deref(), Some("2"));
        assert_eq!(info.prop("overlap").as_deref(), Some("0.5"));
        assert_eq!(info.prop("nyquist frequency 2").as_deref(), Some("12000"));
        assert_eq!(info.prop("dc 2").as_deref(), Some("0.5"));
        assert_eq!(info.prop("resolution").as_deref(), Some("100"));
        assert_eq!(info.prop("resolution 5").as_deref(), Some("0"));
    }

    #[test]
    fn test_block_props() {
        let info = HandlerInfo::Block {
            block_size: 480,
            attack_ms: 0.0,
            decay_ms: 250.0,
        };
        assert_eq!(info.prop("block size").as_deref(), Some("480"));
        assert_eq!(info.prop("decay").as_deref(), Some("250"));
        assert_eq!(HandlerInfo::None.prop("block size"), None);
    }

    #[test]
    fn test_handler_spec_from_json() {
        let spec: HandlerSpec = serde_json::from_str(
            r#"{ "name": "bands", "source": "fft", "type": "BandResampler", "bands": "log(4, 20, 320)" }"#,
        )
        .unwrap();
        assert_eq!(spec.name, "bands");
        assert_eq!(spec.source.as_deref(), Some("fft"));
        match spec.params {
            HandlerParams::BandResampler(params) => {
                assert_eq!(params.bands.bands_count(), 4);
                assert!(params.cubic_interpolation);
            }
            other => panic!("unexpected params {other:?}"),
        }

        let spec: HandlerSpec = serde_json::from_str(
            r#"{ "name": "smooth", "source": "bands", "type": "TimeResampler", "attack_ms": 80 }"#,
        )
        .unwrap();
        assert_eq!(
            spec.params,
            HandlerParams::TimeResampler(TimeResamplerParams {
                attack_ms: 80.0,
                ..TimeResamplerParams::default()
            })
        );

        let spec: HandlerSpec = serde_json::from_str(
            r#"{ "name": "db", "source": "smooth", "type": "ValueTransformer", "transform": "db, clamp(min -60, max 0)" }"#,
        )
        .unwrap();
        match &spec.params {
            HandlerParams::ValueTransformer(params) => assert_eq!(params.transform.steps().len(), 2),
            other => panic!("unexpected params {other:?}"),
        }
        assert!(serde_json::from_str::<HandlerSpec>(
            r#"{ "name": "db", "type": "ValueTransformer", "transform": "dB(" }"#
        )
        .is_err());

        let spec: HandlerSpec =
            serde_json::from_str(r#"{ "name": "fft", "type": "Fft", "cascades_count": 3 }"#).unwrap();
        assert_eq!(
            spec.params,
            HandlerParams::Fft(FftParams {
                cascades_count: 3,
                ..FftParams::default()
            })
        );
    }
}
