//! IIR filter primitives, filter chains, decimation and value transforms

pub mod biquad;
pub mod butterworth;
pub mod cascade;
pub mod downsample;
pub mod iir;
pub mod parser;
pub mod smoothing;
pub mod transform;

pub use biquad::{BiQuad, BiQuadCoefficients, BiQuadKind};
pub use cascade::{FilterCascade, FilterCascadeCreator, FilterFactory};
pub use downsample::DownsampleHelper;
pub use iir::{Filter, FilterParameters, IirFilter, IirFilterFixed};
pub use parser::{FilterCascadeParser, FilterParseError};
pub use smoothing::LogarithmicIrf;
pub use transform::{TransformChain, TransformParseError, TransformStep, ValueTransform};
