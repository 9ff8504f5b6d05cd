//! Spectral Cascade - streaming multi-resolution spectral analysis
//!
//! Audio arrives in arbitrarily sized pieces through a [`ChannelMixer`].
//! Each [`ProcessingManager`] decimates and filters it per channel and runs a
//! small graph of sound handlers: a cascade of octave-spaced FFTs, a band
//! resampler on top of it, and combiners and statistics after that. Results
//! are published by the [`ProcessingOrchestrator`] as immutable snapshots.
//!
//! Every processing call takes a deadline. Handlers that run out of time
//! repeat their previous values instead of blocking.

pub mod audio;
pub mod filters;
pub mod handlers;
pub mod processing;
pub mod spectrum;

pub use audio::{CaptureBuffer, Channel, ChannelLayout, ChannelMixer};
pub use filters::{DownsampleHelper, FilterCascade, FilterCascadeCreator, FilterCascadeParser};
pub use handlers::{HandlerParams, HandlerSpec, SoundHandler};
pub use processing::{
    OrchestratorConfig, ProcessingConfig, ProcessingManager, ProcessingOrchestrator, SnapshotReader,
};
pub use spectrum::{FftCascade, RealFft, WindowFunction};
