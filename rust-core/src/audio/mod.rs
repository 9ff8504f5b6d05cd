//! Audio intake: capture queue, channel model and the per-channel mixer

pub mod buffer;
pub mod channel;
pub mod mixer;

pub use buffer::{CaptureBuffer, CaptureConsumer, CaptureProducer};
pub use channel::{Channel, ChannelLayout, ChannelParseError};
pub use mixer::ChannelMixer;
