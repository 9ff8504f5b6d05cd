//! Per-channel processing units and the snapshot they publish

pub mod manager;
pub mod orchestrator;
pub mod snapshot;

pub use manager::{resampling_divider, ProcessingConfig, ProcessingManager};
pub use orchestrator::{OrchestratorConfig, ProcessingOrchestrator};
pub use snapshot::{
    ChannelSnapshot, HandlerSnapshot, PublishedSnapshot, Snapshot, SnapshotReader, UnitSnapshot,
};
