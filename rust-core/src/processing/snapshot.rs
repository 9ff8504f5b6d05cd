//! Published handler values
//!
//! The processing thread fills a [`Snapshot`] in place and hands a frozen
//! copy to readers as one [`PublishedSnapshot`] generation. Readers hold an
//! `Arc` to a generation, so they never observe a half-written tree.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use ndarray::Array2;

use crate::audio::Channel;
use crate::handlers::{HandlerData, HandlerInfo};

/// Newest values of one handler
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerSnapshot {
    /// Layers as rows, one chunk each
    pub values: Array2<f32>,
    pub info: HandlerInfo,
}

impl HandlerSnapshot {
    /// Copy the newest chunk of every layer
    pub fn capture(data: &HandlerData, info: HandlerInfo) -> Self {
        let layers = data.layers_count();
        let count = data.size().values_count;
        let values = Array2::from_shape_fn((layers, count), |(layer, index)| {
            data.latest(layer).get(index).copied().unwrap_or(0.0)
        });
        Self { values, info }
    }

    pub fn value(&self, layer: usize, index: usize) -> Option<f32> {
        self.values.get((layer, index)).copied()
    }
}

/// Handlers of one channel by name
pub type ChannelSnapshot = BTreeMap<String, HandlerSnapshot>;

/// Channels of one processing unit
pub type UnitSnapshot = BTreeMap<Channel, ChannelSnapshot>;

/// Processing unit name → channel → handler name → values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    units: BTreeMap<String, UnitSnapshot>,
}

impl Snapshot {
    pub fn unit(&self, name: &str) -> Option<&UnitSnapshot> {
        self.units.get(name)
    }

    pub fn unit_mut(&mut self, name: &str) -> &mut UnitSnapshot {
        self.units.entry(name.to_string()).or_default()
    }

    pub fn remove_unit(&mut self, name: &str) {
        self.units.remove(name);
    }

    /// Drop every unit `keep` rejects
    pub fn retain_units(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.units.retain(|name, _| keep(name));
    }

    pub fn handler(&self, unit: &str, channel: Channel, handler: &str) -> Option<&HandlerSnapshot> {
        self.units.get(unit)?.get(&channel)?.get(handler)
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// One immutable generation of the snapshot
#[derive(Debug, Clone, Default)]
pub struct PublishedSnapshot {
    /// Incremented on every exchange; 0 until the first one
    pub version: u64,
    pub snapshot: Snapshot,
}

/// Shared slot holding the current generation
#[derive(Debug, Clone, Default)]
pub(crate) struct SnapshotSlot {
    current: Arc<Mutex<Arc<PublishedSnapshot>>>,
}

impl SnapshotSlot {
    pub(crate) fn publish(&self, published: PublishedSnapshot) {
        let published = Arc::new(published);
        match self.current.lock() {
            Ok(mut current) => *current = published,
            Err(poisoned) => *poisoned.into_inner() = published,
        }
    }

    pub(crate) fn load(&self) -> Arc<PublishedSnapshot> {
        match self.current.lock() {
            Ok(current) => Arc::clone(&current),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

/// Cheap, cloneable read handle, safe to move to another thread
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    slot: SnapshotSlot,
}

impl SnapshotReader {
    pub(crate) fn new(slot: SnapshotSlot) -> Self {
        Self { slot }
    }

    /// The generation published last
    pub fn current(&self) -> Arc<PublishedSnapshot> {
        self.slot.load()
    }

    pub fn version(&self) -> u64 {
        self.slot.load().version
    }

    /// Value `index` of the handler's first layer
    pub fn value(&self, unit: &str, channel: Channel, handler: &str, index: usize) -> Option<f32> {
        self.layer_value(unit, channel, handler, 0, index)
    }

    pub fn layer_value(
        &self,
        unit: &str,
        channel: Channel,
        handler: &str,
        layer: usize,
        index: usize,
    ) -> Option<f32> {
        self.slot
            .load()
            .snapshot
            .handler(unit, channel, handler)?
            .value(layer, index)
    }

    /// Named handler property, see [`HandlerInfo::prop`]
    pub fn prop(&self, unit: &str, channel: Channel, handler: &str, name: &str) -> Option<String> {
        self.slot
            .load()
            .snapshot
            .handler(unit, channel, handler)?
            .info
            .prop(name)
    }
}
