//! Named processing units sharing one deadline and one published snapshot

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::manager::{ProcessingConfig, ProcessingManager};
use super::snapshot::{PublishedSnapshot, Snapshot, SnapshotReader, SnapshotSlot};
use crate::audio::{ChannelLayout, ChannelMixer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Time budget of one `process` call; handlers reuse stale results past it
    pub kill_timeout_ms: f64,
    /// Log a warning when a unit takes longer than this
    pub warn_time_ms: Option<f64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            kill_timeout_ms: 33.0,
            warn_time_ms: None,
        }
    }
}

impl OrchestratorConfig {
    fn kill_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.kill_timeout_ms.max(0.0) / 1000.0)
    }
}

struct Unit {
    config: ProcessingConfig,
    manager: ProcessingManager,
}

pub struct ProcessingOrchestrator {
    config: OrchestratorConfig,
    layout: ChannelLayout,
    sample_rate: f64,
    units: BTreeMap<String, Unit>,
    snapshot: Snapshot,
    version: u64,
    slot: SnapshotSlot,
}

impl ProcessingOrchestrator {
    pub fn new(config: OrchestratorConfig, layout: ChannelLayout, sample_rate: f64) -> Self {
        Self {
            config,
            layout,
            sample_rate,
            units: BTreeMap::new(),
            snapshot: Snapshot::default(),
            version: 0,
            slot: SnapshotSlot::default(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: OrchestratorConfig) {
        self.config = config;
    }

    /// Replace the whole unit set; units not named in `units` are dropped
    pub fn patch(&mut self, units: &BTreeMap<String, ProcessingConfig>) {
        self.units.retain(|name, _| units.contains_key(name));
        self.snapshot.retain_units(|name| units.contains_key(name));
        for (name, config) in units {
            self.set_unit(name, config.clone());
        }
    }

    /// Create or rebuild one unit
    pub fn set_unit(&mut self, name: &str, config: ProcessingConfig) {
        let manager = ProcessingManager::new(&config, self.sample_rate, &self.layout);
        if !manager.is_active() {
            log::warn!("processing unit '{}' has no active handlers", name);
        }
        self.snapshot.unit_mut(name).clear();
        self.units.insert(name.to_string(), Unit { config, manager });
    }

    pub fn remove_unit(&mut self, name: &str) {
        self.units.remove(name);
        self.snapshot.remove_unit(name);
    }

    /// Rebuild every unit for a new device format
    pub fn set_format(&mut self, layout: ChannelLayout, sample_rate: f64) {
        self.layout = layout;
        self.sample_rate = sample_rate;
        for unit in self.units.values_mut() {
            unit.manager = ProcessingManager::new(&unit.config, sample_rate, &self.layout);
        }
    }

    pub fn unit(&self, name: &str) -> Option<&ProcessingManager> {
        self.units.get(name).map(|unit| &unit.manager)
    }

    pub fn unit_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.units.keys().map(String::as_str)
    }

    /// Run every unit over the mixer's buffers, then clear them
    pub fn process(&mut self, mixer: &mut ChannelMixer) {
        let kill_time = Instant::now() + self.config.kill_timeout();
        self.process_until(mixer, kill_time);
    }

    /// Same as [`Self::process`] with an explicit deadline
    pub fn process_until(&mut self, mixer: &mut ChannelMixer, kill_time: Instant) {
        for (name, unit) in self.units.iter_mut() {
            let started = Instant::now();
            unit.manager.process(mixer, kill_time, self.snapshot.unit_mut(name));

            if let Some(warn_time_ms) = self.config.warn_time_ms {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                if elapsed_ms > warn_time_ms {
                    log::warn!(
                        "processing unit '{}' took {:.2} ms, {:.2} ms over {} ms",
                        name,
                        elapsed_ms,
                        elapsed_ms - warn_time_ms,
                        warn_time_ms
                    );
                }
            }
        }
        mixer.reset_buffers();
    }

    /// Publish the current values as a new generation
    pub fn exchange_data(&mut self) -> u64 {
        self.version += 1;
        self.slot.publish(PublishedSnapshot {
            version: self.version,
            snapshot: self.snapshot.clone(),
        });
        self.version
    }

    /// Live, unpublished values
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader::new(self.slot.clone())
    }
}
