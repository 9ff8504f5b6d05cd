//! One processing unit: resampling, filtering and the handler graph of each channel

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::snapshot::{HandlerSnapshot, UnitSnapshot};
use crate::audio::{Channel, ChannelLayout, ChannelMixer};
use crate::filters::{DownsampleHelper, FilterCascade, FilterCascadeCreator};
use crate::handlers::{ConfigError, HandlerError, HandlerSpec, ProcessContext, SoundHandler};

/// Description of one processing unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Channels to analyze; channels missing from the layout are skipped
    pub channels: Vec<Channel>,
    /// Desired rate after decimation; 0 keeps the device rate
    pub target_rate: f64,
    /// Filter chain applied after decimation
    pub filter: FilterCascadeCreator,
    /// Handlers in processing order; a source must come before its consumers
    pub handlers: Vec<HandlerSpec>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            channels: vec![Channel::Auto],
            target_rate: 44100.0,
            filter: FilterCascadeCreator::default(),
            handlers: Vec::new(),
        }
    }
}

/// Integer decimation factor that brings `sample_rate` closest to `target_rate` from above
pub fn resampling_divider(sample_rate: f64, target_rate: f64) -> usize {
    if target_rate <= 0.0 {
        return 1;
    }
    let ratio = sample_rate / target_rate;
    if ratio > 1.0 {
        ratio as usize
    } else {
        1
    }
}

/// Index of each handler's source inside the handler list
fn resolve_sources(specs: &[HandlerSpec]) -> Result<Vec<Option<usize>>, ConfigError> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut sources = Vec::with_capacity(specs.len());
    for (index, spec) in specs.iter().enumerate() {
        let source = match &spec.source {
            Some(name) => Some(*positions.get(name.as_str()).ok_or_else(|| {
                ConfigError::UnknownSource {
                    handler: spec.name.clone(),
                    source_name: name.clone(),
                }
            })?),
            None => None,
        };
        if positions.insert(&spec.name, index).is_some() {
            return Err(ConfigError::DuplicateName(spec.name.clone()));
        }
        sources.push(source);
    }
    Ok(sources)
}

struct ChannelUnit {
    downsampler: DownsampleHelper,
    filter: FilterCascade,
    handlers: Vec<Box<dyn SoundHandler>>,
}

impl ChannelUnit {
    fn build(
        config: &ProcessingConfig,
        sources: &[Option<usize>],
        divider: usize,
        sample_rate: f64,
    ) -> Result<Self, ConfigError> {
        let mut handlers: Vec<Box<dyn SoundHandler>> = Vec::with_capacity(config.handlers.len());
        for (spec, &source) in config.handlers.iter().zip(sources) {
            let mut handler = spec.params.build(&spec.name);
            let source = source.map(|index| handlers[index].as_ref());
            handler.configure(sample_rate, source)?;
            handlers.push(handler);
        }

        Ok(Self {
            downsampler: DownsampleHelper::new(divider),
            filter: config.filter.instantiate(sample_rate),
            handlers,
        })
    }

    fn run_handlers(
        &mut self,
        ctx: &ProcessContext<'_>,
        sources: &[Option<usize>],
    ) -> Result<(), HandlerError> {
        for index in 0..self.handlers.len() {
            let (before, rest) = self.handlers.split_at_mut(index);
            let handler = &mut rest[0];
            let source = sources[index].map(|source| before[source].as_ref());
            handler.data_mut().clear_chunks();
            handler.process(ctx, source)?;
        }
        Ok(())
    }
}

/// Runs the handler graph of every configured channel
pub struct ProcessingManager {
    divider: usize,
    sample_rate: f64,
    sources: Vec<Option<usize>>,
    channels: BTreeMap<Channel, ChannelUnit>,
    wave: Vec<f32>,
}

impl ProcessingManager {
    /// Build a unit for audio arriving at `sample_rate` in `layout`.
    ///
    /// A configuration error is logged and leaves the unit without channels.
    pub fn new(config: &ProcessingConfig, sample_rate: f64, layout: &ChannelLayout) -> Self {
        let divider = resampling_divider(sample_rate, config.target_rate);
        let mut manager = Self {
            divider,
            sample_rate: sample_rate / divider as f64,
            sources: Vec::new(),
            channels: BTreeMap::new(),
            wave: Vec::new(),
        };
        if let Err(err) = manager.build(config, layout) {
            log::error!("invalid processing configuration: {}", err);
            manager.sources.clear();
            manager.channels.clear();
        }
        manager
    }

    fn build(&mut self, config: &ProcessingConfig, layout: &ChannelLayout) -> Result<(), ConfigError> {
        self.sources = resolve_sources(&config.handlers)?;
        for &channel in &config.channels {
            if channel != Channel::Auto && !layout.contains(channel) {
                log::debug!("channel {} is not in layout '{}'", channel, layout.name());
                continue;
            }
            if self.channels.contains_key(&channel) {
                continue;
            }
            let unit = ChannelUnit::build(config, &self.sources, self.divider, self.sample_rate)?;
            self.channels.insert(channel, unit);
        }
        Ok(())
    }

    /// Rate the handlers see, after decimation
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn divider(&self) -> usize {
        self.divider
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.channels.keys().copied()
    }

    /// Handlers per channel
    pub fn handler_count(&self) -> usize {
        self.channels
            .values()
            .next()
            .map_or(0, |unit| unit.handlers.len())
    }

    pub fn is_active(&self) -> bool {
        self.handler_count() > 0
    }

    /// Feed everything buffered in `mixer` through the handlers of every channel.
    ///
    /// Overflowing a handler's buffer disables the whole unit and empties its
    /// part of the snapshot.
    pub fn process(&mut self, mixer: &ChannelMixer, kill_time: Instant, snapshot: &mut UnitSnapshot) {
        if let Err(err) = self.process_channels(mixer, kill_time, snapshot) {
            log::error!("{}, processing unit disabled", err);
            self.channels.clear();
            snapshot.clear();
        }
    }

    fn process_channels(
        &mut self,
        mixer: &ChannelMixer,
        kill_time: Instant,
        snapshot: &mut UnitSnapshot,
    ) -> Result<(), HandlerError> {
        snapshot.retain(|channel, _| self.channels.contains_key(channel));

        for (&channel, unit) in self.channels.iter_mut() {
            let Some(input) = mixer.channel(channel) else {
                continue;
            };

            if self.divider > 1 {
                let ready = unit.downsampler.push_data(input);
                self.wave.resize(ready, 0.0);
                let written = unit.downsampler.downsample(&mut self.wave);
                self.wave.truncate(written);
            } else {
                self.wave.clear();
                self.wave.extend_from_slice(input);
            }
            unit.filter.apply_inplace(&mut self.wave);

            let ctx = ProcessContext {
                wave: &self.wave,
                silent: mixer.is_silent(),
                kill_time,
            };
            unit.run_handlers(&ctx, &self.sources)?;

            let channel_snapshot = snapshot.entry(channel).or_default();
            channel_snapshot.clear();
            for handler in &unit.handlers {
                channel_snapshot.insert(
                    handler.data().name().to_string(),
                    HandlerSnapshot::capture(handler.data(), handler.info()),
                );
            }
        }
        Ok(())
    }

    /// Named handler of `channel`; its data holds the chunks of the last [`Self::process`] call
    pub fn handler(&self, channel: Channel, handler: &str) -> Option<&dyn SoundHandler> {
        self.channels
            .get(&channel)?
            .handlers
            .iter()
            .find(|h| h.data().name() == handler)
            .map(|h| h.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{FftParams, HandlerParams};
    use std::time::Duration;

    fn spec(name: &str, source: Option<&str>, params: HandlerParams) -> HandlerSpec {
        HandlerSpec {
            name: name.to_string(),
            source: source.map(str::to_string),
            params,
        }
    }

    fn fft_config() -> ProcessingConfig {
        ProcessingConfig {
            channels: vec![Channel::Auto, Channel::FrontLeft, Channel::Center],
            target_rate: 24000.0,
            filter: FilterCascadeCreator::default(),
            handlers: vec![
                spec("fft", None, HandlerParams::Fft(FftParams::default())),
                spec(
                    "rms",
                    None,
                    HandlerParams::BlockRms(crate::handlers::BlockParams::default()),
                ),
            ],
        }
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_resampling_divider() {
        assert_eq!(resampling_divider(48000.0, 44100.0), 1);
        assert_eq!(resampling_divider(96000.0, 44100.0), 2);
        assert_eq!(resampling_divider(192000.0, 44100.0), 4);
        assert_eq!(resampling_divider(22050.0, 44100.0), 1);
        assert_eq!(resampling_divider(48000.0, 0.0), 1);
    }

    #[test]
    fn test_source_resolution() {
        let fft = || HandlerParams::Fft(FftParams::default());
        let sources = resolve_sources(&[spec("a", None, fft()), spec("b", Some("a"), fft())]).unwrap();
        assert_eq!(sources, vec![None, Some(0)]);

        let err = resolve_sources(&[spec("b", Some("a"), fft()), spec("a", None, fft())]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSource { .. }));

        let err = resolve_sources(&[spec("a", None, fft()), spec("a", None, fft())]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(name) if name == "a"));
    }

    #[test]
    fn test_channels_follow_layout() {
        let manager = ProcessingManager::new(&fft_config(), 48000.0, &ChannelLayout::stereo());
        let channels: Vec<Channel> = manager.channels().collect();
        assert_eq!(channels, vec![Channel::FrontLeft, Channel::Auto]);
        assert_eq!(manager.divider(), 2);
        assert_eq!(manager.sample_rate(), 24000.0);
        assert_eq!(manager.handler_count(), 2);
    }

    #[test]
    fn test_invalid_handler_leaves_unit_empty() {
        let mut config = fft_config();
        config.handlers.push(spec(
            "blur",
            Some("fft"),
            HandlerParams::UniformBlur(crate::handlers::UniformBlurParams::default()),
        ));
        let manager = ProcessingManager::new(&config, 48000.0, &ChannelLayout::stereo());
        assert!(!manager.is_active());
        assert_eq!(manager.channels().count(), 0);
    }

    #[test]
    fn test_process_fills_snapshot() {
        let mut manager = ProcessingManager::new(&fft_config(), 48000.0, &ChannelLayout::stereo());
        let mut mixer = ChannelMixer::new(ChannelLayout::stereo(), 48000.0);
        let wave: Vec<f32> = (0..9600)
            .flat_map(|i| {
                let x = (i as f32 * 0.05).sin() * 0.5;
                [x, x]
            })
            .collect();
        mixer.push_interleaved(&wave);

        let mut snapshot = UnitSnapshot::new();
        manager.process(&mixer, far(), &mut snapshot);

        assert_eq!(snapshot.len(), 2);
        let auto = &snapshot[&Channel::Auto];
        assert_eq!(auto["fft"].values.nrows(), 5);
        assert_eq!(auto["fft"].info.prop("size").as_deref(), Some("240"));
        // 4800 decimated samples in blocks of 240
        let rms = manager.handler(Channel::Auto, "rms").unwrap();
        assert_eq!(rms.data().chunk_count(0), 20);
        assert!(auto["rms"].values[(0, 0)] > 0.2);
    }
}
