//! Resamples a source's chunks to a fixed rate in time, with optional smoothing
//!
//! Output chunks are pushed once per `granularity` of channel audio regardless
//! of how many chunks the source produced, so slow sources are repeated and
//! fast ones are decimated.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{
    ConfigError, DataSize, HandlerData, HandlerError, HandlerInfo, ProcessContext, SoundHandler,
};
use crate::filters::LogarithmicIrf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeResamplerParams {
    /// Output period in milliseconds
    pub granularity_ms: f64,
    pub attack_ms: f64,
    /// Defaults to `attack_ms`
    pub decay_ms: Option<f64>,
}

impl Default for TimeResamplerParams {
    fn default() -> Self {
        Self {
            granularity_ms: 1000.0 / 60.0,
            attack_ms: 0.0,
            decay_ms: None,
        }
    }
}

impl TimeResamplerParams {
    fn attack(&self) -> f64 {
        self.attack_ms.max(0.0)
    }

    fn decay(&self) -> f64 {
        self.decay_ms.unwrap_or(self.attack_ms).max(0.0)
    }
}

#[derive(Debug, Clone, Default)]
struct LayerState {
    /// Source samples represented by chunks not yet accounted for
    data_counter: usize,
    /// Channel samples since the last pushed chunk
    wave_counter: usize,
    low_pass: LogarithmicIrf,
    values: Vec<f32>,
}

pub struct TimeResampler {
    params: TimeResamplerParams,
    data: HandlerData,
    block_size: usize,
    layers: Vec<LayerState>,
    weights: Option<Array2<f32>>,
}

impl TimeResampler {
    pub fn new(name: &str, params: TimeResamplerParams) -> Self {
        Self {
            params,
            data: HandlerData::new(name),
            block_size: 0,
            layers: Vec::new(),
            weights: None,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn process_layer(
        &mut self,
        source: &HandlerData,
        layer: usize,
        wave_size: usize,
    ) -> Result<(), HandlerError> {
        let block_size = self.block_size;
        let eq_wave_size = source.size().eq_wave_sizes[layer];
        let state = &mut self.layers[layer];
        state.wave_counter += wave_size;

        let mut last = source.saved(layer);
        for chunk in source.chunks(layer) {
            state.data_counter += eq_wave_size;
            last = chunk;

            if state.data_counter < block_size {
                state.low_pass.apply_slice(&mut state.values, chunk);
                continue;
            }
            while state.data_counter >= block_size && state.wave_counter >= block_size {
                state.low_pass.apply_slice(&mut state.values, chunk);
                self.data.push_layer(layer, &state.values)?;
                state.data_counter -= block_size;
                state.wave_counter -= block_size;
            }
        }

        // keeps the output rate steady when the source lags behind the wave
        while state.wave_counter >= block_size {
            state.low_pass.apply_slice(&mut state.values, last);
            self.data.push_layer(layer, &state.values)?;
            state.wave_counter -= block_size;
            if state.data_counter >= block_size {
                state.data_counter -= block_size;
            }
        }
        Ok(())
    }
}

impl SoundHandler for TimeResampler {
    fn configure(
        &mut self,
        sample_rate: f64,
        source: Option<&dyn SoundHandler>,
    ) -> Result<DataSize, ConfigError> {
        let handler = self.data.name().to_string();
        let source = source.ok_or(ConfigError::MissingSource {
            handler: handler.clone(),
        })?;
        let source_size = source.data().size().clone();
        if source_size.is_empty() {
            return Err(ConfigError::InvalidSource {
                handler,
                expected: "a handler producing values",
            });
        }

        let granularity_ms = self.params.granularity_ms.max(0.01);
        let block_size = ((granularity_ms * 0.001 * sample_rate) as usize).max(1);

        let values_count = source_size.values_count;
        let layers_changed = self.layers.len() != source_size.layers_count()
            || self.layers.first().map(|state| state.values.len()) != Some(values_count);
        if layers_changed {
            self.layers = vec![
                LayerState {
                    values: vec![0.0; values_count],
                    ..LayerState::default()
                };
                source_size.layers_count()
            ];
        }
        for (state, &eq_wave_size) in self.layers.iter_mut().zip(&source_size.eq_wave_sizes) {
            state.low_pass = LogarithmicIrf::new(
                self.params.attack(),
                self.params.decay(),
                sample_rate,
                eq_wave_size.min(block_size),
            );
        }

        self.block_size = block_size;
        self.weights = source.band_weights().cloned();

        let size = DataSize::new(values_count, vec![block_size; source_size.layers_count()]);
        self.data.set_size(size.clone());
        Ok(size)
    }

    fn process(
        &mut self,
        ctx: &ProcessContext<'_>,
        source: Option<&dyn SoundHandler>,
    ) -> Result<(), HandlerError> {
        let Some(source) = source else {
            return Ok(());
        };
        let source = source.data();
        let layers = source.layers_count().min(self.layers.len());
        for layer in 0..layers {
            self.process_layer(source, layer, ctx.wave.len())?;
        }
        Ok(())
    }

    fn data(&self) -> &HandlerData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut HandlerData {
        &mut self.data
    }

    fn info(&self) -> HandlerInfo {
        HandlerInfo::Block {
            block_size: self.block_size,
            attack_ms: self.params.attack(),
            decay_ms: self.params.decay(),
        }
    }

    fn band_weights(&self) -> Option<&Array2<f32>> {
        self.weights.as_ref()
    }
}
