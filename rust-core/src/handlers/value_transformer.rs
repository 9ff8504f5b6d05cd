//! Applies a value transform chain to every chunk of a source

use std::time::Instant;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{
    ConfigError, DataSize, HandlerData, HandlerError, HandlerInfo, ProcessContext, SoundHandler,
};
use crate::filters::{TransformChain, ValueTransform};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueTransformerParams {
    pub transform: ValueTransform,
}

pub struct ValueTransformer {
    params: ValueTransformerParams,
    data: HandlerData,
    /// One chain per layer, so filter steps see a regular chunk spacing
    chains: Vec<TransformChain>,
    weights: Option<Array2<f32>>,
    scratch: Vec<f32>,
}

impl ValueTransformer {
    pub fn new(name: &str, params: ValueTransformerParams) -> Self {
        Self {
            params,
            data: HandlerData::new(name),
            chains: Vec::new(),
            weights: None,
            scratch: Vec::new(),
        }
    }

    fn transform_layers(
        &mut self,
        source: &HandlerData,
        kill_time: Instant,
        scratch: &mut Vec<f32>,
    ) -> Result<(), HandlerError> {
        let layers = source.layers_count().min(self.chains.len());
        for layer in 0..layers {
            for chunk in source.chunks(layer) {
                if Instant::now() > kill_time {
                    self.data.repeat_last(layer)?;
                    continue;
                }
                scratch.clear();
                scratch.extend_from_slice(chunk);
                self.chains[layer].apply(scratch);
                self.data.push_layer(layer, scratch)?;
            }
        }
        Ok(())
    }
}

impl SoundHandler for ValueTransformer {
    fn configure(
        &mut self,
        sample_rate: f64,
        source: Option<&dyn SoundHandler>,
    ) -> Result<DataSize, ConfigError> {
        let handler = self.data.name().to_string();
        let source = source.ok_or(ConfigError::MissingSource { handler })?;

        let size = source.data().size().clone();
        self.chains = size
            .eq_wave_sizes
            .iter()
            .map(|&stride| self.params.transform.instantiate(sample_rate, stride))
            .collect();
        self.weights = source.band_weights().cloned();
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

        let mut scratch = std::mem::take(&mut self.scratch);
        let result = self.transform_layers(source.data(), ctx.kill_time, &mut scratch);
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
        HandlerInfo::None
    }

    fn band_weights(&self) -> Option<&Array2<f32>> {
        self.weights.as_ref()
    }
}
