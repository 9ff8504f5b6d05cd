//! Per-block signal statistics of the channel wave

use serde::{Deserialize, Serialize};

use super::{
    ConfigError, DataSize, HandlerData, HandlerError, HandlerInfo, ProcessContext, SoundHandler,
};
use crate::filters::LogarithmicIrf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Root mean square of the block
    Rms,
    /// Largest absolute sample of the block
    Peak,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockParams {
    /// Block length in milliseconds
    pub resolution_ms: f64,
    pub attack_ms: f64,
    pub decay_ms: f64,
}

impl Default for BlockParams {
    fn default() -> Self {
        Self {
            resolution_ms: 10.0,
            attack_ms: 0.0,
            decay_ms: 0.0,
        }
    }
}

pub struct BlockHandler {
    kind: BlockKind,
    params: BlockParams,
    data: HandlerData,
    block_size: usize,
    filter: LogarithmicIrf,
    counter: usize,
    accumulator: f64,
}

impl BlockHandler {
    pub fn new(name: &str, kind: BlockKind, params: BlockParams) -> Self {
        Self {
            kind,
            params,
            data: HandlerData::new(name),
            block_size: 0,
            filter: LogarithmicIrf::default(),
            counter: 0,
            accumulator: 0.0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn finish_block(&mut self) -> Result<(), HandlerError> {
        let raw = match self.kind {
            BlockKind::Rms => (self.accumulator / self.block_size as f64).sqrt(),
            BlockKind::Peak => self.accumulator,
        };
        let value = self.filter.apply(raw);
        self.counter = 0;
        self.accumulator = 0.0;
        self.data.push_layer(0, &[value as f32])
    }

    fn process_wave(&mut self, wave: &[f32]) -> Result<(), HandlerError> {
        for &sample in wave {
            let x = sample as f64;
            match self.kind {
                BlockKind::Rms => self.accumulator += x * x,
                BlockKind::Peak => self.accumulator = self.accumulator.max(x.abs()),
            }
            self.counter += 1;
            if self.counter >= self.block_size {
                self.finish_block()?;
            }
        }
        Ok(())
    }

    // zeros add nothing to either statistic, only the block boundaries matter
    fn process_silence(&mut self, count: usize) -> Result<(), HandlerError> {
        let mut remaining = count;
        while self.counter + remaining >= self.block_size {
            remaining -= self.block_size - self.counter;
            self.finish_block()?;
        }
        self.counter += remaining;
        Ok(())
    }
}

impl SoundHandler for BlockHandler {
    fn configure(
        &mut self,
        sample_rate: f64,
        source: Option<&dyn SoundHandler>,
    ) -> Result<DataSize, ConfigError> {
        let handler = self.data.name().to_string();
        if source.is_some() {
            return Err(ConfigError::UnexpectedSource { handler });
        }
        let block_size = (sample_rate * self.params.resolution_ms * 0.001) as usize;
        if block_size == 0 {
            return Err(ConfigError::InvalidParameter {
                handler,
                reason: format!(
                    "resolution of {} ms is shorter than one sample",
                    self.params.resolution_ms
                ),
            });
        }

        self.block_size = block_size;
        self.filter = LogarithmicIrf::new(
            self.params.attack_ms,
            self.params.decay_ms,
            sample_rate,
            block_size,
        );
        self.counter = 0;
        self.accumulator = 0.0;

        let size = DataSize::new(1, vec![block_size]);
        self.data.set_size(size.clone());
        Ok(size)
    }

    fn process(
        &mut self,
        ctx: &ProcessContext<'_>,
        _source: Option<&dyn SoundHandler>,
    ) -> Result<(), HandlerError> {
        if self.block_size == 0 {
            return Ok(());
        }
        if ctx.silent {
            self.process_silence(ctx.wave.len())
        } else {
            self.process_wave(ctx.wave)
        }
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
            attack_ms: self.params.attack_ms,
            decay_ms: self.params.decay_ms,
        }
    }
}
