//! Gated mean-square loudness over a sliding window of short blocks

use serde::{Deserialize, Serialize};

use super::{
    ConfigError, DataSize, HandlerData, HandlerError, HandlerInfo, ProcessContext, SoundHandler,
};
use crate::filters::{TransformChain, ValueTransform};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoudnessParams {
    /// Applied to each published value
    pub transform: ValueTransform,
    /// Fraction of the window that gating may discard, in [0, 1]
    pub gating_limit: f64,
    /// Published values per second, in [0.01, 60]
    pub updates_per_second: f64,
    /// Window length in milliseconds, in [0.01, 10000]
    pub time_window_ms: f64,
    /// Blocks quieter than the previous value by more than this are gated, in [-70, 0]
    pub gating_db: f64,
    /// Count all-zero blocks even when they fall below the gate
    pub ignore_gating_for_silence: bool,
}

impl Default for LoudnessParams {
    fn default() -> Self {
        Self {
            transform: ValueTransform::default(),
            gating_limit: 0.5,
            updates_per_second: 20.0,
            time_window_ms: 1000.0,
            gating_db: -20.0,
            ignore_gating_for_silence: true,
        }
    }
}

pub struct Loudness {
    params: LoudnessParams,
    data: HandlerData,
    chain: TransformChain,
    block_size: usize,
    /// Energy sums of the most recent blocks, as a ring
    blocks: Vec<f64>,
    next_block: usize,
    min_blocks: usize,
    gating_coefficient: f64,
    counter: usize,
    accumulator: f64,
    previous: f64,
}

impl Loudness {
    pub fn new(name: &str, params: LoudnessParams) -> Self {
        Self {
            params,
            data: HandlerData::new(name),
            chain: TransformChain::default(),
            block_size: 0,
            blocks: Vec::new(),
            next_block: 0,
            min_blocks: 0,
            gating_coefficient: 0.0,
            counter: 0,
            accumulator: 0.0,
            previous: 0.0,
        }
    }

    fn finish_block(&mut self) -> Result<(), HandlerError> {
        self.blocks[self.next_block] = self.accumulator;
        self.next_block = (self.next_block + 1) % self.blocks.len();
        self.counter = 0;
        self.accumulator = 0.0;

        let gate = self.previous * self.gating_coefficient;
        let ignore_silence = self.params.ignore_gating_for_silence;
        let (sum, counted) = self
            .blocks
            .iter()
            .filter(|&&energy| (ignore_silence && energy == 0.0) || energy >= gate)
            .fold((0.0, 0usize), |(sum, count), &energy| (sum + energy, count + 1));

        let value = if counted == 0 {
            0.0
        } else {
            sum / counted.max(self.min_blocks) as f64 / self.block_size as f64
        };
        self.previous = value;
        let published = self.chain.apply_value(value as f32);
        self.data.push_layer(0, &[published])
    }

    fn process_wave(&mut self, wave: &[f32]) -> Result<(), HandlerError> {
        for &sample in wave {
            let x = sample as f64;
            self.accumulator += x * x;
            self.counter += 1;
            if self.counter >= self.block_size {
                self.finish_block()?;
            }
        }
        Ok(())
    }

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

impl SoundHandler for Loudness {
    fn configure(
        &mut self,
        sample_rate: f64,
        source: Option<&dyn SoundHandler>,
    ) -> Result<DataSize, ConfigError> {
        let handler = self.data.name().to_string();
        if source.is_some() {
            return Err(ConfigError::UnexpectedSource { handler });
        }

        let updates_per_second = self.params.updates_per_second.clamp(0.01, 60.0);
        let time_window_ms = self.params.time_window_ms.clamp(0.01, 10000.0);
        let gating_limit = self.params.gating_limit.clamp(0.0, 1.0);
        let gating_db = self.params.gating_db.clamp(-70.0, 0.0);

        let block_size = (sample_rate / updates_per_second) as usize;
        if block_size == 0 {
            return Err(ConfigError::InvalidParameter {
                handler,
                reason: format!("{updates_per_second} updates per second exceed the sample rate"),
            });
        }
        let blocks_count = ((time_window_ms * 0.001 * updates_per_second) as usize).max(1);

        self.block_size = block_size;
        self.blocks = vec![0.0; blocks_count];
        self.next_block = 0;
        self.min_blocks = (blocks_count as f64 * (1.0 - gating_limit)) as usize;
        self.gating_coefficient = 10f64.powf(gating_db / 20.0) * block_size as f64;
        self.chain = self.params.transform.instantiate(sample_rate, block_size);
        self.counter = 0;
        self.accumulator = 0.0;
        self.previous = 0.0;

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
            attack_ms: 0.0,
            decay_ms: 0.0,
        }
    }
}
