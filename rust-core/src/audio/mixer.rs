//! Per-channel sample buffers for one processing invocation

use std::collections::HashMap;

use super::buffer::CaptureConsumer;
use super::channel::{Channel, ChannelLayout};

/// Frames pulled from the capture queue per read
const DRAIN_BLOCK_FRAMES: usize = 1024;

/// Splits incoming audio into planar channel buffers.
///
/// Buffers accumulate until [`ChannelMixer::reset_buffers`], which the
/// orchestrator calls once every unit has consumed them.
pub struct ChannelMixer {
    layout: ChannelLayout,
    sample_rate: f64,
    waves: HashMap<Channel, Vec<f32>>,
    auto_alias: Option<Channel>,
    auto_wave: Vec<f32>,
    silent: bool,
    scratch: Vec<f32>,
}

impl ChannelMixer {
    pub fn new(layout: ChannelLayout, sample_rate: f64) -> Self {
        let waves = layout
            .channels()
            .iter()
            .map(|&channel| (channel, Vec::new()))
            .collect();
        let auto_alias = layout.auto_alias();
        Self {
            layout,
            sample_rate,
            waves,
            auto_alias,
            auto_wave: Vec::new(),
            silent: true,
            scratch: Vec::new(),
        }
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Frames buffered since the last reset
    pub fn frames(&self) -> usize {
        self.layout
            .channels()
            .first()
            .and_then(|channel| self.waves.get(channel))
            .map_or(0, Vec::len)
    }

    /// Append one slice per layout channel, in layout order.
    ///
    /// Only the frames present in every slice are taken.
    pub fn push_planar(&mut self, planes: &[&[f32]]) {
        if planes.len() != self.layout.len() {
            log::warn!(
                "expected {} planes for layout '{}', got {}",
                self.layout.len(),
                self.layout.name(),
                planes.len()
            );
        }
        let frames = planes.iter().map(|plane| plane.len()).min().unwrap_or(0);
        let start = self.frames();
        for (channel, plane) in self.layout.channels().iter().zip(planes) {
            if let Some(wave) = self.waves.get_mut(channel) {
                wave.extend_from_slice(&plane[..frames]);
            }
        }
        self.silent = false;
        self.extend_auto(start);
    }

    /// Append interleaved frames; a trailing partial frame is ignored
    pub fn push_interleaved(&mut self, samples: &[f32]) {
        let stride = self.layout.len();
        if stride == 0 {
            return;
        }
        let frames = samples.len() / stride;
        let start = self.frames();
        for (index, channel) in self.layout.channels().iter().enumerate() {
            if let Some(wave) = self.waves.get_mut(channel) {
                wave.extend(samples[..frames * stride].iter().skip(index).step_by(stride));
            }
        }
        self.silent = false;
        self.extend_auto(start);
    }

    /// Append `frames` zeros to every channel.
    ///
    /// The buffers stay flagged silent if nothing else was pushed since the
    /// last reset.
    pub fn push_silence(&mut self, frames: usize) {
        for wave in self.waves.values_mut() {
            wave.resize(wave.len() + frames, 0.0);
        }
        if self.auto_alias == Some(Channel::Auto) {
            self.auto_wave.resize(self.auto_wave.len() + frames, 0.0);
        }
    }

    /// Move everything queued by the capture thread into the buffers.
    ///
    /// Returns the number of frames moved.
    pub fn drain_interleaved(&mut self, consumer: &mut CaptureConsumer) -> usize {
        if consumer.channels() != self.layout.len() {
            log::error!(
                "capture queue carries {} channels, layout '{}' has {}",
                consumer.channels(),
                self.layout.name(),
                self.layout.len()
            );
            return 0;
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(DRAIN_BLOCK_FRAMES * consumer.channels(), 0.0);
        let mut total = 0;
        loop {
            let frames = consumer.read(&mut scratch);
            if frames == 0 {
                break;
            }
            self.push_interleaved(&scratch[..frames * consumer.channels()]);
            total += frames;
        }
        self.scratch = scratch;
        total
    }

    /// Samples of `channel`, with `Auto` resolved for the current layout
    pub fn channel(&self, channel: Channel) -> Option<&[f32]> {
        let resolved = if channel == Channel::Auto {
            self.auto_alias?
        } else {
            channel
        };
        if resolved == Channel::Auto {
            return Some(&self.auto_wave);
        }
        self.waves.get(&resolved).map(Vec::as_slice)
    }

    /// All buffered samples are known to be zero
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn reset_buffers(&mut self) {
        for wave in self.waves.values_mut() {
            wave.clear();
        }
        self.auto_wave.clear();
        self.silent = true;
    }

    fn extend_auto(&mut self, start: usize) {
        if self.auto_alias != Some(Channel::Auto) {
            return;
        }
        let (Some(left), Some(right)) = (
            self.waves.get(&Channel::FrontLeft),
            self.waves.get(&Channel::FrontRight),
        ) else {
            return;
        };
        let end = left.len().min(right.len());
        self.auto_wave.extend(
            left[start..end]
                .iter()
                .zip(&right[start..end])
                .map(|(l, r)| (l + r) * 0.5),
        );
    }
}
