//! Lock-free ring buffer between a capture thread and the analysis thread
//!
//! Samples travel interleaved. Both ends only move whole frames, so the
//! reader never sees a frame split across two reads.

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};

/// Interleaved `f32` capture queue
pub struct CaptureBuffer {
    producer: HeapProducer<f32>,
    consumer: HeapConsumer<f32>,
    channels: usize,
}

impl CaptureBuffer {
    /// Create a queue holding `capacity_frames` frames of `channels` samples
    pub fn new(capacity_frames: usize, channels: usize) -> Self {
        let channels = channels.max(1);
        let rb = HeapRb::<f32>::new(capacity_frames.max(1) * channels);
        let (producer, consumer) = rb.split();

        Self {
            producer,
            consumer,
            channels,
        }
    }

    /// Split into producer and consumer ends
    pub fn split(self) -> (CaptureProducer, CaptureConsumer) {
        (
            CaptureProducer {
                producer: self.producer,
                channels: self.channels,
            },
            CaptureConsumer {
                consumer: self.consumer,
                channels: self.channels,
            },
        )
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// Writing end, owned by the capture callback
pub struct CaptureProducer {
    producer: HeapProducer<f32>,
    channels: usize,
}

impl CaptureProducer {
    /// Write as many whole frames of `samples` as fit.
    ///
    /// Returns the number of frames written; the rest is dropped.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let frames = (samples.len() / self.channels).min(self.free_frames());
        let written = self.producer.push_slice(&samples[..frames * self.channels]);
        written / self.channels
    }

    pub fn free_frames(&self) -> usize {
        self.producer.free_len() / self.channels
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// Reading end, drained by the channel mixer
pub struct CaptureConsumer {
    consumer: HeapConsumer<f32>,
    channels: usize,
}

impl CaptureConsumer {
    /// Read whole frames into `buffer`, returning the number of frames read
    pub fn read(&mut self, buffer: &mut [f32]) -> usize {
        let frames = (buffer.len() / self.channels).min(self.frames_available());
        let read = self.consumer.pop_slice(&mut buffer[..frames * self.channels]);
        read / self.channels
    }

    pub fn frames_available(&self) -> usize {
        self.consumer.len() / self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.frames_available() == 0
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}
