//! Chunk storage shared by all handlers

use super::HandlerError;

/// Cap on floats a handler may hold between two drains
pub const MAX_BUFFER_SIZE: usize = 1_000_000;

/// Shape of a handler's output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSize {
    /// Floats per chunk
    pub values_count: usize,
    /// Per layer, the number of input samples one chunk stands for
    pub eq_wave_sizes: Vec<usize>,
}

impl DataSize {
    pub fn new(values_count: usize, eq_wave_sizes: Vec<usize>) -> Self {
        Self {
            values_count,
            eq_wave_sizes,
        }
    }

    pub fn layers_count(&self) -> usize {
        self.eq_wave_sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values_count == 0 || self.eq_wave_sizes.is_empty()
    }
}

/// Append-only chunk buffer.
///
/// Every chunk of every layer lives in one flat `Vec`; layers only keep
/// offsets into it. The last chunk of each layer survives a drain as the
/// layer's saved data.
#[derive(Debug, Clone)]
pub struct HandlerData {
    name: String,
    size: DataSize,
    buffer: Vec<f32>,
    offsets: Vec<Vec<usize>>,
    saved: Vec<Vec<f32>>,
}

impl HandlerData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: DataSize::default(),
            buffer: Vec::new(),
            offsets: Vec::new(),
            saved: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> &DataSize {
        &self.size
    }

    pub fn layers_count(&self) -> usize {
        self.size.layers_count()
    }

    /// Change the shape; drops chunks and zeroes saved data
    pub fn set_size(&mut self, size: DataSize) {
        let layers = size.layers_count();
        self.buffer.clear();
        self.offsets = vec![Vec::new(); layers];
        self.saved = vec![vec![0.0; size.values_count]; layers];
        self.size = size;
    }

    /// Total floats currently held
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append a zeroed chunk to `layer` and return it for writing
    pub fn allocate(&mut self, layer: usize) -> Result<&mut [f32], HandlerError> {
        let count = self.size.values_count;
        let offset = self.buffer.len();
        if offset + count > MAX_BUFFER_SIZE {
            return Err(HandlerError::TooManyValues {
                handler: self.name.clone(),
            });
        }
        self.buffer.resize(offset + count, 0.0);
        self.offsets[layer].push(offset);
        Ok(&mut self.buffer[offset..])
    }

    /// Append a copy of `values` to `layer`, padded or truncated to the chunk size
    pub fn push_layer(&mut self, layer: usize, values: &[f32]) -> Result<(), HandlerError> {
        let dest = self.allocate(layer)?;
        let len = dest.len().min(values.len());
        dest[..len].copy_from_slice(&values[..len]);
        Ok(())
    }

    /// Append a copy of the most recent chunk of `layer`
    pub fn repeat_last(&mut self, layer: usize) -> Result<(), HandlerError> {
        let count = self.size.values_count;
        let previous = self.offsets[layer].last().copied();
        let offset = self.buffer.len();
        if offset + count > MAX_BUFFER_SIZE {
            return Err(HandlerError::TooManyValues {
                handler: self.name.clone(),
            });
        }
        match previous {
            Some(start) => self.buffer.extend_from_within(start..start + count),
            None => self.buffer.extend_from_slice(&self.saved[layer]),
        }
        self.offsets[layer].push(offset);
        Ok(())
    }

    pub fn chunk_count(&self, layer: usize) -> usize {
        self.offsets[layer].len()
    }

    pub fn chunk(&self, layer: usize, index: usize) -> &[f32] {
        let start = self.offsets[layer][index];
        &self.buffer[start..start + self.size.values_count]
    }

    pub fn chunks(&self, layer: usize) -> impl Iterator<Item = &[f32]> + '_ {
        let count = self.size.values_count;
        self.offsets[layer]
            .iter()
            .map(move |&start| &self.buffer[start..start + count])
    }

    /// Last chunk kept from before the most recent drain
    pub fn saved(&self, layer: usize) -> &[f32] {
        &self.saved[layer]
    }

    /// Newest chunk of `layer`, or the saved data when nothing is pending
    pub fn latest(&self, layer: usize) -> &[f32] {
        match self.offsets[layer].last() {
            Some(&start) => &self.buffer[start..start + self.size.values_count],
            None => &self.saved[layer],
        }
    }

    /// Drop all chunks, keeping the newest one of each layer as saved data
    pub fn clear_chunks(&mut self) {
        let count = self.size.values_count;
        for (offsets, saved) in self.offsets.iter_mut().zip(&mut self.saved) {
            if let Some(&start) = offsets.last() {
                saved.copy_from_slice(&self.buffer[start..start + count]);
            }
            offsets.clear();
        }
        self.buffer.clear();
    }

    /// Zero saved data and drop chunks
    pub fn reset(&mut self) {
        self.set_size(self.size.clone());
    }
}
