//! Attack/decay smoothing for block statistics and value transforms

/// First-order exponential smoother with separate rise and fall times
#[derive(Debug, Clone, Default)]
pub struct LogarithmicIrf {
    attack: f64,
    decay: f64,
    previous: f64,
}

impl LogarithmicIrf {
    /// # Arguments
    /// * `attack_ms` / `decay_ms` - Time constants; 0 disables smoothing in that direction
    /// * `sample_rate` - Input sample rate in Hz
    /// * `stride` - Samples between consecutive values
    pub fn new(attack_ms: f64, decay_ms: f64, sample_rate: f64, stride: usize) -> Self {
        Self {
            attack: Self::coefficient(attack_ms, sample_rate, stride),
            decay: Self::coefficient(decay_ms, sample_rate, stride),
            previous: 0.0,
        }
    }

    fn coefficient(time_ms: f64, sample_rate: f64, stride: usize) -> f64 {
        let time = time_ms * 0.001;
        if time <= 0.0 || sample_rate <= 0.0 {
            return 0.0;
        }
        (-2.0 * stride as f64 / (sample_rate * time)).exp()
    }

    #[inline]
    pub fn apply(&mut self, value: f64) -> f64 {
        self.previous = self.next(self.previous, value);
        self.previous
    }

    /// One smoothing step from an externally kept `previous` output
    #[inline]
    pub fn next(&self, previous: f64, value: f64) -> f64 {
        let k = if value < previous { self.decay } else { self.attack };
        value + k * (previous - value)
    }

    /// Smooth every `values[i]` towards `targets[i]` in place
    pub fn apply_slice(&self, values: &mut [f32], targets: &[f32]) {
        for (value, &target) in values.iter_mut().zip(targets) {
            *value = self.next(*value as f64, target as f64) as f32;
        }
    }

    pub fn reset(&mut self) {
        self.previous = 0.0;
    }
}
