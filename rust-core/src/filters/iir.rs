//! IIR filter primitives
//!
//! Transposed direct form II filters that process `f32` sample blocks in place
//! while keeping their delay line in `f64`.

/// Stateful filter that can be chained in a [`FilterCascade`](super::FilterCascade)
pub trait Filter: Send {
    /// Filter a block of samples in place, continuing from the previous state
    fn apply(&mut self, samples: &mut [f32]);

    /// Multiply the output amplitude by `10^(db/20)`
    fn add_gain_db_energy(&mut self, db: f64);

    /// Clear the delay line
    fn reset(&mut self);
}

/// Convert decibels to a linear amplitude factor
#[inline]
pub fn db_to_amplitude(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Transfer function coefficients as produced by the filter designers
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParameters {
    /// Denominator, `a[0]` is the output coefficient
    pub a: Vec<f64>,
    /// Numerator
    pub b: Vec<f64>,
    /// Linear gain applied to the output
    pub gain_amp: f64,
}

impl FilterParameters {
    pub fn new(a: Vec<f64>, b: Vec<f64>, gain_amp: f64) -> Self {
        Self { a, b, gain_amp }
    }

    /// Divide everything by `a[0]` and pad both sides to the same length
    pub fn normalized(mut self) -> Self {
        if self.a.is_empty() {
            self.a.push(1.0);
        }
        let a0 = self.a[0];
        if a0 != 0.0 && a0 != 1.0 {
            self.a.iter_mut().for_each(|v| *v /= a0);
            self.b.iter_mut().for_each(|v| *v /= a0);
        }
        let len = self.a.len().max(self.b.len()).max(1);
        self.a.resize(len, 0.0);
        self.b.resize(len, 0.0);
        self
    }

    /// Number of coefficients on each side after normalization
    pub fn len(&self) -> usize {
        self.a.len().max(self.b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One step of a transposed direct form II filter.
///
/// `a` and `b` have equal length `n` and `a[0] == 1`; `state` holds at least `n - 1` taps.
#[inline]
fn tdf2_step(a: &[f64], b: &[f64], state: &mut [f64], x: f64) -> f64 {
    let n = b.len();
    if n < 2 {
        return b.first().copied().unwrap_or(1.0) * x;
    }
    let y = b[0] * x + state[0];
    for i in 0..n - 2 {
        state[i] = b[i + 1] * x - a[i + 1] * y + state[i + 1];
    }
    state[n - 2] = b[n - 1] * x - a[n - 1] * y;
    y
}

/// Generic IIR filter with heap-allocated coefficients, for any order
#[derive(Debug, Clone)]
pub struct IirFilter {
    a: Vec<f64>,
    b: Vec<f64>,
    state: Vec<f64>,
    gain_amp: f64,
}

impl IirFilter {
    pub fn new(params: FilterParameters) -> Self {
        let params = params.normalized();
        let taps = params.len().saturating_sub(1);
        Self {
            a: params.a,
            b: params.b,
            state: vec![0.0; taps],
            gain_amp: params.gain_amp,
        }
    }

    #[inline]
    pub fn process_sample(&mut self, x: f64) -> f64 {
        tdf2_step(&self.a, &self.b, &mut self.state, x) * self.gain_amp
    }
}

impl Filter for IirFilter {
    fn apply(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = self.process_sample(f64::from(*sample)) as f32;
        }
    }

    fn add_gain_db_energy(&mut self, db: f64) {
        self.gain_amp *= db_to_amplitude(db);
    }

    fn reset(&mut self) {
        self.state.fill(0.0);
    }
}

/// IIR filter with `SIZE` coefficients per side stored inline.
///
/// Used for the low orders the parsers and the downsampler produce.
#[derive(Debug, Clone)]
pub struct IirFilterFixed<const SIZE: usize> {
    a: [f64; SIZE],
    b: [f64; SIZE],
    // only the first SIZE - 1 taps are used
    state: [f64; SIZE],
    gain_amp: f64,
}

impl<const SIZE: usize> IirFilterFixed<SIZE> {
    /// Build from designer output; coefficients beyond `SIZE` are dropped
    pub fn new(params: &FilterParameters) -> Self {
        let params = params.clone().normalized();
        debug_assert!(params.len() <= SIZE, "filter has more coefficients than SIZE");

        let mut a = [0.0; SIZE];
        let mut b = [0.0; SIZE];
        for (dst, src) in a.iter_mut().zip(&params.a) {
            *dst = *src;
        }
        for (dst, src) in b.iter_mut().zip(&params.b) {
            *dst = *src;
        }
        Self {
            a,
            b,
            state: [0.0; SIZE],
            gain_amp: params.gain_amp,
        }
    }

    #[inline]
    pub fn process_sample(&mut self, x: f64) -> f64 {
        tdf2_step(&self.a, &self.b, &mut self.state, x) * self.gain_amp
    }
}

impl<const SIZE: usize> Filter for IirFilterFixed<SIZE> {
    fn apply(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = self.process_sample(f64::from(*sample)) as f32;
        }
    }

    fn add_gain_db_energy(&mut self, db: f64) {
        self.gain_amp *= db_to_amplitude(db);
    }

    fn reset(&mut self) {
        self.state = [0.0; SIZE];
    }
}

/// Pick the inline implementation for small coefficient counts,
/// falling back to [`IirFilter`] otherwise
pub fn boxed_filter(params: FilterParameters) -> Box<dyn Filter> {
    match params.len() {
        2 => Box::new(IirFilterFixed::<2>::new(&params)),
        3 => Box::new(IirFilterFixed::<3>::new(&params)),
        4 => Box::new(IirFilterFixed::<4>::new(&params)),
        5 => Box::new(IirFilterFixed::<5>::new(&params)),
        6 => Box::new(IirFilterFixed::<6>::new(&params)),
        7 => Box::new(IirFilterFixed::<7>::new(&params)),
        9 => Box::new(IirFilterFixed::<9>::new(&params)),
        11 => Box::new(IirFilterFixed::<11>::new(&params)),
        _ => Box::new(IirFilter::new(params)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_pads_and_scales() {
        let params = FilterParameters::new(vec![2.0, 1.0], vec![4.0, 2.0, 2.0], 1.0).normalized();
        assert_eq!(params.a, vec![1.0, 0.5, 0.0]);
        assert_eq!(params.b, vec![2.0, 1.0, 1.0]);
    }

    #[test]
    fn test_one_pole_impulse_response() {
        // y[n] = x[n] + 0.5 * y[n-1]
        let params = FilterParameters::new(vec![1.0, -0.5], vec![1.0, 0.0], 1.0);
        let mut filter = IirFilter::new(params);

        let mut block = [1.0_f32, 0.0, 0.0, 0.0];
        filter.apply(&mut block);
        let expected = [1.0, 0.5, 0.25, 0.125];
        for (got, want) in block.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_fixed_matches_dynamic() {
        let params = FilterParameters::new(
            vec![1.0, -1.2, 0.5, -0.1],
            vec![0.05, 0.15, 0.15, 0.05],
            1.0,
        );
        let mut dynamic = IirFilter::new(params.clone());
        let mut fixed = IirFilterFixed::<4>::new(&params);

        let input: Vec<f32> = (0..64).map(|i| ((i * 7) % 13) as f32 / 13.0 - 0.5).collect();
        let mut a = input.clone();
        let mut b = input;
        dynamic.apply(&mut a);
        fixed.apply(&mut b);

        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_block_split_is_seamless() {
        let params = FilterParameters::new(vec![1.0, -0.9], vec![0.1, 0.0], 1.0);
        let mut whole = IirFilter::new(params.clone());
        let mut split = IirFilter::new(params);

        let input: Vec<f32> = (0..50).map(|i| (i as f32 * 0.3).sin()).collect();
        let mut a = input.clone();
        whole.apply(&mut a);

        let mut b = input;
        let (head, tail) = b.split_at_mut(17);
        split.apply(head);
        split.apply(tail);

        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_gain_and_reset() {
        let params = FilterParameters::new(vec![1.0, -0.5], vec![1.0, 0.0], 1.0);
        let mut filter = boxed_filter(params);
        filter.add_gain_db_energy(20.0);

        let mut block = [1.0_f32, 0.0];
        filter.apply(&mut block);
        assert!((block[0] - 10.0).abs() < 1e-4);
        assert!((block[1] - 5.0).abs() < 1e-4);

        filter.reset();
        let mut silent = [0.0_f32; 4];
        filter.apply(&mut silent);
        assert!(silent.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_db_to_amplitude() {
        assert!((db_to_amplitude(0.0) - 1.0).abs() < 1e-12);
        assert!((db_to_amplitude(-20.0) - 0.1).abs() < 1e-12);
        assert!((db_to_amplitude(6.0) - 1.995_262).abs() < 1e-5);
    }
}
