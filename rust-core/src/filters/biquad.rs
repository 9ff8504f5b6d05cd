//! Second-order sections built from the audio-EQ cookbook formulas
//!
//! Reference: R. Bristow-Johnson, "Cookbook formulae for audio EQ biquad filter coefficients".

use std::f64::consts::PI;

use super::iir::{db_to_amplitude, Filter, FilterParameters};

/// Normalized coefficients of a biquad section, `a0 == 1`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiQuadCoefficients {
    pub a1: f64,
    pub a2: f64,
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
}

impl BiQuadCoefficients {
    /// Pass-through section
    pub const INERT: Self = Self {
        a1: 0.0,
        a2: 0.0,
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
    };

    fn from_raw(a0: f64, a1: f64, a2: f64, b0: f64, b1: f64, b2: f64) -> Self {
        Self {
            a1: a1 / a0,
            a2: a2 / a0,
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
        }
    }

    pub fn to_parameters(self) -> FilterParameters {
        FilterParameters::new(
            vec![1.0, self.a1, self.a2],
            vec![self.b0, self.b1, self.b2],
            1.0,
        )
    }
}

/// Biquad response shapes supported by the descriptor grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiQuadKind {
    HighPass,
    LowPass,
    HighShelf,
    LowShelf,
    Peak,
}

impl BiQuadKind {
    /// Whether the shape needs a `gain` parameter
    pub fn uses_gain(self) -> bool {
        matches!(self, Self::HighShelf | Self::LowShelf | Self::Peak)
    }

    /// Design the section for the given Q, center frequency (Hz), sample rate (Hz) and gain (dB).
    ///
    /// Returns a pass-through section when `q <= 0` or `sample_rate == 0`.
    pub fn design(self, q: f64, freq: f64, sample_rate: f64, gain_db: f64) -> BiQuadCoefficients {
        if q <= 0.0 || sample_rate <= 0.0 {
            return BiQuadCoefficients::INERT;
        }

        // fraction of Nyquist, which also keeps freq below sample_rate / 2
        let digital = (2.0 * freq / sample_rate).clamp(0.01, 0.99);
        let w0 = PI * digital;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        match self {
            Self::LowPass => BiQuadCoefficients::from_raw(
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
                (1.0 - cos_w0) * 0.5,
                1.0 - cos_w0,
                (1.0 - cos_w0) * 0.5,
            ),
            Self::HighPass => BiQuadCoefficients::from_raw(
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
                (1.0 + cos_w0) * 0.5,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) * 0.5,
            ),
            Self::Peak => {
                let a = 10.0_f64.powf(gain_db / 40.0);
                BiQuadCoefficients::from_raw(
                    1.0 + alpha / a,
                    -2.0 * cos_w0,
                    1.0 - alpha / a,
                    1.0 + alpha * a,
                    -2.0 * cos_w0,
                    1.0 - alpha * a,
                )
            }
            Self::LowShelf => {
                let a = 10.0_f64.powf(gain_db / 40.0);
                let sq = 2.0 * a.sqrt() * alpha;
                BiQuadCoefficients::from_raw(
                    (a + 1.0) + (a - 1.0) * cos_w0 + sq,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - sq,
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + sq),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - sq),
                )
            }
            Self::HighShelf => {
                let a = 10.0_f64.powf(gain_db / 40.0);
                let sq = 2.0 * a.sqrt() * alpha;
                BiQuadCoefficients::from_raw(
                    (a + 1.0) - (a - 1.0) * cos_w0 + sq,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - sq,
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + sq),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - sq),
                )
            }
        }
    }
}

/// Two-pole filter with two delay taps
#[derive(Debug, Clone)]
pub struct BiQuad {
    coefficients: BiQuadCoefficients,
    s1: f64,
    s2: f64,
    gain_amp: f64,
}

impl BiQuad {
    pub fn new(coefficients: BiQuadCoefficients) -> Self {
        Self {
            coefficients,
            s1: 0.0,
            s2: 0.0,
            gain_amp: 1.0,
        }
    }

    pub fn coefficients(&self) -> BiQuadCoefficients {
        self.coefficients
    }

    #[inline]
    pub fn process_sample(&mut self, x: f64) -> f64 {
        let c = &self.coefficients;
        let y = c.b0 * x + self.s1;
        self.s1 = c.b1 * x - c.a1 * y + self.s2;
        self.s2 = c.b2 * x - c.a2 * y;
        y * self.gain_amp
    }
}

impl Filter for BiQuad {
    fn apply(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = self.process_sample(f64::from(*sample)) as f32;
        }
    }

    fn add_gain_db_energy(&mut self, db: f64) {
        self.gain_amp *= db_to_amplitude(db);
    }

    fn reset(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;
    use proptest::prelude::*;

    /// Direct form I reference recursion
    fn reference_impulse(c: BiQuadCoefficients, len: usize) -> Vec<f64> {
        let mut out = vec![0.0; len];
        for n in 0..len {
            let x0 = if n == 0 { 1.0 } else { 0.0 };
            let x1 = if n == 1 { 1.0 } else { 0.0 };
            let x2 = if n == 2 { 1.0 } else { 0.0 };
            let y1 = if n >= 1 { out[n - 1] } else { 0.0 };
            let y2 = if n >= 2 { out[n - 2] } else { 0.0 };
            out[n] = c.b0 * x0 + c.b1 * x1 + c.b2 * x2 - c.a1 * y1 - c.a2 * y2;
        }
        out
    }

    fn magnitude_at(c: BiQuadCoefficients, digital: f64) -> f64 {
        let z = Complex::from_polar(1.0, -PI * digital);
        let num = c.b0 + c.b1 * z + c.b2 * z * z;
        let den = 1.0 + c.a1 * z + c.a2 * z * z;
        (num / den).norm()
    }

    #[test]
    fn test_inert_on_bad_params() {
        assert_eq!(BiQuadKind::LowPass.design(0.0, 100.0, 48000.0, 0.0), BiQuadCoefficients::INERT);
        assert_eq!(BiQuadKind::Peak.design(0.7, 100.0, 0.0, 3.0), BiQuadCoefficients::INERT);

        let mut filter = BiQuad::new(BiQuadCoefficients::INERT);
        let mut block = [0.25_f32, -0.5, 1.0];
        filter.apply(&mut block);
        assert_eq!(block, [0.25, -0.5, 1.0]);
    }

    #[test]
    fn test_low_pass_unity_dc_gain() {
        let c = BiQuadKind::LowPass.design(0.707, 1000.0, 48000.0, 0.0);
        let dc = (c.b0 + c.b1 + c.b2) / (1.0 + c.a1 + c.a2);
        assert!((dc - 1.0).abs() < 1e-9);
        assert!(magnitude_at(c, 0.9) < 0.01);
    }

    #[test]
    fn test_high_pass_blocks_dc() {
        let c = BiQuadKind::HighPass.design(0.707, 1000.0, 48000.0, 0.0);
        let dc = (c.b0 + c.b1 + c.b2) / (1.0 + c.a1 + c.a2);
        assert!(dc.abs() < 1e-9);
        assert!((magnitude_at(c, 0.9) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_peak_gain_at_center() {
        let c = BiQuadKind::Peak.design(1.0, 4800.0, 48000.0, 6.0);
        let gain = magnitude_at(c, 0.2);
        assert!((gain - db_to_amplitude(6.0)).abs() < 1e-6);
    }

    #[test]
    fn test_shelves() {
        let low = BiQuadKind::LowShelf.design(0.707, 200.0, 48000.0, 12.0);
        assert!((magnitude_at(low, 0.0001) - db_to_amplitude(12.0)).abs() < 0.05);
        assert!((magnitude_at(low, 0.9) - 1.0).abs() < 0.05);

        let high = BiQuadKind::HighShelf.design(0.707, 10000.0, 48000.0, -6.0);
        assert!((magnitude_at(high, 0.0001) - 1.0).abs() < 0.01);
        assert!(magnitude_at(high, 0.95) < 0.6);
    }

    #[test]
    fn test_frequency_clamped_below_nyquist() {
        let over = BiQuadKind::LowPass.design(0.707, 40000.0, 48000.0, 0.0);
        let at_limit = BiQuadKind::LowPass.design(0.707, 23760.0, 48000.0, 0.0);
        assert!((over.b0 - at_limit.b0).abs() < 1e-12);
        assert!((over.a1 - at_limit.a1).abs() < 1e-12);
    }

    #[test]
    fn test_impulse_then_silence() {
        let c = BiQuadKind::Peak.design(2.0, 3000.0, 44100.0, -9.0);
        let mut filter = BiQuad::new(c);

        let mut impulse = [1.0_f32];
        filter.apply(&mut impulse);
        let mut tail = [0.0_f32; 31];
        filter.apply(&mut tail);

        let expected = reference_impulse(c, 32);
        assert!((f64::from(impulse[0]) - expected[0]).abs() < 1e-6);
        for (got, want) in tail.iter().zip(&expected[1..]) {
            assert!((f64::from(*got) - want).abs() < 1e-5);
        }
    }

    proptest! {
        #[test]
        fn prop_impulse_response_matches_recursion(
            kind in prop::sample::select(vec![
                BiQuadKind::HighPass,
                BiQuadKind::LowPass,
                BiQuadKind::HighShelf,
                BiQuadKind::LowShelf,
                BiQuadKind::Peak,
            ]),
            q in 0.3_f64..4.0,
            freq in 20.0_f64..20000.0,
            gain in -12.0_f64..12.0,
        ) {
            let c = kind.design(q, freq, 48000.0, gain);
            let mut filter = BiQuad::new(c);
            let mut block = vec![0.0_f32; 48];
            block[0] = 1.0;
            filter.apply(&mut block);

            let expected = reference_impulse(c, block.len());
            for (got, want) in block.iter().zip(&expected) {
                prop_assert!((f64::from(*got) - want).abs() < 1e-4 * (1.0 + want.abs()));
            }
        }
    }
}
