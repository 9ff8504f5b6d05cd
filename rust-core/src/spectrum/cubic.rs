//! Monotone cubic interpolation over unit-spaced samples

/// Fritsch-Carlson interpolant: piecewise cubic Hermite with slopes limited
/// so that the curve never overshoots between neighbouring samples.
#[derive(Debug, Clone, Default)]
pub struct MonotoneCubic {
    values: Vec<f64>,
    slopes: Vec<f64>,
}

impl MonotoneCubic {
    pub fn new(values: &[f32]) -> Self {
        let mut cubic = Self::default();
        cubic.fit(values);
        cubic
    }

    /// Recompute slopes for new samples, reusing the allocations
    pub fn fit(&mut self, values: &[f32]) {
        self.values.clear();
        self.values.extend(values.iter().map(|&v| v as f64));
        self.slopes.clear();
        self.slopes.resize(values.len(), 0.0);

        let n = self.values.len();
        if n < 2 {
            return;
        }

        let delta = |k: usize| self.values[k + 1] - self.values[k];

        self.slopes[0] = delta(0);
        self.slopes[n - 1] = delta(n - 2);
        for k in 1..n - 1 {
            let (left, right) = (delta(k - 1), delta(k));
            self.slopes[k] = if left * right <= 0.0 {
                0.0
            } else {
                (left + right) * 0.5
            };
        }

        for k in 0..n - 1 {
            let d = delta(k);
            if d == 0.0 {
                self.slopes[k] = 0.0;
                self.slopes[k + 1] = 0.0;
                continue;
            }
            let alpha = self.slopes[k] / d;
            let beta = self.slopes[k + 1] / d;
            let magnitude = alpha * alpha + beta * beta;
            if magnitude > 9.0 {
                let tau = 3.0 / magnitude.sqrt();
                self.slopes[k] = tau * alpha * d;
                self.slopes[k + 1] = tau * beta * d;
            }
        }
    }

    /// Interpolated value at fractional index `x`, clamped to the sample range
    pub fn value_at(&self, x: f64) -> f64 {
        let n = self.values.len();
        match n {
            0 => return 0.0,
            1 => return self.values[0],
            _ => {}
        }

        let x = x.clamp(0.0, (n - 1) as f64);
        let k = (x.floor() as usize).min(n - 2);
        let t = x - k as f64;
        let t2 = t * t;
        let t3 = t2 * t;

        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;

        h00 * self.values[k] + h10 * self.slopes[k] + h01 * self.values[k + 1] + h11 * self.slopes[k + 1]
    }
}
