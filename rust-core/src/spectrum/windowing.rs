//! Window functions for spectral analysis
//!
//! All windows are periodic (asymmetric): sample `i` of a window of length `N`
//! is evaluated at `i / N`, which is what a sliding FFT wants.
//!
//! Descriptor grammar: `name` or `name(parameter)`, e.g. `hann`, `kaiser(4)`.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WindowParseError {
    #[error("unknown window function: {0}")]
    UnknownWindow(String),

    #[error("invalid window parameter '{0}'")]
    InvalidParameter(String),

    #[error("malformed window description: {0}")]
    Syntax(String),
}

/// Window function applied before each FFT
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WindowFunction {
    /// Rectangular, the signal is left untouched
    None,

    /// Raised cosine, `a0 = 0.5`
    #[default]
    Hann,

    /// Raised cosine, `a0 = 0.53836`
    Hamming,

    /// `I0(pi * alpha * sqrt(1 - (2i/N - 1)^2)) / I0(pi * alpha)`
    Kaiser { alpha: f64 },

    /// Two-sided exponential, `decay` is the attenuation in dB at the edges
    Exponential { decay: f64 },

    /// Dolph-Chebyshev with the given sidelobe attenuation in dB
    Chebyshev { attenuation: f64 },
}

impl WindowFunction {
    pub const DEFAULT_KAISER_ALPHA: f64 = 3.0;
    pub const DEFAULT_EXPONENTIAL_DECAY: f64 = 8.69;
    pub const DEFAULT_CHEBYSHEV_ATTENUATION: f64 = 80.0;

    /// Parse a descriptor, logging and falling back to [`WindowFunction::None`]
    /// when the name is not recognized
    pub fn parse_lenient(descriptor: &str) -> Self {
        descriptor.parse().unwrap_or_else(|err| {
            log::error!("{err}, falling back to no window");
            Self::None
        })
    }

    /// Generate `size` window coefficients
    pub fn generate(&self, size: usize) -> Vec<f32> {
        if size == 0 {
            return Vec::new();
        }
        let n = size as f64;
        match *self {
            Self::None => vec![1.0; size],
            Self::Hann => cosine_sum(size, 0.5),
            Self::Hamming => cosine_sum(size, 0.53836),
            Self::Kaiser { alpha } => {
                let denominator = bessel_i0(PI * alpha);
                (0..size)
                    .map(|i| {
                        let x = 2.0 * i as f64 / n - 1.0;
                        (bessel_i0(PI * alpha * (1.0 - x * x).max(0.0).sqrt()) / denominator) as f32
                    })
                    .collect()
            }
            Self::Exponential { decay } => {
                let decay = if decay > 0.0 { decay } else { Self::DEFAULT_EXPONENTIAL_DECAY };
                let tau = n * 0.5 * Self::DEFAULT_EXPONENTIAL_DECAY / decay;
                (0..size)
                    .map(|i| (-(i as f64 - n * 0.5).abs() / tau).exp() as f32)
                    .collect()
            }
            Self::Chebyshev { attenuation } => chebyshev(size, attenuation),
        }
    }

    /// Short name used in descriptors
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Hann => "hann",
            Self::Hamming => "hamming",
            Self::Kaiser { .. } => "kaiser",
            Self::Exponential { .. } => "exponential",
            Self::Chebyshev { .. } => "chebyshev",
        }
    }
}

fn cosine_sum(size: usize, a0: f64) -> Vec<f32> {
    let n = size as f64;
    (0..size)
        .map(|i| (a0 - (1.0 - a0) * (2.0 * PI * i as f64 / n).cos()) as f32)
        .collect()
}

/// Zeroth-order modified Bessel function of the first kind, power series
fn bessel_i0(x: f64) -> f64 {
    let half = x * 0.5;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..64 {
        term *= (half / k as f64).powi(2);
        sum += term;
        if term < sum * 1e-16 {
            break;
        }
    }
    sum
}

/// Chebyshev polynomial of the first kind, valid for any real `x`
fn chebyshev_poly(order: f64, x: f64) -> f64 {
    if x.abs() <= 1.0 {
        (order * x.acos()).cos()
    } else if x > 1.0 {
        (order * x.acosh()).cosh()
    } else {
        let sign = if (order as i64) % 2 == 0 { 1.0 } else { -1.0 };
        sign * (order * (-x).acosh()).cosh()
    }
}

/// Periodic Dolph-Chebyshev window: a symmetric window of `size + 1` points
/// computed by direct cosine summation, with the last point dropped
fn chebyshev(size: usize, attenuation: f64) -> Vec<f32> {
    let m = size + 1;
    let order = (m - 1) as f64;
    let ripple = 10.0_f64.powf(attenuation.abs() / 20.0);
    let x0 = (ripple.acosh() / order).cosh();
    let center = order * 0.5;

    let spectrum: Vec<f64> = (0..m)
        .map(|k| chebyshev_poly(order, x0 * (PI * k as f64 / m as f64).cos()))
        .collect();

    let mut window: Vec<f64> = (0..size)
        .map(|i| {
            spectrum
                .iter()
                .enumerate()
                .map(|(k, p)| p * (2.0 * PI * k as f64 * (i as f64 - center) / m as f64).cos())
                .sum::<f64>()
        })
        .collect();

    let max = window.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if max > 0.0 {
        window.iter_mut().for_each(|v| *v /= max);
    }
    window.into_iter().map(|v| v as f32).collect()
}

impl fmt::Display for WindowFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kaiser { alpha } => write!(f, "kaiser({alpha})"),
            Self::Exponential { decay } => write!(f, "exponential({decay})"),
            Self::Chebyshev { attenuation } => write!(f, "chebyshev({attenuation})"),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for WindowFunction {
    type Err = WindowParseError;

    fn from_str(descriptor: &str) -> Result<Self, Self::Err> {
        let descriptor = descriptor.trim();
        let (name, parameter) = match descriptor.find('(') {
            None => (descriptor, None),
            Some(open) => {
                let inner = descriptor[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| WindowParseError::Syntax(descriptor.to_string()))?
                    .trim();
                let value = if inner.is_empty() {
                    None
                } else {
                    Some(
                        inner
                            .parse::<f64>()
                            .map_err(|_| WindowParseError::InvalidParameter(inner.to_string()))?,
                    )
                };
                (descriptor[..open].trim(), value)
            }
        };

        let window = match name.to_ascii_lowercase().as_str() {
            "" | "none" => Self::None,
            "hann" => Self::Hann,
            "hamming" => Self::Hamming,
            "kaiser" => Self::Kaiser {
                alpha: parameter.unwrap_or(Self::DEFAULT_KAISER_ALPHA),
            },
            "exponential" => Self::Exponential {
                decay: parameter.unwrap_or(Self::DEFAULT_EXPONENTIAL_DECAY),
            },
            "chebyshev" => Self::Chebyshev {
                attenuation: parameter.unwrap_or(Self::DEFAULT_CHEBYSHEV_ATTENUATION),
            },
            _ => return Err(WindowParseError::UnknownWindow(name.to_string())),
        };
        Ok(window)
    }
}

impl TryFrom<String> for WindowFunction {
    type Error = WindowParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WindowFunction> for String {
    fn from(window: WindowFunction) -> Self {
        window.to_string()
    }
}
