//! Butterworth coefficient calculator
//!
//! Digital Butterworth designs of any order via the bilinear transform, following
//! the recurrences of Exstrom Laboratories' `iir.c`. Cutoffs are fractions of
//! the Nyquist frequency and are clamped to `[0.01, 0.99]`.

use std::f64::consts::PI;

use super::iir::FilterParameters;

const MIN_CUTOFF: f64 = 0.01;
const MAX_CUTOFF: f64 = 0.99;

fn clamp_cutoff(value: f64) -> f64 {
    value.clamp(MIN_CUTOFF, MAX_CUTOFF)
}

fn clamp_band(low: f64, high: f64) -> (f64, f64) {
    let (low, high) = if low <= high { (low, high) } else { (high, low) };
    (clamp_cutoff(low), clamp_cutoff(high))
}

/// Low-pass design, `order + 1` coefficients
pub fn low_pass(order: usize, cutoff: f64) -> FilterParameters {
    let order = order.max(1);
    let cutoff = clamp_cutoff(cutoff);
    FilterParameters::new(
        one_sided_denominator(order, cutoff),
        low_pass_numerator(order),
        low_pass_scale(order, cutoff),
    )
}

/// High-pass design, `order + 1` coefficients
pub fn high_pass(order: usize, cutoff: f64) -> FilterParameters {
    let order = order.max(1);
    let cutoff = clamp_cutoff(cutoff);
    FilterParameters::new(
        one_sided_denominator(order, cutoff),
        high_pass_numerator(order),
        high_pass_scale(order, cutoff),
    )
}

/// Band-pass design, `2 * order + 1` coefficients
pub fn band_pass(order: usize, low: f64, high: f64) -> FilterParameters {
    let order = order.max(1);
    let (low, high) = clamp_band(low, high);
    FilterParameters::new(
        two_sided_denominator(order, low, high, false),
        band_pass_numerator(order),
        band_scale(order, low, high, false),
    )
}

/// Band-stop design, `2 * order + 1` coefficients
pub fn band_stop(order: usize, low: f64, high: f64) -> FilterParameters {
    let order = order.max(1);
    let (low, high) = clamp_band(low, high);
    FilterParameters::new(
        two_sided_denominator(order, low, high, true),
        band_stop_numerator(order, low, high),
        band_scale(order, low, high, true),
    )
}

/// Multiply out `n` complex binomials `(x + p[k])`, interleaved re/im
fn binomial_mult(n: usize, p: &[f64]) -> Vec<f64> {
    let mut a = vec![0.0; 2 * n];
    for i in 0..n {
        for j in (1..=i).rev() {
            a[2 * j] += p[2 * i] * a[2 * (j - 1)] - p[2 * i + 1] * a[2 * (j - 1) + 1];
            a[2 * j + 1] += p[2 * i] * a[2 * (j - 1) + 1] + p[2 * i + 1] * a[2 * (j - 1)];
        }
        a[0] += p[2 * i];
        a[1] += p[2 * i + 1];
    }
    a
}

/// Multiply out `n` complex trinomials `(x^2 + b[k] x + c[k])`, interleaved re/im
fn trinomial_mult(n: usize, b: &[f64], c: &[f64]) -> Vec<f64> {
    let mut a = vec![0.0; 4 * n];
    a[0] = b[0];
    a[1] = b[1];
    a[2] = c[0];
    a[3] = c[1];

    for i in 1..n {
        a[2 * (2 * i + 1)] += c[2 * i] * a[2 * (2 * i - 1)] - c[2 * i + 1] * a[2 * (2 * i - 1) + 1];
        a[2 * (2 * i + 1) + 1] +=
            c[2 * i] * a[2 * (2 * i - 1) + 1] + c[2 * i + 1] * a[2 * (2 * i - 1)];

        for j in (2..=2 * i).rev() {
            a[2 * j] += b[2 * i] * a[2 * (j - 1)] - b[2 * i + 1] * a[2 * (j - 1) + 1]
                + c[2 * i] * a[2 * (j - 2)]
                - c[2 * i + 1] * a[2 * (j - 2) + 1];
            a[2 * j + 1] += b[2 * i] * a[2 * (j - 1) + 1]
                + b[2 * i + 1] * a[2 * (j - 1)]
                + c[2 * i] * a[2 * (j - 2) + 1]
                + c[2 * i + 1] * a[2 * (j - 2)];
        }

        a[2] += b[2 * i] * a[0] - b[2 * i + 1] * a[1] + c[2 * i];
        a[3] += b[2 * i] * a[1] + b[2 * i + 1] * a[0] + c[2 * i + 1];
        a[0] += b[2 * i];
        a[1] += b[2 * i + 1];
    }
    a
}

/// Keep the real parts of a product polynomial and prepend the leading 1
fn real_parts(product: &[f64], count: usize) -> Vec<f64> {
    let mut coefficients = Vec::with_capacity(count + 1);
    coefficients.push(1.0);
    coefficients.extend((0..count).map(|k| product[2 * k]));
    coefficients
}

fn one_sided_denominator(n: usize, cutoff: f64) -> Vec<f64> {
    let theta = PI * cutoff;
    let (st, ct) = theta.sin_cos();

    let mut poles = vec![0.0; 2 * n];
    for k in 0..n {
        let parg = PI * (2 * k + 1) as f64 / (2 * n) as f64;
        let a = 1.0 + st * parg.sin();
        poles[2 * k] = -ct / a;
        poles[2 * k + 1] = -st * parg.cos() / a;
    }

    real_parts(&binomial_mult(n, &poles), n)
}

fn two_sided_denominator(n: usize, low: f64, high: f64, stop: bool) -> Vec<f64> {
    let cp = (PI * (high + low) / 2.0).cos();
    let theta = PI * (high - low) / 2.0;
    let (st, ct) = theta.sin_cos();
    let s2t = 2.0 * st * ct;
    let c2t = 2.0 * ct * ct - 1.0;
    let sign = if stop { -1.0 } else { 1.0 };

    let mut rcof = vec![0.0; 2 * n];
    let mut tcof = vec![0.0; 2 * n];
    for k in 0..n {
        let parg = PI * (2 * k + 1) as f64 / (2 * n) as f64;
        let (sparg, cparg) = parg.sin_cos();
        let a = 1.0 + s2t * sparg;
        rcof[2 * k] = c2t / a;
        rcof[2 * k + 1] = sign * s2t * cparg / a;
        tcof[2 * k] = -2.0 * cp * (ct + st * sparg) / a;
        tcof[2 * k + 1] = -sign * 2.0 * cp * st * cparg / a;
    }

    real_parts(&trinomial_mult(n, &tcof, &rcof), 2 * n)
}

fn low_pass_numerator(n: usize) -> Vec<f64> {
    let mut coefficients = Vec::with_capacity(n + 1);
    let mut value = 1.0;
    coefficients.push(value);
    for k in 1..=n {
        value = value * (n - k + 1) as f64 / k as f64;
        coefficients.push(value.round());
    }
    coefficients
}

fn high_pass_numerator(n: usize) -> Vec<f64> {
    let mut coefficients = low_pass_numerator(n);
    for (k, c) in coefficients.iter_mut().enumerate() {
        if k % 2 == 1 {
            *c = -*c;
        }
    }
    coefficients
}

fn band_pass_numerator(n: usize) -> Vec<f64> {
    let high = high_pass_numerator(n);
    let mut coefficients = vec![0.0; 2 * n + 1];
    for (i, c) in high.iter().enumerate() {
        coefficients[2 * i] = *c;
    }
    coefficients
}

fn band_stop_numerator(n: usize, low: f64, high: f64) -> Vec<f64> {
    let alpha = -2.0 * (PI * (high + low) / 2.0).cos() / (PI * (high - low) / 2.0).cos();

    let mut c = vec![0.0; 2 * n + 1];
    c[0] = 1.0;
    c[1] = alpha;
    c[2] = 1.0;

    for i in 1..n {
        c[2 * i + 2] += c[2 * i];
        for j in (2..=2 * i).rev() {
            c[j + 1] += alpha * c[j] + c[j - 1];
        }
        c[2] += alpha * c[1] + 1.0;
        c[1] += alpha;
    }
    c
}

fn low_pass_scale(n: usize, cutoff: f64) -> f64 {
    let omega = PI * cutoff;
    let parg0 = PI / (2 * n) as f64;

    let mut sf = 1.0;
    for k in 0..n / 2 {
        sf *= 1.0 + omega.sin() * ((2 * k + 1) as f64 * parg0).sin();
    }

    let half = omega / 2.0;
    let f_omega = half.sin();
    if n % 2 == 1 {
        sf *= f_omega + half.cos();
    }
    f_omega.powi(n as i32) / sf
}

fn high_pass_scale(n: usize, cutoff: f64) -> f64 {
    let omega = PI * cutoff;
    let parg0 = PI / (2 * n) as f64;

    let mut sf = 1.0;
    for k in 0..n / 2 {
        sf *= 1.0 + omega.sin() * ((2 * k + 1) as f64 * parg0).sin();
    }

    let half = omega / 2.0;
    let f_omega = half.cos();
    if n % 2 == 1 {
        sf *= f_omega + half.sin();
    }
    f_omega.powi(n as i32) / sf
}

fn band_scale(n: usize, low: f64, high: f64, stop: bool) -> f64 {
    let t = (PI * (high - low) / 2.0).tan();
    let shift = if stop { t } else { 1.0 / t };

    let mut sfr = 1.0;
    let mut sfi = 0.0;
    for k in 0..n {
        let parg = PI * (2 * k + 1) as f64 / (2 * n) as f64;
        let sparg = shift + parg.sin();
        let cparg = parg.cos();
        let a = (sfr + sfi) * (sparg - cparg);
        let b = sfr * sparg;
        let c = -sfi * cparg;
        sfr = b - c;
        sfi = a - b - c;
    }
    1.0 / sfr
}
