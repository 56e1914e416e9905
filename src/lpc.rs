// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Linear predictive coding: fitting a predictor to a block of samples,
//! and quantising its coefficients to the fixed-point form the bitstream
//! stores.

/// The maximum LPC predictor order this implementation will fit or accept.
pub const MAX_ORDER: u32 = 32;

/// Fixed-point coefficient precision used by the quantiser, per the
/// "choose precision = 15" rule.
const QUANT_PRECISION: u32 = 15;

/// A fitted predictor in floating point, before quantisation.
pub struct LpcCoefficients {
    pub coefficients: Vec<f64>,
}

/// Computes `Σ samples[k] * samples[k + lag]` for `lag in 0..=max_order`, a
/// single pass over the block that every autocorrelation matrix entry is
/// then read out of (the "cached dot-product helper" the fitter shares
/// across all matrix cells).
fn autocorrelation(samples: &[i64], max_order: u32) -> Vec<f64> {
    let n = samples.len();
    let mut acc = vec![0f64; max_order as usize + 1];
    for (lag, slot) in acc.iter_mut().enumerate() {
        let mut sum = 0f64;
        for k in 0..n.saturating_sub(lag) {
            sum += samples[k] as f64 * samples[k + lag] as f64;
        }
        *slot = sum;
    }
    acc
}

/// Solves `matrix * x = rhs` in place by Gauss-Jordan elimination with
/// partial pivoting. Returns `None` if the matrix is (numerically)
/// singular, in which case the caller should fall back to a lower order or
/// fixed prediction.
fn gauss_jordan_solve(mut matrix: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Option<Vec<f64>> {
    let n = rhs.len();
    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_val = matrix[col][col].abs();
        for row in (col + 1)..n {
            if matrix[row][col].abs() > pivot_val {
                pivot_row = row;
                pivot_val = matrix[row][col].abs();
            }
        }
        if pivot_val < 1e-9 {
            return None;
        }
        matrix.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = matrix[col][col];
        for c in col..n {
            matrix[col][c] /= pivot;
        }
        rhs[col] /= pivot;

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = matrix[row][col];
            if factor == 0.0 {
                continue;
            }
            for c in col..n {
                matrix[row][c] -= factor * matrix[col][c];
            }
            rhs[row] -= factor * rhs[col];
        }
    }
    Some(rhs)
}

/// Fits an LPC predictor of `order` to `samples` via autocorrelation and a
/// Gauss-Jordan solve in double precision. Returns `None` if the system is
/// singular (e.g. a silent or near-constant block).
pub fn fit(samples: &[i64], order: u32) -> Option<LpcCoefficients> {
    debug_assert!(order >= 1 && order <= MAX_ORDER);
    let order = order as usize;
    if samples.len() <= order {
        return None;
    }

    let autoc = autocorrelation(samples, order as u32);

    let mut matrix = vec![vec![0f64; order]; order];
    for r in 0..order {
        for c in 0..order {
            matrix[r][c] = autoc[(r as isize - c as isize).unsigned_abs()];
        }
    }
    let rhs: Vec<f64> = (1..=order).map(|lag| autoc[lag]).collect();

    gauss_jordan_solve(matrix, rhs).map(|coefficients| LpcCoefficients { coefficients })
}

/// A quantised, fixed-point LPC predictor ready for the bitstream: `order`
/// coefficients of `precision` bits each, applied as `(Σ coef[j] * x[i-1-j])
/// >> shift`.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantizedLpc {
    pub coefficients: Vec<i32>,
    pub precision: u32,
    pub shift: i32,
}

/// Quantises floating-point coefficients to fixed point: `precision = 15`,
/// `shift = precision - 1 - whole_bits`, each coefficient rounded to the
/// nearest integer and saturated into `[-2^(precision-1), 2^(precision-1)
/// - 1]`.
pub fn quantize(coefficients: &[f64]) -> QuantizedLpc {
    let max_coef = coefficients.iter().fold(0f64, |acc, &c| acc.max(c.abs()));
    let whole_bits = if max_coef < 1.0 { 0 } else { max_coef.log2().floor() as i32 + 1 };
    let shift = (QUANT_PRECISION as i32 - 1 - whole_bits).clamp(0, 31);

    let limit = 1i64 << (QUANT_PRECISION - 1);
    let mut error = 0f64;
    let quantized: Vec<i32> = coefficients
        .iter()
        .map(|&c| {
            let scaled = c * (1i64 << shift) as f64 + error;
            let rounded = scaled.round();
            error = scaled - rounded;
            rounded.clamp(-(limit as f64), (limit - 1) as f64) as i32
        })
        .collect();

    QuantizedLpc { coefficients: quantized, precision: QUANT_PRECISION, shift }
}

/// Computes the residual of applying `predictor` to `samples` (which must
/// include `order` warmup samples before the first predicted one):
/// `residual[i] = samples[order + i] - predicted`.
pub fn residual(samples: &[i64], predictor: &QuantizedLpc) -> Vec<i64> {
    let order = predictor.coefficients.len();
    let mut out = Vec::with_capacity(samples.len() - order);
    for i in order..samples.len() {
        let mut prediction = 0i64;
        for (j, &coef) in predictor.coefficients.iter().enumerate() {
            prediction += i64::from(coef) * samples[i - 1 - j];
        }
        out.push(samples[i] - (prediction >> predictor.shift));
    }
    out
}

/// Restores samples from `residual` given `warmup` (the first `order`
/// samples of the block, verbatim) and `predictor`. Widens intermediate
/// arithmetic to `i64`, matching every other prediction path.
pub fn restore(warmup: &[i64], residual: &[i64], predictor: &QuantizedLpc) -> Vec<i64> {
    let order = predictor.coefficients.len();
    debug_assert_eq!(warmup.len(), order);
    let mut samples = Vec::with_capacity(order + residual.len());
    samples.extend_from_slice(warmup);
    for &r in residual {
        let i = samples.len();
        let mut prediction = 0i64;
        for (j, &coef) in predictor.coefficients.iter().enumerate() {
            prediction += i64::from(coef) * samples[i - 1 - j];
        }
        samples.push(r + (prediction >> predictor.shift));
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_a_pure_linear_ramp_with_order_two() {
        let samples: Vec<i64> = (0..64).collect();
        let fit = fit(&samples, 2).expect("ramp should not be singular");
        let quantized = quantize(&fit.coefficients);
        let residual = residual(&samples, &quantized);
        // A perfect linear ramp is predicted exactly by a second-order
        // predictor once quantisation error is accounted for; residuals
        // should all be small.
        assert!(residual.iter().all(|&r| r.abs() < 4));
    }

    #[test]
    fn restore_inverts_residual() {
        let samples: Vec<i64> = (0..128).map(|i| ((i * 37) % 101) - 50).collect();
        let fit = fit(&samples, 4).expect("should solve");
        let predictor = quantize(&fit.coefficients);
        let res = residual(&samples, &predictor);
        let restored = restore(&samples[..4], &res, &predictor);
        assert_eq!(restored, samples);
    }

    #[test]
    fn quantize_respects_precision_bounds() {
        let q = quantize(&[100.0, -100.0, 0.3]);
        let limit = 1i32 << (QUANT_PRECISION - 1);
        for &c in &q.coefficients {
            assert!(c >= -limit && c < limit);
        }
        assert!(q.shift >= 0);
    }

    #[test]
    fn singular_system_returns_none() {
        let samples = vec![0i64; 32];
        // An all-zero block makes every autocorrelation term zero, hence a
        // zero matrix with no pivot.
        assert!(fit(&samples, 4).is_none());
    }
}
