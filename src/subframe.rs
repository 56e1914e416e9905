// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Subframe coders: `Constant`, `Verbatim`, fixed-order and LPC prediction.
//!
//! Samples are always `i64` here, not `i32`: a mid/side-decorrelated side
//! channel can need one more bit than the stream's nominal depth, and
//! prediction arithmetic widens further still.

use std::io::{Read, Write};

use crate::bitstream::{BitReader, BitWriter};
use crate::error::{warn, Error, Result};
use crate::lpc::{self, QuantizedLpc};
use crate::rice;
use crate::sample::{common_trailing_zeros, is_constant};

/// Coefficient vectors of the five fixed predictors (orders 0-4), per the
/// format's built-in polynomial predictors.
const FIXED_COEFFICIENTS: [&[i64]; 5] =
    [&[], &[1], &[2, -1], &[3, -3, 1], &[4, -6, 4, -1]];

/// Caps how high an order the encoder's search will try, independent of
/// what the format allows (LPC up to 32): lower orders are cheaper to
/// evaluate and sufficient for all but unusually tonal material.
#[derive(Clone, Debug)]
pub struct SubframeConfig {
    pub max_lpc_order: u32,
    pub max_rice_partition_order: u32,
}

impl Default for SubframeConfig {
    fn default() -> SubframeConfig {
        SubframeConfig { max_lpc_order: 12, max_rice_partition_order: 6 }
    }
}

/// The decoded shape of one subframe, independent of wasted-bits shift.
#[derive(Clone, Debug, PartialEq)]
pub enum SubframeKind {
    Constant,
    Verbatim,
    Fixed { order: u32 },
    Lpc { order: u32, predictor: QuantizedLpc },
}

fn type_code(kind: &SubframeKind) -> u32 {
    match kind {
        SubframeKind::Constant => 0,
        SubframeKind::Verbatim => 1,
        SubframeKind::Fixed { order } => 8 + order,
        SubframeKind::Lpc { order, .. } => 32 + (order - 1),
    }
}

fn read_wasted_bits<R: Read>(reader: &mut BitReader<R>) -> Result<u32> {
    if !reader.read_bit()? {
        return Ok(0);
    }
    let mut n = 0u32;
    while !reader.read_bit()? {
        n += 1;
    }
    Ok(n + 1)
}

fn write_wasted_bits<W: Write>(writer: &mut BitWriter<W>, s: u32) -> Result<()> {
    if s == 0 {
        writer.write_bit(false)
    } else {
        writer.write_bit(true)?;
        writer.write_unary(s - 1)
    }
}

/// Applies a fixed-order predictor to get the residual of `samples[order..]`.
fn fixed_residual(samples: &[i64], order: u32) -> Vec<i64> {
    let coefs = FIXED_COEFFICIENTS[order as usize];
    let mut out = Vec::with_capacity(samples.len() - order as usize);
    for i in order as usize..samples.len() {
        let mut prediction = 0i64;
        for (j, &c) in coefs.iter().enumerate() {
            prediction += c * samples[i - 1 - j];
        }
        out.push(samples[i] - prediction);
    }
    out
}

fn fixed_restore(warmup: &[i64], residual: &[i64], order: u32) -> Vec<i64> {
    let coefs = FIXED_COEFFICIENTS[order as usize];
    let mut samples = Vec::with_capacity(warmup.len() + residual.len());
    samples.extend_from_slice(warmup);
    for &r in residual {
        let i = samples.len();
        let mut prediction = 0i64;
        for (j, &c) in coefs.iter().enumerate() {
            prediction += c * samples[i - 1 - j];
        }
        samples.push(r + prediction);
    }
    samples
}

fn sum_abs(residual: &[i64]) -> u64 {
    residual.iter().map(|&v| v.unsigned_abs()).sum()
}

/// Picks the best strategy for `samples` (already wasted-bits-shifted) and
/// writes the whole subframe, including its header.
pub fn encode<W: Write>(
    writer: &mut BitWriter<W>,
    samples: &[i64],
    bits_per_sample: u32,
    config: &SubframeConfig,
) -> Result<()> {
    let wasted = common_trailing_zeros(samples);
    let shifted: Vec<i64> = if wasted == 0 { samples.to_vec() } else { samples.iter().map(|&s| s >> wasted).collect() };
    let effective_depth = bits_per_sample - wasted;

    writer.write_bit(false)?; // reserved

    if is_constant(&shifted) {
        writer.write_uint(6, type_code(&SubframeKind::Constant))?;
        write_wasted_bits(writer, wasted)?;
        writer.write_signed(effective_depth, shifted.first().copied().unwrap_or(0) as i32)?;
        return Ok(());
    }

    let mut best_order = 0u32;
    let mut best_cost = u64::MAX;
    let mut best_residual: Vec<i64> = Vec::new();
    for order in 0..=4u32.min(shifted.len() as u32) {
        let residual = fixed_residual(&shifted, order);
        let cost = sum_abs(&residual);
        if cost < best_cost {
            best_cost = cost;
            best_order = order;
            best_residual = residual;
        }
    }
    let mut kind = SubframeKind::Fixed { order: best_order };
    let mut residual = best_residual;
    let mut cost_estimate = estimate_residual_bits(&residual);

    let max_lpc_order = config.max_lpc_order.min(lpc::MAX_ORDER).min(shifted.len().saturating_sub(1) as u32);
    for order in 1..=max_lpc_order {
        if let Some(fit) = lpc::fit(&shifted, order) {
            let predictor = lpc::quantize(&fit.coefficients);
            let lpc_residual = lpc::residual(&shifted, &predictor);
            let lpc_cost = estimate_residual_bits(&lpc_residual)
                + u64::from(order) * u64::from(predictor.precision)
                + 9; // 4-bit precision-1 field + 5-bit shift field
            if lpc_cost < cost_estimate {
                cost_estimate = lpc_cost;
                kind = SubframeKind::Lpc { order, predictor };
                residual = lpc_residual;
            }
        }
    }

    let verbatim_cost = u64::from(effective_depth) * shifted.len() as u64;
    if verbatim_cost < cost_estimate {
        writer.write_uint(6, type_code(&SubframeKind::Verbatim))?;
        write_wasted_bits(writer, wasted)?;
        for &s in &shifted {
            writer.write_signed(effective_depth, s as i32)?;
        }
        return Ok(());
    }

    writer.write_uint(6, type_code(&kind))?;
    write_wasted_bits(writer, wasted)?;

    let order = match &kind {
        SubframeKind::Fixed { order } => *order,
        SubframeKind::Lpc { order, .. } => *order,
        _ => unreachable!("constant and verbatim handled above"),
    };
    for &w in &shifted[..order as usize] {
        writer.write_signed(effective_depth, w as i32)?;
    }

    if let SubframeKind::Lpc { predictor, .. } = &kind {
        writer.write_uint(4, predictor.precision - 1)?;
        writer.write_signed(5, predictor.shift)?;
        for &c in &predictor.coefficients {
            writer.write_signed(predictor.precision, c)?;
        }
    }

    rice::encode(writer, &residual, shifted.len() as u32, order, config.max_rice_partition_order)?;
    Ok(())
}

/// A cheap, decode-independent estimate of the bits a residual run's Rice
/// coding will cost, used only to rank candidate predictors against each
/// other (the real Rice search re-derives the exact partitioning).
fn estimate_residual_bits(residual: &[i64]) -> u64 {
    if residual.is_empty() {
        return 0;
    }
    let sum = sum_abs(residual) * 2; // zigzag roughly doubles magnitude
    let mean = sum / residual.len() as u64;
    let k = if mean == 0 { 0 } else { 64 - mean.leading_zeros() };
    residual.len() as u64 * (k as u64 + 1) + (sum >> k)
}

/// Reads one full subframe (header, warmup, residual) and restores
/// `block_size` samples at `bits_per_sample` (the channel's effective bit
/// depth before any stereo reconstruction).
pub fn decode<R: Read>(reader: &mut BitReader<R>, block_size: u32, bits_per_sample: u32) -> Result<Vec<i64>> {
    if reader.read_bit()? {
        return Err(warn(Error::ReservedValue("subframe header reserved bit")));
    }
    let code = reader.read_uint(6)?;
    let wasted = read_wasted_bits(reader)?;
    if wasted >= bits_per_sample {
        return Err(warn(Error::DataFormat("wasted bits shift exceeds sample depth")));
    }
    let depth = bits_per_sample - wasted;

    let mut samples = match code {
        0 => {
            let value = i64::from(reader.read_signed(depth)?);
            vec![value; block_size as usize]
        }
        1 => {
            let mut out = Vec::with_capacity(block_size as usize);
            for _ in 0..block_size {
                out.push(i64::from(reader.read_signed(depth)?));
            }
            out
        }
        8..=12 => {
            let order = code - 8;
            let mut warmup = Vec::with_capacity(order as usize);
            for _ in 0..order {
                warmup.push(i64::from(reader.read_signed(depth)?));
            }
            let mut residual = vec![0i64; block_size as usize - order as usize];
            rice::decode(reader, &mut residual, block_size, order)?;
            fixed_restore(&warmup, &residual, order)
        }
        32..=63 => {
            let order = code - 32 + 1;
            let mut warmup = Vec::with_capacity(order as usize);
            for _ in 0..order {
                warmup.push(i64::from(reader.read_signed(depth)?));
            }
            let precision = reader.read_uint(4)? + 1;
            if precision > 15 {
                return Err(warn(Error::ReservedValue("lpc precision")));
            }
            let shift = reader.read_signed(5)?;
            if shift < 0 {
                return Err(warn(Error::DataFormat("lpc shift must be non-negative")));
            }
            let mut coefficients = Vec::with_capacity(order as usize);
            for _ in 0..order {
                coefficients.push(reader.read_signed(precision)?);
            }
            let predictor = QuantizedLpc { coefficients, precision, shift };
            let mut residual = vec![0i64; block_size as usize - order as usize];
            rice::decode(reader, &mut residual, block_size, order)?;
            lpc::restore(&warmup, &residual, &predictor)
        }
        _ => return Err(warn(Error::ReservedValue("subframe type"))),
    };

    if wasted > 0 {
        for s in samples.iter_mut() {
            *s <<= wasted;
        }
    }
    Ok(samples)
}
