// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Partitioned Rice coding of subframe residuals.
//!
//! A residual run is split into `2^order` equal-length partitions (the
//! first shortened by the predictor's warmup count), each coded either
//! with a Rice parameter in `[0, 14]` or, when that would cost more than
//! storing the values raw, as a fixed-width "escape" partition.
//!
//! The format also defines a second, 5-bit-parameter method (escape code
//! 31 instead of 15) for streams that need Rice parameters above 14; since
//! this implementation never chooses one, the 2-bit method selector this
//! encoder writes is always 0.

use std::io::{Read, Write};

use crate::bitstream::{rice_to_signed, signed_to_rice, BitReader, BitWriter, RICE_LOOKAHEAD_BITS};
use crate::error::{warn, Error, Result};
use crate::sample::bits_needed_signed;

/// The largest value a non-escape Rice parameter may take.
pub const MAX_RICE_PARAMETER: u32 = 14;

/// The largest partition order this implementation will consider or accept.
pub const MAX_PARTITION_ORDER: u32 = 15;

/// The escape parameter code under the narrow (4-bit) method this encoder
/// always uses.
const ESCAPE_CODE: u32 = 15;

/// The widest escape partition this format can express: the 5-bit width
/// field tops out at 31, one short of the full 32-bit sample range.
const MAX_ESCAPE_WIDTH: u32 = 31;

const fn build_lookahead_table() -> [u8; 1 << RICE_LOOKAHEAD_BITS as usize] {
    let mut table = [0u8; 1 << RICE_LOOKAHEAD_BITS as usize];
    let mut pattern = 0usize;
    while pattern < table.len() {
        let mut lz = RICE_LOOKAHEAD_BITS as u8;
        let mut bit = 0u32;
        while bit < RICE_LOOKAHEAD_BITS {
            if (pattern >> (RICE_LOOKAHEAD_BITS - 1 - bit)) & 1 != 0 {
                lz = bit as u8;
                break;
            }
            bit += 1;
        }
        table[pattern] = lz;
        pattern += 1;
    }
    table
}

/// For each `RICE_LOOKAHEAD_BITS`-bit window, the number of leading zero
/// bits before the first one bit, or `RICE_LOOKAHEAD_BITS` if the whole
/// window is zero and the unary scan must continue past it.
static LOOKAHEAD: [u8; 1 << RICE_LOOKAHEAD_BITS as usize] = build_lookahead_table();

/// Reads a unary-coded quotient, fast-pathing through `LOOKAHEAD` whenever
/// a full lookahead window is available. `limit` bounds the quotient so a
/// corrupt or adversarial stream cannot force an unbounded scan, nor the
/// restored sample to silently overflow.
fn read_unary<R: Read>(reader: &mut BitReader<R>, limit: u64) -> Result<u64> {
    let mut quotient = 0u64;
    loop {
        let (bits, have) = reader.peek(RICE_LOOKAHEAD_BITS);
        let lz = u32::from(LOOKAHEAD[bits as usize]);
        if lz < have {
            reader.consume(lz + 1);
            quotient += u64::from(lz);
            return Ok(quotient);
        }
        if have < RICE_LOOKAHEAD_BITS {
            return Err(Error::UnexpectedEof);
        }
        reader.consume(RICE_LOOKAHEAD_BITS);
        quotient += u64::from(RICE_LOOKAHEAD_BITS);
        if quotient > limit {
            return Err(Error::Overflow("rice residual exceeds 53-bit range"));
        }
    }
}

/// Decodes one Rice-coded signed residual with parameter `param`.
fn read_one<R: Read>(reader: &mut BitReader<R>, param: u32) -> Result<i64> {
    debug_assert!(param <= MAX_RICE_PARAMETER);
    let limit = 1u64 << (53 - param);
    let quotient = read_unary(reader, limit)?;
    let remainder = if param == 0 { 0 } else { u64::from(reader.read_uint(param)?) };
    let code = (quotient << param) | remainder;
    Ok(rice_to_signed(code))
}

/// Writes one Rice-coded signed residual with parameter `param`.
fn write_one<W: Write>(writer: &mut BitWriter<W>, param: u32, value: i64) -> Result<()> {
    debug_assert!(param <= MAX_RICE_PARAMETER);
    let code = signed_to_rice(value);
    let quotient = code >> param;
    debug_assert!(quotient <= u64::from(u32::MAX));
    writer.write_unary(quotient as u32)?;
    if param > 0 {
        writer.write_uint(param, (code & ((1u64 << param) - 1)) as u32)?;
    }
    Ok(())
}

/// How one partition of a partitioned Rice-coded residual is stored.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PartitionCoding {
    Rice { parameter: u32 },
    Escape { width: u32 },
}

/// Bit length of partition `index` at order `order` out of a block of size
/// `block_size`, with the first partition shortened by `warmup`.
fn partition_len(order: u32, index: u32, block_size: u32, warmup: u32) -> u32 {
    let n = block_size >> order;
    if index == 0 {
        n - warmup
    } else {
        n
    }
}

/// The largest partition order that evenly divides `block_size`, is no
/// more than `cap`, and whose first partition is still long enough to hold
/// at least one residual.
fn max_feasible_order(block_size: u32, warmup: u32, cap: u32) -> u32 {
    let mut order = 0;
    while order < cap {
        let next = order + 1;
        let n = block_size >> next;
        if n == 0 || n << next != block_size || n <= warmup {
            break;
        }
        order = next;
    }
    order
}

/// Estimates the cost in bits, libFLAC-style, of coding `n` residuals whose
/// zigzag codes sum to `sum` with Rice parameter `k`: `n * (k + 1) +
/// (sum >> k)`. This slightly overestimates the true cost (the true cost
/// sums `v_i >> k` individually) but is cheap to evaluate from a reused
/// partition sum and accurate enough to pick a good parameter.
fn estimate_cost(n: u32, sum: u64, k: u32) -> u64 {
    u64::from(n) * u64::from(k + 1) + (sum >> k)
}

fn best_rice_parameter(n: u32, sum: u64) -> (u32, u64) {
    let mut best_k = 0;
    let mut best_cost = estimate_cost(n, sum, 0);
    for k in 1..=MAX_RICE_PARAMETER {
        let cost = estimate_cost(n, sum, k);
        if cost < best_cost {
            best_cost = cost;
            best_k = k;
        }
    }
    (best_k, best_cost)
}

/// A chosen partitioning of the residual: the order and each partition's
/// coding, plus the total payload size so candidate orders can be compared.
struct Plan {
    order: u32,
    partitions: Vec<PartitionCoding>,
    total_bits: u64,
}

fn plan_for_order(residual: &[i64], order: u32, block_size: u32, warmup: u32) -> Plan {
    let count = 1u32 << order;
    let mut partitions = Vec::with_capacity(count as usize);
    let mut total_bits = 2 + 4; // method selector + partition order

    let mut offset = 0usize;
    for index in 0..count {
        let n = partition_len(order, index, block_size, warmup);
        let part = &residual[offset..offset + n as usize];
        offset += n as usize;

        let sum: u64 = part.iter().map(|&v| signed_to_rice(v)).sum();
        let (k, rice_cost) = best_rice_parameter(n, sum);

        let escape_width = bits_needed_signed(part.iter().copied());
        let use_escape = escape_width <= MAX_ESCAPE_WIDTH
            && u64::from(n) * u64::from(escape_width) < rice_cost;

        if use_escape {
            partitions.push(PartitionCoding::Escape { width: escape_width });
            total_bits += 4 + 5 + u64::from(n) * u64::from(escape_width);
        } else {
            partitions.push(PartitionCoding::Rice { parameter: k });
            total_bits += 4 + rice_cost;
        }
    }
    Plan { order, partitions, total_bits }
}

/// Searches partition orders `0..=max_order` and returns the cheapest plan.
fn choose_plan(residual: &[i64], block_size: u32, warmup: u32, max_order: u32) -> Plan {
    let cap = max_order.min(MAX_PARTITION_ORDER);
    let feasible = max_feasible_order(block_size, warmup, cap);

    let mut best = plan_for_order(residual, 0, block_size, warmup);
    for order in 1..=feasible {
        let plan = plan_for_order(residual, order, block_size, warmup);
        if plan.total_bits < best.total_bits {
            best = plan;
        }
    }
    best
}

/// Encodes `residual` (length `block_size - warmup`) as a partitioned Rice
/// run, searching partition orders `0..=max_order`.
pub fn encode<W: Write>(
    writer: &mut BitWriter<W>,
    residual: &[i64],
    block_size: u32,
    warmup: u32,
    max_order: u32,
) -> Result<()> {
    let plan = choose_plan(residual, block_size, warmup, max_order);

    writer.write_uint(2, 0)?;
    writer.write_uint(4, plan.order)?;

    let count = 1u32 << plan.order;
    let mut offset = 0usize;
    for index in 0..count {
        let n = partition_len(plan.order, index, block_size, warmup);
        let part = &residual[offset..offset + n as usize];
        offset += n as usize;

        match plan.partitions[index as usize] {
            PartitionCoding::Rice { parameter } => {
                writer.write_uint(4, parameter)?;
                for &v in part {
                    write_one(writer, parameter, v)?;
                }
            }
            PartitionCoding::Escape { width } => {
                writer.write_uint(4, ESCAPE_CODE)?;
                writer.write_uint(5, width)?;
                for &v in part {
                    writer.write_signed(width, v as i32)?;
                }
            }
        }
    }
    Ok(())
}

/// Decodes a partitioned Rice run into `out` (length `block_size -
/// warmup`).
pub fn decode<R: Read>(reader: &mut BitReader<R>, out: &mut [i64], block_size: u32, warmup: u32) -> Result<()> {
    let method = reader.read_uint(2)?;
    if method > 1 {
        return Err(warn(Error::ReservedValue("rice method selector")));
    }
    let param_width = if method == 0 { 4 } else { 5 };
    let escape_code = if method == 0 { 15 } else { 31 };

    let order = reader.read_uint(4)?;
    if order > MAX_PARTITION_ORDER || block_size >> order << order != block_size {
        return Err(warn(Error::DataFormat("rice partition order out of range")));
    }
    let count = 1u32 << order;

    let mut offset = 0usize;
    for index in 0..count {
        let n = partition_len(order, index, block_size, warmup) as usize;
        let slot = &mut out[offset..offset + n];
        offset += n;

        let code = reader.read_uint(param_width)?;
        if code == escape_code {
            let width = reader.read_uint(5)?;
            if width == 0 {
                for v in slot.iter_mut() {
                    *v = 0;
                }
            } else {
                for v in slot.iter_mut() {
                    *v = i64::from(reader.read_signed(width)?);
                }
            }
        } else if code <= MAX_RICE_PARAMETER {
            for v in slot.iter_mut() {
                *v = read_one(reader, code)?;
            }
        } else {
            return Err(warn(Error::ReservedValue("rice parameter")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(residual: Vec<i64>, block_size: u32, warmup: u32, max_order: u32) {
        let mut buf = Vec::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            encode(&mut writer, &residual, block_size, warmup, max_order).unwrap();
            writer.flush().unwrap();
        }
        let mut reader = BitReader::new(Cursor::new(buf));
        let mut decoded = vec![0i64; residual.len()];
        decode(&mut reader, &mut decoded, block_size, warmup).unwrap();
        assert_eq!(decoded, residual);
    }

    #[test]
    fn round_trips_small_residuals() {
        let residual: Vec<i64> = (0..4096i64).map(|i| (i % 7) - 3).collect();
        round_trip(residual, 4096, 0, 6);
    }

    #[test]
    fn round_trips_with_warmup_offset() {
        let residual: Vec<i64> = (0..4094i64).map(|i| (i % 5) - 2).collect();
        round_trip(residual, 4096, 2, 6);
    }

    #[test]
    fn round_trips_zero_residual() {
        round_trip(vec![0i64; 4096], 4096, 0, 8);
    }

    #[test]
    fn escape_mode_round_trips_large_residual() {
        let mut residual = vec![1i64; 256];
        residual[0] = 1 << 30;
        residual[1] = -(1 << 30);
        round_trip(residual, 256, 0, 4);
    }

    #[test]
    fn round_trips_non_power_of_two_block_at_order_zero() {
        let residual: Vec<i64> = vec![5, -5, 3, -3, 1];
        round_trip(residual, 5, 0, 15);
    }

    #[test]
    fn rejects_reserved_rice_parameter() {
        let mut buf = Vec::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            writer.write_uint(2, 1).unwrap(); // 5-bit method, never emitted by this encoder
            writer.write_uint(4, 0).unwrap(); // order 0
            writer.write_uint(5, 20).unwrap(); // not MAX_RICE_PARAMETER, not escape(31)
            writer.flush().unwrap();
        }
        let mut reader = BitReader::new(Cursor::new(buf));
        let mut out = vec![0i64; 4];
        assert!(decode(&mut reader, &mut out, 4, 0).is_err());
    }

    #[test]
    fn rejects_method_selector_above_one() {
        let mut buf = Vec::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            writer.write_uint(2, 2).unwrap(); // codes 2 and 3 are reserved
            writer.flush().unwrap();
        }
        let mut reader = BitReader::new(Cursor::new(buf));
        let mut out = vec![0i64; 4];
        assert!(decode(&mut reader, &mut out, 4, 0).is_err());
    }
}
