// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! A from-scratch, dependency-free MD5 implementation, used to verify the
//! decoded PCM samples against the digest stored in STREAMINFO.

use std::cmp;

const BLOCK_LEN: usize = 64;
const BLOCK_LEN_MASK: u64 = 0x3f;

fn transform(state: &mut [u32; 4], block: &[u8]) {
    assert!(block.len() == BLOCK_LEN);

    let mut m = [0u32; 16];
    for (i, word) in m.iter_mut().enumerate() {
        *word = u32::from_le_bytes([
            block[i * 4],
            block[i * 4 + 1],
            block[i * 4 + 2],
            block[i * 4 + 3],
        ]);
    }

    macro_rules! step {
        ($a:ident, $b:ident, $f:expr, $k:expr, $m:expr, $s:expr) => {
            $a = $b.wrapping_add(
                ($a.wrapping_add($f).wrapping_add($k).wrapping_add($m)).rotate_left($s),
            );
        };
    }

    let (mut a, mut b, mut c, mut d) = (state[0], state[1], state[2], state[3]);

    {
        macro_rules! t {
            ($a:ident, $b:ident, $c:ident, $d:ident, $m:expr, $s:expr, $k:expr) => {
                step!($a, $b, $d ^ ($b & ($c ^ $d)), $k, $m, $s);
            };
        }
        t!(a, b, c, d, m[0], 7, 0xd76aa478);
        t!(d, a, b, c, m[1], 12, 0xe8c7b756);
        t!(c, d, a, b, m[2], 17, 0x242070db);
        t!(b, c, d, a, m[3], 22, 0xc1bdceee);
        t!(a, b, c, d, m[4], 7, 0xf57c0faf);
        t!(d, a, b, c, m[5], 12, 0x4787c62a);
        t!(c, d, a, b, m[6], 17, 0xa8304613);
        t!(b, c, d, a, m[7], 22, 0xfd469501);
        t!(a, b, c, d, m[8], 7, 0x698098d8);
        t!(d, a, b, c, m[9], 12, 0x8b44f7af);
        t!(c, d, a, b, m[10], 17, 0xffff5bb1);
        t!(b, c, d, a, m[11], 22, 0x895cd7be);
        t!(a, b, c, d, m[12], 7, 0x6b901122);
        t!(d, a, b, c, m[13], 12, 0xfd987193);
        t!(c, d, a, b, m[14], 17, 0xa679438e);
        t!(b, c, d, a, m[15], 22, 0x49b40821);
    }
    {
        macro_rules! t {
            ($a:ident, $b:ident, $c:ident, $d:ident, $m:expr, $s:expr, $k:expr) => {
                step!($a, $b, $c ^ ($d & ($b ^ $c)), $k, $m, $s);
            };
        }
        t!(a, b, c, d, m[1], 5, 0xf61e2562);
        t!(d, a, b, c, m[6], 9, 0xc040b340);
        t!(c, d, a, b, m[11], 14, 0x265e5a51);
        t!(b, c, d, a, m[0], 20, 0xe9b6c7aa);
        t!(a, b, c, d, m[5], 5, 0xd62f105d);
        t!(d, a, b, c, m[10], 9, 0x02441453);
        t!(c, d, a, b, m[15], 14, 0xd8a1e681);
        t!(b, c, d, a, m[4], 20, 0xe7d3fbc8);
        t!(a, b, c, d, m[9], 5, 0x21e1cde6);
        t!(d, a, b, c, m[14], 9, 0xc33707d6);
        t!(c, d, a, b, m[3], 14, 0xf4d50d87);
        t!(b, c, d, a, m[8], 20, 0x455a14ed);
        t!(a, b, c, d, m[13], 5, 0xa9e3e905);
        t!(d, a, b, c, m[2], 9, 0xfcefa3f8);
        t!(c, d, a, b, m[7], 14, 0x676f02d9);
        t!(b, c, d, a, m[12], 20, 0x8d2a4c8a);
    }
    {
        macro_rules! t {
            ($a:ident, $b:ident, $c:ident, $d:ident, $m:expr, $s:expr, $k:expr) => {
                step!($a, $b, $b ^ $c ^ $d, $k, $m, $s);
            };
        }
        t!(a, b, c, d, m[5], 4, 0xfffa3942);
        t!(d, a, b, c, m[8], 11, 0x8771f681);
        t!(c, d, a, b, m[11], 16, 0x6d9d6122);
        t!(b, c, d, a, m[14], 23, 0xfde5380c);
        t!(a, b, c, d, m[1], 4, 0xa4beea44);
        t!(d, a, b, c, m[4], 11, 0x4bdecfa9);
        t!(c, d, a, b, m[7], 16, 0xf6bb4b60);
        t!(b, c, d, a, m[10], 23, 0xbebfbc70);
        t!(a, b, c, d, m[13], 4, 0x289b7ec6);
        t!(d, a, b, c, m[0], 11, 0xeaa127fa);
        t!(c, d, a, b, m[3], 16, 0xd4ef3085);
        t!(b, c, d, a, m[6], 23, 0x04881d05);
        t!(a, b, c, d, m[9], 4, 0xd9d4d039);
        t!(d, a, b, c, m[12], 11, 0xe6db99e5);
        t!(c, d, a, b, m[15], 16, 0x1fa27cf8);
        t!(b, c, d, a, m[2], 23, 0xc4ac5665);
    }
    {
        macro_rules! t {
            ($a:ident, $b:ident, $c:ident, $d:ident, $m:expr, $s:expr, $k:expr) => {
                step!($a, $b, $c ^ ($b | !$d), $k, $m, $s);
            };
        }
        t!(a, b, c, d, m[0], 6, 0xf4292244);
        t!(d, a, b, c, m[7], 10, 0x432aff97);
        t!(c, d, a, b, m[14], 15, 0xab9423a7);
        t!(b, c, d, a, m[5], 21, 0xfc93a039);
        t!(a, b, c, d, m[12], 6, 0x655b59c3);
        t!(d, a, b, c, m[3], 10, 0x8f0ccc92);
        t!(c, d, a, b, m[10], 15, 0xffeff47d);
        t!(b, c, d, a, m[1], 21, 0x85845dd1);
        t!(a, b, c, d, m[8], 6, 0x6fa87e4f);
        t!(d, a, b, c, m[15], 10, 0xfe2ce6e0);
        t!(c, d, a, b, m[6], 15, 0xa3014314);
        t!(b, c, d, a, m[13], 21, 0x4e0811a1);
        t!(a, b, c, d, m[4], 6, 0xf7537e82);
        t!(d, a, b, c, m[11], 10, 0xbd3af235);
        t!(c, d, a, b, m[2], 15, 0x2ad7d2bb);
        t!(b, c, d, a, m[9], 21, 0xeb86d391);
    }

    state[0] = state[0].wrapping_add(a);
    state[1] = state[1].wrapping_add(b);
    state[2] = state[2].wrapping_add(c);
    state[3] = state[3].wrapping_add(d);
}

/// Incremental MD5 hasher over raw bytes.
#[derive(Clone)]
pub struct Md5 {
    state: [u32; 4],
    block: [u8; BLOCK_LEN],
    len: u64,
}

impl Default for Md5 {
    fn default() -> Md5 {
        Md5 { state: [0x67452301, 0xefcdab89, 0x98badcfe, 0x10325476], block: [0; BLOCK_LEN], len: 0 }
    }
}

impl Md5 {
    pub fn new() -> Md5 {
        Md5::default()
    }

    /// Feeds `bytes` into the running hash.
    pub fn write(&mut self, bytes: &[u8]) {
        let mut rem = bytes;
        while !rem.is_empty() {
            let block_len = (self.len & BLOCK_LEN_MASK) as usize;
            let copy_len = cmp::min(rem.len(), BLOCK_LEN - block_len);
            self.len += copy_len as u64;

            if copy_len == BLOCK_LEN {
                transform(&mut self.state, &rem[..copy_len]);
            } else {
                self.block[block_len..block_len + copy_len].copy_from_slice(&rem[..copy_len]);
                if self.len & BLOCK_LEN_MASK == 0 {
                    transform(&mut self.state, &self.block);
                }
            }
            rem = &rem[copy_len..];
        }
    }

    /// Consumes the hasher and returns the 16-byte digest.
    pub fn finish(self) -> [u8; 16] {
        let mut block = [0u8; BLOCK_LEN];
        let mut state = self.state;

        let block_len = (self.len & BLOCK_LEN_MASK) as usize;
        block[..block_len].copy_from_slice(&self.block[..block_len]);
        block[block_len] = 0x80;

        if BLOCK_LEN - block_len - 1 < 8 {
            transform(&mut state, &block);
            block = [0; BLOCK_LEN];
        }

        block[BLOCK_LEN - 8..].copy_from_slice(&(self.len << 3).to_le_bytes());
        transform(&mut state, &block);

        let mut hash = [0u8; 16];
        hash[0..4].copy_from_slice(&state[0].to_le_bytes());
        hash[4..8].copy_from_slice(&state[1].to_le_bytes());
        hash[8..12].copy_from_slice(&state[2].to_le_bytes());
        hash[12..16].copy_from_slice(&state[3].to_le_bytes());
        hash
    }
}

/// Feeds one interleaved PCM block into `hasher` in the canonical
/// little-endian byte order FLAC's STREAMINFO digest is defined over:
/// for each sample index, for each channel, `depth / 8` bytes of that
/// channel's sample, least-significant byte first.
///
/// `depth` must be a multiple of 8 in `[8, 32]`.
pub fn write_pcm_block(hasher: &mut Md5, channels: &[Vec<i32>], depth: u32) {
    debug_assert!(depth % 8 == 0 && (8..=32).contains(&depth));
    let bytes_per_sample = (depth / 8) as usize;
    if channels.is_empty() {
        return;
    }
    let n = channels[0].len();
    let mut scratch = [0u8; 4];
    for i in 0..n {
        for ch in channels {
            let sample = ch[i];
            scratch.copy_from_slice(&sample.to_le_bytes());
            hasher.write(&scratch[..bytes_per_sample]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md5_of(data: &[u8]) -> [u8; 16] {
        let mut h = Md5::new();
        h.write(data);
        h.finish()
    }

    #[test]
    fn empty_input() {
        assert_eq!(
            md5_of(b""),
            [
                0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec,
                0xf8, 0x42, 0x7e,
            ]
        );
    }

    #[test]
    fn abc() {
        assert_eq!(
            md5_of(b"abc"),
            [
                0x90, 0x01, 0x50, 0x98, 0x3c, 0xd2, 0x4f, 0xb0, 0xd6, 0x96, 0x3f, 0x7d, 0x28,
                0xe1, 0x7f, 0x72,
            ]
        );
    }

    #[test]
    fn chunked_matches_single_shot() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let one_shot = md5_of(data);

        let mut h = Md5::new();
        for chunk in data.chunks(7) {
            h.write(chunk);
        }
        assert_eq!(h.finish(), one_shot);
    }

    #[test]
    fn zero_pcm_block_matches_literal_digest() {
        // 4096 zero samples, two channels, depth 16: MD5 of 16384 zero bytes.
        let mut h = Md5::new();
        let channels = vec![vec![0i32; 4096], vec![0i32; 4096]];
        write_pcm_block(&mut h, &channels, 16);
        let digest = h.finish();

        let mut expect = Md5::new();
        expect.write(&vec![0u8; 16384]);
        assert_eq!(digest, expect.finish());
    }
}
