// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Top-level stream decoding: magic, metadata blocks, and the frame loop,
//! with an MD5 check of the decoded PCM against STREAMINFO.

use std::io::{Read, Seek, SeekFrom};

use crate::bitstream::BitReader;
use crate::error::{warn, Error, Result};
use crate::frame::{self, FrameHeader};
use crate::md5::{self, Md5};
use crate::metadata::{BlockHeader, BlockType, MetadataBlock, StreamInfo};

const MAGIC: [u8; 4] = *b"fLaC";

/// The outcome of comparing a decoded stream's MD5 against the digest
/// STREAMINFO declares. A mismatch is a reported status, not an error: an
/// encoder may legitimately skip the hash (an all-zero digest), and a
/// caller that only wants the audio should not have to treat that the same
/// as a truncated or corrupt file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Md5Status {
    /// STREAMINFO's digest was all-zero: the encoder did not compute one.
    Skipped,
    /// The recomputed digest matches STREAMINFO.
    Passed,
    /// The recomputed digest does not match STREAMINFO.
    Mismatched,
}

/// Reads a FLAC stream's magic, metadata blocks, and audio frames in order.
///
/// Most callers want [`FlacReader`], which additionally narrows decoded
/// channels into a single interleaved sample iterator.
pub struct Decoder<R> {
    reader: BitReader<R>,
    stream_info: StreamInfo,
    metadata_blocks: Vec<MetadataBlock>,
    /// Byte offset of the first frame header, i.e. right after metadata.
    /// `SeekTable` byte offsets are relative to this point.
    frames_start: u64,
    hasher: Option<Md5>,
    done: bool,
}

impl<R: Read> Decoder<R> {
    /// Reads the magic and every metadata block, stopping right before the
    /// first frame.
    pub fn new(input: R) -> Result<Decoder<R>> {
        let mut reader = BitReader::new(input);
        let mut magic = [0u8; 4];
        reader.read_fully(&mut magic)?;
        if magic != MAGIC {
            return Err(warn(Error::BadMagic));
        }

        let mut stream_info = None;
        let mut metadata_blocks = Vec::new();
        loop {
            let header = BlockHeader::read(&mut reader)?;
            let is_last = header.is_last;
            let seen_streaminfo = stream_info.is_some();
            let seen_seektable = metadata_blocks.iter().any(|b| matches!(b, MetadataBlock::SeekTable(_)));
            let block = crate::metadata::read_block(&mut reader, header, seen_streaminfo, seen_seektable)?;
            match block {
                MetadataBlock::StreamInfo(info) => stream_info = Some(info),
                other => metadata_blocks.push(other),
            }
            if is_last {
                break;
            }
        }

        let stream_info =
            stream_info.ok_or_else(|| warn(Error::DataFormat("stream has no StreamInfo block")))?;
        let frames_start = reader.byte_position()?;

        Ok(Decoder {
            reader,
            stream_info,
            metadata_blocks,
            frames_start,
            hasher: Some(Md5::new()),
            done: false,
        })
    }

    pub fn stream_info(&self) -> &StreamInfo {
        &self.stream_info
    }

    /// Metadata blocks other than StreamInfo, in stream order. A Rust-native
    /// rendering of reading metadata blocks one at a time: they are all
    /// already parsed and validated by the time [`Decoder::new`] returns, so
    /// there is nothing left to read incrementally.
    pub fn metadata_blocks(&self) -> &[MetadataBlock] {
        &self.metadata_blocks
    }

    /// Decodes the next frame. Returns `Ok(None)` at a clean end of stream.
    /// The channel order is the frame's plain left-to-right order, already
    /// stereo-reconstructed. Call [`Decoder::md5_status`] after the first
    /// `None` to learn whether the decoded PCM matched STREAMINFO.
    pub fn next_frame(&mut self) -> Result<Option<(FrameHeader, Vec<Vec<i32>>)>> {
        if self.done {
            return Ok(None);
        }

        let (_, have) = self.reader.peek(8);
        if have == 0 {
            self.done = true;
            return Ok(None);
        }

        let (header, wide_channels) = frame::decode_frame(&mut self.reader, self.stream_info.bits_per_sample)?;
        let channels: Vec<Vec<i32>> =
            wide_channels.iter().map(|ch| ch.iter().map(|&s| s as i32).collect()).collect();

        if let Some(hasher) = &mut self.hasher {
            md5::write_pcm_block(hasher, &channels, self.stream_info.bits_per_sample);
        }

        Ok(Some((header, channels)))
    }

    /// Decodes the next frame into `out`, one buffer per channel (resized
    /// and overwritten as needed), returning the number of samples written
    /// per channel, or `None` at a clean end of stream.
    pub fn read_block(&mut self, out: &mut Vec<Vec<i32>>) -> Result<Option<usize>> {
        match self.next_frame()? {
            None => Ok(None),
            Some((header, channels)) => {
                *out = channels;
                Ok(Some(header.block_size as usize))
            }
        }
    }

    /// Compares the running MD5 against STREAMINFO's digest. Only
    /// meaningful once `next_frame`/`read_block` has returned `None`;
    /// returns `None` before that point or after a seek has invalidated the
    /// running hash.
    pub fn md5_status(&self) -> Option<Md5Status> {
        if !self.done {
            return None;
        }
        if self.stream_info.md5sum == [0u8; 16] {
            return Some(Md5Status::Skipped);
        }
        let hasher = self.hasher.as_ref()?;
        if hasher.clone().finish() == self.stream_info.md5sum {
            Some(Md5Status::Passed)
        } else {
            Some(Md5Status::Mismatched)
        }
    }

    /// Decodes every remaining frame and returns the final MD5 comparison.
    pub fn finish(mut self) -> Result<Md5Status> {
        while self.next_frame()?.is_some() {}
        Ok(self.md5_status().unwrap_or(Md5Status::Skipped))
    }
}

impl<R: Read + Seek> Decoder<R> {
    /// Seeks to the seek-table entry at or before `sample`, returning the
    /// sample offset actually landed on. Requires a `SeekTable` metadata
    /// block with at least one non-placeholder entry at or before `sample`.
    /// Invalidates MD5 verification: the running hash can no longer cover
    /// the whole decoded stream once playback resumes mid-file.
    pub fn seek_to_sample(&mut self, sample: u64) -> Result<u64> {
        let point = self
            .metadata_blocks
            .iter()
            .find_map(|block| match block {
                MetadataBlock::SeekTable(table) => Some(table),
                _ => None,
            })
            .and_then(|table| {
                table.points.iter().filter(|p| !p.is_placeholder() && p.sample_offset <= sample).max_by_key(|p| p.sample_offset)
            })
            .copied()
            .ok_or(Error::InvalidArgument("no seek table entry at or before the requested sample"))?;

        self.reader.discard_buffered();
        self.reader
            .get_mut()
            .seek(SeekFrom::Start(self.frames_start + point.byte_offset))
            .map_err(Error::from)?;

        self.done = false;
        self.hasher = None;
        Ok(point.sample_offset)
    }
}

/// A convenience wrapper over [`Decoder`] that exposes decoded audio as a
/// flat iterator of interleaved samples, the layout most PCM consumers want.
pub struct FlacReader<R> {
    decoder: Decoder<R>,
    current: Vec<i32>,
    position: usize,
}

impl<R: Read> FlacReader<R> {
    pub fn new(input: R) -> Result<FlacReader<R>> {
        let decoder = Decoder::new(input)?;
        Ok(FlacReader { decoder, current: Vec::new(), position: 0 })
    }

    pub fn stream_info(&self) -> &StreamInfo {
        self.decoder.stream_info()
    }

    pub fn metadata_blocks(&self) -> &[MetadataBlock] {
        self.decoder.metadata_blocks()
    }

    /// The MD5 comparison for the portion of the stream decoded so far.
    /// Meaningful once [`FlacReader::samples`] (or manual draining via
    /// `next_sample`) has run to completion.
    pub fn md5_status(&self) -> Option<Md5Status> {
        self.decoder.md5_status()
    }

    fn interleave(channels: Vec<Vec<i32>>) -> Vec<i32> {
        if channels.is_empty() {
            return Vec::new();
        }
        let n = channels[0].len();
        let mut out = Vec::with_capacity(n * channels.len());
        for i in 0..n {
            for ch in &channels {
                out.push(ch[i]);
            }
        }
        out
    }

    /// Returns the next interleaved sample, decoding a new frame as needed.
    /// Returns `Ok(None)` once every frame has been consumed.
    pub fn next_sample(&mut self) -> Result<Option<i32>> {
        loop {
            if self.position < self.current.len() {
                let sample = self.current[self.position];
                self.position += 1;
                return Ok(Some(sample));
            }
            match self.decoder.next_frame()? {
                None => return Ok(None),
                Some((_, channels)) => {
                    self.current = Self::interleave(channels);
                    self.position = 0;
                }
            }
        }
    }

    /// Consumes the reader, decoding and returning every remaining sample
    /// as a single interleaved buffer.
    pub fn samples(mut self) -> Result<Vec<i32>> {
        let mut out = Vec::new();
        while let Some(sample) = self.next_sample()? {
            out.push(sample);
        }
        Ok(out)
    }
}

/// Reads a `BlockType` without decoding its payload. Exposed for tools that
/// want to skim metadata without paying for opaque block allocation.
pub fn peek_block_type<R: Read>(reader: &mut BitReader<R>) -> Result<BlockType> {
    let header = BlockHeader::read(reader)?;
    Ok(header.block_type)
}
