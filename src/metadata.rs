// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Metadata block types: the 34-byte `StreamInfo` record, the `SeekTable`,
//! and opaque pass-through for every other block type.
//!
//! Metadata blocks are always byte-aligned, so these are read and written
//! through [`BitReader`]/[`BitWriter`] at byte or multi-byte granularity
//! rather than with the bit-packed layouts frame headers use.

use std::io::{Read, Write};

use crate::bitstream::{BitReader, BitWriter};
use crate::error::{warn, Error, Result};

/// The serialised size in bytes of a `StreamInfo` block.
pub const STREAMINFO_LEN: u32 = 34;

/// The serialised size in bytes of one `SeekTable` entry.
pub const SEEKPOINT_LEN: u32 = 18;

/// Sentinel sample offset marking a placeholder seek point.
pub const SEEKPOINT_PLACEHOLDER: u64 = u64::MAX;

/// The 7-bit type tag of a metadata block header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockType {
    StreamInfo,
    Padding,
    Application,
    SeekTable,
    VorbisComment,
    CueSheet,
    Picture,
    /// A type code this implementation does not interpret, carried through
    /// verbatim. Code 127 is reserved (it would collide with the frame sync
    /// code if a decoder lost byte alignment) and is rejected on read.
    Other(u8),
}

impl BlockType {
    fn from_code(code: u8) -> Result<BlockType> {
        match code {
            0 => Ok(BlockType::StreamInfo),
            1 => Ok(BlockType::Padding),
            2 => Ok(BlockType::Application),
            3 => Ok(BlockType::SeekTable),
            4 => Ok(BlockType::VorbisComment),
            5 => Ok(BlockType::CueSheet),
            6 => Ok(BlockType::Picture),
            127 => Err(Error::ReservedValue("metadata block type 127")),
            other => Ok(BlockType::Other(other)),
        }
    }

    fn to_code(self) -> u8 {
        match self {
            BlockType::StreamInfo => 0,
            BlockType::Padding => 1,
            BlockType::Application => 2,
            BlockType::SeekTable => 3,
            BlockType::VorbisComment => 4,
            BlockType::CueSheet => 5,
            BlockType::Picture => 6,
            BlockType::Other(code) => code,
        }
    }
}

/// The 32-bit header that precedes every metadata block.
#[derive(Clone, Copy, Debug)]
pub struct BlockHeader {
    pub is_last: bool,
    pub block_type: BlockType,
    pub length: u32,
}

impl BlockHeader {
    pub fn read<R: Read>(reader: &mut BitReader<R>) -> Result<BlockHeader> {
        let tag = reader.read_byte()?;
        let is_last = tag & 0x80 != 0;
        let block_type = BlockType::from_code(tag & 0x7f)?;
        let length = u32::from(reader.read_byte()?) << 16
            | u32::from(reader.read_byte()?) << 8
            | u32::from(reader.read_byte()?);
        Ok(BlockHeader { is_last, block_type, length })
    }

    pub fn write<W: Write>(self, writer: &mut BitWriter<W>) -> Result<()> {
        let tag = (u8::from(self.is_last) << 7) | (self.block_type.to_code() & 0x7f);
        writer.write_uint(8, u32::from(tag))?;
        writer.write_uint(24, self.length)?;
        Ok(())
    }
}

/// The mandatory first metadata block: stream-wide parameters every decoder
/// needs before it can interpret a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInfo {
    pub min_block_size: u16,
    pub max_block_size: u16,
    /// Minimum frame size in bytes, or `None` if unknown (stored as 0).
    pub min_frame_size: Option<u32>,
    /// Maximum frame size in bytes, or `None` if unknown (stored as 0).
    pub max_frame_size: Option<u32>,
    pub sample_rate: u32,
    pub channels: u32,
    pub bits_per_sample: u32,
    /// Total samples per channel, or `None` if unknown (stored as 0).
    pub samples: Option<u64>,
    /// MD5 of the decoded PCM, or the all-zero digest if not computed.
    pub md5sum: [u8; 16],
}

impl StreamInfo {
    /// A StreamInfo with no samples yet and an unset MD5, suitable as the
    /// placeholder an encoder writes before any frame exists.
    pub fn empty(min_block_size: u16, max_block_size: u16, sample_rate: u32, channels: u32, bits_per_sample: u32) -> StreamInfo {
        StreamInfo {
            min_block_size,
            max_block_size,
            min_frame_size: None,
            max_frame_size: None,
            sample_rate,
            channels,
            bits_per_sample,
            samples: None,
            md5sum: [0; 16],
        }
    }

    fn validate(&self) -> Result<()> {
        if self.min_block_size > self.max_block_size {
            return Err(Error::DataFormat("min block size exceeds max block size"));
        }
        if let (Some(min), Some(max)) = (self.min_frame_size, self.max_frame_size) {
            if min > max {
                return Err(Error::DataFormat("min frame size exceeds max frame size"));
            }
        }
        if self.sample_rate == 0 || self.sample_rate > 655_350 {
            return Err(Error::DataFormat("sample rate out of range"));
        }
        if self.channels < 1 || self.channels > 8 {
            return Err(Error::DataFormat("channel count out of range"));
        }
        if self.bits_per_sample < 4 || self.bits_per_sample > 32 {
            return Err(Error::DataFormat("sample depth out of range"));
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut BitReader<R>) -> Result<StreamInfo> {
        let min_block_size = reader.read_uint(16)? as u16;
        let max_block_size = reader.read_uint(16)? as u16;
        let min_frame_size = reader.read_uint(24)?;
        let max_frame_size = reader.read_uint(24)?;
        let sample_rate = reader.read_uint(20)?;
        let channels = reader.read_uint(3)? + 1;
        let bits_per_sample = reader.read_uint(5)? + 1;
        let samples = (u64::from(reader.read_uint(4)?) << 32) | u64::from(reader.read_uint(32)?);
        let mut md5sum = [0u8; 16];
        reader.read_fully(&mut md5sum)?;

        let info = StreamInfo {
            min_block_size,
            max_block_size,
            min_frame_size: if min_frame_size == 0 { None } else { Some(min_frame_size) },
            max_frame_size: if max_frame_size == 0 { None } else { Some(max_frame_size) },
            sample_rate,
            channels,
            bits_per_sample,
            samples: if samples == 0 { None } else { Some(samples) },
            md5sum,
        };
        info.validate().map_err(warn)?;
        Ok(info)
    }

    pub fn write<W: Write>(&self, writer: &mut BitWriter<W>) -> Result<()> {
        self.validate()?;
        writer.write_uint(16, u32::from(self.min_block_size))?;
        writer.write_uint(16, u32::from(self.max_block_size))?;
        writer.write_uint(24, self.min_frame_size.unwrap_or(0))?;
        writer.write_uint(24, self.max_frame_size.unwrap_or(0))?;
        writer.write_uint(20, self.sample_rate)?;
        writer.write_uint(3, self.channels - 1)?;
        writer.write_uint(5, self.bits_per_sample - 1)?;
        let samples = self.samples.unwrap_or(0);
        writer.write_uint(4, (samples >> 32) as u32)?;
        writer.write_uint(32, samples as u32)?;
        for &byte in &self.md5sum {
            writer.write_uint(8, u32::from(byte))?;
        }
        Ok(())
    }
}

/// One entry of a `SeekTable`: the sample offset, byte offset and block
/// size of a frame a decoder may jump directly to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeekPoint {
    pub sample_offset: u64,
    pub byte_offset: u64,
    pub frame_samples: u16,
}

impl SeekPoint {
    pub fn is_placeholder(self) -> bool {
        self.sample_offset == SEEKPOINT_PLACEHOLDER
    }

    fn read<R: Read>(reader: &mut BitReader<R>) -> Result<SeekPoint> {
        let sample_offset = read_u64(reader)?;
        let byte_offset = read_u64(reader)?;
        let frame_samples = reader.read_uint(16)? as u16;
        Ok(SeekPoint { sample_offset, byte_offset, frame_samples })
    }

    fn write<W: Write>(self, writer: &mut BitWriter<W>) -> Result<()> {
        write_u64(writer, self.sample_offset)?;
        write_u64(writer, self.byte_offset)?;
        writer.write_uint(16, u32::from(self.frame_samples))?;
        Ok(())
    }
}

fn read_u64<R: Read>(reader: &mut BitReader<R>) -> Result<u64> {
    let hi = reader.read_uint(32)?;
    let lo = reader.read_uint(32)?;
    Ok((u64::from(hi) << 32) | u64::from(lo))
}

fn write_u64<W: Write>(writer: &mut BitWriter<W>, value: u64) -> Result<()> {
    writer.write_uint(32, (value >> 32) as u32)?;
    writer.write_uint(32, value as u32)?;
    Ok(())
}

/// An ordered table of seek points, with placeholder points (if any) at the
/// end.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SeekTable {
    pub points: Vec<SeekPoint>,
}

impl SeekTable {
    pub fn read<R: Read>(reader: &mut BitReader<R>, length: u32) -> Result<SeekTable> {
        if length % SEEKPOINT_LEN != 0 {
            return Err(warn(Error::DataFormat("seek table length is not a multiple of 18")));
        }
        let count = length / SEEKPOINT_LEN;
        let mut points = Vec::with_capacity(count as usize);
        for _ in 0..count {
            points.push(SeekPoint::read(reader)?);
        }
        Ok(SeekTable { points })
    }

    pub fn write<W: Write>(&self, writer: &mut BitWriter<W>) -> Result<()> {
        for &point in &self.points {
            point.write(writer)?;
        }
        Ok(())
    }

    pub fn byte_len(&self) -> u32 {
        self.points.len() as u32 * SEEKPOINT_LEN
    }
}

/// A metadata block other than StreamInfo or SeekTable. The payload is kept
/// verbatim: this library edits neither tags nor pictures, it only shuttles
/// them between a decoded stream and a re-encoded one.
#[derive(Clone, Debug, PartialEq)]
pub struct OpaqueBlock {
    pub block_type: BlockType,
    pub data: Vec<u8>,
}

/// A parsed metadata block.
#[derive(Clone, Debug, PartialEq)]
pub enum MetadataBlock {
    StreamInfo(StreamInfo),
    SeekTable(SeekTable),
    Opaque(OpaqueBlock),
}

/// Reads one metadata block given its header, enforcing that StreamInfo is
/// well-formed and that duplicate StreamInfo/SeekTable blocks are rejected.
pub fn read_block<R: Read>(
    reader: &mut BitReader<R>,
    header: BlockHeader,
    seen_streaminfo: bool,
    seen_seektable: bool,
) -> Result<MetadataBlock> {
    match header.block_type {
        BlockType::StreamInfo => {
            if seen_streaminfo {
                return Err(warn(Error::DataFormat("duplicate StreamInfo block")));
            }
            if header.length != STREAMINFO_LEN {
                return Err(warn(Error::DataFormat("StreamInfo block has the wrong length")));
            }
            Ok(MetadataBlock::StreamInfo(StreamInfo::read(reader)?))
        }
        BlockType::SeekTable => {
            if seen_seektable {
                return Err(warn(Error::DataFormat("duplicate SeekTable block")));
            }
            Ok(MetadataBlock::SeekTable(SeekTable::read(reader, header.length)?))
        }
        other => {
            let mut data = vec![0u8; header.length as usize];
            reader.read_fully(&mut data)?;
            Ok(MetadataBlock::Opaque(OpaqueBlock { block_type: other, data }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_info() -> StreamInfo {
        StreamInfo {
            min_block_size: 4096,
            max_block_size: 4096,
            min_frame_size: Some(1024),
            max_frame_size: Some(8192),
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: 16,
            samples: Some(44100 * 10),
            md5sum: [0x11; 16],
        }
    }

    #[test]
    fn streaminfo_round_trips() {
        let info = sample_info();
        let mut buf = Vec::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            info.write(&mut writer).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(buf.len(), STREAMINFO_LEN as usize);

        let mut reader = BitReader::new(Cursor::new(buf));
        let decoded = StreamInfo::read(&mut reader).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn streaminfo_unknown_fields_round_trip_as_none() {
        let info = StreamInfo::empty(4096, 4096, 44100, 2, 16);
        let mut buf = Vec::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            info.write(&mut writer).unwrap();
            writer.flush().unwrap();
        }
        let mut reader = BitReader::new(Cursor::new(buf));
        let decoded = StreamInfo::read(&mut reader).unwrap();
        assert_eq!(decoded.min_frame_size, None);
        assert_eq!(decoded.max_frame_size, None);
        assert_eq!(decoded.samples, None);
    }

    #[test]
    fn streaminfo_rejects_bad_sample_rate() {
        let mut info = sample_info();
        info.sample_rate = 0;
        let mut buf = Vec::new();
        let mut writer = BitWriter::new(&mut buf);
        assert!(info.write(&mut writer).is_err());
    }

    #[test]
    fn block_header_round_trips() {
        let header = BlockHeader { is_last: true, block_type: BlockType::SeekTable, length: 18 };
        let mut buf = Vec::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            header.write(&mut writer).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(buf.len(), 4);

        let mut reader = BitReader::new(Cursor::new(buf));
        let decoded = BlockHeader::read(&mut reader).unwrap();
        assert!(decoded.is_last);
        assert_eq!(decoded.block_type, BlockType::SeekTable);
        assert_eq!(decoded.length, 18);
    }

    #[test]
    fn block_type_127_is_reserved() {
        let mut buf = Vec::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            writer.write_uint(8, 127).unwrap();
            writer.write_uint(24, 0).unwrap();
            writer.flush().unwrap();
        }
        let mut reader = BitReader::new(Cursor::new(buf));
        assert!(BlockHeader::read(&mut reader).is_err());
    }

    #[test]
    fn seek_table_round_trips_with_placeholder() {
        let table = SeekTable {
            points: vec![
                SeekPoint { sample_offset: 0, byte_offset: 42, frame_samples: 4096 },
                SeekPoint { sample_offset: 4096, byte_offset: 4200, frame_samples: 4096 },
                SeekPoint { sample_offset: SEEKPOINT_PLACEHOLDER, byte_offset: 0, frame_samples: 0 },
            ],
        };
        assert!(table.points[2].is_placeholder());

        let mut buf = Vec::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            table.write(&mut writer).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(buf.len() as u32, table.byte_len());

        let mut reader = BitReader::new(Cursor::new(buf));
        let decoded = SeekTable::read(&mut reader, table.byte_len()).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn seek_table_rejects_misaligned_length() {
        let mut reader = BitReader::new(Cursor::new(vec![0u8; 20]));
        assert!(SeekTable::read(&mut reader, 20).is_err());
    }

    #[test]
    fn duplicate_streaminfo_is_rejected() {
        let info = sample_info();
        let mut buf = Vec::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            info.write(&mut writer).unwrap();
            writer.flush().unwrap();
        }
        let header = BlockHeader { is_last: false, block_type: BlockType::StreamInfo, length: STREAMINFO_LEN };
        let mut reader = BitReader::new(Cursor::new(buf));
        let result = read_block(&mut reader, header, true, false);
        assert!(result.is_err());
    }

    #[test]
    fn opaque_block_is_carried_verbatim() {
        let payload = vec![1u8, 2, 3, 4, 5];
        let header = BlockHeader { is_last: false, block_type: BlockType::VorbisComment, length: payload.len() as u32 };
        let mut reader = BitReader::new(Cursor::new(payload.clone()));
        let block = read_block(&mut reader, header, true, true).unwrap();
        match block {
            MetadataBlock::Opaque(opaque) => {
                assert_eq!(opaque.block_type, BlockType::VorbisComment);
                assert_eq!(opaque.data, payload);
            }
            other => panic!("expected Opaque, got {:?}", other),
        }
    }
}
