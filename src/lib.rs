// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! A FLAC encoding and decoding library: a bit-exact codec for the Free
//! Lossless Audio Codec container, frame, and prediction formats.
//!
//! [`Decoder`] turns a FLAC bitstream back into PCM; [`Encoder`] does the
//! reverse, searching fixed and linear-predictive strategies per block to
//! pick the smallest representation. [`FlacReader`] is a convenience
//! wrapper over `Decoder` for callers who just want an interleaved sample
//! stream.

mod bitstream;
mod crc;
mod decoder;
mod encoder;
mod error;
mod frame;
mod lpc;
mod md5;
mod metadata;
mod rice;
mod sample;
mod subframe;

pub use decoder::{peek_block_type, Decoder, FlacReader, Md5Status};
pub use encoder::{Encoder, EncoderConfig, SubsetMode};
pub use error::{Error, Result};
pub use frame::{BlockTime, ChannelAssignment, FrameHeader};
pub use metadata::{BlockHeader, BlockType, MetadataBlock, OpaqueBlock, SeekPoint, SeekTable, StreamInfo};
