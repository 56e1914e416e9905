// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `error` module defines the error and result types used throughout the crate.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// Identifies which running checksum a [`Error::CrcMismatch`] refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CrcKind {
    /// The 8-bit CRC covering a frame header.
    FrameHeader,
    /// The 16-bit CRC covering an entire frame.
    Frame,
}

impl fmt::Display for CrcKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            CrcKind::FrameHeader => write!(f, "frame header CRC-8"),
            CrcKind::Frame => write!(f, "frame CRC-16"),
        }
    }
}

/// An error that prevents successful encoding or decoding of a FLAC stream.
#[derive(Debug)]
pub enum Error {
    /// Not a decoding error, but a problem with the underlying reader or writer.
    Io(io::Error),

    /// The end of the stream was reached in the middle of reading a field.
    UnexpectedEof,

    /// A byte-aligned operation (CRC read, `read_byte`, ...) was attempted
    /// while the bit cursor was not byte-aligned.
    Misaligned,

    /// A caller-supplied argument is outside the range the format allows.
    InvalidArgument(&'static str),

    /// The stream does not start with the `fLaC` magic.
    BadMagic,

    /// A frame did not start with the 14-bit sync code.
    BadSync,

    /// A reserved bit pattern was encountered where the format requires zero.
    ReservedValue(&'static str),

    /// A CRC stored in the stream did not match the CRC computed over the
    /// bytes it is supposed to protect.
    CrcMismatch {
        /// The CRC value stored in the stream.
        expected: u32,
        /// The CRC value computed while reading.
        computed: u32,
        /// Which checksum disagreed.
        which: CrcKind,
    },

    /// A numeric constraint of the format was violated (bad sample rate,
    /// predictor order out of range, mismatched channel count, ...).
    DataFormat(&'static str),

    /// A decoded value exceeds the range the format or this implementation
    /// can represent.
    Overflow(&'static str),
}

/// The result type used throughout this crate.
pub type Result<T> = result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref err) => write!(f, "i/o error: {}", err),
            Error::UnexpectedEof => write!(f, "unexpected end of stream"),
            Error::Misaligned => write!(f, "operation requires the bit cursor to be byte-aligned"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::BadMagic => write!(f, "stream does not start with the 'fLaC' magic"),
            Error::BadSync => write!(f, "frame does not start with the sync code"),
            Error::ReservedValue(msg) => write!(f, "reserved value used: {}", msg),
            Error::CrcMismatch { expected, computed, which } => write!(
                f,
                "{} mismatch: expected {:#x}, computed {:#x}",
                which, expected, computed
            ),
            Error::DataFormat(msg) => write!(f, "malformed stream: {}", msg),
            Error::Overflow(msg) => write!(f, "value out of range: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEof
        } else {
            Error::Io(err)
        }
    }
}

/// Logs `err` at `warn` level and returns it, for use at the point an error
/// is first detected (so a caller inspecting only logs still learns why a
/// stream was rejected).
pub(crate) fn warn(err: Error) -> Error {
    log::warn!("{}", err);
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_does_not_panic() {
        let errs = [
            Error::UnexpectedEof,
            Error::Misaligned,
            Error::InvalidArgument("n out of [0, 32]"),
            Error::BadMagic,
            Error::BadSync,
            Error::ReservedValue("frame header reserved bit"),
            Error::CrcMismatch { expected: 1, computed: 2, which: CrcKind::Frame },
            Error::DataFormat("sample rate is zero"),
            Error::Overflow("rice residual exceeds 53-bit range"),
        ];
        for err in &errs {
            assert!(!format!("{}", err).is_empty());
        }
    }

    #[test]
    fn io_eof_maps_to_unexpected_eof() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        match Error::from(io_err) {
            Error::UnexpectedEof => {}
            other => panic!("expected UnexpectedEof, got {:?}", other),
        }
    }
}
