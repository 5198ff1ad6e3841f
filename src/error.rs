// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error kinds for the encoder core.

#[cfg(feature = "backtrace")]
use std::backtrace::Backtrace;

/// An H.264 encoding error.
#[derive(Debug)]
pub enum Error {
    /// A parameter supplied at `open` time failed validation (width/height,
    /// chroma subsampling, ...). Fatal: `open` returns no encoder.
    InvalidParameter {
        msg: &'static str,
        #[cfg(feature = "backtrace")]
        backtrace: Backtrace,
    },
    /// The frame pool could not be sized as requested. Fatal.
    AllocationFailure {
        #[cfg(feature = "backtrace")]
        backtrace: Backtrace,
    },
    /// A caller-supplied frame type hint conflicted with a keyint/bframe
    /// boundary. Non-fatal: the window overrides the hint and logs a
    /// warning; this variant exists for completeness of the error sum-type
    /// and is not returned from any public API.
    ConflictingFrameHint {
        msg: &'static str,
        #[cfg(feature = "backtrace")]
        backtrace: Backtrace,
    },
    /// A requested sample aspect ratio could not be expressed in the VUI.
    /// Degraded: SAR is silently dropped and a warning logged.
    UnsupportedAspectRatio {
        #[cfg(feature = "backtrace")]
        backtrace: Backtrace,
    },
    /// A requested sample aspect ratio was invalid (zero width or height).
    InvalidSAR {
        #[cfg(feature = "backtrace")]
        backtrace: Backtrace,
    },
    /// An input picture's planes do not match the dimensions/strides the
    /// encoder was opened with.
    DataShapeProblem {
        msg: &'static str,
        #[cfg(feature = "backtrace")]
        backtrace: Backtrace,
    },
    /// The requested image size cannot be expressed with the cropping
    /// arithmetic this encoder supports.
    UnsupportedImageSize {
        #[cfg(feature = "backtrace")]
        backtrace: Backtrace,
    },
    /// An internal invariant (pool conservation, POC monotonicity, NAL
    /// buffer bounds) was violated.
    InconsistentState {
        #[cfg(feature = "backtrace")]
        backtrace: Backtrace,
    },
    /// Propagated from the underlying `std::io::Write` sink.
    IoError {
        source: std::io::Error,
        #[cfg(feature = "backtrace")]
        backtrace: Backtrace,
    },
}

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::IoError {
            source,
            #[cfg(feature = "backtrace")]
            backtrace: Backtrace::capture(),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError {
                source,
                #[cfg(feature = "backtrace")]
                    backtrace: _,
            } => Some(source),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidParameter {
                msg,
                #[cfg(feature = "backtrace")]
                    backtrace: _,
            } => write!(f, "invalid parameter: {msg}"),
            Error::AllocationFailure {
                #[cfg(feature = "backtrace")]
                    backtrace: _,
            } => write!(f, "allocation failure"),
            Error::ConflictingFrameHint {
                msg,
                #[cfg(feature = "backtrace")]
                    backtrace: _,
            } => write!(f, "conflicting frame type hint: {msg}"),
            Error::UnsupportedAspectRatio {
                #[cfg(feature = "backtrace")]
                    backtrace: _,
            } => write!(f, "unsupported sample aspect ratio"),
            Error::InvalidSAR {
                #[cfg(feature = "backtrace")]
                    backtrace: _,
            } => write!(f, "invalid sample aspect ratio"),
            Error::DataShapeProblem {
                msg,
                #[cfg(feature = "backtrace")]
                    backtrace: _,
            } => write!(f, "image data shape is problematic: {msg}"),
            Error::UnsupportedImageSize {
                #[cfg(feature = "backtrace")]
                    backtrace: _,
            } => write!(f, "unsupported image size: width and height must be non-zero multiples of 16"),
            Error::InconsistentState {
                #[cfg(feature = "backtrace")]
                    backtrace: _,
            } => write!(f, "internal error: inconsistent state"),
            Error::IoError {
                source,
                #[cfg(feature = "backtrace")]
                    backtrace: _,
            } => write!(f, "IO error: {source}"),
        }
    }
}
