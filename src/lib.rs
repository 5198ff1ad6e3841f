// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Core frame-reordering, slice/NAL emission and worker-pool pipeline of an
//! H.264/AVC encoder.
//!
//! This crate implements the *driver* of an H.264 encoder: accepting input
//! pictures, deciding their coding order and type (I/P/B, IDR placement,
//! reference-window management), dispatching per-picture work across a
//! fixed worker pool, and emitting escaped, framed NAL units. Real
//! macroblock prediction/transform/entropy coding, rate control, and
//! in-loop filtering are modeled as pluggable collaborators behind the
//! [`collaborators`] traits; this crate ships minimal reference
//! implementations (lossless PCM macroblocks, constant QP, no-op
//! filtering) so the pipeline runs end to end on its own.
//!
//! Entry points are [`Encoder`] (submit pictures, get back coded NALs) and
//! [`H264Writer`] (the same, glued to an [`std::io::Write`] sink).
#![deny(unsafe_code)]

pub mod collaborators;
pub mod encoder;
pub mod error;
pub mod frame_window;
mod golomb;
pub mod nal;
pub mod params;
pub mod picture;
pub mod sei;
pub mod slice;
pub mod sps_pps;
pub mod threadpool;
mod writer;

pub use encoder::{EncodedPicture, Encoder, Stats};
pub use error::{Error, Result};
pub use params::{NalFraming, OpenParams, Params, SampleAspectRatio};
pub use picture::{DataPlane, Frame, FramePool, FrameSlot, FrameType, FrameTypeHint, Picture};
pub use writer::H264Writer;

/// Smallest multiple of `b` that is `>= a`.
#[inline]
pub(crate) fn next_multiple(a: u32, b: u32) -> u32 {
    a.div_ceil(b) * b
}
