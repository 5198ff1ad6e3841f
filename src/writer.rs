// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Associates an [`Encoder`] with an [`std::io::Write`] sink, generalized
//! from the teacher's `WriteState` state machine to a multi-NAL-per-frame
//! output (every `encode()` call may flush zero, one, or several pictures
//! once B-frame reordering is involved).

use std::io::Write;

use crate::encoder::{Encoder, Stats};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::picture::{FrameTypeHint, Picture};

/// The `MovedOut` variant should never be observed outside of a panicking
/// unwind mid-`into_inner`; it represents a temporary internal state.
enum WriteState<W> {
    Active { wtr: W, encoder: Encoder },
    MovedOut,
}

/// Write images to an [`std::io::Write`] implementation in Annex-B or
/// length-prefixed `.h264` bitstream format.
pub struct H264Writer<W> {
    inner: WriteState<W>,
}

impl<W: Write> H264Writer<W> {
    /// Open an encoding session over `wtr` with the given parameters.
    pub fn new(wtr: W, params: Params) -> Result<Self> {
        let encoder = Encoder::open(params)?;
        Ok(Self {
            inner: WriteState::Active { wtr, encoder },
        })
    }

    /// Encode one picture and write out every NAL the frame window has
    /// decided to emit as a result (this may be zero pictures' worth while
    /// the B-frame lookahead is still filling).
    pub fn write(&mut self, pic: &Picture<'_>, hint: FrameTypeHint) -> Result<()> {
        match &mut self.inner {
            WriteState::Active { wtr, encoder } => {
                for encoded in encoder.encode(pic, hint)? {
                    wtr.write_all(&encoded.bitstream)?;
                }
                Ok(())
            }
            WriteState::MovedOut => Err(Error::InconsistentState {
                #[cfg(feature = "backtrace")]
                backtrace: std::backtrace::Backtrace::capture(),
            }),
        }
    }

    /// Cumulative encoding statistics so far.
    pub fn stats(&self) -> Result<&Stats> {
        match &self.inner {
            WriteState::Active { encoder, .. } => Ok(encoder.stats()),
            WriteState::MovedOut => Err(Error::InconsistentState {
                #[cfg(feature = "backtrace")]
                backtrace: std::backtrace::Backtrace::capture(),
            }),
        }
    }

    /// Flush any buffered lookahead frames, write their NALs, and retrieve
    /// the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        let orig_state = std::mem::replace(&mut self.inner, WriteState::MovedOut);
        match orig_state {
            WriteState::Active {
                mut wtr,
                mut encoder,
            } => {
                for encoded in encoder.flush()? {
                    wtr.write_all(&encoded.bitstream)?;
                }
                Ok(wtr)
            }
            WriteState::MovedOut => Err(Error::InconsistentState {
                #[cfg(feature = "backtrace")]
                backtrace: std::backtrace::Backtrace::capture(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_into_inner_flushes() {
        let params = Params {
            width: 32,
            height: 16,
            max_bframes: 1,
            thread_count: 1,
            ..Default::default()
        };
        let mut writer = H264Writer::new(Vec::new(), params).unwrap();

        let y = vec![16u8; 32 * 16];
        let u = vec![128u8; 16 * 8];
        let v = vec![128u8; 16 * 8];
        let pic = Picture {
            width: 32,
            height: 16,
            y: &y,
            y_stride: 32,
            u: &u,
            u_stride: 16,
            v: &v,
            v_stride: 16,
        };

        for _ in 0..3 {
            writer.write(&pic, FrameTypeHint::Auto).unwrap();
        }
        let buf = writer.into_inner().unwrap();
        assert!(!buf.is_empty());
    }
}
