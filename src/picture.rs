// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Input pictures, pooled internal frame storage, and the frame pool arena.

use crate::error::{Error, Result};

/// A single 8-bit image plane with possibly-padded rows.
#[derive(Debug, Clone)]
pub struct DataPlane {
    pub data: Vec<u8>,
    pub stride: usize,
    pub height: usize,
}

impl DataPlane {
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + self.stride]
    }
}

/// Planes of one I420 picture, borrowed from the caller at `encode()` time.
///
/// Grounded on `less_avc::YCbCrImage`/`DataPlane`, generalized from a
/// borrowed `&'a [u8]` view to the owned [`DataPlane`] the [`Frame`] pool
/// copies into, since pictures must outlive the asynchronous worker that
/// encodes them.
#[derive(Debug, Clone)]
pub struct Picture<'a> {
    pub width: usize,
    pub height: usize,
    pub y: &'a [u8],
    pub y_stride: usize,
    pub u: &'a [u8],
    pub u_stride: usize,
    pub v: &'a [u8],
    pub v_stride: usize,
}

impl<'a> Picture<'a> {
    /// Validate plane sizes against the declared dimensions (4:2:0
    /// subsampling only; MbCodec and Postfilter collaborators are the place
    /// for other chroma formats).
    pub fn check_sizes(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::DataShapeProblem {
                msg: "picture width and height must be non-zero",
                #[cfg(feature = "backtrace")]
                backtrace: std::backtrace::Backtrace::capture(),
            });
        }
        let chroma_w = self.width.div_ceil(2);
        let chroma_h = self.height.div_ceil(2);

        if self.y_stride < self.width || self.y.len() < self.y_stride * self.height {
            return Err(Error::DataShapeProblem {
                msg: "luma plane too small for stride*height",
                #[cfg(feature = "backtrace")]
                backtrace: std::backtrace::Backtrace::capture(),
            });
        }
        if self.u_stride < chroma_w || self.u.len() < self.u_stride * chroma_h {
            return Err(Error::DataShapeProblem {
                msg: "Cb plane too small for stride*height",
                #[cfg(feature = "backtrace")]
                backtrace: std::backtrace::Backtrace::capture(),
            });
        }
        if self.v_stride < chroma_w || self.v.len() < self.v_stride * chroma_h {
            return Err(Error::DataShapeProblem {
                msg: "Cr plane too small for stride*height",
                #[cfg(feature = "backtrace")]
                backtrace: std::backtrace::Backtrace::capture(),
            });
        }
        Ok(())
    }
}

/// Coding type of a [`Frame`], as assigned by `FrameWindow` (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    I,
    Idr,
    P,
    B,
}

impl FrameType {
    pub fn is_reference_candidate(self) -> bool {
        !matches!(self, FrameType::B)
    }
}

/// Caller hint for the type a not-yet-coded picture should receive.
/// `Auto` lets the window decide per spec §4.4's keyint/bframe policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameTypeHint {
    #[default]
    Auto,
    ForceI,
    ForceIdr,
}

/// Owned, poolable internal frame storage (x264's `x264_frame_t`,
/// `original_source/encoder/encoder.c:419-434`).
///
/// `FrameWindow` addresses frames by [`FrameSlot`] handle rather than by
/// reference so that the same frame can simultaneously sit in `next`,
/// become `current`, and later join `reference` without fighting the
/// borrow checker over a cyclic graph.
#[derive(Debug, Clone)]
pub struct Frame {
    pub y: DataPlane,
    pub u: DataPlane,
    pub v: DataPlane,
    pub frame_type: FrameType,
    pub type_hint: FrameTypeHint,
    /// Picture Order Count; even-valued, assigned in input order.
    pub poc: i32,
    pub frame_num: u32,
    pub in_use: bool,
}

impl Frame {
    fn new(width: usize, height: usize) -> Self {
        let chroma_w = width.div_ceil(2);
        let chroma_h = height.div_ceil(2);
        Frame {
            y: DataPlane {
                data: vec![0u8; width * height],
                stride: width,
                height,
            },
            u: DataPlane {
                data: vec![0u8; chroma_w * chroma_h],
                stride: chroma_w,
                height: chroma_h,
            },
            v: DataPlane {
                data: vec![0u8; chroma_w * chroma_h],
                stride: chroma_w,
                height: chroma_h,
            },
            frame_type: FrameType::I,
            type_hint: FrameTypeHint::Auto,
            poc: 0,
            frame_num: 0,
            in_use: false,
        }
    }

    /// Copy a caller-supplied [`Picture`] into this pooled frame's owned
    /// storage.
    pub fn copy_from_picture(&mut self, pic: &Picture<'_>) {
        for row in 0..pic.height {
            let src = &pic.y[row * pic.y_stride..row * pic.y_stride + pic.width];
            let dst_start = row * self.y.stride;
            self.y.data[dst_start..dst_start + pic.width].copy_from_slice(src);
        }
        let chroma_w = pic.width.div_ceil(2);
        let chroma_h = pic.height.div_ceil(2);
        for row in 0..chroma_h {
            let u_src = &pic.u[row * pic.u_stride..row * pic.u_stride + chroma_w];
            let u_dst_start = row * self.u.stride;
            self.u.data[u_dst_start..u_dst_start + chroma_w].copy_from_slice(u_src);

            let v_src = &pic.v[row * pic.v_stride..row * pic.v_stride + chroma_w];
            let v_dst_start = row * self.v.stride;
            self.v.data[v_dst_start..v_dst_start + chroma_w].copy_from_slice(v_src);
        }
    }
}

/// Handle into a [`FramePool`]'s arena. Cheap to copy, stable across the
/// frame's lifetime in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSlot(pub usize);

/// Arena + free list of [`Frame`]s, sized at `open()` time to
/// `1 + max_bframes` (`unused`) plus `2 + frame_reference` (`reference`),
/// matching x264's `frames.unused`/`frames.reference` pool sizing
/// (`original_source/encoder/encoder.c:400-418`).
pub struct FramePool {
    slots: Vec<Frame>,
    free: Vec<FrameSlot>,
}

impl FramePool {
    pub fn new(width: usize, height: usize, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::AllocationFailure {
                #[cfg(feature = "backtrace")]
                backtrace: std::backtrace::Backtrace::capture(),
            });
        }
        let slots = (0..capacity).map(|_| Frame::new(width, height)).collect();
        let free = (0..capacity).rev().map(FrameSlot).collect();
        Ok(FramePool { slots, free })
    }

    /// Take an unused frame from the pool, matching x264's pop-from-`unused`
    /// step in `x264_encoder_encode`.
    pub fn acquire(&mut self) -> Result<FrameSlot> {
        let slot = self.free.pop().ok_or(Error::InconsistentState {
            #[cfg(feature = "backtrace")]
            backtrace: std::backtrace::Backtrace::capture(),
        })?;
        self.slots[slot.0].in_use = true;
        Ok(slot)
    }

    /// Return a frame to the pool once no queue (`next`/`current`/
    /// `reference`) holds it anymore.
    pub fn release(&mut self, slot: FrameSlot) {
        self.slots[slot.0].in_use = false;
        self.free.push(slot);
    }

    pub fn get(&self, slot: FrameSlot) -> &Frame {
        &self.slots[slot.0]
    }

    pub fn get_mut(&mut self, slot: FrameSlot) -> &mut Frame {
        &mut self.slots[slot.0]
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_conserves_pool() {
        let mut pool = FramePool::new(16, 16, 3).unwrap();
        assert_eq!(pool.free_count(), 3);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.free_count(), 1);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.free_count(), 3);
    }

    #[test]
    fn test_acquire_exhaustion_errors() {
        let mut pool = FramePool::new(16, 16, 1).unwrap();
        let _a = pool.acquire().unwrap();
        assert!(pool.acquire().is_err());
    }

    #[test]
    fn test_copy_from_picture_respects_stride() {
        let mut pool = FramePool::new(16, 16, 1).unwrap();
        let slot = pool.acquire().unwrap();
        let y = vec![42u8; 20 * 16];
        let u = vec![7u8; 10 * 8];
        let v = vec![9u8; 10 * 8];
        let pic = Picture {
            width: 16,
            height: 16,
            y: &y,
            y_stride: 20,
            u: &u,
            u_stride: 10,
            v: &v,
            v_stride: 10,
        };
        pic.check_sizes().unwrap();
        pool.get_mut(slot).copy_from_picture(&pic);
        assert_eq!(pool.get(slot).y.data[0], 42);
        assert_eq!(pool.get(slot).u.data[0], 7);
    }
}
