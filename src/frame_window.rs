// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Frame queueing, coding-order selection, scene-cut rollback and
//! reference-list maintenance (spec §4.4).
//!
//! Grounded on `original_source/encoder/encoder.c`:
//! `x264_frame_put`/`x264_frame_get`/`x264_frame_sort` (lines 546-586),
//! `x264_reference_build_list`/`update`/`reset` (588-694), and the
//! frame-type assignment + scene-cut loop inside `x264_encoder_encode`
//! (947-1013, 1118-1221).

use std::collections::VecDeque;

use log::warn;

use crate::params::OpenParams;
use crate::picture::{FramePool, FrameSlot, FrameType, FrameTypeHint};

/// Outcome of [`FrameWindow::select_coding_order`]: either nothing is ready
/// yet (not enough lookahead buffered) or the next picture to code, with
/// its assigned type.
pub enum CodingDecision {
    NotReady,
    Ready { slot: FrameSlot, frame_type: FrameType },
}

/// Manages the three queues x264 calls `frames.next`, `frames.current` and
/// `frames.reference`, addressed by [`FrameSlot`] handles into a shared
/// [`FramePool`] rather than by direct ownership, avoiding the cyclic
/// ownership x264's raw pointers model.
pub struct FrameWindow {
    next: VecDeque<FrameSlot>,
    /// Pictures already assigned a type and POC, drained in coding order:
    /// an anchor (I/IDR/P) followed by the B's it closes, in input order.
    /// Mirrors x264's `frames.current`.
    current: VecDeque<FrameSlot>,
    reference: Vec<FrameSlot>,
    max_bframes: u32,
    frame_reference: u32,
    keyint_max: u32,
    keyint_min: u32,

    /// Monotonic count of pictures accepted via `accept`, mirroring x264's
    /// `i_input`. Only ever small during the initial fill, after which the
    /// `i_input <= i_bframe` gate in `x264_encoder_encode` never triggers
    /// again — it is not a per-call `next.len()` check.
    i_input: u64,
    i_poc: i32,
    i_frame_num: u32,
    i_last_idr: i64,
    /// The previous coded slice's type, checked *before* the new slice
    /// header is built, per x264's `frame_num` increment condition
    /// (`h->sh.i_type` read before `x264_slice_init` runs for the new
    /// picture).
    prev_slice_type: Option<FrameType>,
    /// Pictures coded since the last IDR (inclusive of neither endpoint),
    /// consulted by [`Self::apply_scene_cut`] to decide between `I` and
    /// `IDR` against `keyint_min`, mirroring `x264_encoder_encode`'s
    /// `i_frame_num - i_lastidr` comparison (lines 1180-1200).
    frames_since_idr: u32,
}

impl FrameWindow {
    pub fn new(open: &OpenParams) -> Self {
        Self {
            next: VecDeque::new(),
            current: VecDeque::new(),
            reference: Vec::new(),
            max_bframes: open.max_bframes,
            frame_reference: open.frame_reference,
            keyint_max: open.keyint_max,
            keyint_min: open.keyint_min,
            i_input: 0,
            i_poc: 0,
            i_frame_num: 0,
            // POC advances by 2 per coded picture, so the keyint boundary
            // in POC units is `2 * keyint_max`; starting `i_last_idr` at
            // `-2 * keyint_max` forces the very first frame to be IDR, the
            // same trick x264 plays with `i_last_idr = -i_keyint_max`
            // against its (1-per-frame) POC units.
            i_last_idr: -2 * open.keyint_max as i64,
            prev_slice_type: None,
            frames_since_idr: 0,
        }
    }

    /// `x264_frame_put`: accept a freshly-filled frame slot into the
    /// lookahead queue.
    pub fn accept(&mut self, slot: FrameSlot, hint: FrameTypeHint, pool: &mut FramePool) {
        pool.get_mut(slot).type_hint = hint;
        self.next.push_back(slot);
        self.i_input += 1;
    }

    /// `x264_frame_sort` + the frame-type assignment loop in
    /// `x264_encoder_encode` (lines 947-1013): pick the next picture to
    /// code and assign its final type.
    ///
    /// Matches x264's `i_input <= i_bframe` early-return: only while the
    /// stream is still filling its initial B-frame lookahead window does
    /// this return `NotReady`.
    pub fn select_coding_order(&mut self, pool: &mut FramePool) -> CodingDecision {
        if self.current.is_empty() {
            if self.i_input <= self.max_bframes as u64 {
                return CodingDecision::NotReady;
            }
            if self.next.is_empty() {
                return CodingDecision::NotReady;
            }
            self.fill_current(pool);
            if self.current.is_empty() {
                return CodingDecision::NotReady;
            }
        }

        let slot = self.current.pop_front().unwrap();
        let frame_type = pool.get(slot).frame_type;

        if matches!(frame_type, FrameType::Idr) {
            self.i_last_idr = pool.get(slot).poc as i64;
            self.frames_since_idr = 0;
        } else {
            self.frames_since_idr += 1;
        }

        CodingDecision::Ready { slot, frame_type }
    }

    /// Move the next run out of `next` into `current`, in coding order:
    /// the first non-B anchor (forced hint, the `max_bframes`-th buffered
    /// picture, or the last picture during flush) followed by the Bs it
    /// closes, in input order. Assigns POC to each of them in display
    /// order (the Bs first, then the anchor) while doing so, since POC
    /// tracks display position, not coding position.
    fn fill_current(&mut self, pool: &mut FramePool) {
        let is_flushing = self.i_input == u64::MAX;
        let anchor_idx = self.next.iter().enumerate().position(|(idx, slot)| {
            let hint = pool.get(*slot).type_hint;
            matches!(hint, FrameTypeHint::ForceI | FrameTypeHint::ForceIdr)
                || self.reference.is_empty()
                || idx as u32 == self.max_bframes
                || (is_flushing && idx == self.next.len() - 1)
        });
        let Some(anchor_idx) = anchor_idx else {
            return;
        };

        let mut bframe_slots = Vec::with_capacity(anchor_idx);
        for _ in 0..anchor_idx {
            let slot = self.next.pop_front().expect("anchor_idx within next's bounds");
            pool.get_mut(slot).poc = self.i_poc;
            self.i_poc += 2;
            bframe_slots.push(slot);
        }
        let anchor_slot = self.next.pop_front().expect("anchor_idx within next's bounds");

        let hint = pool.get(anchor_slot).type_hint;
        let poc_since_idr = self.i_poc as i64 - self.i_last_idr;
        let force_idr = poc_since_idr >= 2 * self.keyint_max as i64;
        let anchor_type = if force_idr {
            if !matches!(hint, FrameTypeHint::ForceIdr | FrameTypeHint::Auto) {
                warn!("overriding conflicting frame type hint at keyint boundary (forcing IDR)");
            }
            FrameType::Idr
        } else if matches!(hint, FrameTypeHint::ForceIdr) {
            FrameType::Idr
        } else if matches!(hint, FrameTypeHint::ForceI) {
            FrameType::I
        } else if self.reference.is_empty() {
            FrameType::I
        } else {
            FrameType::P
        };

        // An IDR restarts POC counting from 0, even if Bs preceding it in
        // this same run already consumed POC values off the old count.
        if matches!(anchor_type, FrameType::Idr) {
            self.i_poc = 0;
        }
        {
            let frame = pool.get_mut(anchor_slot);
            frame.frame_type = anchor_type;
            frame.poc = self.i_poc;
        }
        self.i_poc += 2;

        for slot in &bframe_slots {
            pool.get_mut(*slot).frame_type = FrameType::B;
        }

        self.current.push_back(anchor_slot);
        self.current.extend(bframe_slots);
    }

    /// `x264_encoder_encode`'s scene-cut rollback (lines 1118-1221, spec §8
    /// S6): re-type a `P` picture the driver's `MbCodec` flagged as a scene
    /// cut to `I`, or `IDR` when the GOP has run at least `keyint_min`
    /// pictures since the last one. Mutates `pool`'s copy of the frame's
    /// type in place and, for an `IDR` rollback, the same `i_last_idr`/
    /// `frames_since_idr` bookkeeping `select_coding_order` performs for a
    /// naturally-chosen IDR.
    /// Pictures coded since the last IDR (`gop_size` in the scene-cut bias
    /// formula), not counting `slot` itself.
    pub fn gop_size(&self) -> u32 {
        self.frames_since_idr
    }

    pub fn apply_scene_cut(&mut self, slot: FrameSlot, pool: &mut FramePool) -> FrameType {
        let new_type = if self.frames_since_idr >= self.keyint_min {
            FrameType::Idr
        } else {
            FrameType::I
        };
        if matches!(new_type, FrameType::Idr) {
            self.i_poc = 0;
        }
        let frame = pool.get_mut(slot);
        frame.frame_type = new_type;
        if matches!(new_type, FrameType::Idr) {
            frame.poc = 0;
            self.i_last_idr = 0;
            self.frames_since_idr = 0;
        }
        new_type
    }

    /// `frame_num` increment condition from `x264_encoder_encode`
    /// (lines 1085-1088): increment unless the *previous* coded slice and
    /// the current one are both B.
    pub fn advance_frame_num(&mut self, frame_type: FrameType) {
        let skip = matches!(frame_type, FrameType::B)
            && matches!(self.prev_slice_type, Some(FrameType::B));
        if !skip {
            self.i_frame_num = self.i_frame_num.wrapping_add(1);
        }
        self.prev_slice_type = Some(frame_type);
    }

    pub fn frame_num(&self) -> u32 {
        self.i_frame_num
    }

    /// `x264_reference_build_list` (lines 588-653): partition the current
    /// reference pool by POC relative to the picture being coded (`fenc_poc`)
    /// into `ref0` (past pictures, descending, capped at `frame_reference`)
    /// and `ref1` (future pictures, ascending, capped at a single entry,
    /// since this encoder only ever has one B-closing anchor as a forward
    /// reference).
    pub fn build_reference_lists(
        &self,
        pool: &FramePool,
        fenc_poc: i32,
    ) -> (Vec<FrameSlot>, Vec<FrameSlot>) {
        let mut ref0: Vec<FrameSlot> = self
            .reference
            .iter()
            .copied()
            .filter(|s| pool.get(*s).poc < fenc_poc)
            .collect();
        ref0.sort_by_key(|s| std::cmp::Reverse(pool.get(*s).poc));
        ref0.truncate(self.frame_reference.max(1) as usize);

        let mut ref1: Vec<FrameSlot> = self
            .reference
            .iter()
            .copied()
            .filter(|s| pool.get(*s).poc > fenc_poc)
            .collect();
        ref1.sort_by_key(|s| pool.get(*s).poc);
        ref1.truncate(1);

        (ref0, ref1)
    }

    /// `x264_reference_update` (lines 655-682): push the just-reconstructed
    /// non-B frame into the reference window, evicting the oldest entry
    /// once the window is full.
    pub fn update_reference(&mut self, slot: FrameSlot, pool: &mut FramePool) {
        self.reference.push(slot);
        while self.reference.len() > (1 + self.frame_reference) as usize {
            let evicted = self.reference.remove(0);
            pool.release(evicted);
        }
    }

    /// `x264_reference_reset` (lines 684-694): called on IDR, clears every
    /// existing reference and its POC bookkeeping.
    pub fn reset_reference(&mut self, pool: &mut FramePool) {
        for slot in self.reference.drain(..) {
            pool.release(slot);
        }
        self.i_frame_num = 0;
        self.i_poc = 0;
        self.prev_slice_type = None;
    }

    /// Whether any buffered input remains to be coded: used by the driver
    /// to know when to keep pumping `select_coding_order` during `flush`.
    pub fn has_pending(&self) -> bool {
        !self.next.is_empty()
    }

    /// Force the lookahead gate open for an end-of-stream flush, so every
    /// remaining buffered frame gets coded even though fewer than
    /// `max_bframes + 1` pictures are left.
    pub fn begin_flush(&mut self) {
        self.i_input = u64::MAX;
    }
}
