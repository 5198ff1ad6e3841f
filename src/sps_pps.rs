// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Sequence and picture parameter sets: the `ParameterSets` collaborator's
//! reference implementation (spec §6).

use crate::golomb::BitVecGolomb;
use crate::params::{NalFraming, OpenParams, SampleAspectRatio};
use bitvec::prelude::{BitVec, Msb0};

#[derive(Debug, PartialEq, Eq)]
#[allow(dead_code, clippy::upper_case_acronyms)]
pub enum VideoFormat {
    Component,
    PAL,
    NTSC,
    SECAM,
    MAC,
    Unspecified,
    Reserved,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Vui {
    pub full_range: bool,
    pub video_format: VideoFormat,
    pub sample_aspect_ratio: Option<SampleAspectRatio>,
}

impl Vui {
    pub fn new(full_range: bool, sample_aspect_ratio: Option<SampleAspectRatio>) -> Self {
        Self {
            full_range,
            video_format: VideoFormat::Unspecified,
            sample_aspect_ratio,
        }
    }

    fn append_to_rbsp(&self, bv: &mut BitVec<u8, Msb0>) {
        // vui_parameters( ), Annex E
        match &self.sample_aspect_ratio {
            Some(sar) => {
                // aspect_ratio_info_present_flag 1
                bv.push(true);
                // aspect_ratio_idc: Extended_SAR
                bv.extend(bit_pattern8(255));
                bv.extend((sar.width as u16).to_be_bytes().iter().flat_map(|b| {
                    (0..8).rev().map(move |i| (b >> i) & 1 == 1)
                }));
                bv.extend((sar.height as u16).to_be_bytes().iter().flat_map(|b| {
                    (0..8).rev().map(move |i| (b >> i) & 1 == 1)
                }));
            }
            None => {
                bv.push(false);
            }
        }

        // overscan_info_present_flag 0
        bv.push(false);

        // video_signal_type_present_flag 1
        bv.push(true);

        let video_format_arr = match &self.video_format {
            VideoFormat::Component => [false, false, false],
            VideoFormat::PAL => [false, false, true],
            VideoFormat::NTSC => [false, true, false],
            VideoFormat::SECAM => [false, true, true],
            VideoFormat::MAC => [true, false, false],
            VideoFormat::Unspecified => [true, false, true],
            VideoFormat::Reserved => [true, true, true],
        };
        bv.extend(video_format_arr);

        // video_full_range_flag
        bv.push(self.full_range);

        // colour_description_present_flag 0
        bv.push(false);

        // chroma_loc_info_present_flag 0
        bv.push(false);

        // timing_info_present_flag 0
        bv.push(false);

        // nal_hrd_parameters_present_flag 0
        bv.push(false);

        // vcl_hrd_parameters_present_flag 0
        bv.push(false);

        // pic_struct_present_flag 0
        bv.push(false);

        // bitstream_restriction_flag 0
        bv.push(false);
    }
}

fn bit_pattern8(value: u8) -> [bool; 8] {
    let mut out = [false; 8];
    for (i, bit) in out.iter_mut().enumerate() {
        *bit = (value >> (7 - i)) & 1 == 1;
    }
    out
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BitDepth {
    Depth8,
    Depth12,
}

impl BitDepth {
    pub fn num_bits(&self) -> u8 {
        match self {
            Self::Depth8 => 8,
            Self::Depth12 => 12,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ChromaFormatIdc {
    Monochrome(BitDepth),
    Chroma420(BitDepth),
}

impl ChromaFormatIdc {
    fn value(&self) -> u32 {
        match self {
            Self::Monochrome(_) => 0,
            Self::Chroma420(_) => 1,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ProfileIdc {
    Bare(u8),
    Extra((u8, ChromaFormatIdc)),
}

impl ProfileIdc {
    pub fn baseline() -> Self {
        Self::Bare(66)
    }
    pub fn high(chroma_format: ChromaFormatIdc) -> Self {
        Self::Extra((100, chroma_format))
    }

    fn profile_idc_byte(&self) -> u8 {
        match self {
            Self::Bare(value) => *value,
            Self::Extra((value, _)) => *value,
        }
    }

    fn append_to_rbsp(&self, bv: &mut BitVec<u8, Msb0>) {
        match self {
            Self::Bare(_) => {}
            Self::Extra((_, chroma_format_idc)) => {
                let chroma_format_idc_value = chroma_format_idc.value();
                bv.extend_exp_golomb(chroma_format_idc_value);
                if chroma_format_idc_value == 3 {
                    // separate_colour_plane_flag 0
                    bv.push(false);
                }
                let bit_depth = match chroma_format_idc {
                    ChromaFormatIdc::Monochrome(bit_depth)
                    | ChromaFormatIdc::Chroma420(bit_depth) => bit_depth,
                };

                let bit_depth_luma_minus8 = bit_depth.num_bits() - 8;
                let bit_depth_chroma_minus8 = bit_depth.num_bits() - 8;
                bv.extend_exp_golomb(bit_depth_luma_minus8.into());
                bv.extend_exp_golomb(bit_depth_chroma_minus8.into());

                // qpprime_y_zero_transform_bypass_flag 0
                bv.push(false);
                // seq_scaling_matrix_present_flag 0
                bv.push(false);
            }
        }
    }
}

/// Sequence parameter set. Extended from the teacher's I-slice-only version
/// with `log2_max_frame_num`/`log2_max_pic_order_cnt_lsb` sized to the
/// stream's keyint/GOP structure, and optional VUI SAR.
#[derive(Debug, PartialEq, Eq)]
pub struct Sps {
    pub seq_parameter_set_id: u32,
    pub profile_idc: ProfileIdc,
    pub pic_width_in_mbs_minus1: u32,
    pub pic_height_in_map_units_minus1: u32,
    pub frame_cropping: Option<[u32; 4]>,
    pub log2_max_frame_num_minus4: u32,
    pub pic_order_cnt_type: u32,
    pub log2_max_pic_order_cnt_lsb_minus4: u32,
    pub max_num_ref_frames: u32,
    pub vui: Option<Vui>,
}

impl Sps {
    pub fn from_open_params(open: &OpenParams, profile_idc: ProfileIdc) -> Self {
        let frame_cropping = compute_frame_cropping(open.width, open.height);

        // log2_max_frame_num must cover frame_num values up to keyint_max
        // plus headroom for wraparound, matching x264's derivation from
        // i_log2_max_frame_num.
        let needed = (open.keyint_max.max(1) as f64).log2().ceil() as u32 + 4;
        let log2_max_frame_num_minus4 = needed.saturating_sub(4).clamp(0, 12);

        let vui = open
            .sample_aspect_ratio
            .map(|sar| Vui::new(false, Some(sar)));

        Self {
            seq_parameter_set_id: 0,
            profile_idc,
            pic_width_in_mbs_minus1: open.mbs_width - 1,
            pic_height_in_map_units_minus1: open.mbs_height - 1,
            frame_cropping,
            log2_max_frame_num_minus4,
            pic_order_cnt_type: 0,
            log2_max_pic_order_cnt_lsb_minus4: (log2_max_frame_num_minus4 + 1).min(12),
            max_num_ref_frames: open.frame_reference,
            vui,
        }
    }

    pub fn log2_max_frame_num(&self) -> u32 {
        self.log2_max_frame_num_minus4 + 4
    }

    pub fn log2_max_pic_order_cnt_lsb(&self) -> u32 {
        self.log2_max_pic_order_cnt_lsb_minus4 + 4
    }

    pub fn to_rbsp(&self) -> Vec<u8> {
        let profile_idc = self.profile_idc.profile_idc_byte();
        let reserved = 0x00;
        let level_idc = 10;

        let start = vec![profile_idc, reserved, level_idc];
        let mut bv: BitVec<u8, Msb0> = BitVec::from_vec(start);

        bv.extend_exp_golomb(self.seq_parameter_set_id);
        self.profile_idc.append_to_rbsp(&mut bv);
        bv.extend_exp_golomb(self.log2_max_frame_num_minus4);
        bv.extend_exp_golomb(self.pic_order_cnt_type);
        bv.extend_exp_golomb(self.log2_max_pic_order_cnt_lsb_minus4);
        bv.extend_exp_golomb(self.max_num_ref_frames.saturating_sub(1));
        // gaps_in_frame_num_value_allowed_flag = 0
        bv.push(false);
        bv.extend_exp_golomb(self.pic_width_in_mbs_minus1);
        bv.extend_exp_golomb(self.pic_height_in_map_units_minus1);
        // frame_mbs_only_flag = 1
        bv.push(true);
        // direct_8x8_inference_flag = 0
        bv.push(false);

        if let Some(lrtb) = &self.frame_cropping {
            bv.push(true);
            for frame_crop_offset in lrtb.iter() {
                bv.extend_exp_golomb(*frame_crop_offset);
            }
        } else {
            bv.push(false);
        }

        match &self.vui {
            None => bv.push(false),
            Some(vui) => {
                bv.push(true);
                vui.append_to_rbsp(&mut bv);
            }
        }

        // rbsp_stop_one_bit
        bv.push(true);
        bv.into_vec()
    }
}

fn compute_frame_cropping(width: u32, height: u32) -> Option<[u32; 4]> {
    let _ = (width, height);
    // Width/height are validated to be multiples of 16 by `Params::validate`,
    // so no cropping is ever required for the 4:2:0 frame_mbs_only case.
    None
}

/// Picture parameter set.
#[derive(Debug, PartialEq, Eq)]
pub struct Pps {
    pub pic_parameter_set_id: u32,
    pub seq_parameter_set_id: u32,
    pub entropy_coding_mode_flag: bool,
    pub num_ref_idx_l0_default_active_minus1: u32,
    pub num_ref_idx_l1_default_active_minus1: u32,
    pub deblocking_filter_control_present_flag: bool,
}

impl Pps {
    pub fn new(pic_parameter_set_id: u32, seq_parameter_set_id: u32) -> Self {
        Self {
            pic_parameter_set_id,
            seq_parameter_set_id,
            entropy_coding_mode_flag: false,
            num_ref_idx_l0_default_active_minus1: 0,
            num_ref_idx_l1_default_active_minus1: 0,
            deblocking_filter_control_present_flag: true,
        }
    }

    pub fn to_rbsp(&self) -> Vec<u8> {
        let mut bv: BitVec<u8, Msb0> = BitVec::with_capacity(20 * 8);

        bv.extend_exp_golomb(self.pic_parameter_set_id);
        bv.extend_exp_golomb(self.seq_parameter_set_id);
        bv.push(self.entropy_coding_mode_flag);
        // bottom_field_pic_order_in_frame_present_flag = 0
        bv.push(false);
        // num_slice_groups_minus1 = 0
        bv.extend_exp_golomb(0);
        bv.extend_exp_golomb(self.num_ref_idx_l0_default_active_minus1);
        bv.extend_exp_golomb(self.num_ref_idx_l1_default_active_minus1);
        // weighted_pred_flag = 0
        bv.push(false);
        // weighted_bipred_idc = 0
        bv.push(false);
        bv.push(false);
        // pic_init_qp_minus26 = 0
        bv.extend_signed_exp_golomb(0);
        // pic_init_qs_minus26 = 0
        bv.extend_signed_exp_golomb(0);
        // chroma_qp_index_offset = 0
        bv.extend_signed_exp_golomb(0);
        bv.push(self.deblocking_filter_control_present_flag);
        // constrained_intra_pred_flag = 0
        bv.push(false);
        // redundant_pic_cnt_present_flag = 0
        bv.push(false);

        bv.push(true);
        bv.into_vec()
    }
}

pub fn framing_uses_long_startcode(framing: &NalFraming) -> bool {
    matches!(framing, NalFraming::AnnexB { long_startcode: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;

    #[test]
    fn test_sps_width_height_fields() {
        let open = Params {
            width: 176,
            height: 144,
            ..Default::default()
        }
        .validate()
        .unwrap();
        let sps = Sps::from_open_params(&open, ProfileIdc::baseline());
        assert_eq!(sps.pic_width_in_mbs_minus1, 10);
        assert_eq!(sps.pic_height_in_map_units_minus1, 8);
        assert!(sps.frame_cropping.is_none());
    }

    #[test]
    fn test_sps_log2_max_frame_num_covers_keyint() {
        let mut p = Params {
            width: 176,
            height: 144,
            ..Default::default()
        };
        p.keyint_max = 300;
        let open = p.validate().unwrap();
        let sps = Sps::from_open_params(&open, ProfileIdc::baseline());
        assert!((1u32 << sps.log2_max_frame_num()) >= open.keyint_max);
    }

    #[test]
    fn test_pps_roundtrip_nonempty() {
        let pps = Pps::new(0, 0);
        assert!(!pps.to_rbsp().is_empty());
    }

    #[test]
    fn test_vui_sar_present_flag() {
        let vui = Vui::new(false, Some(SampleAspectRatio { width: 4, height: 3 }));
        let mut bv: BitVec<u8, Msb0> = BitVec::new();
        vui.append_to_rbsp(&mut bv);
        assert!(bv[0]);
    }
}
