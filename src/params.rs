// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Encoder-open parameters and the validation/clamping pass x264 performs
//! in `x264_encoder_open` (`original_source/encoder/encoder.c:301-490`).

use crate::error::{Error, Result};

/// Sample aspect ratio, `sar_width : sar_height` in VUI terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleAspectRatio {
    pub width: u32,
    pub height: u32,
}

/// Framing mode for emitted NAL units (spec §4.2/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalFraming {
    /// `00 00 00 01` / `00 00 01` start codes.
    AnnexB { long_startcode: bool },
    /// 4-byte big-endian length prefix (AVCC).
    LengthPrefixed,
}

/// Parameters accepted by [`crate::encoder::Encoder::open`].
#[derive(Debug, Clone)]
pub struct Params {
    pub width: u32,
    pub height: u32,
    pub frame_reference: u32,
    pub keyint_max: u32,
    pub keyint_min: u32,
    pub max_bframes: u32,
    pub thread_count: usize,
    pub framing: NalFraming,
    pub sample_aspect_ratio: Option<SampleAspectRatio>,
    pub avcintra_padding: Option<u32>,
    /// Sensitivity of the `P` → `I`/`IDR` scene-cut rollback (spec §8 S6),
    /// 0-100 matching x264's `i_scenecut_threshold` percentage. `0` disables
    /// rollback entirely (`MbCodec::analyze_scene_cut`'s condition can never
    /// be satisfied); `100` triggers on any positive inter cost.
    pub scenecut_threshold: u8,
    /// `b_cabac`: sets `Pps::entropy_coding_mode_flag`. The shipped
    /// `MbCodec`s never actually entropy-code with CABAC, so turning this on
    /// only changes the signalled PPS bit, not `encode_slice_body`'s output.
    pub b_cabac: bool,
    /// `cabac_init_idc` ∈ `[-1, 2]`; `-1` (the default) asks the active
    /// `MbCodec` to pick adaptively via `adaptive_cabac_init_idc`, any other
    /// value is signalled as-is without consulting it.
    pub cabac_init_idc: i8,
    /// `b_deblocking_filter`: when `false`, every slice header signals
    /// `disable_deblocking_filter_idc = 1`.
    pub b_deblocking_filter: bool,
    /// `deblocking_filter_alphac0`/`beta`, clamped to `[-6, 6]` in
    /// [`Params::validate`] and written through to every slice header's
    /// `slice_alpha_c0_offset_div2`/`slice_beta_offset_div2`.
    pub deblocking_filter_alphac0: i32,
    pub deblocking_filter_beta: i32,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            width: 0,
            height: 0,
            frame_reference: 3,
            keyint_max: 250,
            keyint_min: 25,
            max_bframes: 3,
            thread_count: 1,
            framing: NalFraming::AnnexB {
                long_startcode: true,
            },
            sample_aspect_ratio: None,
            avcintra_padding: None,
            scenecut_threshold: 40,
            b_cabac: false,
            cabac_init_idc: -1,
            b_deblocking_filter: true,
            deblocking_filter_alphac0: 0,
            deblocking_filter_beta: 0,
        }
    }
}

const BFRAME_MAX: u32 = 16;

/// Validated, clamped parameters ready for `Encoder::open` to act on.
/// Mirrors the fixups `x264_encoder_open` performs in place on its
/// `x264_param_t` before using it.
#[derive(Debug, Clone)]
pub struct OpenParams {
    pub width: u32,
    pub height: u32,
    pub mbs_width: u32,
    pub mbs_height: u32,
    pub frame_reference: u32,
    pub keyint_max: u32,
    pub keyint_min: u32,
    pub max_bframes: u32,
    pub thread_count: usize,
    pub framing: NalFraming,
    pub sample_aspect_ratio: Option<SampleAspectRatio>,
    pub avcintra_padding: Option<u32>,
    pub scenecut_threshold: u8,
    pub b_cabac: bool,
    pub cabac_init_idc: i8,
    pub b_deblocking_filter: bool,
    pub deblocking_filter_alphac0: i32,
    pub deblocking_filter_beta: i32,
}

impl Params {
    /// Validate and clamp, matching `x264_encoder_open`'s fixup block.
    pub fn validate(self) -> Result<OpenParams> {
        if self.width == 0 || self.height == 0 || self.width % 16 != 0 || self.height % 16 != 0 {
            return Err(Error::UnsupportedImageSize {
                #[cfg(feature = "backtrace")]
                backtrace: std::backtrace::Backtrace::capture(),
            });
        }

        // i_frame_reference clamped to [1, 15].
        let frame_reference = self.frame_reference.clamp(1, 15);

        // i_bframe clamped to [0, X264_BFRAME_MAX].
        let max_bframes = self.max_bframes.min(BFRAME_MAX);

        // keyint_max must be at least 1; keyint_min clamped into
        // [1, keyint_max / 2 + 1].
        let keyint_max = self.keyint_max.max(1);
        let keyint_min = self.keyint_min.clamp(1, keyint_max / 2 + 1);

        if self.thread_count == 0 {
            return Err(Error::InvalidParameter {
                msg: "thread_count must be at least 1",
                #[cfg(feature = "backtrace")]
                backtrace: std::backtrace::Backtrace::capture(),
            });
        }

        let sample_aspect_ratio = match self.sample_aspect_ratio {
            Some(sar) => Some(reduce_sar(sar)?),
            None => None,
        };

        Ok(OpenParams {
            width: self.width,
            height: self.height,
            mbs_width: self.width / 16,
            mbs_height: self.height / 16,
            frame_reference,
            keyint_max,
            keyint_min,
            max_bframes,
            thread_count: self.thread_count,
            framing: self.framing,
            sample_aspect_ratio,
            avcintra_padding: self.avcintra_padding,
            scenecut_threshold: self.scenecut_threshold.min(100),
            b_cabac: self.b_cabac,
            cabac_init_idc: self.cabac_init_idc.clamp(-1, 2),
            b_deblocking_filter: self.b_deblocking_filter,
            deblocking_filter_alphac0: self.deblocking_filter_alphac0.clamp(-6, 6),
            deblocking_filter_beta: self.deblocking_filter_beta.clamp(-6, 6),
        })
    }
}

/// GCD-reduce a SAR and then repeatedly halve both terms until each fits in
/// 16 bits, matching `x264_encoder_open`'s SAR-fixup loop.
fn reduce_sar(sar: SampleAspectRatio) -> Result<SampleAspectRatio> {
    if sar.width == 0 || sar.height == 0 {
        return Err(Error::InvalidSAR {
            #[cfg(feature = "backtrace")]
            backtrace: std::backtrace::Backtrace::capture(),
        });
    }
    let g = gcd(sar.width, sar.height);
    let mut w = sar.width / g;
    let mut h = sar.height / g;
    while w >= 1 << 16 || h >= 1 << 16 {
        if w < 2 || h < 2 {
            return Err(Error::UnsupportedAspectRatio {
                #[cfg(feature = "backtrace")]
                backtrace: std::backtrace::Backtrace::capture(),
            });
        }
        w /= 2;
        h /= 2;
    }
    Ok(SampleAspectRatio { width: w, height: h })
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(width: u32, height: u32) -> Params {
        Params {
            width,
            height,
            ..Default::default()
        }
    }

    #[test]
    fn test_non_multiple_of_16_rejected() {
        assert!(base(100, 100).validate().is_err());
    }

    #[test]
    fn test_valid_size_accepted() {
        let p = base(176, 144).validate().unwrap();
        assert_eq!(p.mbs_width, 11);
        assert_eq!(p.mbs_height, 9);
    }

    #[test]
    fn test_keyint_min_clamped_below_max_half() {
        let mut p = base(176, 144);
        p.keyint_max = 10;
        p.keyint_min = 9;
        let open = p.validate().unwrap();
        assert_eq!(open.keyint_min, 6); // 10/2 + 1
    }

    #[test]
    fn test_bframe_clamped_to_max() {
        let mut p = base(176, 144);
        p.max_bframes = 99;
        let open = p.validate().unwrap();
        assert_eq!(open.max_bframes, BFRAME_MAX);
    }

    #[test]
    fn test_sar_reduced_by_gcd() {
        let mut p = base(176, 144);
        p.sample_aspect_ratio = Some(SampleAspectRatio {
            width: 20,
            height: 10,
        });
        let open = p.validate().unwrap();
        assert_eq!(
            open.sample_aspect_ratio,
            Some(SampleAspectRatio { width: 2, height: 1 })
        );
    }

    #[test]
    fn test_zero_sar_component_rejected() {
        let mut p = base(176, 144);
        p.sample_aspect_ratio = Some(SampleAspectRatio { width: 0, height: 1 });
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_scenecut_threshold_clamped_to_100() {
        let mut p = base(176, 144);
        p.scenecut_threshold = 200;
        let open = p.validate().unwrap();
        assert_eq!(open.scenecut_threshold, 100);
    }

    #[test]
    fn test_cabac_init_idc_clamped_to_range() {
        let mut p = base(176, 144);
        p.cabac_init_idc = 9;
        let open = p.validate().unwrap();
        assert_eq!(open.cabac_init_idc, 2);

        let mut p = base(176, 144);
        p.cabac_init_idc = -9;
        let open = p.validate().unwrap();
        assert_eq!(open.cabac_init_idc, -1);
    }

    #[test]
    fn test_deblocking_offsets_clamped_to_plus_minus_6() {
        let mut p = base(176, 144);
        p.deblocking_filter_alphac0 = 20;
        p.deblocking_filter_beta = -20;
        let open = p.validate().unwrap();
        assert_eq!(open.deblocking_filter_alphac0, 6);
        assert_eq!(open.deblocking_filter_beta, -6);
    }
}
