// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The encoder driver (spec §4.5), grounded line-for-line on
//! `x264_encoder_encode` (`original_source/encoder/encoder.c:905-1355`).

use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::collaborators::{
    ConstantQpRateControl, MbCodec, NoopPostfilter, PcmMbCodec, Postfilter, RateControl,
};
use crate::error::Result;
use crate::frame_window::{CodingDecision, FrameWindow};
use crate::nal::{max_escaped_len, NalType, NalWriter, RefIdc};
use crate::params::{NalFraming, OpenParams, Params};
use crate::picture::{FramePool, FrameSlot, FrameType, FrameTypeHint, Picture};
use crate::slice::{SliceHeader, SliceType};
use crate::sps_pps::{Pps, ProfileIdc, Sps};
use crate::threadpool::ThreadPool;

/// Cumulative statistics, the supplement named in SPEC_FULL.md for the
/// dropped PSNR/bitrate accounting `x264_encoder_close` prints
/// (`original_source/encoder/encoder.c:1360-1502`).
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub frames_i: u64,
    pub frames_idr: u64,
    pub frames_p: u64,
    pub frames_b: u64,
    pub total_bits: u64,
}

/// One coded picture's output: the framed, escaped NAL bytes for this
/// `encode()` call.
pub struct EncodedPicture {
    pub bitstream: Vec<u8>,
    pub frame_type: FrameType,
    pub poc: i32,
}

fn frame_to_slice_type(ft: FrameType) -> SliceType {
    match ft {
        FrameType::I | FrameType::Idr => SliceType::I,
        FrameType::P => SliceType::P,
        FrameType::B => SliceType::B,
    }
}

fn frame_to_nal_type(ft: FrameType) -> NalType {
    match ft {
        FrameType::Idr => NalType::CodedSliceIdr,
        _ => NalType::CodedSliceNonIdr,
    }
}

fn frame_to_ref_idc(ft: FrameType) -> RefIdc {
    match ft {
        FrameType::Idr => RefIdc::Highest,
        FrameType::I | FrameType::P => RefIdc::High,
        FrameType::B => RefIdc::Disposable,
    }
}

/// The encoder driver: owns the frame pool, reference window, parameter
/// sets, worker pool and bitstream writer for one encoding session.
pub struct Encoder {
    open: OpenParams,
    sps: Sps,
    pps: Pps,
    pool: FramePool,
    window: FrameWindow,
    nal_writer: NalWriter,
    threadpool: ThreadPool,
    mb_codec: Arc<Mutex<dyn MbCodec + Send>>,
    rate_control: Arc<Mutex<dyn RateControl + Send>>,
    postfilter: Arc<Mutex<dyn Postfilter + Send>>,
    idr_pic_id: u16,
    emitted_headers: bool,
    stats: Stats,
}

impl Encoder {
    /// `x264_encoder_open`: validate parameters, build SPS/PPS, size the
    /// frame pools and spawn the worker threads.
    pub fn open(params: Params) -> Result<Self> {
        let open = params.validate()?;

        let profile_idc = ProfileIdc::baseline();
        let sps = Sps::from_open_params(&open, profile_idc);
        let mut pps = Pps::new(0, sps.seq_parameter_set_id);
        pps.entropy_coding_mode_flag = open.b_cabac;

        // Pool sizing mirrors x264: `unused` sized 1 + max_bframes for the
        // in-flight lookahead, `reference` sized 2 + frame_reference so the
        // currently-coded picture always has a free slot alongside the
        // retained reference set.
        let capacity = (1 + open.max_bframes + 2 + open.frame_reference) as usize;
        let pool = FramePool::new(open.width as usize, open.height as usize, capacity)?;

        let window = FrameWindow::new(&open);
        let nal_writer = NalWriter::new();
        let threadpool = ThreadPool::new(open.thread_count);

        Ok(Encoder {
            mb_codec: Arc::new(Mutex::new(PcmMbCodec)),
            rate_control: Arc::new(Mutex::new(ConstantQpRateControl::new(26))),
            postfilter: Arc::new(Mutex::new(NoopPostfilter)),
            sps,
            pps,
            open,
            pool,
            window,
            nal_writer,
            threadpool,
            idr_pic_id: 0,
            emitted_headers: false,
            stats: Stats::default(),
        })
    }

    /// Swap in a different `MbCodec`/`RateControl`/`Postfilter` collaborator
    /// than the PCM/constant-QP/no-op defaults `open` installs.
    pub fn set_mb_codec(&mut self, codec: Arc<Mutex<dyn MbCodec + Send>>) {
        self.mb_codec = codec;
    }
    pub fn set_rate_control(&mut self, rc: Arc<Mutex<dyn RateControl + Send>>) {
        self.rate_control = rc;
    }
    pub fn set_postfilter(&mut self, pf: Arc<Mutex<dyn Postfilter + Send>>) {
        self.postfilter = pf;
    }

    /// `x264_encoder_headers`: the SPS/PPS NALs, emitted once before the
    /// first IDR.
    fn emit_headers(&mut self) -> Result<()> {
        let annexb = matches!(self.open.framing, NalFraming::AnnexB { .. });
        let long_sc = matches!(
            self.open.framing,
            NalFraming::AnnexB { long_startcode: true }
        );

        self.nal_writer
            .write_nal(&self.sps.to_rbsp(), RefIdc::Highest, NalType::Sps, annexb, long_sc)?;
        self.nal_writer
            .write_nal(&self.pps.to_rbsp(), RefIdc::Highest, NalType::Pps, annexb, long_sc)?;
        self.emitted_headers = true;
        Ok(())
    }

    /// Submit one picture and drain whatever the frame window is ready to
    /// emit in coding order. Matches `x264_encoder_encode`'s accept + drive
    /// + emit loop; the `goto do_encode` scene-cut retry is modeled as the
    /// in-place frame-type mutation `encode_one` applies before building
    /// the slice, rather than an actual second pass through this loop (see
    /// `encode_one`'s scene-cut check).
    pub fn encode(
        &mut self,
        pic: &Picture<'_>,
        hint: FrameTypeHint,
    ) -> Result<Vec<EncodedPicture>> {
        pic.check_sizes()?;

        let slot = self.pool.acquire()?;
        self.pool.get_mut(slot).copy_from_picture(pic);
        self.window.accept(slot, hint, &mut self.pool);

        self.drain_ready()
    }

    /// Flush all buffered lookahead frames at end of stream.
    pub fn flush(&mut self) -> Result<Vec<EncodedPicture>> {
        self.window.begin_flush();
        self.drain_ready()
    }

    fn drain_ready(&mut self) -> Result<Vec<EncodedPicture>> {
        let mut out = Vec::new();
        loop {
            match self.window.select_coding_order(&mut self.pool) {
                CodingDecision::NotReady => break,
                CodingDecision::Ready { slot, frame_type } => {
                    let encoded = self.encode_one(slot, frame_type)?;
                    out.push(encoded);
                }
            }
        }
        Ok(out)
    }

    fn encode_one(&mut self, slot: FrameSlot, frame_type: FrameType) -> Result<EncodedPicture> {
        // `frame_num` increment condition checked against the *previous*
        // slice's type before this slice's header is built. Note this runs
        // once regardless of any scene-cut retype below: the "retried emit"
        // in spec §8 S6 is an in-place type mutation, not a second pass
        // through the encode loop, so `frame_num` still only advances once.
        self.window.advance_frame_num(frame_type);

        // Scene-cut rollback (spec §8 S6): a `P` picture whose MbCodec-side
        // motion-estimation cost looks enough like an intra frame is
        // re-typed to `I`/`IDR` before anything else about this slice is
        // built, mirroring `x264_encoder_encode`'s `goto do_encode` retry
        // without the second `frame_num` advance that retry never does
        // either.
        let frame_type = if matches!(frame_type, FrameType::P) {
            let cost = self
                .mb_codec
                .lock()
                .unwrap()
                .analyze_scene_cut(self.pool.get(slot), self.open.mbs_width, self.open.mbs_height);
            let mb_count = self.open.mbs_width * self.open.mbs_height;
            if crate::collaborators::triggers_scene_cut(
                cost,
                mb_count,
                self.window.gop_size(),
                self.open.keyint_min,
                self.open.keyint_max,
                self.open.scenecut_threshold,
            ) {
                let new_type = self.window.apply_scene_cut(slot, &mut self.pool);
                debug!(
                    "scene cut detected: retyping P -> {:?} (inter_cost={} intra_cost={})",
                    new_type, cost.inter_cost, cost.intra_cost
                );
                new_type
            } else {
                frame_type
            }
        } else {
            frame_type
        };

        if matches!(frame_type, FrameType::Idr) {
            self.window.reset_reference(&mut self.pool);
            self.idr_pic_id = self.idr_pic_id.wrapping_add(1);
        }

        let slice_type = frame_to_slice_type(frame_type);
        let fenc_poc = self.pool.get(slot).poc;
        let (ref0, ref1) = self.window.build_reference_lists(&self.pool, fenc_poc);
        let num_ref_idx_l0 = ref0.len().max(1) as u32 - 1;
        let num_ref_idx_l1 = ref1.len() as u32;

        let qp = self
            .rate_control
            .lock()
            .unwrap()
            .qp_for_frame(slice_type, self.window.frame_num());

        let frame_clone = self.pool.get(slot).clone();
        let mbs_width = self.open.mbs_width;
        let mbs_height = self.open.mbs_height;
        let codec = Arc::clone(&self.mb_codec);
        let fixed_cabac_init_idc = self.open.cabac_init_idc;

        let handle = self.threadpool.submit(move || {
            let mut out = Vec::new();
            let mut guard = codec.lock().unwrap();
            let cabac_init_idc = if fixed_cabac_init_idc == -1 {
                guard.adaptive_cabac_init_idc(slice_type)
            } else {
                fixed_cabac_init_idc
            };
            let first_mb_header =
                guard.encode_slice_body(&frame_clone, slice_type, mbs_width, mbs_height, qp, &mut out);
            (out, first_mb_header, cabac_init_idc)
        });
        let (slice_body, first_mb_header, cabac_init_idc): (Vec<u8>, Vec<u8>, i8) =
            self.threadpool.wait(handle);

        let poc = self.pool.get(slot).poc;
        let poc_lsb_mask = (1u32 << self.sps.log2_max_pic_order_cnt_lsb()) - 1;
        let is_idr = matches!(frame_type, FrameType::Idr);
        let slice_header = SliceHeader::new(
            slice_type,
            &self.pps,
            self.window.frame_num(),
            is_idr,
            is_idr.then_some(self.idr_pic_id),
            (poc as u32) & poc_lsb_mask,
            num_ref_idx_l0,
            num_ref_idx_l1,
            qp,
        );

        let mut slice_header = slice_header;
        slice_header.cabac_init_idc = cabac_init_idc;
        if !self.open.b_deblocking_filter {
            slice_header.disable_deblocking_filter_idc = 1;
        } else {
            slice_header.slice_alpha_c0_offset_div2 = self.open.deblocking_filter_alphac0;
            slice_header.slice_beta_offset_div2 = self.open.deblocking_filter_beta;
        }

        let mut rbsp = slice_header.to_rbsp(&self.sps, &self.pps, &first_mb_header);
        rbsp.extend_from_slice(&slice_body);
        // rbsp_slice_trailing_bits: stop bit then byte-align with zeros.
        rbsp.push(0x80);

        debug_assert!(max_escaped_len(rbsp.len()) >= rbsp.len());

        let annexb = matches!(self.open.framing, NalFraming::AnnexB { .. });
        let long_sc = matches!(
            self.open.framing,
            NalFraming::AnnexB { long_startcode: true }
        );

        self.nal_writer.reset();
        if !self.emitted_headers {
            self.emit_headers()?;
        }
        let start = self.nal_writer.bitstream().len();
        self.nal_writer.write_nal(
            &rbsp,
            frame_to_ref_idc(frame_type),
            frame_to_nal_type(frame_type),
            annexb,
            long_sc,
        )?;
        let bitstream = self.nal_writer.bitstream()[..].to_vec();
        let bits_spent = (self.nal_writer.bitstream().len() - start) * 8;

        self.rate_control
            .lock()
            .unwrap()
            .frame_encoded(slice_type, bits_spent);
        self.mb_codec
            .lock()
            .unwrap()
            .update_cabac_model(slice_type, qp);

        if frame_type.is_reference_candidate() {
            self.postfilter
                .lock()
                .unwrap()
                .filter(self.pool.get_mut(slot));
            self.window.update_reference(slot, &mut self.pool);
        } else {
            self.pool.release(slot);
        }

        self.accumulate_stats(frame_type, bits_spent as u64);
        debug!(
            "coded frame type={:?} poc={} frame_num={} bits={}",
            frame_type,
            poc,
            self.window.frame_num(),
            bits_spent
        );

        Ok(EncodedPicture {
            bitstream,
            frame_type,
            poc,
        })
    }

    fn accumulate_stats(&mut self, frame_type: FrameType, bits: u64) {
        match frame_type {
            FrameType::I => self.stats.frames_i += 1,
            FrameType::Idr => self.stats.frames_idr += 1,
            FrameType::P => self.stats.frames_p += 1,
            FrameType::B => self.stats.frames_b += 1,
        }
        self.stats.total_bits += bits;
    }

    /// Cumulative per-type frame counts and total coded bits, the
    /// counterpart of `x264_encoder_close`'s stats printing.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        info!(
            "encoder closing: {} IDR, {} I, {} P, {} B frames, {} total bits",
            self.stats.frames_idr,
            self.stats.frames_i,
            self.stats.frames_p,
            self.stats.frames_b,
            self.stats.total_bits
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_picture(width: usize, height: usize) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        (
            vec![16u8; width * height],
            vec![128u8; (width / 2) * (height / 2)],
            vec![128u8; (width / 2) * (height / 2)],
        )
    }

    #[test]
    fn test_open_small_stream() {
        let params = Params {
            width: 32,
            height: 16,
            max_bframes: 0,
            thread_count: 1,
            ..Default::default()
        };
        let enc = Encoder::open(params);
        assert!(enc.is_ok());
    }

    #[test]
    fn test_encode_single_frame_produces_idr() {
        let params = Params {
            width: 32,
            height: 16,
            max_bframes: 0,
            thread_count: 1,
            ..Default::default()
        };
        let mut enc = Encoder::open(params).unwrap();
        let (y, u, v) = make_picture(32, 16);
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
        let out = enc.encode(&pic, FrameTypeHint::Auto).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].frame_type, FrameType::Idr);
        assert!(!out[0].bitstream.is_empty());
    }

    #[test]
    fn test_flush_emits_buffered_bframes() {
        let params = Params {
            width: 32,
            height: 16,
            max_bframes: 2,
            thread_count: 2,
            ..Default::default()
        };
        let mut enc = Encoder::open(params).unwrap();
        let (y, u, v) = make_picture(32, 16);
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
        let mut total = 0;
        for _ in 0..4 {
            total += enc.encode(&pic, FrameTypeHint::Auto).unwrap().len();
        }
        total += enc.flush().unwrap().len();
        assert_eq!(total, 4);
    }

    /// A custom `MbCodec` that signals a fixed `cabac_init_idc` and counts
    /// how many times the driver asks it to refresh its model, proving both
    /// hooks are actually wired into `encode_one`'s call sites rather than
    /// just declared on the trait.
    struct CountingMbCodec {
        update_calls: usize,
    }

    impl MbCodec for CountingMbCodec {
        fn encode_slice_body(
            &mut self,
            frame: &crate::picture::Frame,
            slice_type: SliceType,
            mbs_width: u32,
            mbs_height: u32,
            qp: i32,
            out: &mut Vec<u8>,
        ) -> Vec<u8> {
            PcmMbCodec.encode_slice_body(frame, slice_type, mbs_width, mbs_height, qp, out)
        }

        fn adaptive_cabac_init_idc(&self, _slice_type: SliceType) -> i8 {
            1
        }

        fn update_cabac_model(&mut self, _slice_type: SliceType, _qp: i32) {
            self.update_calls += 1;
        }
    }

    #[test]
    fn test_mb_codec_cabac_hooks_are_invoked() {
        let params = Params {
            width: 32,
            height: 16,
            max_bframes: 0,
            thread_count: 1,
            ..Default::default()
        };
        let mut enc = Encoder::open(params).unwrap();
        let codec = Arc::new(Mutex::new(CountingMbCodec { update_calls: 0 }));
        enc.set_mb_codec(codec.clone());

        let (y, u, v) = make_picture(32, 16);
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
            enc.encode(&pic, FrameTypeHint::Auto).unwrap();
        }

        assert_eq!(codec.lock().unwrap().update_calls, 3);
    }

    /// An `MbCodec` that always reports a maximal inter cost against a
    /// minimal intra cost, so every `P` candidate looks like a scene cut.
    struct AlwaysSceneCutMbCodec;

    impl MbCodec for AlwaysSceneCutMbCodec {
        fn encode_slice_body(
            &mut self,
            frame: &crate::picture::Frame,
            slice_type: SliceType,
            mbs_width: u32,
            mbs_height: u32,
            qp: i32,
            out: &mut Vec<u8>,
        ) -> Vec<u8> {
            PcmMbCodec.encode_slice_body(frame, slice_type, mbs_width, mbs_height, qp, out)
        }

        fn analyze_scene_cut(
            &mut self,
            _frame: &crate::picture::Frame,
            _mbs_width: u32,
            _mbs_height: u32,
        ) -> crate::collaborators::SceneCutCost {
            crate::collaborators::SceneCutCost {
                intra_cost: 1,
                inter_cost: 1,
                skip_mb_count: 0,
            }
        }
    }

    #[test]
    fn test_scene_cut_retypes_p_frame_to_i_or_idr() {
        let params = Params {
            width: 32,
            height: 16,
            max_bframes: 0,
            thread_count: 1,
            keyint_max: 100,
            scenecut_threshold: 0,
            ..Default::default()
        };
        let mut enc = Encoder::open(params).unwrap();
        enc.set_mb_codec(Arc::new(Mutex::new(AlwaysSceneCutMbCodec)));

        let (y, u, v) = make_picture(32, 16);
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

        // First frame is IDR regardless; the second would naturally be P,
        // but AlwaysSceneCutMbCodec's cost forces a rollback to I/IDR.
        enc.encode(&pic, FrameTypeHint::Auto).unwrap();
        let second = enc.encode(&pic, FrameTypeHint::Auto).unwrap();
        assert_eq!(second.len(), 1);
        assert!(matches!(
            second[0].frame_type,
            FrameType::I | FrameType::Idr
        ));

        let stats = enc.stats();
        assert_eq!(stats.frames_p, 0);
    }
}
