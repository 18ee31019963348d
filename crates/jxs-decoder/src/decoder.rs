/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Per-frame decode logic: the shared stream state, the pooled
//! per-frame instance, slice decoding and the final overlap /
//! colour-transform passes.
//!
//! The coefficient store of an instance keeps one contiguous region
//! per precinct row; inside a region the components follow each other,
//! and inside a component its bands, each `width x height_lines_num`
//! coefficients. Precinct columns share the region through per-band
//! column offsets.

use std::sync::atomic::AtomicU32;

use log::warn;

use jxs_core::bitstream::BitReader;
use jxs_core::image::ImageConfig;

use crate::dequant::{dequant, inv_sign, QuantType};
use crate::errors::DecoderError;
use crate::headers::{
    get_header, get_slice_header, PictureHeaderConst, PictureHeaderDynamic
};
use crate::idwt::{BandLines, ComponentSynth};
use crate::nlt::{nlt_inverse_line_16bit, nlt_inverse_line_8bit};
use crate::mct::mct_inverse_transform;
use crate::pi::{Pi, PrecinctVariant};
use crate::precinct::PrecinctRing;
use crate::queue::slice_sync::{SliceSync, State};
use crate::shared::{SharedBytes, SharedCoeffs, SharedImage};
use crate::unpack::unpack_precinct;

/// Frame-mode decoder instances pre-allocated in the pool: one being
/// prepared, one calculating, one finishing.
pub(crate) const INSTANCE_POOL_SIZE: usize = 3;

/// Placement of band coefficients inside one precinct-row region.
pub(crate) struct CoeffLayout {
    /// `u16` count of one precinct row over all components.
    pub line_size:    usize,
    /// Component offsets inside a row region.
    pub comp_offset:  Vec<usize>,
    /// Component block sizes.
    pub comp_size:    Vec<usize>,
    /// Per component: offset of each band's line 0 inside the block.
    pub band_offsets: Vec<Vec<u32>>,
    /// Per component: full band widths (line strides).
    pub band_widths:  Vec<Vec<u32>>
}

impl CoeffLayout {
    pub fn new(pi: &Pi) -> CoeffLayout {
        let mut comp_offset = Vec::with_capacity(pi.comps_num as usize);
        let mut comp_size = Vec::with_capacity(pi.comps_num as usize);
        let mut band_offsets = Vec::with_capacity(pi.comps_num as usize);
        let mut band_widths = Vec::with_capacity(pi.comps_num as usize);

        let mut line_size = 0_usize;
        for comp in &pi.components {
            comp_offset.push(line_size);
            let mut offsets = Vec::with_capacity(comp.bands.len());
            let mut widths = Vec::with_capacity(comp.bands.len());
            let mut offset = 0_u32;
            for band in &comp.bands {
                offsets.push(offset);
                widths.push(band.width);
                offset += band.width * band.height_lines_num;
            }
            band_offsets.push(offsets);
            band_widths.push(widths);
            comp_size.push(offset as usize);
            line_size += offset as usize;
        }
        CoeffLayout {
            line_size,
            comp_offset,
            comp_size,
            band_offsets,
            band_widths
        }
    }
}

/// Stream-wide state computed once at init and shared read-only.
pub(crate) struct DecoderCommon {
    pub pi:           Pi,
    pub hdr:          PictureHeaderConst,
    pub layout:       CoeffLayout,
    pub image_config: ImageConfig
}

/// One in-flight frame.
pub(crate) struct DecoderInstance {
    pub dyn_hdr:   PictureHeaderDynamic,
    pub coeffs:    SharedCoeffs,
    pub slice_done: Vec<SliceSync>,

    pub frame_num:        u64,
    pub ring_idx:         u32,
    pub sync_slices_idwt: bool,
    /// May shrink mid-dispatch when a slice walk fails.
    pub slices_to_receive: AtomicU32,

    /// Frame-mode input codestream, read-only while shared.
    pub bitstream:  Option<Vec<u8>>,
    /// Packet-mode accumulation buffer, sized `Lcod`.
    pub packet_buf: Option<SharedBytes>,
    pub image:      Option<SharedImage>,
    pub user_data:  u64
}

impl DecoderInstance {
    pub fn new(common: &DecoderCommon, packet_mode_size: usize) -> DecoderInstance {
        let pi = &common.pi;
        let coeff_len = common.layout.line_size * pi.precincts_line_num as usize;
        DecoderInstance {
            dyn_hdr: PictureHeaderDynamic::default(),
            coeffs: SharedCoeffs::new(coeff_len),
            slice_done: (0..pi.slice_num).map(|_| SliceSync::new()).collect(),
            frame_num: 0,
            ring_idx: 0,
            sync_slices_idwt: false,
            slices_to_receive: AtomicU32::new(0),
            bitstream: None,
            packet_buf: if packet_mode_size != 0 {
                Some(SharedBytes::new(packet_mode_size))
            } else {
                None
            },
            image: None,
            user_data: 0
        }
    }

    /// The byte range of the frame-mode codestream or packet buffer a
    /// slice task refers to.
    ///
    /// # Safety-adjacent note
    /// In packet mode the range must already be fully filled; the
    /// packet scheduler only dispatches complete slices.
    pub fn slice_bytes(&self, offset: usize, len: usize) -> &[u8] {
        if let Some(bitstream) = &self.bitstream {
            &bitstream[offset..offset + len]
        } else if let Some(buf) = &self.packet_buf {
            // dispatched regions are immutable per the fill protocol
            unsafe { buf.region(offset, len) }
        } else {
            &[]
        }
    }

}

/// Parse and validate one frame's header against the stream
/// configuration; returns the per-frame header and its size in bytes.
pub(crate) fn parse_frame_header(
    common: &DecoderCommon, bitstream: &[u8]
) -> Result<(PictureHeaderDynamic, usize), DecoderError> {
    let mut reader = BitReader::new(bitstream);
    let mut hdr = PictureHeaderConst::default();
    let mut dyn_hdr = PictureHeaderDynamic::default();
    get_header(&mut reader, &mut hdr, &mut dyn_hdr)?;

    if hdr != common.hdr {
        return Err(DecoderError::ConfigChange);
    }
    if dyn_hdr.tnlt != 0 {
        // quadratic/extended transfer parsed but not decodable
        return Err(DecoderError::invalid("nonlinear transfer not supported"));
    }
    Ok((dyn_hdr, reader.used_bytes()))
}

/// Scratch a universal worker owns: the precinct-state ring and the
/// per-component synthesis states.
pub(crate) struct WorkerScratch {
    pub ring:  PrecinctRing,
    pub synth: Vec<ComponentSynth>
}

impl WorkerScratch {
    pub fn new(pi: &Pi) -> WorkerScratch {
        WorkerScratch {
            ring:  PrecinctRing::new(pi),
            synth: pi.components.iter().map(ComponentSynth::new).collect()
        }
    }
}

/// Band-line view of component `c` inside a precinct-row region.
fn band_lines<'a>(region: &'a [u16], layout: &'a CoeffLayout, c: usize) -> BandLines<'a> {
    let start = layout.comp_offset[c];
    BandLines {
        block:   &region[start..start + layout.comp_size[c]],
        offsets: &layout.band_offsets[c],
        widths:  &layout.band_widths[c]
    }
}

/// Scale one reconstructed line to the output pixel format and store
/// it.
///
/// # Safety
/// The caller must be the unique writer of `(comp, line)` per the
/// slice partition.
unsafe fn write_output_line(
    image: &SharedImage, dyn_hdr: &PictureHeaderDynamic, depth: u8, comp: usize, line: u32,
    row: &[i32]
) {
    if image.plane_is_u8(comp) {
        let out = image.row_u8_mut(comp, line as usize, row.len());
        nlt_inverse_line_8bit(row, depth, dyn_hdr, out);
    } else {
        let out = image.row_u16_mut(comp, line as usize, row.len());
        nlt_inverse_line_16bit(row, depth, dyn_hdr, out);
    }
}

/// Run the streaming synthesis for one precinct row of every component
/// and write the finished lines to the output image.
fn transform_precinct_row(
    instance: &DecoderInstance, common: &DecoderCommon, scratch: &mut WorkerScratch, row: u32,
    image: &SharedImage
) {
    let pi = &common.pi;
    let layout = &common.layout;
    let depth = common.hdr.bit_depth[0];
    let line_size = layout.line_size;

    // the row itself is owned by this worker's slice; the previous row
    // is only read once its slice is known to be decoded
    let cur_region = unsafe { instance.coeffs.region(row as usize * line_size, line_size) };
    let prev_region = (row > 0).then(|| unsafe {
        instance
            .coeffs
            .region((row as usize - 1) * line_size, line_size)
    });

    for (c, synth) in scratch.synth.iter_mut().enumerate() {
        let cur = band_lines(cur_region, layout, c);
        let prev = prev_region.map(|region| band_lines(region, layout, c));
        synth.step(row, &cur, prev.as_ref(), &mut |line, data| unsafe {
            write_output_line(image, &instance.dyn_hdr, depth, c, line, data);
        });
    }
}

/// Re-prime every component's synthesis state for precinct row `base`.
fn prime_precinct_row(
    instance: &DecoderInstance, common: &DecoderCommon, scratch: &mut WorkerScratch, base: u32
) {
    let layout = &common.layout;
    let line_size = layout.line_size;

    if base == 0 {
        for synth in scratch.synth.iter_mut() {
            synth.reset(instance.dyn_hdr.fq);
        }
        return;
    }
    let prev_region = unsafe {
        instance
            .coeffs
            .region((base as usize - 1) * line_size, line_size)
    };
    let prev2_region = (base >= 2).then(|| unsafe {
        instance
            .coeffs
            .region((base as usize - 2) * line_size, line_size)
    });

    for (c, synth) in scratch.synth.iter_mut().enumerate() {
        synth.reset(instance.dyn_hdr.fq);
        let prev = band_lines(prev_region, layout, c);
        let prev2 = prev2_region.map(|region| band_lines(region, layout, c));
        synth.prime(base, &prev, prev2.as_ref());
    }
}

/// Decode one slice: entropy decode every precinct, dequantize, and
/// (depending on the vertical decomposition and colour transform) run
/// the per-precinct inverse transform. Returns the bytes consumed.
pub(crate) fn decode_slice(
    instance: &DecoderInstance, common: &DecoderCommon, scratch: &mut WorkerScratch,
    bitstream: &[u8], slice: u32, abort: &std::sync::atomic::AtomicBool
) -> Result<usize, DecoderError> {
    let pi = &common.pi;
    let layout = &common.layout;
    let mut reader = BitReader::new(bitstream);

    let slice_idx = get_slice_header(&mut reader)?;
    if u32::from(slice_idx) != slice {
        warn!("Slice index corruption, read={slice_idx}, expected={slice}");
        return Err(DecoderError::invalid("unexpected slice index"));
    }

    let lines_per_slice = pi.lines_per_slice(slice);
    let is_last_slice = slice == pi.slice_num - 1;
    let quant_type = QuantType::from_qpih(instance.dyn_hdr.qpih);
    let image = instance.image.as_ref().ok_or(DecoderError::Internal)?;

    // the readiness flag normally trips after the second precinct row;
    // a shorter slice signals after its last one
    let readiness_line = lines_per_slice.saturating_sub(1).min(1);

    // fresh synthesis state for this slice
    for synth in scratch.synth.iter_mut() {
        synth.reset(instance.dyn_hdr.fq);
    }

    let result = (|| -> Result<(), DecoderError> {
        for line in 0..lines_per_slice {
            let row = slice * pi.precincts_per_slice + line;
            {
                // this worker owns the row per the slice partition;
                // the exclusive region borrow ends before the
                // transform below takes its shared views
                let region = unsafe {
                    instance
                        .coeffs
                        .region_mut(row as usize * layout.line_size, layout.line_size)
                };

                for column in 0..pi.precincts_col_num {
                    let variant = pi.variant_at(row, column);
                    let (target, top) = scratch.ring.target_and_top(column as usize, line != 0);
                    target.variant = variant;

                    // point every band at its column inside the region
                    let normal = pi.precinct_info(PrecinctVariant::Normal);
                    for c in 0..pi.comps_num as usize {
                        for b in 0..pi.components[c].bands.len() {
                            let x_pos = column * normal.b_info[c][b].width;
                            target.bands[c][b].coeff_base = layout.comp_offset[c]
                                + layout.band_offsets[c][b] as usize
                                + x_pos as usize;
                        }
                    }

                    unpack_precinct(&mut reader, target, top, region, pi, &instance.dyn_hdr)?;

                    // dequantize and convert to two's complement
                    let p_info = pi.precinct_info(variant);
                    for c in 0..pi.comps_num as usize {
                        for b in 0..pi.components[c].bands.len() {
                            let info = &p_info.b_info[c][b];
                            let band = &scratch.ring.spare().bands[c][b];
                            let band_w = layout.band_widths[c][b] as usize;
                            let gcli_w = info.gcli_width as usize;
                            for ypos in 0..info.height as usize {
                                let start = band.coeff_base + ypos * band_w;
                                let coeffs = &mut region[start..start + info.width as usize];
                                let gclis =
                                    &band.gcli_data[ypos * gcli_w..(ypos + 1) * gcli_w];
                                dequant(coeffs, gclis, band.gtli, quant_type);
                                inv_sign(coeffs);
                            }
                        }
                    }

                    scratch.ring.commit(column as usize);
                }
            }

            if instance.sync_slices_idwt && line == readiness_line {
                instance.slice_done[slice as usize].set(State::Ok);
            }

            if common.hdr.cpih != 0 {
                // the colour transform needs the whole frame; the
                // final stage runs the wavelet synthesis there
                continue;
            }

            if pi.decom_v == 0 {
                transform_precinct_row(instance, common, scratch, row, image);
                continue;
            }

            if lines_per_slice > 2 {
                if slice != 0 && line == 0 {
                    continue;
                }
                if slice != 0 && line == 1 {
                    // rebuild the vertical state from the slice's first
                    // two rows, then continue from row base + 2
                    prime_precinct_row(instance, common, scratch, row + 1);
                } else {
                    transform_precinct_row(instance, common, scratch, row, image);
                }
            }
        }
        Ok(())
    })();

    if let Err(err) = result {
        // wake any neighbor waiting on this slice
        if instance.sync_slices_idwt {
            instance.slice_done[slice as usize].set(State::Error);
        }
        return Err(err);
    }

    let slice_size = reader.used_bytes();

    // recompute the vertical overlap into the next slice once its
    // first rows are decoded
    if instance.sync_slices_idwt && !is_last_slice && lines_per_slice > 2 {
        if instance.slice_done[slice as usize + 1].wait_done(abort) == State::Error {
            return Err(DecoderError::Internal);
        }
        let next_base = (slice + 1) * pi.precincts_per_slice;
        let next_lines = pi.lines_per_slice(slice + 1);
        for line in 0..next_lines.min(2) {
            transform_precinct_row(instance, common, scratch, next_base + line, image);
        }
    }

    Ok(slice_size)
}

/// Recompute the seam rows of `slice` in the final stage. Used when
/// the universal stage could not overlap slices itself; a no-op for
/// per-precinct (`decom_v == 0`) streams and for the first slice of
/// tall slices.
pub(crate) fn decode_final_slice_overlap(
    instance: &DecoderInstance, common: &DecoderCommon, scratch: &mut WorkerScratch, slice: u32
) -> Result<(), DecoderError> {
    let pi = &common.pi;
    if (slice == 0 && pi.precincts_per_slice > 2) || pi.decom_v == 0 {
        return Ok(());
    }
    let image = instance.image.as_ref().ok_or(DecoderError::Internal)?;
    let base = slice * pi.precincts_per_slice;

    prime_precinct_row(instance, common, scratch, base);
    for line in 0..pi.lines_per_slice(slice).min(2) {
        transform_precinct_row(instance, common, scratch, base + line, image);
    }
    Ok(())
}

/// The full-frame final pass for colour-transformed streams: wavelet
/// synthesis into 32-bit planes, inverse colour transform, inverse NLT
/// into the output image.
pub(crate) fn decode_final_cpih(
    instance: &DecoderInstance, common: &DecoderCommon, scratch: &mut WorkerScratch,
    planes: &mut [Vec<i32>]
) -> Result<(), DecoderError> {
    let pi = &common.pi;
    let layout = &common.layout;
    let image = instance.image.as_ref().ok_or(DecoderError::Internal)?;

    for (c, synth) in scratch.synth.iter_mut().enumerate() {
        synth.reset(instance.dyn_hdr.fq);
        let comp_width = pi.components[c].width as usize;
        let plane = &mut planes[c];

        for row in 0..pi.precincts_line_num {
            // every slice has completed; shared reads are safe
            let cur_region = unsafe {
                instance
                    .coeffs
                    .region(row as usize * layout.line_size, layout.line_size)
            };
            let prev_region = (row > 0).then(|| unsafe {
                instance
                    .coeffs
                    .region((row as usize - 1) * layout.line_size, layout.line_size)
            });
            let cur = band_lines(cur_region, layout, c);
            let prev = prev_region.map(|region| band_lines(region, layout, c));
            synth.step(row, &cur, prev.as_ref(), &mut |line, data| {
                let start = line as usize * comp_width;
                plane[start..start + data.len()].copy_from_slice(data);
            });
        }
    }

    mct_inverse_transform(planes, &common.hdr, &instance.dyn_hdr)?;

    let depth = common.hdr.bit_depth[0];
    for (c, plane) in planes.iter().enumerate().take(pi.comps_num as usize) {
        let comp = &pi.components[c];
        let width = comp.width as usize;
        for line in 0..comp.height {
            let row = &plane[line as usize * width..(line as usize + 1) * width];
            // the final stage is the sole writer at this point
            unsafe {
                write_output_line(image, &instance.dyn_hdr, depth, c, line, row);
            }
        }
    }
    Ok(())
}
