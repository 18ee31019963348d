/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Per-precinct entropy decoding.
//!
//! A precinct is a 5-byte header, a 2-bit coding mode per existing
//! band, and a sequence of packets. Each packet carries an optional
//! significance sub-packet, a GCLI sub-packet (raw nibbles or VLC
//! residuals against zero or vertical prediction), the coefficient
//! data sub-packet and, when `Fs = 1`, a trailing sign sub-packet.
//!
//! Byte accounting is exact: a running bit budget is decremented for
//! every read and every sub-packet is compared against its declared
//! length. Shorter-than-declared sub-packets are skipped with a
//! warning; longer ones, or a negative budget, fail the precinct.

use log::warn;

use jxs_core::bitstream::BitReader;

use crate::errors::DecoderError;
use crate::headers::PictureHeaderDynamic;
use crate::markers::{
    GROUP_SIZE, PACKET_HEADER_LONG_SIZE_BYTES, PACKET_HEADER_SHORT_SIZE_BYTES,
    PRECINCT_HEADER_SIZE_BYTES, PRECINCT_MAX_BYTES_SIZE, SIGNIFICANCE_GROUP_SIZE, SIGN_BIT_POSITION
};
use crate::pi::Pi;
use crate::precinct::PrecinctState;
use crate::vlc::{map_residual_to_delta, VlcReader};

/// Band coding modes from the precinct header.
const MODE_VERTICAL_PRED: u8 = 1;
const MODE_SIGNIFICANCE: u8 = 2;
const MODE_INVALID: u8 = 0xFF;

const MAGNITUDE_MASK: u16 = (1 << SIGN_BIT_POSITION) - 1;

struct PacketHeader {
    raw_mode: bool,
    data_len: u32,
    gcli_len: u32,
    sign_len: u32
}

fn get_packet_header(
    reader: &mut BitReader, long_header: bool
) -> Result<PacketHeader, DecoderError> {
    let raw_mode = reader.read_bits(1)? != 0;
    let (data_len, gcli_len, sign_len);
    if long_header {
        data_len = reader.read_bits(20)?;
        gcli_len = reader.read_bits(20)?;
        sign_len = reader.read_bits(15)?;
    } else {
        data_len = reader.read_bits(15)?;
        gcli_len = reader.read_bits(13)?;
        sign_len = reader.read_bits(11)?;
    }
    Ok(PacketHeader {
        raw_mode,
        data_len,
        gcli_len,
        sign_len
    })
}

/// Read raw 4-bit GCLI values for one band line.
fn unpack_raw_gclis(reader: &mut BitReader, gclis: &mut [u8]) -> Result<(), DecoderError> {
    for gcli in gclis {
        *gcli = reader.read_nibble_aligned()?;
    }
    Ok(())
}

/// Zero-prediction GCLI decode; with `significances` present, a set
/// flag fills its whole group with the threshold instead of decoding.
fn unpack_pred_zero_gclis(
    reader: &mut BitReader, gclis: &mut [u8], significances: Option<&[u8]>, gtli: u8,
    bits_left: &mut i64
) -> Result<(), DecoderError> {
    let mut vlc = VlcReader::new(reader, (*bits_left).max(0) as u32);
    for (group_idx, chunk) in gclis.chunks_mut(SIGNIFICANCE_GROUP_SIZE).enumerate() {
        if let Some(flags) = significances {
            if flags[group_idx] != 0 {
                chunk.fill(gtli);
                continue;
            }
        }
        for gcli in chunk {
            let res = vlc.next_value()?;
            *gcli = (u32::from(gtli) + res).min(0xFF) as u8;
        }
    }
    *bits_left -= i64::from(vlc.finish(reader)?);
    Ok(())
}

/// Vertical-prediction GCLI decode against the line above.
#[allow(clippy::too_many_arguments)]
fn unpack_vertical_pred_gclis(
    reader: &mut BitReader, gclis: &mut [u8], gclis_top: &[u8], significances: Option<&[u8]>,
    gtli: u8, gtli_top: u8, run_mode: u8, bits_left: &mut i64
) -> Result<(), DecoderError> {
    let t = gtli_top.max(gtli);
    let mut vlc = VlcReader::new(reader, (*bits_left).max(0) as u32);

    for (group_idx, chunk) in gclis.chunks_mut(SIGNIFICANCE_GROUP_SIZE).enumerate() {
        let top_chunk = &gclis_top[group_idx * SIGNIFICANCE_GROUP_SIZE..];
        let insignificant = significances.is_some_and(|flags| flags[group_idx] != 0);

        if insignificant {
            if run_mode != 0 {
                chunk.fill(gtli);
            } else {
                for (gcli, &top) in chunk.iter_mut().zip(top_chunk) {
                    *gcli = top.max(t);
                }
            }
            continue;
        }
        for (gcli, &top) in chunk.iter_mut().zip(top_chunk) {
            let m_top = i32::from(top.max(t));
            let x = vlc.next_value()?;
            let threshold = (m_top - i32::from(gtli)).max(0);
            let delta = map_residual_to_delta(x, threshold);
            *gcli = (m_top + delta).clamp(0, 0xFF) as u8;
        }
    }
    *bits_left -= i64::from(vlc.finish(reader)?);
    Ok(())
}

/// Unpack the magnitude nibbles of one code group.
///
/// Nibbles are MSB-plane first, one bit per coefficient; the
/// accumulated value is shifted up by the truncation threshold.
fn unpack_data_single_group(
    reader: &mut BitReader, buf: &mut [u16; GROUP_SIZE], bitplanes: i32, gtli: u8
) -> Result<(), DecoderError> {
    let mut tmp = [0_u32; GROUP_SIZE];
    for _ in 0..bitplanes - 1 {
        let val = u32::from(reader.read_nibble_aligned()?);
        tmp[3] = (tmp[3] | (val & 1)) << 1;
        tmp[2] = (tmp[2] | (val & 2)) << 1;
        tmp[1] = (tmp[1] | (val & 4)) << 1;
        tmp[0] = (tmp[0] | (val & 8)) << 1;
    }
    let val = u32::from(reader.read_nibble_aligned()?);
    buf[3] = (((tmp[3] | (val & 1)) << gtli) as u16) & MAGNITUDE_MASK;
    buf[2] = ((((tmp[2] | (val & 2)) >> 1) << gtli) as u16) & MAGNITUDE_MASK;
    buf[1] = ((((tmp[1] | (val & 4)) >> 2) << gtli) as u16) & MAGNITUDE_MASK;
    buf[0] = ((((tmp[0] | (val & 8)) >> 3) << gtli) as u16) & MAGNITUDE_MASK;
    Ok(())
}

/// Unpack the sign nibble leading an active group when signs are
/// interleaved.
#[inline]
fn sign_nibble(val: u16) -> [u16; GROUP_SIZE] {
    [
        ((val >> 3) & 1) << SIGN_BIT_POSITION,
        ((val >> 2) & 1) << SIGN_BIT_POSITION,
        ((val >> 1) & 1) << SIGN_BIT_POSITION,
        (val & 1) << SIGN_BIT_POSITION
    ]
}

/// Unpack the data sub-packet of one band line into `coeffs`.
///
/// With `sign_packed == false` each active group leads with a sign
/// nibble; otherwise signs arrive later in the sign sub-packet and the
/// count of padding sign bits of a trailing partial group is returned
/// through `leftover_signs_num`.
#[allow(clippy::too_many_arguments)]
fn unpack_data(
    reader: &mut BitReader, coeffs: &mut [u16], width: usize, gclis: &[u8], gtli: u8,
    sign_packed: bool, leftover_signs_num: &mut u8, bits_left: &mut i64
) -> Result<(), DecoderError> {
    let group_num = width / GROUP_SIZE;
    let leftover = width % GROUP_SIZE;

    for group in 0..group_num {
        let base = group * GROUP_SIZE;
        let mut group_buf = [0_u16; GROUP_SIZE];
        let bitplanes = i32::from(gclis[group]) - i32::from(gtli);
        if bitplanes > 0 {
            let nibbles = i64::from(bitplanes as u32) + i64::from(!sign_packed);
            *bits_left -= 4 * nibbles;
            if *bits_left < 0 {
                return Err(DecoderError::invalid("data sub-packet exceeds precinct size"));
            }
            if sign_packed {
                unpack_data_single_group(reader, &mut group_buf, bitplanes, gtli)?;
            } else {
                let signs = sign_nibble(u16::from(reader.read_nibble_aligned()?));
                unpack_data_single_group(reader, &mut group_buf, bitplanes, gtli)?;
                for (dst, sign) in group_buf.iter_mut().zip(signs) {
                    *dst |= sign;
                }
            }
        }
        coeffs[base..base + GROUP_SIZE].copy_from_slice(&group_buf);
    }

    if leftover != 0 {
        let base = group_num * GROUP_SIZE;
        let mut group_buf = [0_u16; GROUP_SIZE];
        let bitplanes = i32::from(gclis[group_num]) - i32::from(gtli);
        if bitplanes > 0 {
            let nibbles = i64::from(bitplanes as u32) + i64::from(!sign_packed);
            *bits_left -= 4 * nibbles;
            if *bits_left < 0 {
                return Err(DecoderError::invalid("data sub-packet exceeds precinct size"));
            }
            if sign_packed {
                unpack_data_single_group(reader, &mut group_buf, bitplanes, gtli)?;
            } else {
                let signs = sign_nibble(u16::from(reader.read_nibble_aligned()?));
                unpack_data_single_group(reader, &mut group_buf, bitplanes, gtli)?;
                for (dst, sign) in group_buf.iter_mut().zip(signs) {
                    *dst |= sign;
                }
            }
        }
        if sign_packed {
            // the trailing pad coefficients of a partial group still
            // carry sign bits in the sign sub-packet
            *leftover_signs_num = group_buf[leftover..]
                .iter()
                .map(|&v| u8::from(v != 0))
                .sum();
        }
        coeffs[base..base + leftover].copy_from_slice(&group_buf[..leftover]);
    }
    Ok(())
}

/// Unpack the sign sub-packet of one band line: one bit per non-zero
/// coefficient in scan order, plus the skipped padding bits of a
/// trailing partial group.
fn unpack_sign(
    reader: &mut BitReader, coeffs: &mut [u16], width: usize, leftover_signs_num: u8,
    bits_left: &mut i64
) -> Result<(), DecoderError> {
    for coeff in coeffs[..width].iter_mut() {
        if *coeff != 0 {
            *bits_left -= 1;
            if *bits_left < 0 {
                return Err(DecoderError::invalid("sign sub-packet exceeds precinct size"));
            }
            let sign = u16::from(reader.read_bit()?);
            *coeff |= sign << SIGN_BIT_POSITION;
        }
    }
    if leftover_signs_num != 0 && width % GROUP_SIZE != 0 {
        *bits_left -= i64::from(leftover_signs_num);
        if *bits_left < 0 {
            return Err(DecoderError::invalid("sign sub-packet exceeds precinct size"));
        }
        reader.skip_bits(u32::from(leftover_signs_num))?;
    }
    Ok(())
}

/// Skip the gap between consumed bytes and a sub-packet's declared
/// length; consuming more than declared is fatal.
fn reconcile_subpacket(
    reader: &mut BitReader, consumed: usize, declared: u32, what: &'static str
) -> Result<(), DecoderError> {
    if consumed == declared as usize {
        return Ok(());
    }
    let leftover = declared as i64 - consumed as i64;
    if leftover > 0 && reader.has_bytes(leftover as usize) {
        warn!("({what}) sub-packet skipped={leftover} bytes");
        reader.skip_padding(leftover as usize)?;
        Ok(())
    } else {
        warn!("({what}) corruption detected, unpacked={consumed}, expected={declared}");
        Err(DecoderError::invalid("sub-packet length mismatch"))
    }
}

/// Decode one precinct.
///
/// `coeffs` is the coefficient region of this precinct row; each
/// band's `coeff_base` already points at this precinct's column. On
/// success the cursor sits exactly `Lprc` bytes past the precinct
/// header.
pub fn unpack_precinct(
    reader: &mut BitReader, prec: &mut PrecinctState, prec_top: Option<&PrecinctState>,
    coeffs: &mut [u16], pi: &Pi, dyn_hdr: &PictureHeaderDynamic
) -> Result<(), DecoderError> {
    debug_assert_eq!(pi.coeff_group_size as usize, GROUP_SIZE);
    debug_assert_eq!(pi.significance_group_size as usize, SIGNIFICANCE_GROUP_SIZE);

    let mode_bytes = (pi.bands_num_all as usize * 2 + 7) / 8;
    if !reader.has_bytes(PRECINCT_HEADER_SIZE_BYTES + mode_bytes) {
        return Err(DecoderError::BitstreamTooShort);
    }

    let precinct_len_bytes = reader.read_u24()?;
    if precinct_len_bytes > PRECINCT_MAX_BYTES_SIZE {
        return Err(DecoderError::invalid("oversized precinct"));
    }
    let quantization = reader.read_u8()?;
    let refinement = reader.read_u8()?;
    let long_header = dyn_hdr.lh != 0 || !pi.use_short_header;

    let mut coding_modes = [MODE_INVALID; crate::headers::MAX_BANDS_NUM];
    for band in 0..pi.bands_num_all as usize {
        if pi.global_bands[band].is_none() {
            continue;
        }
        coding_modes[band] = reader.read_bits(2)? as u8;
        if prec_top.is_none() && coding_modes[band] & MODE_VERTICAL_PRED != 0 {
            warn!("First precinct in a slice cannot use vertical prediction");
            return Err(DecoderError::invalid("vertical prediction without a top precinct"));
        }
    }
    reader.align_to_next_byte();

    if !reader.has_bytes(precinct_len_bytes as usize) {
        return Err(DecoderError::BitstreamTooShort);
    }
    let mut bits_left = i64::from(precinct_len_bytes) * 8;
    let byte_pos_precinct = reader.used_bytes();

    prec.compute_truncation(pi, quantization, refinement);

    let p_info = pi.precinct_info(prec.variant);
    let packet_header_bits = if long_header {
        PACKET_HEADER_LONG_SIZE_BYTES as i64 * 8
    } else {
        PACKET_HEADER_SHORT_SIZE_BYTES as i64 * 8
    };

    for packet in &pi.packets {
        let ypos = packet.line_idx as usize;

        // a packet only exists if at least one of its bands still has
        // a line at this position; empty packets happen in the last
        // precinct row
        let mut pkt_header = None;
        for slot in packet.band_start..packet.band_stop {
            let Some(gb) = pi.global_bands[slot as usize] else {
                continue;
            };
            if (ypos as u32) < p_info.b_info[usize::from(gb.comp)][usize::from(gb.band)].height {
                bits_left -= packet_header_bits;
                if bits_left < 0 {
                    return Err(DecoderError::invalid("packet header exceeds precinct size"));
                }
                pkt_header = Some(get_packet_header(reader, long_header)?);
                break;
            }
        }
        let Some(pkt_header) = pkt_header else {
            continue;
        };

        let declared_bits = i64::from(pkt_header.data_len)
            + i64::from(pkt_header.gcli_len)
            + i64::from(pkt_header.sign_len);
        if bits_left < declared_bits * 8 {
            return Err(DecoderError::invalid("packet longer than precinct"));
        }

        let mut gcli_start = reader.used_bytes();

        if pkt_header.raw_mode {
            for slot in packet.band_start..packet.band_stop {
                let Some(gb) = pi.global_bands[slot as usize] else {
                    continue;
                };
                let (c, b) = (usize::from(gb.comp), usize::from(gb.band));
                let info = &p_info.b_info[c][b];
                if ypos as u32 >= info.height {
                    continue;
                }
                let gcli_w = info.gcli_width as usize;
                bits_left -= gcli_w as i64 * 4;
                if bits_left < 0 {
                    return Err(DecoderError::invalid("raw GCLI exceeds precinct size"));
                }
                let band = &mut prec.bands[c][b];
                unpack_raw_gclis(
                    reader,
                    &mut band.gcli_data[ypos * gcli_w..(ypos + 1) * gcli_w]
                )?;
            }
        } else {
            // significance sub-packet first, for every flagged band
            for slot in packet.band_start..packet.band_stop {
                let Some(gb) = pi.global_bands[slot as usize] else {
                    continue;
                };
                let (c, b) = (usize::from(gb.comp), usize::from(gb.band));
                let info = &p_info.b_info[c][b];
                if ypos as u32 >= info.height {
                    continue;
                }
                if coding_modes[slot as usize] & MODE_SIGNIFICANCE != 0 {
                    let sig_w = info.significance_width as usize;
                    bits_left -= sig_w as i64;
                    if bits_left < 0 {
                        return Err(DecoderError::invalid(
                            "significance sub-packet exceeds precinct size"
                        ));
                    }
                    let band = &mut prec.bands[c][b];
                    let flags = &mut band.significance[ypos * sig_w..(ypos + 1) * sig_w];
                    for flag in flags {
                        *flag = reader.read_bit()?;
                    }
                }
            }
            reader.align_to_next_byte();
            bits_left -= bits_left & 7;
            gcli_start = reader.used_bytes();

            for slot in packet.band_start..packet.band_stop {
                let Some(gb) = pi.global_bands[slot as usize] else {
                    continue;
                };
                let (c, b) = (usize::from(gb.comp), usize::from(gb.band));
                let info = &p_info.b_info[c][b];
                if ypos as u32 >= info.height {
                    continue;
                }
                let mode = coding_modes[slot as usize];
                let gcli_w = info.gcli_width as usize;
                let sig_w = info.significance_width as usize;
                let with_significance = mode & MODE_SIGNIFICANCE != 0;

                if mode & MODE_VERTICAL_PRED != 0 {
                    // mode validation guarantees a top precinct exists
                    let top = prec_top.ok_or(DecoderError::Internal)?;
                    let band_max_lines = pi.components[c].bands[b].height_lines_num as usize;
                    let band = &mut prec.bands[c][b];
                    let top_band = &top.bands[c][b];
                    let gtli = band.gtli;
                    let gtli_top = if ypos == 0 { top_band.gtli } else { gtli };
                    let significances = with_significance
                        .then(|| &band.significance[ypos * sig_w..(ypos + 1) * sig_w]);

                    let result = if ypos == 0 {
                        let gclis = &mut band.gcli_data[..gcli_w];
                        let gclis_top = &top_band.gcli_data
                            [(band_max_lines - 1) * gcli_w..band_max_lines * gcli_w];
                        unpack_vertical_pred_gclis(
                            reader,
                            gclis,
                            gclis_top,
                            significances,
                            gtli,
                            gtli_top,
                            dyn_hdr.rm,
                            &mut bits_left
                        )
                    } else {
                        let (top_part, cur_part) =
                            band.gcli_data.split_at_mut(ypos * gcli_w);
                        unpack_vertical_pred_gclis(
                            reader,
                            &mut cur_part[..gcli_w],
                            &top_part[(ypos - 1) * gcli_w..],
                            significances,
                            gtli,
                            gtli_top,
                            dyn_hdr.rm,
                            &mut bits_left
                        )
                    };
                    result.map_err(|e| {
                        warn!("Invalid variable length coding, vertical prediction");
                        e
                    })?;
                } else {
                    let band = &mut prec.bands[c][b];
                    let gtli = band.gtli;
                    let significances = with_significance
                        .then(|| &band.significance[ypos * sig_w..(ypos + 1) * sig_w]);
                    let gclis = &mut band.gcli_data[ypos * gcli_w..(ypos + 1) * gcli_w];
                    unpack_pred_zero_gclis(reader, gclis, significances, gtli, &mut bits_left)
                        .map_err(|e| {
                            warn!("Invalid variable length coding, zero prediction");
                            e
                        })?;
                }
            }
        }
        reader.align_to_next_byte();
        bits_left -= bits_left & 7;

        reconcile_subpacket(
            reader,
            reader.used_bytes() - gcli_start,
            pkt_header.gcli_len,
            "GCLI"
        )?;

        // data sub-packet
        let data_start = reader.used_bytes();
        for slot in packet.band_start..packet.band_stop {
            let Some(gb) = pi.global_bands[slot as usize] else {
                continue;
            };
            let (c, b) = (usize::from(gb.comp), usize::from(gb.band));
            let info = &p_info.b_info[c][b];
            if ypos as u32 >= info.height {
                continue;
            }
            let band_full_width = pi.components[c].bands[b].width as usize;
            let gcli_w = info.gcli_width as usize;
            let band = &mut prec.bands[c][b];
            let base = band.coeff_base + ypos * band_full_width;
            let gclis = &band.gcli_data[ypos * gcli_w..(ypos + 1) * gcli_w];
            unpack_data(
                reader,
                &mut coeffs[base..],
                info.width as usize,
                gclis,
                band.gtli,
                dyn_hdr.fs != 0,
                &mut band.leftover_signs[ypos],
                &mut bits_left
            )
            .map_err(|e| {
                warn!("Invalid data sub-packet");
                e
            })?;
        }
        reader.align_to_next_byte();
        bits_left -= bits_left & 7;

        reconcile_subpacket(
            reader,
            reader.used_bytes() - data_start,
            pkt_header.data_len,
            "DATA"
        )?;

        // sign sub-packet
        if dyn_hdr.fs != 0 {
            let sign_start = reader.used_bytes();
            for slot in packet.band_start..packet.band_stop {
                let Some(gb) = pi.global_bands[slot as usize] else {
                    continue;
                };
                let (c, b) = (usize::from(gb.comp), usize::from(gb.band));
                let info = &p_info.b_info[c][b];
                if ypos as u32 >= info.height {
                    continue;
                }
                let band_full_width = pi.components[c].bands[b].width as usize;
                let band = &prec.bands[c][b];
                let base = band.coeff_base + ypos * band_full_width;
                unpack_sign(
                    reader,
                    &mut coeffs[base..],
                    info.width as usize,
                    band.leftover_signs[ypos],
                    &mut bits_left
                )
                .map_err(|e| {
                    warn!("Invalid sign sub-packet");
                    e
                })?;
            }
            reader.align_to_next_byte();
            bits_left -= bits_left & 7;

            reconcile_subpacket(
                reader,
                reader.used_bytes() - sign_start,
                pkt_header.sign_len,
                "SIGN"
            )?;
        }
    }

    let consumed = reader.used_bytes() - byte_pos_precinct;
    let padding = precinct_len_bytes as i64 - consumed as i64;
    if padding < 0 {
        warn!(
            "Precinct corruption detected, expected at most {precinct_len_bytes} bytes, \
             consumed {consumed}"
        );
        return Err(DecoderError::invalid("precinct longer than declared"));
    }
    reader.skip_padding(padding as usize)?;
    Ok(())
}
