/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Codestream header parsing.
//!
//! The header is everything between `SOC` and the first `SLH` marker:
//! capabilities, the picture header, the component table, the weights
//! table and the optional NLT/CWD/CTS/CRG/COM segments. Parsed values
//! split into two structures: [`PictureHeaderConst`] holds quantities
//! that must not change between frames of one stream (compared on every
//! frame to detect configuration changes) and [`PictureHeaderDynamic`]
//! holds per-frame quantities.

use log::{error, warn};

use jxs_core::bitstream::BitReader;
use jxs_core::image::MAX_COMPONENTS;

use crate::errors::DecoderError;
use crate::markers;

/// Maximum number of wavelet bands over all components.
///
/// 8 components at 5 horizontal + 2 vertical decompositions:
/// `8 * (5 + 2 * 2 + 1)`.
pub const MAX_BANDS_NUM: usize = 80;

/// Capability bits the CAP marker may carry.
pub const MAX_CAPABILITY_BITS: usize = 128;

/// Stream invariants; a change between frames is a `ConfigChange`.
#[derive(Clone, PartialEq, Eq)]
pub struct PictureHeaderConst {
    pub width:                   u16,
    pub height:                  u16,
    /// Precinct column width `Cw` in multiples of `2^decom_h` samples;
    /// 0 means one precinct spans the full width.
    pub precinct_width:          u16,
    /// Slice height in precincts.
    pub hsl:                     u16,
    pub comps_num:               u8,
    pub bit_depth:               [u8; MAX_COMPONENTS],
    pub sx:                      [u8; MAX_COMPONENTS],
    pub sy:                      [u8; MAX_COMPONENTS],
    pub decom_h:                 u8,
    pub decom_v:                 u8,
    /// Number of trailing untransformed ("raw") components.
    pub sd:                      u8,
    /// Colour decorrelation mode: 0 none, 1 reversible RCT, 3
    /// Star-Tetrix.
    pub cpih:                    u8,
    pub coeff_group_size:        u8,
    pub significance_group_size: u8,
    pub ppih:                    u16,
    pub plev:                    u16,
    pub capability_bits:         u16,
    pub capability:              [u8; MAX_CAPABILITY_BITS],
    pub gain:                    [u8; MAX_BANDS_NUM],
    pub priority:                [u8; MAX_BANDS_NUM],
    pub(crate) seen_cap:         bool,
    pub(crate) seen_pih:         bool,
    pub(crate) seen_cdt:         bool,
    pub(crate) seen_wgt:         bool
}

impl Default for PictureHeaderConst {
    fn default() -> Self {
        PictureHeaderConst {
            width:                   0,
            height:                  0,
            precinct_width:          0,
            hsl:                     0,
            comps_num:               0,
            bit_depth:               [0; MAX_COMPONENTS],
            sx:                      [0; MAX_COMPONENTS],
            sy:                      [0; MAX_COMPONENTS],
            decom_h:                 0,
            decom_v:                 0,
            sd:                      0,
            cpih:                    0,
            coeff_group_size:        0,
            significance_group_size: 0,
            ppih:                    0,
            plev:                    0,
            capability_bits:         0,
            capability:              [0; MAX_CAPABILITY_BITS],
            gain:                    [0; MAX_BANDS_NUM],
            priority:                [0; MAX_BANDS_NUM],
            seen_cap:                false,
            seen_pih:                false,
            seen_cdt:                false,
            seen_wgt:                false
        }
    }
}

/// Per-frame header quantities.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PictureHeaderDynamic {
    /// Declared codestream length from SOC to EOC inclusive; 0 for
    /// variable-bitrate streams.
    pub lcod:       u32,
    /// Nominal bit precision of the wavelet domain.
    pub bw:         u8,
    /// Fractional quantization bits; 0, 6 or 8.
    pub fq:         u8,
    pub br:         u8,
    pub fslc:       u8,
    pub ppoc:       u8,
    /// Force long packet headers.
    pub lh:         u8,
    pub rl:         u8,
    /// Inverse quantization: 0 deadzone, 1 uniform.
    pub qpih:       u8,
    /// Sign handling: 0 interleaved with data, 1 separate sub-packet.
    pub fs:         u8,
    /// Run mode for insignificant vertical-prediction groups.
    pub rm:         u8,
    /// Nonlinearity type; only 0 (linear) is decodable.
    pub tnlt:       u8,
    pub tnlt_sigma: u8,
    pub tnlt_alpha: u16,
    pub tnlt_t1:    u32,
    pub tnlt_t2:    u32,
    pub tnlt_e:     u8,
    /// Colour transform variant from CTS.
    pub cf:         u8,
    pub cf_e1:      u8,
    pub cf_e2:      u8,
    pub xcrg:       [u16; MAX_COMPONENTS],
    pub ycrg:       [u16; MAX_COMPONENTS],
    pub(crate) seen_cts: bool,
    pub(crate) seen_crg: bool
}

fn get_capabilities(
    reader: &mut BitReader, hdr: &mut PictureHeaderConst
) -> Result<(), DecoderError> {
    if hdr.seen_cap {
        error!("Unexpected duplicate capabilities marker");
        return Err(DecoderError::invalid("duplicate CAP marker"));
    }
    hdr.seen_cap = true;

    if !reader.has_bytes(4) {
        return Err(DecoderError::BitstreamTooShort);
    }
    let marker = reader.read_u16()?;
    if marker != markers::CAP {
        error!("Capabilities marker not found");
        return Err(DecoderError::invalid("CAP marker not found"));
    }

    let size_bytes = reader.read_u16()?.wrapping_sub(2);
    let bits = usize::from(size_bytes) * 8;
    if bits > MAX_CAPABILITY_BITS {
        return Err(DecoderError::invalid("oversized CAP marker"));
    }
    if !reader.has_bytes(usize::from(size_bytes)) {
        return Err(DecoderError::BitstreamTooShort);
    }
    hdr.capability_bits = size_bytes * 8;
    for i in 0..bits {
        hdr.capability[i] = reader.read_bit()?;
    }
    reader.align_to_next_byte();
    Ok(())
}

fn get_picture_header(
    reader: &mut BitReader, hdr: &mut PictureHeaderConst, dyn_hdr: &mut PictureHeaderDynamic
) -> Result<(), DecoderError> {
    if !hdr.seen_cap {
        error!("Capabilities marker not found before picture header");
        return Err(DecoderError::invalid("CAP marker missing"));
    }
    if hdr.seen_pih {
        error!("Unexpected duplicate picture header");
        return Err(DecoderError::invalid("duplicate PIH marker"));
    }
    hdr.seen_pih = true;

    if !reader.has_bytes(usize::from(markers::PICTURE_HEADER_SIZE_BYTES) + 2) {
        return Err(DecoderError::BitstreamTooShort);
    }
    let marker = reader.read_u16()?;
    if marker != markers::PIH {
        error!("Picture header marker not found");
        return Err(DecoderError::invalid("PIH marker not found"));
    }
    let size_bytes = reader.read_u16()?;
    if size_bytes != markers::PICTURE_HEADER_SIZE_BYTES {
        error!("Picture header size invalid, expected=26, read={size_bytes}");
        return Err(DecoderError::invalid("bad PIH size"));
    }

    dyn_hdr.lcod = reader.read_u32()?;
    hdr.ppih = reader.read_u16()?;
    hdr.plev = reader.read_u16()?;
    hdr.width = reader.read_u16()?;
    hdr.height = reader.read_u16()?;
    hdr.precinct_width = reader.read_u16()?;
    hdr.hsl = reader.read_u16()?;
    if hdr.hsl < 1 {
        error!("Invalid slice height in precincts, read={}", hdr.hsl);
        return Err(DecoderError::invalid("Hsl must be at least 1"));
    }
    if hdr.width == 0 || hdr.height == 0 {
        return Err(DecoderError::invalid("empty image"));
    }

    hdr.comps_num = reader.read_u8()?;
    if hdr.comps_num < 1 || usize::from(hdr.comps_num) > MAX_COMPONENTS {
        error!("Invalid number of components, expected 1-8, read={}", hdr.comps_num);
        return Err(DecoderError::invalid("component count out of range"));
    }

    hdr.coeff_group_size = reader.read_u8()?;
    if hdr.coeff_group_size != markers::GROUP_SIZE as u8 {
        error!("Invalid coefficient group size, expected 4, read={}", hdr.coeff_group_size);
        return Err(DecoderError::invalid("coefficient group size must be 4"));
    }
    hdr.significance_group_size = reader.read_u8()?;
    if hdr.significance_group_size != markers::SIGNIFICANCE_GROUP_SIZE as u8 {
        error!(
            "Invalid significance group size, expected 8, read={}",
            hdr.significance_group_size
        );
        return Err(DecoderError::invalid("significance group size must be 8"));
    }

    dyn_hdr.bw = reader.read_u8()?;

    let byte = reader.read_u8()?;
    dyn_hdr.fq = byte >> 4;
    dyn_hdr.br = byte & 0xF;
    let fq_ok = dyn_hdr.fq == 0
        || (dyn_hdr.bw == 18 && dyn_hdr.fq == 6)
        || (dyn_hdr.bw == 20 && dyn_hdr.fq == 8);
    if !fq_ok {
        return Err(DecoderError::invalid("unsupported (Bw, Fq) pair"));
    }
    if dyn_hdr.br != 4 {
        error!("Invalid Br, expected 4, read={}", dyn_hdr.br);
        return Err(DecoderError::invalid("Br must be 4"));
    }

    // 1 + 3 + 4 bits: Fslc, Ppoc, Cpih
    let byte = reader.read_u8()?;
    dyn_hdr.fslc = byte >> 7;
    if dyn_hdr.fslc != 0 {
        return Err(DecoderError::invalid("unsupported slice coding mode"));
    }
    dyn_hdr.ppoc = (byte >> 4) & 0x7;
    if dyn_hdr.ppoc != 0 {
        return Err(DecoderError::invalid("unsupported progression order"));
    }
    hdr.cpih = byte & 0xF;
    if hdr.cpih != 0 && hdr.cpih != 1 && hdr.cpih != 3 {
        return Err(DecoderError::invalid("unsupported colour transform"));
    }

    let byte = reader.read_u8()?;
    hdr.decom_h = byte >> 4;
    hdr.decom_v = byte & 0xF;
    if hdr.decom_h > 5 || hdr.decom_v > 2 || hdr.decom_v > hdr.decom_h {
        return Err(DecoderError::invalid("decomposition depth out of range"));
    }

    // 2 + 2 + 2 + 2 bits: (Lh, Rl), Qpih, Fs, Rm
    let byte = reader.read_u8()?;
    dyn_hdr.lh = (byte >> 7) & 1;
    dyn_hdr.rl = (byte >> 6) & 1;
    dyn_hdr.qpih = (byte >> 4) & 0x3;
    if dyn_hdr.qpih > 1 {
        return Err(DecoderError::invalid("unsupported quantization type"));
    }
    dyn_hdr.fs = (byte >> 2) & 0x3;
    if dyn_hdr.fs > 1 {
        return Err(DecoderError::invalid("unsupported sign handling"));
    }
    dyn_hdr.rm = byte & 0x3;
    if dyn_hdr.rm > 1 {
        return Err(DecoderError::invalid("unsupported run mode"));
    }
    Ok(())
}

fn get_component_table(
    reader: &mut BitReader, hdr: &mut PictureHeaderConst
) -> Result<(), DecoderError> {
    if !hdr.seen_cap || !hdr.seen_pih {
        error!("CDT marker before CAP/PIH");
        return Err(DecoderError::invalid("CDT before mandatory markers"));
    }
    if hdr.seen_cdt {
        error!("Unexpected duplicate component table");
        return Err(DecoderError::invalid("duplicate CDT marker"));
    }
    hdr.seen_cdt = true;

    let comps = usize::from(hdr.comps_num);
    if !reader.has_bytes(comps * 2 + 2) {
        return Err(DecoderError::BitstreamTooShort);
    }
    let size_bytes = reader.read_u16()?.wrapping_sub(2);
    if usize::from(size_bytes) != 2 * comps {
        return Err(DecoderError::invalid("bad CDT size"));
    }

    for c in 0..comps {
        hdr.bit_depth[c] = reader.read_u8()?;
        if hdr.bit_depth[c] < 8 || hdr.bit_depth[c] > 16 {
            return Err(DecoderError::invalid("bit depth out of range"));
        }
        let byte = reader.read_u8()?;
        hdr.sx[c] = byte >> 4;
        hdr.sy[c] = byte & 0xF;
    }
    Ok(())
}

fn get_weights_table(
    reader: &mut BitReader, hdr: &mut PictureHeaderConst
) -> Result<(), DecoderError> {
    if !hdr.seen_cap || !hdr.seen_pih {
        error!("WGT marker before CAP/PIH");
        return Err(DecoderError::invalid("WGT before mandatory markers"));
    }
    if hdr.seen_wgt {
        error!("Unexpected duplicate weights table");
        return Err(DecoderError::invalid("duplicate WGT marker"));
    }
    hdr.seen_wgt = true;

    if !reader.has_bytes(2) {
        return Err(DecoderError::BitstreamTooShort);
    }
    let size_bytes = reader.read_u16()?.wrapping_sub(2);
    if size_bytes & 1 != 0 {
        error!("Odd byte count in weights table");
        return Err(DecoderError::invalid("odd WGT size"));
    }
    let bands_exist = usize::from(size_bytes / 2);
    if bands_exist > MAX_BANDS_NUM {
        error!("Too many entries in weights table, max {MAX_BANDS_NUM}");
        return Err(DecoderError::invalid("oversized WGT marker"));
    }
    if !reader.has_bytes(usize::from(size_bytes)) {
        return Err(DecoderError::BitstreamTooShort);
    }
    for b in 0..bands_exist {
        hdr.gain[b] = reader.read_u8()?;
        hdr.priority[b] = reader.read_u8()?;
    }
    Ok(())
}

fn get_nonlinearity(
    reader: &mut BitReader, dyn_hdr: &mut PictureHeaderDynamic
) -> Result<(), DecoderError> {
    if !reader.has_bytes(3) {
        return Err(DecoderError::BitstreamTooShort);
    }
    let _size_bytes = reader.read_u16()?;
    dyn_hdr.tnlt = reader.read_u8()?;
    match dyn_hdr.tnlt {
        1 => {
            if !reader.has_bytes(2) {
                return Err(DecoderError::BitstreamTooShort);
            }
            let val = reader.read_u16()?;
            dyn_hdr.tnlt_sigma = (val >> 15) as u8;
            dyn_hdr.tnlt_alpha = val & 0x7FFF;
        }
        2 => {
            if !reader.has_bytes(9) {
                return Err(DecoderError::BitstreamTooShort);
            }
            dyn_hdr.tnlt_t1 = reader.read_u32()?;
            dyn_hdr.tnlt_t2 = reader.read_u32()?;
            dyn_hdr.tnlt_e = reader.read_u8()?;
        }
        t => {
            error!("Unrecognized nonlinearity type={t}");
            return Err(DecoderError::invalid("unknown NLT type"));
        }
    }
    Ok(())
}

fn get_cwd(reader: &mut BitReader, hdr: &mut PictureHeaderConst) -> Result<(), DecoderError> {
    if !reader.has_bytes(3) {
        return Err(DecoderError::BitstreamTooShort);
    }
    let size_bytes = reader.read_u16()?;
    if size_bytes != 3 {
        return Err(DecoderError::invalid("bad CWD size"));
    }
    hdr.sd = reader.read_u8()?;
    Ok(())
}

fn get_cts(reader: &mut BitReader, dyn_hdr: &mut PictureHeaderDynamic) -> Result<(), DecoderError> {
    if dyn_hdr.seen_cts {
        error!("Unexpected duplicate colour transformation specification");
        return Err(DecoderError::invalid("duplicate CTS marker"));
    }
    dyn_hdr.seen_cts = true;

    if !reader.has_bytes(4) {
        return Err(DecoderError::BitstreamTooShort);
    }
    let size_bytes = reader.read_u16()?;
    if size_bytes != 4 {
        return Err(DecoderError::invalid("bad CTS size"));
    }
    // upper nibble reserved for ISO/IEC purposes
    let byte = reader.read_u8()?;
    dyn_hdr.cf = byte & 0xF;
    let byte = reader.read_u8()?;
    dyn_hdr.cf_e1 = byte >> 4;
    dyn_hdr.cf_e2 = byte & 0xF;
    Ok(())
}

fn get_crg(
    reader: &mut BitReader, hdr: &PictureHeaderConst, dyn_hdr: &mut PictureHeaderDynamic
) -> Result<(), DecoderError> {
    if dyn_hdr.seen_crg {
        error!("Unexpected duplicate component registration marker");
        return Err(DecoderError::invalid("duplicate CRG marker"));
    }
    dyn_hdr.seen_crg = true;

    let comps = usize::from(hdr.comps_num);
    if !reader.has_bytes(2 + comps * 4) {
        return Err(DecoderError::BitstreamTooShort);
    }
    let size_bytes = reader.read_u16()?;
    if usize::from(size_bytes) != 2 + comps * 4 {
        return Err(DecoderError::invalid("bad CRG size"));
    }
    for c in 0..comps {
        dyn_hdr.xcrg[c] = reader.read_u16()?;
        dyn_hdr.ycrg[c] = reader.read_u16()?;
    }
    Ok(())
}

fn get_extension(reader: &mut BitReader) -> Result<(), DecoderError> {
    if !reader.has_bytes(4) {
        return Err(DecoderError::BitstreamTooShort);
    }
    let size_bytes = reader.read_u16()?;
    let _tcom = reader.read_u16()?;
    let payload = usize::from(size_bytes.wrapping_sub(4));
    if !reader.has_bytes(payload) {
        return Err(DecoderError::BitstreamTooShort);
    }
    // user-defined data, parsed and ignored
    reader.skip_padding(payload)?;
    Ok(())
}

/// Parse the full header, leaving the cursor at the first `SLH` marker.
pub fn get_header(
    reader: &mut BitReader, hdr: &mut PictureHeaderConst, dyn_hdr: &mut PictureHeaderDynamic
) -> Result<(), DecoderError> {
    *hdr = PictureHeaderConst::default();
    *dyn_hdr = PictureHeaderDynamic::default();

    if !reader.has_bytes(2) {
        return Err(DecoderError::BitstreamTooShort);
    }
    let marker = reader.read_u16()?;
    if marker != markers::SOC {
        error!("Start of codestream marker not found");
        return Err(DecoderError::invalid("SOC marker not found"));
    }

    get_capabilities(reader, hdr)?;
    get_picture_header(reader, hdr, dyn_hdr)?;

    loop {
        if !reader.has_bytes(2) {
            return Err(DecoderError::BitstreamTooShort);
        }
        let marker = reader.read_u16()?;
        match marker {
            markers::CDT => get_component_table(reader, hdr)?,
            markers::WGT => get_weights_table(reader, hdr)?,
            markers::NLT => get_nonlinearity(reader, dyn_hdr)?,
            markers::CWD => get_cwd(reader, hdr)?,
            markers::CTS => get_cts(reader, dyn_hdr)?,
            markers::CRG => get_crg(reader, hdr, dyn_hdr)?,
            markers::COM => get_extension(reader)?,
            markers::SLH => {
                // leave the slice marker for the slice parser
                reader.rewind_bytes(2);
                return finish_header(hdr, dyn_hdr);
            }
            _ => {
                error!("Unrecognized marker 0x{marker:04X} in header");
                return Err(DecoderError::invalid("unrecognized marker in header"));
            }
        }
    }
}

/// Cross-marker validation once the header is complete.
fn finish_header(
    hdr: &PictureHeaderConst, dyn_hdr: &PictureHeaderDynamic
) -> Result<(), DecoderError> {
    if !hdr.seen_cap || !hdr.seen_pih || !hdr.seen_cdt || !hdr.seen_wgt {
        error!("Mandatory markers not found");
        return Err(DecoderError::invalid("mandatory markers missing"));
    }

    if dyn_hdr.fq == 0 {
        // lossless coding requires one bit depth over all components
        for c in 1..usize::from(hdr.comps_num) {
            if hdr.bit_depth[c] != hdr.bit_depth[0] {
                return Err(DecoderError::invalid("mixed bit depths in lossless stream"));
            }
        }
    }

    if hdr.cpih != 0 {
        for c in 1..usize::from(hdr.comps_num) {
            if hdr.sx[c] != hdr.sx[0] || hdr.sy[c] != hdr.sy[0] {
                error!("Invalid YUV format for the colour transform");
                return Err(DecoderError::invalid(
                    "colour transform requires uniform subsampling"
                ));
            }
        }
    }
    if hdr.cpih == 3 && (!dyn_hdr.seen_cts || !dyn_hdr.seen_crg) {
        error!("CTS/CRG mandatory for Cpih=3 not found");
        return Err(DecoderError::invalid("CTS/CRG markers missing"));
    }
    if hdr.sd >= hdr.comps_num {
        return Err(DecoderError::invalid("more raw components than components"));
    }
    Ok(())
}

/// Parse the slice header, returning the slice index.
pub fn get_slice_header(reader: &mut BitReader) -> Result<u16, DecoderError> {
    if !reader.has_bytes(markers::SLICE_HEADER_SIZE_BYTES) {
        return Err(DecoderError::BitstreamTooShort);
    }
    if reader.read_u16()? != markers::SLH {
        return Err(DecoderError::invalid("SLH marker not found"));
    }
    if reader.read_u16()? != 4 {
        return Err(DecoderError::invalid("bad SLH size"));
    }
    Ok(reader.read_u16()?)
}

/// Consume the end-of-codestream marker.
pub fn get_tail(reader: &mut BitReader) -> Result<(), DecoderError> {
    if !reader.has_bytes(2) {
        return Err(DecoderError::BitstreamTooShort);
    }
    if reader.read_u16()? != markers::EOC {
        return Err(DecoderError::invalid("EOC marker not found"));
    }
    Ok(())
}

/// Parse only the header portion of a buffer, without touching entropy
/// data. Used by `init` to fill the image configuration.
pub fn probe(
    codestream: &[u8], hdr: &mut PictureHeaderConst, dyn_hdr: &mut PictureHeaderDynamic
) -> Result<usize, DecoderError> {
    if codestream.is_empty() {
        return Err(DecoderError::BadParameter("empty codestream"));
    }
    let mut reader = BitReader::new(codestream);
    get_header(&mut reader, hdr, dyn_hdr)?;
    if dyn_hdr.lcod != 0 && (dyn_hdr.lcod as usize) < reader.used_bytes() {
        warn!(
            "Declared codestream length {} is shorter than its own header {}",
            dyn_hdr.lcod,
            reader.used_bytes()
        );
    }
    Ok(reader.used_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    // SOC + CAP only; the picture header is missing.
    const SOC_CAP: [u8; 8] = [0xFF, 0x10, 0xFF, 0x50, 0x00, 0x04, 0x00, 0x80];

    #[test]
    fn soc_alone_is_too_short() {
        let mut hdr = PictureHeaderConst::default();
        let mut dyn_hdr = PictureHeaderDynamic::default();
        let mut reader = BitReader::new(&[0xFF, 0x10]);
        assert!(matches!(
            get_header(&mut reader, &mut hdr, &mut dyn_hdr),
            Err(DecoderError::BitstreamTooShort)
        ));
    }

    #[test]
    fn bad_magic_is_invalid() {
        let mut hdr = PictureHeaderConst::default();
        let mut dyn_hdr = PictureHeaderDynamic::default();
        let mut reader = BitReader::new(&[0xFF, 0xD8, 0x00, 0x00]);
        assert!(matches!(
            get_header(&mut reader, &mut hdr, &mut dyn_hdr),
            Err(DecoderError::InvalidBitstream(_))
        ));
    }

    #[test]
    fn missing_pih_is_too_short() {
        let mut hdr = PictureHeaderConst::default();
        let mut dyn_hdr = PictureHeaderDynamic::default();
        let mut reader = BitReader::new(&SOC_CAP);
        assert!(matches!(
            get_header(&mut reader, &mut hdr, &mut dyn_hdr),
            Err(DecoderError::BitstreamTooShort)
        ));
    }
}
