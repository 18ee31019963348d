/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Picture info: the geometry derived from a parsed header.
//!
//! For every component this computes the wavelet band list, for the
//! frame the precinct and slice grids, the packet layout inside a
//! precinct and the per-variant precinct geometry. Everything here is
//! computed once per stream and shared read-only between the worker
//! threads.
//!
//! Band order within a component is `LL_Nx`, then `HL_k` for
//! `k = Nx..Ny+1` descending, then `HL_v, LH_v, HH_v` for each vertical
//! level `v = Ny..1` descending. The global band index interleaves
//! components at each band position (`g = position * comps + c`); a
//! position a component does not populate (deeper vertical split than
//! its subsampling allows, or a raw component past its single band) is
//! a hole in the global map.

use jxs_core::image::MAX_COMPONENTS;

use crate::errors::DecoderError;
use crate::headers::{PictureHeaderConst, MAX_BANDS_NUM};
use crate::markers::{GROUP_SIZE, SIGNIFICANCE_GROUP_SIZE};

/// Largest number of bands a component can carry: `Nx=5`, `Ny=2`.
pub const MAX_BANDS_PER_COMPONENT: usize = 10;
/// Most lines a band can contribute to one precinct (a raw component
/// band at `decom_v = 2`).
pub const MAX_BAND_LINES: usize = 4;
/// Implementation bound on precincts per line.
pub const MAX_PRECINCT_COLS: usize = 130;

/// Orientation of a band, used by the inverse transform to route rows.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BandKind {
    /// The deepest lowpass band.
    Ll,
    /// Horizontal highpass at `level`, vertically lowpassed (or not
    /// vertically decomposed at all when `level > Ny`).
    Hl,
    /// Horizontal lowpass, vertical highpass at `level`.
    Lh,
    /// Highpass in both directions at `level`.
    Hh,
    /// Untransformed data of a raw component.
    Raw
}

#[derive(Clone, Debug)]
pub struct PiBand {
    pub kind:             BandKind,
    /// Decomposition level this band belongs to.
    pub level:            u8,
    /// Band width over the whole frame.
    pub width:            u32,
    /// Band height in lines over the whole frame.
    pub height:           u32,
    /// Lines this band contributes to a full precinct.
    pub height_lines_num: u32,
    pub gain:             u8,
    pub priority:         u8
}

#[derive(Clone, Debug)]
pub struct PiComponent {
    pub width:           u32,
    pub height:          u32,
    pub decom_h:         u8,
    pub decom_v:         u8,
    /// Image lines of this component covered by one precinct row.
    pub precinct_height: u32,
    pub is_raw:          bool,
    pub bands:           Vec<PiBand>
}

/// Geometry of one band inside one precinct variant.
#[derive(Copy, Clone, Debug, Default)]
pub struct PrecinctBandInfo {
    pub width:              u32,
    pub gcli_width:         u32,
    pub significance_width: u32,
    /// Coefficient lines present in this precinct; 0 when the band is
    /// exhausted before the last precinct row.
    pub height:             u32
}

/// The four geometry variants a precinct can take.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PrecinctVariant {
    /// Interior precinct.
    Normal       = 0,
    /// Rightmost column.
    NormalLast   = 1,
    /// Last precinct row, interior column.
    LastNormal   = 2,
    /// Last precinct row, rightmost column.
    Last         = 3
}

/// Per-(component, band) geometry for one variant.
#[derive(Clone, Debug)]
pub struct PrecinctInfo {
    pub b_info: Vec<Vec<PrecinctBandInfo>>
}

/// One entry of the global band map.
#[derive(Copy, Clone, Debug)]
pub struct GlobalBand {
    pub comp: u8,
    pub band: u8
}

/// One packet: a line of a contiguous global band range.
#[derive(Copy, Clone, Debug)]
pub struct PiPacket {
    pub band_start: u32,
    pub band_stop:  u32,
    pub line_idx:   u32
}

#[derive(Clone)]
pub struct Pi {
    pub width:  u32,
    pub height: u32,

    pub comps_num: u32,
    pub decom_h:   u8,
    pub decom_v:   u8,

    pub coeff_group_size:        u32,
    pub significance_group_size: u32,

    pub components: Vec<PiComponent>,

    /// Global band slots (`bands_num_per_comp_max * comps_num`); `None`
    /// marks a hole.
    pub global_bands:     Vec<Option<GlobalBand>>,
    pub bands_num_all:    u32,
    pub bands_num_exists: u32,

    pub packets: Vec<PiPacket>,

    pub precincts_line_num:  u32,
    pub precincts_col_num:   u32,
    /// Precinct column width in frame samples; equals `width` for a
    /// single column.
    pub precinct_width:      u32,
    pub precincts_per_slice: u32,
    pub slice_num:           u32,

    pub p_info: [PrecinctInfo; 4],

    pub use_short_header: bool
}

/// Lowpass share of a 5/3 split.
#[inline]
pub(crate) const fn split_lo(n: u32) -> u32 {
    (n + 1) / 2
}

/// Highpass share of a 5/3 split.
#[inline]
pub(crate) const fn split_hi(n: u32) -> u32 {
    n / 2
}

/// Band list of one transformed component of size `w x h` with `nx`
/// horizontal and `ny` vertical decompositions.
fn component_bands(w: u32, h: u32, nx: u8, ny: u8) -> Vec<PiBand> {
    // per-level low/high sizes on both axes
    let mut wlo = [0_u32; 6];
    let mut whi = [0_u32; 6];
    wlo[0] = w;
    for k in 1..=usize::from(nx) {
        wlo[k] = split_lo(wlo[k - 1]);
        whi[k] = split_hi(wlo[k - 1]);
    }
    let mut hlo = [0_u32; 3];
    let mut hhi = [0_u32; 3];
    hlo[0] = h;
    for l in 1..=usize::from(ny) {
        hlo[l] = split_lo(hlo[l - 1]);
        hhi[l] = split_hi(hlo[l - 1]);
    }

    let mut bands = Vec::with_capacity(usize::from(nx) + 2 * usize::from(ny) + 1);

    bands.push(PiBand {
        kind:             BandKind::Ll,
        level:            nx,
        width:            wlo[usize::from(nx)],
        height:           hlo[usize::from(ny)],
        height_lines_num: 1,
        gain:             0,
        priority:         0
    });
    for k in (usize::from(ny) + 1..=usize::from(nx)).rev() {
        bands.push(PiBand {
            kind:             BandKind::Hl,
            level:            k as u8,
            width:            whi[k],
            height:           hlo[usize::from(ny)],
            height_lines_num: 1,
            gain:             0,
            priority:         0
        });
    }
    for v in (1..=usize::from(ny)).rev() {
        let lines = 1_u32 << (usize::from(ny) - v);
        bands.push(PiBand {
            kind: BandKind::Hl,
            level: v as u8,
            width: whi[v],
            height: hlo[v],
            height_lines_num: lines,
            gain: 0,
            priority: 0
        });
        bands.push(PiBand {
            kind: BandKind::Lh,
            level: v as u8,
            width: wlo[v],
            height: hhi[v],
            height_lines_num: lines,
            gain: 0,
            priority: 0
        });
        bands.push(PiBand {
            kind: BandKind::Hh,
            level: v as u8,
            width: whi[v],
            height: hhi[v],
            height_lines_num: lines,
            gain: 0,
            priority: 0
        });
    }
    bands
}

impl Pi {
    /// Derive the picture info from a parsed header.
    pub fn compute(hdr: &PictureHeaderConst) -> Result<Pi, DecoderError> {
        let comps_num = u32::from(hdr.comps_num);
        let sd = u32::from(hdr.sd);
        let decom_h = hdr.decom_h;
        let decom_v = hdr.decom_v;
        let width = u32::from(hdr.width);
        let height = u32::from(hdr.height);

        if sd >= comps_num {
            return Err(DecoderError::invalid("more raw components than components"));
        }

        let precinct_height = 1_u32 << decom_v;
        let precincts_line_num = height.div_ceil(precinct_height);

        // Cw == 0 puts the whole width into one precinct
        let precinct_width = if hdr.precinct_width == 0 {
            width
        } else {
            u32::from(hdr.precinct_width) << decom_h
        };
        let precincts_col_num = width.div_ceil(precinct_width);
        if precincts_col_num as usize > MAX_PRECINCT_COLS {
            return Err(DecoderError::InsufficientResources);
        }

        let precincts_per_slice = u32::from(hdr.hsl);
        let slice_num = precincts_line_num.div_ceil(precincts_per_slice);

        let mut components = Vec::with_capacity(comps_num as usize);
        for c in 0..comps_num as usize {
            let is_raw = c as u32 >= comps_num - sd;
            if is_raw {
                let lines = precinct_height;
                components.push(PiComponent {
                    width,
                    height,
                    decom_h: 0,
                    decom_v: 0,
                    precinct_height: lines,
                    is_raw: true,
                    bands: vec![PiBand {
                        kind:             BandKind::Raw,
                        level:            0,
                        width,
                        height,
                        height_lines_num: lines,
                        gain:             0,
                        priority:         0
                    }]
                });
                continue;
            }

            let sx = hdr.sx[c];
            let sy = hdr.sy[c];
            if !(1..=2).contains(&sx) || !(1..=2).contains(&sy) || sy > sx {
                return Err(DecoderError::invalid("invalid subsampling factors"));
            }
            let comp_w = width >> (sx - 1);
            let comp_h = height >> (sy - 1);
            let nx = decom_h;
            let ny = i32::from(decom_v) - i32::from(sy - 1);
            if ny < 0 || ny > i32::from(nx) {
                return Err(DecoderError::invalid("vertical decomposition out of range"));
            }
            let ny = ny as u8;

            components.push(PiComponent {
                width:           comp_w,
                height:          comp_h,
                decom_h:         nx,
                decom_v:         ny,
                precinct_height: 1 << ny,
                is_raw:          false,
                bands:           component_bands(comp_w, comp_h, nx, ny)
            });
        }

        // global band map, band-position-major
        let bands_per_comp_max = components
            .iter()
            .map(|c| c.bands.len())
            .max()
            .unwrap_or(0);
        debug_assert!(bands_per_comp_max <= MAX_BANDS_PER_COMPONENT);

        let bands_num_all = (bands_per_comp_max * comps_num as usize) as u32;
        if bands_num_all as usize > MAX_BANDS_NUM {
            return Err(DecoderError::invalid("too many bands"));
        }

        let mut global_bands = Vec::with_capacity(bands_num_all as usize);
        let mut bands_num_exists = 0_u32;
        for position in 0..bands_per_comp_max {
            for (c, comp) in components.iter().enumerate() {
                if position < comp.bands.len() {
                    global_bands.push(Some(GlobalBand {
                        comp: c as u8,
                        band: position as u8
                    }));
                    bands_num_exists += 1;
                } else {
                    global_bands.push(None);
                }
            }
        }

        // one packet per (band position, precinct line)
        let mut packets = Vec::new();
        for position in 0..bands_per_comp_max {
            let max_lines = components
                .iter()
                .filter_map(|c| c.bands.get(position))
                .map(|b| b.height_lines_num)
                .max()
                .unwrap_or(0);
            for line_idx in 0..max_lines {
                packets.push(PiPacket {
                    band_start: (position as u32) * comps_num,
                    band_stop: (position as u32 + 1) * comps_num,
                    line_idx
                });
            }
        }

        let mut pi = Pi {
            width,
            height,
            comps_num,
            decom_h,
            decom_v,
            coeff_group_size: u32::from(hdr.coeff_group_size),
            significance_group_size: u32::from(hdr.significance_group_size),
            components,
            global_bands,
            bands_num_all,
            bands_num_exists,
            packets,
            precincts_line_num,
            precincts_col_num,
            precinct_width,
            precincts_per_slice,
            slice_num,
            p_info: [
                PrecinctInfo { b_info: vec![] },
                PrecinctInfo { b_info: vec![] },
                PrecinctInfo { b_info: vec![] },
                PrecinctInfo { b_info: vec![] }
            ],
            use_short_header: false
        };
        pi.compute_precinct_variants();
        pi.copy_weights(hdr)?;
        pi.use_short_header = pi.compute_use_short_header();
        Ok(pi)
    }

    /// Band widths within a precinct column of component width `col_w`.
    ///
    /// The split sequence mirrors [`component_bands`]; interior columns
    /// are multiples of `2^decom_h` frame samples so their shares come
    /// out exact.
    fn column_band_widths(comp: &PiComponent, col_w: u32) -> Vec<u32> {
        if comp.is_raw {
            return vec![col_w];
        }
        let nx = usize::from(comp.decom_h);
        let ny = usize::from(comp.decom_v);
        let mut wlo = [0_u32; 6];
        let mut whi = [0_u32; 6];
        wlo[0] = col_w;
        for k in 1..=nx {
            wlo[k] = split_lo(wlo[k - 1]);
            whi[k] = split_hi(wlo[k - 1]);
        }
        let mut widths = Vec::with_capacity(comp.bands.len());
        widths.push(wlo[nx]);
        for k in ((ny + 1)..=nx).rev() {
            widths.push(whi[k]);
        }
        for v in (1..=ny).rev() {
            widths.push(whi[v]);
            widths.push(wlo[v]);
            widths.push(whi[v]);
        }
        widths
    }

    fn compute_precinct_variants(&mut self) {
        let cols = self.precincts_col_num;
        let rows = self.precincts_line_num;

        let mut variants: [PrecinctInfo; 4] = core::array::from_fn(|_| PrecinctInfo {
            b_info: Vec::with_capacity(self.comps_num as usize)
        });

        for comp in &self.components {
            // interior and last-column widths of this component
            let col_w = if cols == 1 {
                comp.width
            } else {
                // component share of the frame-space precinct width
                (u64::from(self.precinct_width) * u64::from(comp.width) / u64::from(self.width))
                    as u32
            };
            let normal_widths = Self::column_band_widths(comp, col_w);
            let last_widths: Vec<u32> = if cols == 1 {
                normal_widths.clone()
            } else {
                comp.bands
                    .iter()
                    .zip(&normal_widths)
                    .map(|(band, &nw)| band.width.saturating_sub((cols - 1) * nw))
                    .collect()
            };

            for (variant, info) in variants.iter_mut().enumerate() {
                let is_last_col =
                    variant == PrecinctVariant::NormalLast as usize
                        || variant == PrecinctVariant::Last as usize;
                let is_last_row =
                    variant == PrecinctVariant::LastNormal as usize
                        || variant == PrecinctVariant::Last as usize;

                let widths = if is_last_col {
                    &last_widths
                } else {
                    &normal_widths
                };
                let mut infos = Vec::with_capacity(comp.bands.len());
                for (band, &w) in comp.bands.iter().zip(widths) {
                    let height = if is_last_row {
                        band.height
                            .saturating_sub((rows - 1) * band.height_lines_num)
                            .min(band.height_lines_num)
                    } else {
                        band.height_lines_num
                    };
                    let gcli_width = w.div_ceil(GROUP_SIZE as u32);
                    infos.push(PrecinctBandInfo {
                        width: w,
                        gcli_width,
                        significance_width: gcli_width.div_ceil(SIGNIFICANCE_GROUP_SIZE as u32),
                        height
                    });
                }
                info.b_info.push(infos);
            }
        }
        self.p_info = variants;
    }

    /// Distribute the WGT gain/priority pairs over the existing bands,
    /// in global band order.
    fn copy_weights(&mut self, hdr: &PictureHeaderConst) -> Result<(), DecoderError> {
        let mut table_idx = 0_usize;
        for slot in 0..self.bands_num_all as usize {
            let Some(gb) = self.global_bands[slot] else {
                continue;
            };
            if table_idx >= MAX_BANDS_NUM {
                return Err(DecoderError::invalid("weights table too small"));
            }
            let band = &mut self.components[usize::from(gb.comp)].bands[usize::from(gb.band)];
            band.gain = hdr.gain[table_idx];
            band.priority = hdr.priority[table_idx];
            table_idx += 1;
        }
        Ok(())
    }

    /// Whether the 5-byte short packet header can express every
    /// worst-case sub-packet length of this configuration.
    fn compute_use_short_header(&self) -> bool {
        for packet in &self.packets {
            let mut data_bits = 0_u64;
            let mut gcli_bits = 0_u64;
            let mut sign_bits = 0_u64;
            for slot in packet.band_start..packet.band_stop {
                let Some(gb) = self.global_bands[slot as usize] else {
                    continue;
                };
                // widest geometry is the interior column
                let info = &self.p_info[PrecinctVariant::Normal as usize].b_info
                    [usize::from(gb.comp)][usize::from(gb.band)];
                // 15 magnitude planes plus the sign nibble
                data_bits += u64::from(info.gcli_width) * 4 * 16;
                // a unary residual is capped at 32 bits plus terminator
                gcli_bits += u64::from(info.gcli_width) * 33;
                sign_bits += u64::from(info.width);
            }
            if data_bits.div_ceil(8) >= 1 << 15
                || gcli_bits.div_ceil(8) >= 1 << 13
                || sign_bits.div_ceil(8) >= 1 << 11
            {
                return false;
            }
        }
        true
    }

    /// Precinct rows in the given slice.
    pub fn lines_per_slice(&self, slice: u32) -> u32 {
        if slice == self.slice_num - 1 {
            self.precincts_line_num - (self.slice_num - 1) * self.precincts_per_slice
        } else {
            self.precincts_per_slice
        }
    }

    /// Variant of the precinct at (row, column).
    pub fn variant_at(&self, precinct_line_idx: u32, column: u32) -> PrecinctVariant {
        let last_row = precinct_line_idx == self.precincts_line_num - 1;
        let last_col = column == self.precincts_col_num - 1;
        match (last_row, last_col) {
            (true, true) => PrecinctVariant::Last,
            (true, false) => PrecinctVariant::LastNormal,
            (false, true) => PrecinctVariant::NormalLast,
            (false, false) => PrecinctVariant::Normal
        }
    }

    pub fn precinct_info(&self, variant: PrecinctVariant) -> &PrecinctInfo {
        &self.p_info[variant as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::PictureHeaderConst;

    fn header_16x16_422() -> PictureHeaderConst {
        let mut hdr = PictureHeaderConst {
            width: 16,
            height: 16,
            precinct_width: 0,
            hsl: 8,
            comps_num: 3,
            decom_h: 1,
            decom_v: 1,
            coeff_group_size: 4,
            significance_group_size: 8,
            ..PictureHeaderConst::default()
        };
        hdr.bit_depth = [8; MAX_COMPONENTS];
        hdr.sx[..3].copy_from_slice(&[1, 2, 2]);
        hdr.sy[..3].copy_from_slice(&[1, 1, 1]);
        // gains/priorities of the bundled sample stream, global order
        let gains = [1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let priorities = [0, 1, 2, 9, 10, 11, 4, 8, 5, 3, 6, 7];
        hdr.gain[..12].copy_from_slice(&gains);
        hdr.priority[..12].copy_from_slice(&priorities);
        hdr
    }

    #[test]
    fn geometry_of_16x16_422() {
        let pi = Pi::compute(&header_16x16_422()).unwrap();
        assert_eq!(pi.precincts_line_num, 8);
        assert_eq!(pi.precincts_col_num, 1);
        assert_eq!(pi.slice_num, 1);
        assert_eq!(pi.bands_num_all, 12);
        assert_eq!(pi.bands_num_exists, 12);
        assert_eq!(pi.packets.len(), 4);
        assert!(pi.use_short_header);

        // luma: LL1/HL1/LH1/HH1, all 8 wide, one line per precinct
        let luma = &pi.components[0];
        assert_eq!(luma.bands.len(), 4);
        assert!(luma.bands.iter().all(|b| b.width == 8));
        assert!(luma.bands.iter().all(|b| b.height_lines_num == 1));
        // chroma planes are 8 wide, bands 4 wide
        assert!(pi.components[1].bands.iter().all(|b| b.width == 4));

        // weight distribution follows the global interleave
        assert_eq!(pi.components[0].bands[0].gain, 1);
        assert_eq!(pi.components[2].bands[0].priority, 2);
        assert_eq!(pi.components[0].bands[3].priority, 3);
    }

    #[test]
    fn holes_for_420_chroma() {
        let mut hdr = header_16x16_422();
        hdr.sy[..3].copy_from_slice(&[1, 2, 2]);
        hdr.decom_h = 2;
        hdr.decom_v = 1;
        let pi = Pi::compute(&hdr).unwrap();

        // luma: LL2 HL2 HL1 LH1 HH1; chroma: LL2 HL2 HL1
        assert_eq!(pi.components[0].bands.len(), 5);
        assert_eq!(pi.components[1].bands.len(), 3);
        assert_eq!(pi.bands_num_all, 15);
        assert_eq!(pi.bands_num_exists, 5 + 3 + 3);
        // positions 3 and 4 exist for luma only
        assert!(pi.global_bands[3 * 3].is_some());
        assert!(pi.global_bands[3 * 3 + 1].is_none());
        assert!(pi.global_bands[3 * 3 + 2].is_none());
    }

    #[test]
    fn odd_height_leaves_empty_bands_in_last_precinct() {
        let mut hdr = header_16x16_422();
        hdr.height = 17;
        hdr.hsl = 2;
        let pi = Pi::compute(&hdr).unwrap();
        assert_eq!(pi.precincts_line_num, 9);
        assert_eq!(pi.slice_num, 5);

        // 17 rows split 9 lowpass / 8 highpass; the ninth precinct has
        // a lowpass line but no highpass lines
        let last = pi.precinct_info(PrecinctVariant::Last);
        assert_eq!(last.b_info[0][0].height, 1);
        assert_eq!(last.b_info[0][2].height, 0);
        assert_eq!(last.b_info[0][3].height, 0);
    }
}
