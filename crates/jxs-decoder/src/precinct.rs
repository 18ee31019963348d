/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Per-precinct decode state.
//!
//! Each worker keeps one [`PrecinctState`] per precinct column plus a
//! spare; after a column is decoded the spare is swapped in so the
//! previous row's state survives as the top neighbor for vertical
//! GCLI prediction.

use crate::markers::TRUNCATION_MAX;
use crate::pi::{Pi, PrecinctVariant, MAX_BAND_LINES};

/// Decode state of one band inside one precinct.
#[derive(Clone, Default)]
pub struct PrecinctBand {
    /// Truncation threshold for the current precinct.
    pub gtli:            u8,
    /// GCLI per code group, `gcli_width x height_lines_num`,
    /// line-major.
    pub gcli_data:       Vec<u8>,
    /// One flag per significance group, `significance_width x
    /// height_lines_num`; a set flag marks the group insignificant.
    pub significance:    Vec<u8>,
    /// Start of this band's line 0 inside the precinct-row coefficient
    /// slice (column offset already applied).
    pub coeff_base:      usize,
    /// Sign-sub-packet padding bits per line, conveyed from the data
    /// stage.
    pub leftover_signs:  [u8; MAX_BAND_LINES]
}

/// Decode state of one precinct column.
pub struct PrecinctState {
    pub variant: PrecinctVariant,
    /// Indexed `[component][band]`.
    pub bands:   Vec<Vec<PrecinctBand>>
}

impl PrecinctState {
    /// Allocate state sized for the widest (interior) precinct.
    pub fn new(pi: &Pi) -> PrecinctState {
        let normal = pi.precinct_info(PrecinctVariant::Normal);
        let mut bands = Vec::with_capacity(pi.comps_num as usize);
        for (c, comp) in pi.components.iter().enumerate() {
            let mut comp_bands = Vec::with_capacity(comp.bands.len());
            for (b, band) in comp.bands.iter().enumerate() {
                let info = &normal.b_info[c][b];
                let lines = band.height_lines_num as usize;
                comp_bands.push(PrecinctBand {
                    gtli:           0,
                    gcli_data:      vec![0; info.gcli_width as usize * lines],
                    significance:   vec![0; info.significance_width as usize * lines],
                    coeff_base:     0,
                    leftover_signs: [0; MAX_BAND_LINES]
                });
            }
            bands.push(comp_bands);
        }
        PrecinctState {
            variant: PrecinctVariant::Normal,
            bands
        }
    }

    /// Derive per-band truncation thresholds from the precinct header's
    /// quantization and refinement fields and the band weight tables.
    pub fn compute_truncation(&mut self, pi: &Pi, quantization: u8, refinement: u8) {
        for (c, comp) in pi.components.iter().enumerate() {
            for (b, band) in comp.bands.iter().enumerate() {
                let refined = u8::from(band.priority < refinement);
                let gtli = i32::from(quantization) - i32::from(band.gain) - i32::from(refined);
                self.bands[c][b].gtli = gtli.clamp(0, i32::from(TRUNCATION_MAX)) as u8;
            }
        }
    }
}

/// The per-column ring of precinct states a worker owns.
///
/// `states[col]` is the most recently decoded precinct of that column;
/// `states[cols]` is the spare that becomes the next decode target.
pub struct PrecinctRing {
    states: Vec<PrecinctState>,
    cols:   usize
}

impl PrecinctRing {
    pub fn new(pi: &Pi) -> PrecinctRing {
        let cols = pi.precincts_col_num as usize;
        let states = (0..=cols).map(|_| PrecinctState::new(pi)).collect();
        PrecinctRing { states, cols }
    }

    /// Split the ring into the decode target (the spare) and the top
    /// neighbor of `col`, if requested.
    pub fn target_and_top(
        &mut self, col: usize, with_top: bool
    ) -> (&mut PrecinctState, Option<&PrecinctState>) {
        debug_assert!(col < self.cols);
        let (front, spare) = self.states.split_at_mut(self.cols);
        let target = &mut spare[0];
        let top = if with_top { Some(&front[col]) } else { None };
        (target, top)
    }

    /// The decode target before it is committed to a column.
    pub fn spare(&self) -> &PrecinctState {
        &self.states[self.cols]
    }

    /// After decoding, make the fresh state the column's row and keep
    /// the displaced one as the new spare.
    pub fn commit(&mut self, col: usize) {
        debug_assert!(col < self.cols);
        self.states.swap(col, self.cols);
    }
}
