/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Inverse quantization of decoded coefficient groups.
//!
//! Coefficients arrive as sign-magnitude 16-bit words (bit 15 sign,
//! bits 0..14 magnitude). Dequantization reconstructs the dropped low
//! bit planes per code group and the final pass converts the words in
//! place to two's-complement `i16` for the wavelet synthesis.

use crate::markers::{SIGN_MASK, GROUP_SIZE};

/// Inverse quantization modes, selected by `Qpih`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum QuantType {
    Deadzone,
    Uniform
}

impl QuantType {
    pub fn from_qpih(qpih: u8) -> QuantType {
        if qpih == 0 {
            QuantType::Deadzone
        } else {
            QuantType::Uniform
        }
    }
}

/// Deadzone reconstruction: set the highest dropped bit plane of every
/// coefficient that kept a non-zero number of planes.
fn inv_quant_deadzone(buf: &mut [u16], gclis: &[u8], gtli: u8) {
    if gtli == 0 {
        return;
    }
    for (coeff_idx, coeff) in buf.iter_mut().enumerate() {
        let gcli = gclis[coeff_idx / GROUP_SIZE];
        if gcli > gtli && *coeff & !SIGN_MASK != 0 {
            *coeff |= 1 << (gtli - 1);
        }
    }
}

/// Uniform reconstruction: repeatedly fold the magnitude down by the
/// kept-plane count.
fn inv_quant_uniform(buf: &mut [u16], gclis: &[u8], gtli: u8) {
    if gtli == 0 {
        return;
    }
    for (coeff_idx, coeff) in buf.iter_mut().enumerate() {
        let gcli = gclis[coeff_idx / GROUP_SIZE];
        if gcli > gtli && *coeff & !SIGN_MASK != 0 {
            let sign = *coeff & SIGN_MASK;
            let mut val = *coeff & !SIGN_MASK;
            let scale = gcli - gtli + 1;

            let mut out = 0_u16;
            while val > 0 {
                out = out.wrapping_add(val);
                val >>= scale;
            }
            *coeff = (out & !SIGN_MASK) | sign;
        }
    }
}

/// Dequantize one band line; `gclis` holds one value per 4-coefficient
/// group.
pub fn dequant(buf: &mut [u16], gclis: &[u8], gtli: u8, quant_type: QuantType) {
    match quant_type {
        QuantType::Deadzone => inv_quant_deadzone(buf, gclis, gtli),
        QuantType::Uniform => inv_quant_uniform(buf, gclis, gtli)
    }
}

/// Convert a sign-magnitude line to two's-complement in place.
///
/// The sign bit never participates in magnitude arithmetic; it is
/// stripped here and reapplied as a negation.
pub fn inv_sign(buf: &mut [u16]) {
    for coeff in buf.iter_mut() {
        let magnitude = (*coeff & !SIGN_MASK) as i16;
        let val = if *coeff & SIGN_MASK != 0 {
            -magnitude
        } else {
            magnitude
        };
        *coeff = val as u16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadzone_sets_highest_dropped_plane() {
        let mut buf = [0b0000_0000_0001_0000_u16, 0, 0x8000 | 0x10, 0x20];
        let gclis = [6_u8];
        dequant(&mut buf, &gclis, 4, QuantType::Deadzone);
        assert_eq!(buf[0], 0x10 | 0x08);
        // zero magnitudes stay zero even with a sign bit set
        assert_eq!(buf[1], 0);
        assert_eq!(buf[2], 0x8000 | 0x10 | 0x08);
        assert_eq!(buf[3], 0x20 | 0x08);
    }

    #[test]
    fn deadzone_skips_trimmed_groups() {
        let mut buf = [0x10_u16; 4];
        let gclis = [3_u8];
        dequant(&mut buf, &gclis, 4, QuantType::Deadzone);
        assert_eq!(buf, [0x10; 4]);
    }

    #[test]
    fn uniform_folds_value() {
        // gcli 5, gtli 2 -> scale 4: val + (val >> 4) + ...
        let mut buf = [0b0011_0100_u16, 0, 0, 0];
        let gclis = [5_u8];
        dequant(&mut buf, &gclis, 2, QuantType::Uniform);
        let expected = 0b0011_0100 + (0b0011_0100 >> 4);
        assert_eq!(buf[0], expected);
    }

    #[test]
    fn gtli_zero_is_identity() {
        let mut buf = [0x7FFF_u16, 0x8001, 0, 5];
        let before = buf;
        dequant(&mut buf, &[15], 0, QuantType::Uniform);
        assert_eq!(buf, before);
    }

    #[test]
    fn sign_conversion() {
        let mut buf = [5_u16, 0x8000 | 5, 0, 0x8000];
        inv_sign(&mut buf);
        assert_eq!(buf[0] as i16, 5);
        assert_eq!(buf[1] as i16, -5);
        assert_eq!(buf[2] as i16, 0);
        // a signed zero stays zero
        assert_eq!(buf[3] as i16, 0);
    }
}
