/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Inverse nonlinear transform: wavelet-domain samples back to output
//! pixels.
//!
//! Only the linear mode (`Tnlt = 0`) is decodable. The encoder maps a
//! `depth`-bit sample `s` to `(s << (Bw - depth)) - (1 << (Bw - 1))`,
//! so the inverse re-centers, rounds and clamps to the output range.
//! Quadratic and extended nonlinearities are parsed by the header
//! layer but refused before slice decode starts.

use crate::headers::PictureHeaderDynamic;

/// Scale one reconstructed line to 8-bit output samples.
pub fn nlt_inverse_line_8bit(input: &[i32], depth: u8, hdr: &PictureHeaderDynamic, out: &mut [u8]) {
    debug_assert_eq!(hdr.tnlt, 0);
    let shift = u32::from(hdr.bw - depth);
    let offset = (1_i32 << (hdr.bw - 1)) + if shift > 0 { 1 << (shift - 1) } else { 0 };
    let max = (1_i32 << depth) - 1;

    for (dst, &val) in out.iter_mut().zip(input) {
        *dst = ((val + offset) >> shift).clamp(0, max) as u8;
    }
}

/// Scale one reconstructed line to 9..16-bit output samples.
pub fn nlt_inverse_line_16bit(
    input: &[i32], depth: u8, hdr: &PictureHeaderDynamic, out: &mut [u16]
) {
    debug_assert_eq!(hdr.tnlt, 0);
    let shift = u32::from(hdr.bw - depth);
    let offset = (1_i32 << (hdr.bw - 1)) + if shift > 0 { 1 << (shift - 1) } else { 0 };
    let max = (1_i32 << depth) - 1;

    for (dst, &val) in out.iter_mut().zip(input) {
        *dst = ((val + offset) >> shift).clamp(0, max) as u16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_header(bw: u8) -> PictureHeaderDynamic {
        PictureHeaderDynamic {
            bw,
            ..PictureHeaderDynamic::default()
        }
    }

    /// The encoder-side forward mapping.
    fn forward(sample: i32, bw: u8, depth: u8) -> i32 {
        (sample << (bw - depth)) - (1 << (bw - 1))
    }

    #[test]
    fn round_trips_the_forward_scaling() {
        let hdr = linear_header(20);
        let samples = [0_i32, 1, 127, 128, 200, 255];
        let scaled: Vec<i32> = samples.iter().map(|&s| forward(s, 20, 8)).collect();
        let mut out = [0_u8; 6];
        nlt_inverse_line_8bit(&scaled, 8, &hdr, &mut out);
        for (&expected, &got) in samples.iter().zip(&out) {
            assert_eq!(expected as u8, got);
        }
    }

    #[test]
    fn clamps_out_of_range() {
        let hdr = linear_header(20);
        let scaled = [i32::MIN / 4, i32::MAX / 4];
        let mut out = [0_u8; 2];
        nlt_inverse_line_8bit(&scaled, 8, &hdr, &mut out);
        assert_eq!(out, [0, 255]);
    }

    #[test]
    fn sixteen_bit_depth_uses_identity_shift() {
        // Bw == depth means no scaling, only the DC offset
        let hdr = linear_header(16);
        let scaled = [forward(1000, 16, 16), forward(65535, 16, 16)];
        let mut out = [0_u16; 2];
        nlt_inverse_line_16bit(&scaled, 16, &hdr, &mut out);
        assert_eq!(out, [1000, 65535]);
    }
}
