/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Image configuration and output buffer types shared between the
//! decoder and its callers.

use core::fmt::{Debug, Formatter};

/// Maximum number of image components a codestream may carry.
pub const MAX_COMPONENTS: usize = 8;

/// Planar sample layouts the decoder can emit.
///
/// Classified from the component count and the per-component
/// subsampling factors of the picture header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ColourFormat {
    /// Three components, no subsampling. RGB and YUV 4:4:4 share a
    /// layout; the codestream does not distinguish them.
    Planar444OrRgb,
    /// Three components, chroma halved horizontally.
    Planar422,
    /// Three components, chroma halved in both directions.
    Planar420,
    /// Single component.
    Gray,
    /// Four planar components, e.g. CFA data ahead of a Star-Tetrix
    /// transform.
    Planar4Components,
    Invalid
}

impl ColourFormat {
    /// Classify from component count and subsampling factors, mirroring
    /// the shapes a JPEG XS picture header can describe.
    pub fn from_params(comps_num: u32, sx: &[u8], sy: &[u8]) -> ColourFormat {
        match comps_num {
            1 => ColourFormat::Gray,
            4 => ColourFormat::Planar4Components,
            3 => {
                if sx[..3] == [1, 1, 1] && sy[..3] == [1, 1, 1] {
                    ColourFormat::Planar444OrRgb
                } else if sx[..3] == [1, 2, 2] && sy[..3] == [1, 1, 1] {
                    ColourFormat::Planar422
                } else if sx[..3] == [1, 2, 2] && sy[..3] == [1, 2, 2] {
                    ColourFormat::Planar420
                } else {
                    ColourFormat::Invalid
                }
            }
            _ => ColourFormat::Invalid
        }
    }
}

/// Geometry of one decoded component plane.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ComponentConfig {
    pub width:     u32,
    pub height:    u32,
    /// Plane size in bytes at the advertised bit depth.
    pub byte_size: usize
}

/// Everything a caller needs to allocate output buffers for a stream.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImageConfig {
    pub width:          u32,
    pub height:         u32,
    pub bit_depth:      u8,
    pub components_num: u32,
    pub format:         Option<ColourFormat>,
    pub components:     [ComponentConfig; MAX_COMPONENTS]
}

impl ImageConfig {
    /// Bytes per sample at the advertised bit depth.
    #[inline]
    pub fn pixel_size(&self) -> usize {
        if self.bit_depth <= 8 {
            1
        } else {
            2
        }
    }
}

/// Storage for one component plane.
///
/// Streams up to 8 bits per component decode to `U8` planes, deeper
/// streams to `U16`.
#[derive(Clone, Eq, PartialEq)]
pub enum PlaneBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>)
}

impl PlaneBuffer {
    pub fn len(&self) -> usize {
        match self {
            PlaneBuffer::U8(v) => v.len(),
            PlaneBuffer::U16(v) => v.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Debug for PlaneBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            PlaneBuffer::U8(v) => write!(f, "PlaneBuffer::U8({} samples)", v.len()),
            PlaneBuffer::U16(v) => write!(f, "PlaneBuffer::U16({} samples)", v.len())
        }
    }
}

/// A planar output image.
///
/// `stride` is in samples, not bytes; the last row of a plane is
/// allowed to be shorter than the stride so that callers can decode
/// interlaced fields into row-interleaved frames.
#[derive(Clone, Debug, Default)]
pub struct ImageBuffer {
    pub planes: Vec<PlaneBuffer>,
    pub stride: [usize; MAX_COMPONENTS]
}

impl ImageBuffer {
    /// Allocate tightly packed planes for `config`.
    pub fn alloc(config: &ImageConfig) -> ImageBuffer {
        let mut planes = Vec::with_capacity(config.components_num as usize);
        let mut stride = [0_usize; MAX_COMPONENTS];

        for (c, comp) in config
            .components
            .iter()
            .enumerate()
            .take(config.components_num as usize)
        {
            let samples = comp.width as usize * comp.height as usize;
            if config.bit_depth <= 8 {
                planes.push(PlaneBuffer::U8(vec![0; samples]));
            } else {
                planes.push(PlaneBuffer::U16(vec![0; samples]));
            }
            stride[c] = comp.width as usize;
        }
        ImageBuffer { planes, stride }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_formats() {
        assert_eq!(
            ColourFormat::from_params(3, &[1, 2, 2], &[1, 1, 1]),
            ColourFormat::Planar422
        );
        assert_eq!(
            ColourFormat::from_params(3, &[1, 2, 2], &[1, 2, 2]),
            ColourFormat::Planar420
        );
        assert_eq!(ColourFormat::from_params(1, &[1], &[1]), ColourFormat::Gray);
        assert_eq!(
            ColourFormat::from_params(3, &[2, 1, 1], &[1, 1, 1]),
            ColourFormat::Invalid
        );
    }

    #[test]
    fn alloc_respects_depth() {
        let mut config = ImageConfig {
            width: 16,
            height: 8,
            bit_depth: 10,
            components_num: 1,
            ..ImageConfig::default()
        };
        config.components[0] = ComponentConfig {
            width:     16,
            height:    8,
            byte_size: 16 * 8 * 2
        };
        let buf = ImageBuffer::alloc(&config);
        assert!(matches!(&buf.planes[0], PlaneBuffer::U16(v) if v.len() == 128));
        assert_eq!(buf.stride[0], 16);
    }
}
