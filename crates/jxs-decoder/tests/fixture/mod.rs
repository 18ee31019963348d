//! The bundled sample codestream: 16x16, 8 bit, 4:2:2, one horizontal
//! and one vertical decomposition, one slice of eight precincts,
//! constant bitrate (`Lcod` = 448).
#![allow(dead_code)]

use jxs_core::image::{ImageBuffer, PlaneBuffer};
use jxs_decoder::{DecodedFrame, DecoderOptions, Frame, JxsDecoder};

#[rustfmt::skip]
pub const SAMPLE_16X16_422: [u8; 448] = [
    0xFF, 0x10, 0xFF, 0x50, 0x00, 0x04, 0x00, 0x80, 0xFF, 0x12, 0x00, 0x1A, 0x00, 0x00, 0x01,
    0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00, 0x08, 0x03, 0x04,
    0x08, 0x14, 0x84, 0x00, 0x11, 0x41, 0xFF, 0x13, 0x00, 0x08, 0x08, 0x11, 0x08, 0x21, 0x08,
    0x21, 0xFF, 0x14, 0x00, 0x1A, 0x01, 0x00, 0x01, 0x01, 0x01, 0x02, 0x00, 0x09, 0x00, 0x0A,
    0x00, 0x0B, 0x00, 0x04, 0x00, 0x08, 0x00, 0x05, 0x00, 0x03, 0x00, 0x06, 0x00, 0x07, 0xFF,
    0x20, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x25, 0x0B, 0x04, 0x00, 0x00, 0x00, 0x00, 0x06,
    0x00, 0x10, 0x00, 0xDA, 0xC0, 0x95, 0xCC, 0x5F, 0x88, 0x08, 0x00, 0x00, 0x01, 0x00, 0x08,
    0x00, 0x40, 0x11, 0x00, 0x01, 0x00, 0x08, 0x00, 0x40, 0x08, 0x00, 0x03, 0x00, 0x08, 0x00,
    0xD8, 0x9F, 0x46, 0x64, 0x00, 0x00, 0x00, 0x25, 0x0A, 0x02, 0x51, 0x00, 0x10, 0x00, 0x06,
    0x00, 0x08, 0x00, 0xC0, 0x49, 0x4E, 0x42, 0x6E, 0x84, 0x41, 0x00, 0x02, 0x00, 0x08, 0x00,
    0x40, 0x08, 0x22, 0x00, 0x01, 0x00, 0x08, 0x00, 0x40, 0x01, 0x00, 0x04, 0x00, 0x08, 0x00,
    0x60, 0x08, 0x2B, 0x1A, 0x10, 0x00, 0x00, 0x25, 0x0B, 0x09, 0x50, 0x04, 0x10, 0x00, 0x05,
    0x00, 0x08, 0x00, 0x88, 0x21, 0x61, 0xA7, 0x44, 0x04, 0x00, 0x01, 0x00, 0x08, 0x00, 0x40,
    0x01, 0x00, 0x02, 0x00, 0x08, 0x00, 0x80, 0x22, 0x88, 0x00, 0x04, 0x00, 0x08, 0x00, 0xD0,
    0x01, 0xA4, 0x45, 0xB0, 0x00, 0x00, 0x00, 0x25, 0x0A, 0x01, 0x41, 0x00, 0x10, 0x00, 0x05,
    0x00, 0x08, 0x00, 0xC0, 0x94, 0x91, 0x10, 0x47, 0xD0, 0x00, 0x03, 0x00, 0x08, 0x00, 0xC0,
    0x08, 0x01, 0x10, 0x00, 0x01, 0x00, 0x08, 0x00, 0x80, 0x22, 0x00, 0x04, 0x00, 0x08, 0x00,
    0x00, 0x02, 0x35, 0x2A, 0x00, 0x00, 0x00, 0x25, 0x0B, 0x09, 0x40, 0x04, 0x10, 0x00, 0x05,
    0x00, 0x08, 0x00, 0x94, 0x84, 0xC8, 0xEE, 0x22, 0x02, 0x00, 0x01, 0x00, 0x08, 0x00, 0x40,
    0x11, 0x00, 0x02, 0x00, 0x08, 0x00, 0x40, 0x22, 0x89, 0x00, 0x04, 0x00, 0x08, 0x00, 0x60,
    0x03, 0x00, 0x11, 0x04, 0x00, 0x00, 0x00, 0x25, 0x0B, 0x0A, 0x51, 0x08, 0x10, 0x00, 0x05,
    0x00, 0x08, 0x00, 0xC0, 0x84, 0x92, 0x0A, 0x21, 0x10, 0x00, 0x03, 0x00, 0x08, 0x00, 0x00,
    0x02, 0x01, 0xA0, 0x00, 0x00, 0x00, 0x08, 0x00, 0x80, 0x00, 0x00, 0x04, 0x00, 0x08, 0x00,
    0x40, 0xA8, 0x02, 0x42, 0x50, 0x00, 0x00, 0x25, 0x0A, 0x01, 0x50, 0x00, 0x10, 0x00, 0x06,
    0x00, 0x08, 0x00, 0x60, 0x42, 0xDC, 0x92, 0x4A, 0x1F, 0x22, 0x00, 0x01, 0x00, 0x08, 0x00,
    0x40, 0x26, 0x00, 0x03, 0x00, 0x08, 0x00, 0xD0, 0x44, 0x02, 0x60, 0x00, 0x03, 0x00, 0x08,
    0x00, 0x80, 0x54, 0x30, 0x41, 0x00, 0x00, 0x2B, 0x0A, 0x07, 0x45, 0x04, 0x10, 0x00, 0x06,
    0x00, 0x10, 0x00, 0xBA, 0x00, 0x2C, 0xB1, 0x4E, 0x31, 0x10, 0x10, 0x00, 0x02, 0x00, 0x08,
    0x00, 0x10, 0x08, 0x01, 0x00, 0x04, 0x00, 0x08, 0x00, 0x60, 0x93, 0x2B, 0x8C, 0xD8, 0x00,
    0x06, 0x00, 0x08, 0x00, 0x30, 0x46, 0x24, 0xBD, 0x9A, 0x01, 0x00, 0xFF, 0x11,
];

/// Digest the sample planes of a decoded frame.
pub fn plane_digest(image: &ImageBuffer) -> Vec<u64> {
    image
        .planes
        .iter()
        .map(|plane| match plane {
            PlaneBuffer::U8(data) => xxhash_rust::xxh3::xxh3_64(data),
            PlaneBuffer::U16(data) => {
                let mut bytes = Vec::with_capacity(data.len() * 2);
                for v in data {
                    bytes.extend_from_slice(&v.to_le_bytes());
                }
                xxhash_rust::xxh3::xxh3_64(&bytes)
            }
        })
        .collect()
}

/// Decode one codestream with the given worker thread budget.
pub fn decode_once(codestream: &[u8], threads: u32) -> Result<DecodedFrame, jxs_decoder::DecoderError> {
    let options = DecoderOptions::new().set_num_threads(threads);
    let decoder = JxsDecoder::init(0, 10, options, codestream)?;
    let image = ImageBuffer::alloc(decoder.image_config());
    decoder.send_frame(
        Frame {
            bitstream: codestream.to_vec(),
            image,
            user_data: 0
        },
        true
    )?;
    decoder.get_frame(true)
}
