//! Corruption and truncation behavior: every malformed input must
//! surface a defined error, never a crash or an out-of-bounds access.

use jxs_core::image::ImageBuffer;
use jxs_decoder::{get_single_frame_size, DecoderError, DecoderOptions, Frame, JxsDecoder, ProxyMode};

mod fixture;
use fixture::SAMPLE_16X16_422;

fn decode_buffer(decoder: &JxsDecoder, bytes: Vec<u8>) -> Result<(), DecoderError> {
    let image = ImageBuffer::alloc(decoder.image_config());
    decoder.send_frame(
        Frame {
            bitstream: bytes,
            image,
            user_data: 0
        },
        true
    )?;
    decoder.get_frame(true).map(|_| ())
}

#[test]
fn soc_alone_is_too_short() {
    assert!(matches!(
        get_single_frame_size(&[0xFF, 0x10], None, false, ProxyMode::Full),
        Err(DecoderError::BitstreamTooShort)
    ));
    assert!(matches!(
        JxsDecoder::init(0, 10, DecoderOptions::new(), &[0xFF, 0x10]),
        Err(DecoderError::BitstreamTooShort)
    ));
}

#[test]
fn empty_buffer_is_a_bad_parameter() {
    assert!(matches!(
        get_single_frame_size(&[], None, false, ProxyMode::Full),
        Err(DecoderError::BadParameter(_))
    ));
}

#[test]
fn every_truncation_is_too_short() {
    let decoder = JxsDecoder::init(0, 10, DecoderOptions::new(), &SAMPLE_16X16_422).unwrap();
    for len in 1..SAMPLE_16X16_422.len() {
        let result = decode_buffer(&decoder, SAMPLE_16X16_422[..len].to_vec());
        assert!(
            matches!(result, Err(DecoderError::BitstreamTooShort)),
            "truncation to {len} bytes returned {result:?}"
        );
    }
    // the full stream still decodes on the same decoder afterwards
    assert!(decode_buffer(&decoder, SAMPLE_16X16_422.to_vec()).is_ok());
}

#[test]
fn truncations_shorten_the_frame_walk() {
    for len in 1..SAMPLE_16X16_422.len() {
        let result =
            get_single_frame_size(&SAMPLE_16X16_422[..len], None, false, ProxyMode::Full);
        assert!(
            matches!(
                result,
                Err(DecoderError::BitstreamTooShort | DecoderError::InvalidBitstream(_))
            ),
            "walk of {len} bytes returned {result:?}"
        );
    }
}

#[test]
fn zero_filled_tails_are_invalid() {
    let decoder = JxsDecoder::init(0, 10, DecoderOptions::new(), &SAMPLE_16X16_422).unwrap();
    for keep in 1..SAMPLE_16X16_422.len() {
        let mut bytes = SAMPLE_16X16_422.to_vec();
        bytes[keep..].fill(0);
        let result = decode_buffer(&decoder, bytes);
        assert!(
            matches!(
                result,
                Err(DecoderError::InvalidBitstream(_)
                    | DecoderError::BitstreamTooShort
                    | DecoderError::ConfigChange)
            ),
            "zero fill from {keep} returned {result:?}"
        );
    }
}

#[test]
fn byte_corruption_never_escapes_the_error_enum() {
    // flip each byte in turn; every outcome must be a defined error or
    // a clean decode, and the decoder must stay usable
    let decoder = JxsDecoder::init(0, 10, DecoderOptions::new(), &SAMPLE_16X16_422).unwrap();
    for position in 0..SAMPLE_16X16_422.len() {
        let mut bytes = SAMPLE_16X16_422.to_vec();
        bytes[position] ^= 0xFF;
        match decode_buffer(&decoder, bytes) {
            Ok(())
            | Err(DecoderError::BitstreamTooShort)
            | Err(DecoderError::InvalidBitstream(_))
            | Err(DecoderError::ConfigChange) => {}
            other => panic!("byte {position} flip returned {other:?}")
        }
    }
    assert!(decode_buffer(&decoder, SAMPLE_16X16_422.to_vec()).is_ok());
}

#[test]
fn config_change_is_detected() {
    // a second stream with a different width must not decode
    let mut other = SAMPLE_16X16_422.to_vec();
    // PIH width field lives at offset 20..22
    other[21] = 0x20;
    let decoder = JxsDecoder::init(0, 10, DecoderOptions::new(), &SAMPLE_16X16_422).unwrap();
    let result = decode_buffer(&decoder, other);
    assert!(matches!(
        result,
        Err(DecoderError::ConfigChange | DecoderError::InvalidBitstream(_))
    ));
}

#[test]
fn variable_bitrate_rejects_packet_mode() {
    let mut vbr = SAMPLE_16X16_422.to_vec();
    // Lcod = 0 marks a variable-bitrate stream
    vbr[12..16].fill(0);
    let options = DecoderOptions::new().set_packetization_mode(true);
    assert!(matches!(
        JxsDecoder::init(0, 10, options, &vbr),
        Err(DecoderError::BadParameter(_))
    ));
}

#[test]
fn garbage_after_header_is_invalid() {
    let mut bytes = SAMPLE_16X16_422.to_vec();
    // overwrite the slice header marker with an unknown marker
    bytes[74] = 0xFF;
    bytes[75] = 0x7F;
    let result = get_single_frame_size(&bytes, None, false, ProxyMode::Full);
    assert!(matches!(result, Err(DecoderError::InvalidBitstream(_))));
}

#[test]
fn oversized_precinct_length_is_invalid() {
    let mut bytes = SAMPLE_16X16_422.to_vec();
    // first precinct's 24-bit Lprc at offset 80; 0xFFFFFF overflows
    // the 20-bit bound
    bytes[80] = 0xEF;
    bytes[81] = 0xFF;
    bytes[82] = 0xFF;
    let result = get_single_frame_size(&bytes, None, false, ProxyMode::Full);
    assert!(matches!(result, Err(DecoderError::InvalidBitstream(_))));
}
