//! End-to-end decoding of the bundled sample stream.

use jxs_core::image::{ColourFormat, ImageBuffer};
use jxs_decoder::{get_single_frame_size, DecoderError, DecoderOptions, Frame, JxsDecoder, ProxyMode};

mod fixture;
use fixture::{decode_once, plane_digest, SAMPLE_16X16_422};

#[test]
fn advertises_the_image_configuration() {
    let decoder = JxsDecoder::init(0, 10, DecoderOptions::new(), &SAMPLE_16X16_422).unwrap();
    let config = decoder.image_config();

    assert_eq!(config.width, 16);
    assert_eq!(config.height, 16);
    assert_eq!(config.bit_depth, 8);
    assert_eq!(config.components_num, 3);
    assert_eq!(config.format, Some(ColourFormat::Planar422));
    assert_eq!(config.components[0].width, 16);
    assert_eq!(config.components[1].width, 8);
    assert_eq!(config.components[2].height, 16);
    assert_eq!(config.components[0].byte_size, 256);
    assert_eq!(config.components[1].byte_size, 128);
}

#[test]
fn decodes_single_frame() {
    let decoded = decode_once(&SAMPLE_16X16_422, 1).unwrap();
    assert_eq!(decoded.frame_num, 0);
    assert_eq!(decoded.image.planes.len(), 3);
    assert_eq!(decoded.image.planes[0].len(), 256);
    assert_eq!(decoded.image.planes[1].len(), 128);
    // the input buffer comes back for reuse
    assert_eq!(decoded.bitstream, SAMPLE_16X16_422);
}

#[test]
fn thread_count_does_not_change_output() {
    let single = decode_once(&SAMPLE_16X16_422, 1).unwrap();
    let five = decode_once(&SAMPLE_16X16_422, 5).unwrap();
    assert_eq!(plane_digest(&single.image), plane_digest(&five.image));
}

#[test]
fn decodes_two_frames_in_a_row() {
    let decoder = JxsDecoder::init(0, 10, DecoderOptions::new(), &SAMPLE_16X16_422).unwrap();

    for token in 0..2_u64 {
        let image = ImageBuffer::alloc(decoder.image_config());
        decoder
            .send_frame(
                Frame {
                    bitstream: SAMPLE_16X16_422.to_vec(),
                    image,
                    user_data: token
                },
                true
            )
            .unwrap();
    }

    let first = decoder.get_frame(true).unwrap();
    let second = decoder.get_frame(true).unwrap();
    assert_eq!(first.frame_num, 0);
    assert_eq!(second.frame_num, 1);
    assert_eq!(first.user_data, 0);
    assert_eq!(second.user_data, 1);
    assert_eq!(plane_digest(&first.image), plane_digest(&second.image));
}

#[test]
fn frames_arrive_in_input_order_across_workers() {
    let options = DecoderOptions::new().set_num_threads(6);
    let decoder = JxsDecoder::init(0, 10, options, &SAMPLE_16X16_422).unwrap();

    for token in 0..6_u64 {
        let image = ImageBuffer::alloc(decoder.image_config());
        decoder
            .send_frame(
                Frame {
                    bitstream: SAMPLE_16X16_422.to_vec(),
                    image,
                    user_data: token
                },
                true
            )
            .unwrap();
    }
    for expected in 0..6_u64 {
        let frame = decoder.get_frame(true).unwrap();
        assert_eq!(frame.frame_num, expected);
        assert_eq!(frame.user_data, expected);
    }
}

#[test]
fn end_of_codestream_drains_in_order() {
    let decoder = JxsDecoder::init(0, 10, DecoderOptions::new(), &SAMPLE_16X16_422).unwrap();
    let image = ImageBuffer::alloc(decoder.image_config());
    decoder
        .send_frame(
            Frame {
                bitstream: SAMPLE_16X16_422.to_vec(),
                image,
                user_data: 9
            },
            true
        )
        .unwrap();
    decoder.send_eoc().unwrap();

    let frame = decoder.get_frame(true).unwrap();
    assert_eq!(frame.user_data, 9);
    assert!(matches!(
        decoder.get_frame(true),
        Err(DecoderError::EndOfCodestream)
    ));
}

#[test]
fn nonblocking_get_frame_reports_empty() {
    let decoder = JxsDecoder::init(0, 10, DecoderOptions::new(), &SAMPLE_16X16_422).unwrap();
    assert!(matches!(
        decoder.get_frame(false),
        Err(DecoderError::EmptyQueue)
    ));
}

#[test]
fn single_frame_size_full_walk() {
    let size = get_single_frame_size(&SAMPLE_16X16_422, None, false, ProxyMode::Full).unwrap();
    assert_eq!(size, SAMPLE_16X16_422.len());
}

#[test]
fn single_frame_size_fast_path_uses_lcod() {
    // fast search stops at the first slice header on CBR streams
    let mut config = jxs_core::image::ImageConfig::default();
    let size =
        get_single_frame_size(&SAMPLE_16X16_422, Some(&mut config), true, ProxyMode::Full).unwrap();
    assert_eq!(size, 448);
    assert_eq!(config.width, 16);
    assert_eq!(config.format, Some(ColourFormat::Planar422));
    assert_eq!(config.components[1].width, 8);
}

#[test]
fn single_frame_size_proxy_dimensions() {
    let mut config = jxs_core::image::ImageConfig::default();
    get_single_frame_size(&SAMPLE_16X16_422, Some(&mut config), true, ProxyMode::Half).unwrap();
    assert_eq!((config.width, config.height), (8, 8));
    assert_eq!(config.components[1].width, 4);

    get_single_frame_size(&SAMPLE_16X16_422, Some(&mut config), true, ProxyMode::Quarter).unwrap();
    assert_eq!((config.width, config.height), (4, 4));
}

#[test]
fn packet_mode_decodes_two_concatenated_frames() {
    let mut stream = SAMPLE_16X16_422.to_vec();
    stream.extend_from_slice(&SAMPLE_16X16_422);

    let options = DecoderOptions::new().set_packetization_mode(true);
    let decoder = JxsDecoder::init(0, 10, options, &SAMPLE_16X16_422).unwrap();

    let mut offset = 0;
    let mut token = 0_u64;
    while offset < stream.len() {
        let image = ImageBuffer::alloc(decoder.image_config());
        let used = decoder
            .send_packet(Frame {
                bitstream: stream[offset..].to_vec(),
                image,
                user_data: token
            })
            .unwrap();
        assert!(used > 0);
        offset += used;
        token += 1;
    }

    let first = decoder.get_frame(true).unwrap();
    let second = decoder.get_frame(true).unwrap();
    assert_eq!(first.frame_num, 0);
    assert_eq!(second.frame_num, 1);
    assert_eq!(plane_digest(&first.image), plane_digest(&second.image));

    // and it matches the frame-based path
    let reference = decode_once(&SAMPLE_16X16_422, 1).unwrap();
    assert_eq!(plane_digest(&first.image), plane_digest(&reference.image));
}

#[test]
fn packet_mode_accepts_small_chunks() {
    let options = DecoderOptions::new().set_packetization_mode(true);
    let decoder = JxsDecoder::init(0, 10, options, &SAMPLE_16X16_422).unwrap();

    let mut offset = 0;
    let mut first_chunk = true;
    while offset < SAMPLE_16X16_422.len() {
        let end = (offset + 37).min(SAMPLE_16X16_422.len());
        let image = if first_chunk {
            ImageBuffer::alloc(decoder.image_config())
        } else {
            ImageBuffer::default()
        };
        first_chunk = false;
        let used = decoder
            .send_packet(Frame {
                bitstream: SAMPLE_16X16_422[offset..end].to_vec(),
                image,
                user_data: 0
            })
            .unwrap();
        offset += used;
    }

    let chunked = decoder.get_frame(true).unwrap();
    let reference = decode_once(&SAMPLE_16X16_422, 1).unwrap();
    assert_eq!(plane_digest(&chunked.image), plane_digest(&reference.image));
}

#[test]
fn packet_mode_rejects_send_frame() {
    let options = DecoderOptions::new().set_packetization_mode(true);
    let decoder = JxsDecoder::init(0, 10, options, &SAMPLE_16X16_422).unwrap();
    let image = ImageBuffer::alloc(decoder.image_config());
    assert!(matches!(
        decoder.send_frame(
            Frame {
                bitstream: SAMPLE_16X16_422.to_vec(),
                image,
                user_data: 0
            },
            true
        ),
        Err(DecoderError::BadParameter(_))
    ));
}

#[test]
fn callbacks_fire_for_slots_and_frames() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    let slots = Arc::new(AtomicU32::new(0));
    let frames = Arc::new(AtomicU32::new(0));
    let slots_cb = Arc::clone(&slots);
    let frames_cb = Arc::clone(&frames);

    let options = DecoderOptions::new()
        .set_send_slot_callback(Arc::new(move || {
            slots_cb.fetch_add(1, Ordering::SeqCst);
        }))
        .set_frame_ready_callback(Arc::new(move || {
            frames_cb.fetch_add(1, Ordering::SeqCst);
        }));

    let decoder = JxsDecoder::init(0, 10, options, &SAMPLE_16X16_422).unwrap();
    let image = ImageBuffer::alloc(decoder.image_config());
    decoder
        .send_frame(
            Frame {
                bitstream: SAMPLE_16X16_422.to_vec(),
                image,
                user_data: 0
            },
            true
        )
        .unwrap();
    decoder.get_frame(true).unwrap();

    assert!(slots.load(Ordering::SeqCst) >= 1);
    assert_eq!(frames.load(Ordering::SeqCst), 1);
}

#[test]
fn rejects_newer_api_versions() {
    assert!(matches!(
        JxsDecoder::init(99, 0, DecoderOptions::new(), &SAMPLE_16X16_422),
        Err(DecoderError::InvalidApiVersion)
    ));
}

#[test]
fn rejects_undersized_image_buffers() {
    let decoder = JxsDecoder::init(0, 10, DecoderOptions::new(), &SAMPLE_16X16_422).unwrap();
    let mut image = ImageBuffer::alloc(decoder.image_config());
    if let jxs_core::image::PlaneBuffer::U8(plane) = &mut image.planes[0] {
        plane.truncate(100);
    }
    assert!(matches!(
        decoder.send_frame(
            Frame {
                bitstream: SAMPLE_16X16_422.to_vec(),
                image,
                user_data: 0
            },
            true
        ),
        Err(DecoderError::BadParameter(_))
    ));
}
