//! Decode throughput over the bundled sample stream.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use jxs_core::image::ImageBuffer;
use jxs_decoder::{DecoderOptions, Frame, JxsDecoder};

#[path = "../tests/fixture/mod.rs"]
mod fixture;
use fixture::SAMPLE_16X16_422;

fn decode_sample(threads: u32) {
    let options = DecoderOptions::new().set_num_threads(threads);
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
    black_box(decoder.get_frame(true).unwrap());
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("decode 16x16 4:2:2, 1 worker", |b| {
        b.iter(|| decode_sample(1));
    });
    c.bench_function("decode 16x16 4:2:2, 4 workers", |b| {
        b.iter(|| decode_sample(6));
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
