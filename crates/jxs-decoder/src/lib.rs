/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! A multithreaded decoder for ISO/IEC 21122 (JPEG XS) low-latency
//! codestreams.
//!
//! # Features
//! - Full codestream syntax: markers, picture header, component
//!   table, weights, nonlinearity, colour transform, component
//!   registration and extension segments
//! - Per-precinct entropy decoding with significance, raw and
//!   predicted bit-plane-count coding, deadzone and uniform
//!   dequantization
//! - Streaming 5/3 inverse wavelet transform, up to 5 horizontal and
//!   2 vertical decomposition levels, with deterministic slice-seam
//!   recomputation
//! - A three-stage threaded pipeline (Init / universal workers /
//!   Final) with in-order frame delivery
//! - Frame-based and packet-based (constant bitrate) ingress
//!
//! # Usage
//! ```no_run
//! use jxs_decoder::{DecoderOptions, Frame, JxsDecoder};
//! use jxs_core::image::ImageBuffer;
//!
//! let codestream = std::fs::read("frame.jxs").unwrap();
//! let options = DecoderOptions::new().set_num_threads(4);
//! let decoder = JxsDecoder::init(0, 10, options, &codestream).unwrap();
//!
//! let image = ImageBuffer::alloc(decoder.image_config());
//! decoder
//!     .send_frame(
//!         Frame {
//!             bitstream: codestream,
//!             image,
//!             user_data: 0
//!         },
//!         true
//!     )
//!     .unwrap();
//! let decoded = decoder.get_frame(true).unwrap();
//! println!("frame {} decoded", decoded.frame_num);
//! ```
//!
//! The decoder never conceals corruption: a frame either reconstructs
//! fully (possibly with logged warnings) or is reported failed, and
//! truncated or corrupted input always surfaces as an error instead
//! of an out-of-bounds access.

#![warn(
    clippy::correctness,
    clippy::perf,
    clippy::pedantic,
    clippy::panic
)]
#![allow(
    clippy::needless_return,
    clippy::similar_names,
    clippy::inline_always,
    clippy::doc_markdown,
    clippy::module_name_repetitions,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

pub use crate::api::{DecodedFrame, Frame, JxsDecoder, API_VERSION_MAJOR, API_VERSION_MINOR};
pub use crate::errors::DecoderError;
pub use crate::options::DecoderOptions;
pub use crate::probe::{get_single_frame_size, ProxyMode};

mod api;
mod decoder;
mod dequant;
pub mod errors;
mod headers;
mod idwt;
mod markers;
mod mct;
mod nlt;
mod options;
mod pi;
mod precinct;
mod probe;
mod queue;
mod scheduler;
mod shared;
mod unpack;
mod vlc;
