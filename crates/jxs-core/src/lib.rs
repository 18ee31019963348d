/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Core primitives shared by the jxs JPEG XS crates
//!
//! This crate provides the pieces the decoder (and a future encoder)
//! share:
//!
//! - A bounds-checked bitstream cursor with byte and sub-byte reads
//! - Image configuration and plane buffer types
//! - The colour-format classification used by the public API
#![warn(clippy::correctness, clippy::perf, clippy::panic)]

pub mod bitstream;
pub mod image;
