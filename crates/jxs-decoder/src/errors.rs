/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Decoder errors.

use core::fmt::{Debug, Display, Formatter};

use jxs_core::bitstream::BitstreamError;

/// Errors the decoder can return, both from the parsing layers and the
/// public control surface.
#[derive(Copy, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum DecoderError {
    /// The caller requested an API version newer than this library.
    InvalidApiVersion,
    /// A caller-supplied parameter is invalid.
    BadParameter(&'static str),
    /// An allocation or thread-spawn failure at init time.
    InsufficientResources,
    /// An internal invariant was violated; the frame is lost.
    Internal,
    /// The buffer ended before a frame could be decoded. At the ingress
    /// layer this is recoverable: feed more bytes and retry. Within a
    /// slice it is fatal to the frame.
    BitstreamTooShort,
    /// Structural or arithmetic violation in the codestream. The
    /// current frame is lost; the decoder stays usable.
    InvalidBitstream(&'static str),
    /// A later frame's constant picture header differs from the one the
    /// decoder was initialized with; re-initialize to continue.
    ConfigChange,
    /// Non-blocking call had nothing to deliver (or no room to accept).
    EmptyQueue,
    /// `send_eoc` was called and all prior frames have been delivered.
    EndOfCodestream
}

impl DecoderError {
    pub(crate) const fn invalid(msg: &'static str) -> DecoderError {
        DecoderError::InvalidBitstream(msg)
    }
}

impl Debug for DecoderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidApiVersion => write!(f, "requested API version is not supported"),
            Self::BadParameter(msg) => write!(f, "bad parameter: {msg}"),
            Self::InsufficientResources => write!(f, "insufficient resources"),
            Self::Internal => write!(f, "internal decoder error"),
            Self::BitstreamTooShort => write!(f, "bitstream too short, feed more bytes"),
            Self::InvalidBitstream(msg) => write!(f, "invalid bitstream: {msg}"),
            Self::ConfigChange => {
                write!(f, "stream configuration changed, re-initialize the decoder")
            }
            Self::EmptyQueue => write!(f, "queue empty, try again later"),
            Self::EndOfCodestream => write!(f, "end of codestream")
        }
    }
}

impl Display for DecoderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl std::error::Error for DecoderError {}

impl From<BitstreamError> for DecoderError {
    fn from(_: BitstreamError) -> Self {
        DecoderError::BitstreamTooShort
    }
}
