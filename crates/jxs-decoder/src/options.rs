/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Decoder options.

use std::sync::Arc;

/// Notification callback; must be non-blocking and reentrant with
/// respect to the decoder API.
pub type NotifyFn = Arc<dyn Fn() + Send + Sync>;

/// Options controlling a decoder instance.
///
/// To remove the annoyance of getters and setters all exposed options
/// are declared public; builder-style setters exist for chaining.
#[derive(Clone, Default)]
pub struct DecoderOptions {
    /// Total thread budget. Two threads go to the Init and Final
    /// stages; the rest become universal workers, with a floor of one.
    ///
    /// - Default value: 0 (single universal worker)
    pub threads_num: u32,

    /// Ingress mode.
    ///
    /// `false`: one buffer carries a whole codestream per
    /// [`send_frame`](crate::JxsDecoder::send_frame) call.
    ///
    /// `true`: the codestream arrives in arbitrary chunks through
    /// [`send_packet`](crate::JxsDecoder::send_packet); lower latency,
    /// one internal frame-sized copy, constant-bitrate streams only.
    pub packetization_mode: bool,

    /// Called whenever the input queue has room for another frame
    /// (and once after init).
    pub on_send_slot_available: Option<NotifyFn>,

    /// Called whenever a decoded frame becomes ready to collect.
    pub on_frame_ready: Option<NotifyFn>
}

impl DecoderOptions {
    #[must_use]
    pub fn new() -> DecoderOptions {
        DecoderOptions::default()
    }

    #[must_use]
    pub fn set_num_threads(mut self, threads: u32) -> DecoderOptions {
        self.threads_num = threads;
        self
    }

    #[must_use]
    pub fn set_packetization_mode(mut self, packet_based: bool) -> DecoderOptions {
        self.packetization_mode = packet_based;
        self
    }

    #[must_use]
    pub fn set_send_slot_callback(mut self, callback: NotifyFn) -> DecoderOptions {
        self.on_send_slot_available = Some(callback);
        self
    }

    #[must_use]
    pub fn set_frame_ready_callback(mut self, callback: NotifyFn) -> DecoderOptions {
        self.on_frame_ready = Some(callback);
        self
    }

    /// Universal worker threads derived from the total budget.
    pub(crate) fn universal_threads(&self) -> u32 {
        if self.threads_num <= 2 {
            1
        } else {
            self.threads_num - 2
        }
    }
}
