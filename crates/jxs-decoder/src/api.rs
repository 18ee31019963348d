/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! The public decoder control surface.
//!
//! A [`JxsDecoder`] is initialized from the header of a first
//! codestream, spawns its pipeline threads, and then accepts frames
//! through [`send_frame`](JxsDecoder::send_frame) (whole codestreams)
//! or [`send_packet`](JxsDecoder::send_packet) (chunked, constant
//! bitrate only). Decoded frames come back in input order through
//! [`get_frame`](JxsDecoder::get_frame).

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::trace;

use jxs_core::image::{ColourFormat, ComponentConfig, ImageBuffer, ImageConfig, PlaneBuffer};

use crate::decoder::{CoeffLayout, DecoderCommon, DecoderInstance, INSTANCE_POOL_SIZE};
use crate::errors::DecoderError;
use crate::headers::{probe, PictureHeaderConst, PictureHeaderDynamic};
use crate::options::DecoderOptions;
use crate::pi::Pi;
use crate::queue::{CountGate, Queue, TryError};
use crate::scheduler::{
    final_thread, frame_send, init_thread, packet_send, packet_send_eoc, universal_thread,
    InputTask, OutputItem, PacketScheduler, Pipeline
};

/// API version implemented by this library.
pub const API_VERSION_MAJOR: u64 = 0;
pub const API_VERSION_MINOR: u64 = 10;

/// One frame handed to the decoder.
#[derive(Default)]
pub struct Frame {
    /// A complete codestream (`send_frame`) or an arbitrary chunk of
    /// one (`send_packet`).
    pub bitstream: Vec<u8>,
    /// Output buffers the decoder writes into. In packet mode only the
    /// chunk that starts a frame needs one.
    pub image:     ImageBuffer,
    /// Opaque caller token, returned with the decoded frame.
    pub user_data: u64
}

/// One frame handed back by the decoder.
#[derive(Default)]
pub struct DecodedFrame {
    pub frame_num: u64,
    /// The input buffer, returned for reuse.
    pub bitstream: Vec<u8>,
    pub image:     ImageBuffer,
    pub user_data: u64
}

/// A running JPEG XS decoder.
pub struct JxsDecoder {
    pipeline:     Arc<Pipeline>,
    threads:      Vec<JoinHandle<()>>,
    packet_state: Mutex<PacketScheduler>,
    image_config: ImageConfig,
    closed:       bool
}

impl JxsDecoder {
    /// Initialize a decoder from the header of `codestream`.
    ///
    /// The stream's constant picture header becomes the decoder
    /// configuration: later frames must match it or decode fails with
    /// [`DecoderError::ConfigChange`].
    ///
    /// # Errors
    /// - [`DecoderError::InvalidApiVersion`] when the requested API is
    ///   newer than [`API_VERSION_MAJOR`].[`API_VERSION_MINOR`]
    /// - [`DecoderError::BadParameter`] for an empty buffer or packet
    ///   mode on a variable-bitrate stream
    /// - header parse errors as [`DecoderError::BitstreamTooShort`] /
    ///   [`DecoderError::InvalidBitstream`]
    pub fn init(
        api_version_major: u64, api_version_minor: u64, options: DecoderOptions, codestream: &[u8]
    ) -> Result<JxsDecoder, DecoderError> {
        if api_version_major > API_VERSION_MAJOR
            || (api_version_major == API_VERSION_MAJOR && api_version_minor > API_VERSION_MINOR)
        {
            return Err(DecoderError::InvalidApiVersion);
        }

        let mut hdr = PictureHeaderConst::default();
        let mut dyn_hdr = PictureHeaderDynamic::default();
        probe(codestream, &mut hdr, &mut dyn_hdr)?;

        if options.packetization_mode && dyn_hdr.lcod == 0 {
            // chunked ingress needs the frame size up front
            return Err(DecoderError::BadParameter(
                "packet-based ingress requires constant-bitrate streams"
            ));
        }

        let pi = Pi::compute(&hdr)?;
        let image_config = build_image_config(&pi, &hdr)?;
        let layout = CoeffLayout::new(&pi);
        let common = Arc::new(DecoderCommon {
            pi,
            hdr,
            layout,
            image_config: image_config.clone()
        });

        let universal_threads = options.universal_threads();
        let queue_depth = (2 * universal_threads + 10) as usize;
        let ring_size = universal_threads + 20;
        let packet_mode_size = if options.packetization_mode {
            dyn_hdr.lcod as usize
        } else {
            0
        };

        trace!(
            "Decoder init: {}x{}, {} components, {}h/{}v decompositions, {} universal threads",
            common.pi.width,
            common.pi.height,
            common.pi.comps_num,
            common.pi.decom_h,
            common.pi.decom_v,
            universal_threads
        );

        let pipeline = Arc::new(Pipeline {
            common: Arc::clone(&common),
            shutdown: std::sync::atomic::AtomicBool::new(false),
            input: Queue::new(queue_depth),
            universal: Queue::new(universal_threads as usize),
            final_sync: Queue::new(queue_depth),
            output: Queue::new(queue_depth),
            pool: Queue::new(INSTANCE_POOL_SIZE),
            ring_gate: CountGate::new(ring_size as usize),
            ring_size,
            universal_threads,
            packet_mode_size,
            on_send_slot: options.on_send_slot_available.clone(),
            on_frame_ready: options.on_frame_ready.clone()
        });

        for _ in 0..INSTANCE_POOL_SIZE {
            let instance = Box::new(DecoderInstance::new(&common, packet_mode_size));
            pipeline
                .pool
                .send(instance)
                .map_err(|_| DecoderError::InsufficientResources)?;
        }

        let mut threads = Vec::new();
        if !options.packetization_mode {
            let p = Arc::clone(&pipeline);
            threads.push(
                std::thread::Builder::new()
                    .name("jxs-init".into())
                    .spawn(move || init_thread(p))
                    .map_err(|_| DecoderError::InsufficientResources)?
            );
        }
        for n in 0..universal_threads {
            let p = Arc::clone(&pipeline);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("jxs-universal-{n}"))
                    .spawn(move || universal_thread(p))
                    .map_err(|_| DecoderError::InsufficientResources)?
            );
        }
        {
            let p = Arc::clone(&pipeline);
            threads.push(
                std::thread::Builder::new()
                    .name("jxs-final".into())
                    .spawn(move || final_thread(p))
                    .map_err(|_| DecoderError::InsufficientResources)?
            );
        }

        Ok(JxsDecoder {
            pipeline,
            threads,
            packet_state: Mutex::new(PacketScheduler::new()),
            image_config,
            closed: false
        })
    }

    /// The image configuration derived from the init codestream.
    pub fn image_config(&self) -> &ImageConfig {
        &self.image_config
    }

    /// Queue one complete-frame codestream plus its output buffers.
    ///
    /// # Errors
    /// [`DecoderError::EmptyQueue`] when non-blocking and the input
    /// queue is full; [`DecoderError::BadParameter`] when the image
    /// buffers are too small or of the wrong depth.
    pub fn send_frame(&self, frame: Frame, blocking: bool) -> Result<(), DecoderError> {
        if self.pipeline.packet_mode_size != 0 {
            return Err(DecoderError::BadParameter(
                "decoder initialized for packet-based input, use send_packet"
            ));
        }
        self.validate_image(&frame.image)?;
        frame_send(
            &self.pipeline,
            InputTask {
                bitstream: Some(frame.bitstream),
                image:     Some(frame.image),
                user_data: frame.user_data
            },
            blocking
        )
    }

    /// Feed one chunk of a constant-bitrate codestream; returns the
    /// bytes consumed. Bytes beyond the current frame stay unconsumed;
    /// call again with the remainder (and the next frame's buffers).
    pub fn send_packet(&self, frame: Frame) -> Result<usize, DecoderError> {
        if self.pipeline.packet_mode_size == 0 {
            return Err(DecoderError::BadParameter(
                "decoder initialized for frame-based input, use send_frame"
            ));
        }
        let image = if frame.image.planes.is_empty() {
            None
        } else {
            self.validate_image(&frame.image)?;
            Some(frame.image)
        };
        let mut scheduler = self.packet_state.lock().unwrap();
        packet_send(
            &self.pipeline,
            &mut scheduler,
            &frame.bitstream,
            image,
            frame.user_data
        )
    }

    /// Signal end of codestream; a later `get_frame` returns
    /// [`DecoderError::EndOfCodestream`] once all prior frames have
    /// been delivered.
    pub fn send_eoc(&self) -> Result<(), DecoderError> {
        if self.pipeline.packet_mode_size != 0 {
            let mut scheduler = self.packet_state.lock().unwrap();
            packet_send_eoc(&self.pipeline, &mut scheduler)
        } else {
            frame_send(
                &self.pipeline,
                InputTask {
                    bitstream: None,
                    image:     None,
                    user_data: 0
                },
                true
            )
        }
    }

    /// Collect the next decoded frame in input order.
    ///
    /// # Errors
    /// - [`DecoderError::EmptyQueue`] when non-blocking and nothing is
    ///   ready
    /// - [`DecoderError::EndOfCodestream`] after `send_eoc` drained
    /// - the frame's decode error; its buffers are released
    pub fn get_frame(&self, blocking: bool) -> Result<DecodedFrame, DecoderError> {
        let item = if blocking {
            self.pipeline
                .output
                .recv()
                .map_err(|_| DecoderError::EmptyQueue)?
        } else {
            match self.pipeline.output.try_recv() {
                Ok(item) => item,
                Err(TryError::Empty) => return Err(DecoderError::EmptyQueue),
                Err(_) => return Err(DecoderError::EmptyQueue)
            }
        };
        into_decoded(item)
    }

    /// Shut the pipeline down and join every thread. Frames still in
    /// flight are dropped; none are emitted after this returns.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pipeline
            .shutdown
            .store(true, std::sync::atomic::Ordering::Release);
        self.pipeline.input.close();
        self.pipeline.universal.close();
        self.pipeline.final_sync.close();
        self.pipeline.output.close();
        self.pipeline.pool.close();
        self.pipeline.ring_gate.close();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }

    /// Check the caller's buffers against the stream configuration.
    fn validate_image(&self, image: &ImageBuffer) -> Result<(), DecoderError> {
        let config = &self.image_config;
        if image.planes.len() < config.components_num as usize {
            return Err(DecoderError::BadParameter("missing component planes"));
        }
        for c in 0..config.components_num as usize {
            let comp = &config.components[c];
            let plane = &image.planes[c];
            match plane {
                PlaneBuffer::U8(_) if config.bit_depth > 8 => {
                    return Err(DecoderError::BadParameter("plane depth mismatch"));
                }
                PlaneBuffer::U16(_) if config.bit_depth <= 8 => {
                    return Err(DecoderError::BadParameter("plane depth mismatch"));
                }
                _ => {}
            }
            if image.stride[c] < comp.width as usize {
                return Err(DecoderError::BadParameter("stride below component width"));
            }
            // the last row may be shorter than the stride (interlaced
            // output into row-interleaved frames)
            let min_samples =
                image.stride[c] * (comp.height as usize - 1) + comp.width as usize;
            if plane.len() < min_samples {
                return Err(DecoderError::BadParameter("image plane too small"));
            }
        }
        Ok(())
    }
}

impl Drop for JxsDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

fn into_decoded(item: OutputItem) -> Result<DecodedFrame, DecoderError> {
    if let Some(error) = item.error {
        return Err(error);
    }
    Ok(DecodedFrame {
        frame_num: item.frame_num,
        bitstream: item.bitstream.unwrap_or_default(),
        image:     item.image.unwrap_or_default(),
        user_data: item.user_data
    })
}

/// Build the advertised image configuration from the computed picture
/// info.
fn build_image_config(pi: &Pi, hdr: &PictureHeaderConst) -> Result<ImageConfig, DecoderError> {
    let mut config = ImageConfig {
        width:          pi.width,
        height:         pi.height,
        bit_depth:      hdr.bit_depth[0],
        components_num: pi.comps_num,
        format:         None,
        components:     [ComponentConfig::default(); jxs_core::image::MAX_COMPONENTS]
    };
    let pixel_size = config.pixel_size();
    for (c, comp) in pi.components.iter().enumerate() {
        config.components[c] = ComponentConfig {
            width:     comp.width,
            height:    comp.height,
            byte_size: comp.width as usize * comp.height as usize * pixel_size
        };
    }
    let format = ColourFormat::from_params(pi.comps_num, &hdr.sx, &hdr.sy);
    if format == ColourFormat::Invalid {
        return Err(DecoderError::invalid("unsupported component layout"));
    }
    config.format = Some(format);
    Ok(config)
}
