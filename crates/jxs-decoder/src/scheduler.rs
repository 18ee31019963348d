/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! The three-stage decode pipeline.
//!
//! ```text
//!                             | <---------------------------\
//! [caller] -> [Init thread] --|-> [universal workers (N)] --|--> [Final thread] -> [caller]
//!           input queue       universal queue        final-sync queue    output queue
//! ```
//!
//! Init cuts a frame into per-slice byte ranges and dispatches them;
//! the universal workers entropy-decode slices (and, when the
//! vertical decomposition allows, run the per-precinct inverse
//! transform); Final aggregates slice completions in a reorder ring,
//! recomputes slice seams when the workers could not, runs the
//! full-frame colour transform, and delivers frames in input order.
//!
//! In packet-based ingress mode there is no Init thread; the caller's
//! `send_packet` invocations drive the slice scheduler directly.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{error, warn};

use jxs_core::image::ImageBuffer;

use crate::decoder::{
    decode_final_cpih, decode_final_slice_overlap, decode_slice, parse_frame_header,
    DecoderCommon, DecoderInstance, WorkerScratch
};
use crate::errors::DecoderError;
use crate::markers;
use crate::options::NotifyFn;
use crate::probe::get_slice_size;
use crate::queue::slice_sync::State;
use crate::queue::{CountGate, Queue, TryError};
use crate::shared::SharedImage;

/// A frame (or the end-of-codestream token) on its way to Init.
pub(crate) struct InputTask {
    /// `None` signals end of codestream.
    pub bitstream: Option<Vec<u8>>,
    pub image:     Option<ImageBuffer>,
    pub user_data: u64
}

/// One slice of one frame on its way to a universal worker.
pub(crate) struct UniversalTask {
    pub instance: Arc<DecoderInstance>,
    pub slice_id: u32,
    pub offset:   usize,
    pub len:      usize,
    /// Set when an upstream stage already failed the frame; the
    /// worker forwards it without decoding.
    pub error:    Option<DecoderError>
}

/// Slice completion notice for the Final stage.
pub(crate) struct FinalSyncMsg {
    pub instance: Arc<DecoderInstance>,
    pub slice_id: u32,
    pub error:    Option<DecoderError>
}

/// A finished (or failed) frame waiting for `get_frame`.
pub(crate) struct OutputItem {
    pub frame_num: u64,
    pub bitstream: Option<Vec<u8>>,
    pub image:     Option<ImageBuffer>,
    pub user_data: u64,
    pub error:     Option<DecoderError>
}

/// Everything the pipeline threads share.
pub(crate) struct Pipeline {
    pub common:            Arc<DecoderCommon>,
    pub shutdown:          std::sync::atomic::AtomicBool,
    pub input:             Queue<InputTask>,
    pub universal:         Queue<UniversalTask>,
    pub final_sync:        Queue<FinalSyncMsg>,
    pub output:            Queue<OutputItem>,
    pub pool:              Queue<Box<DecoderInstance>>,
    pub ring_gate:         CountGate,
    pub ring_size:         u32,
    pub universal_threads: u32,
    /// `Lcod` in packet-based mode, 0 otherwise.
    pub packet_mode_size:  usize,
    pub on_send_slot:      Option<NotifyFn>,
    pub on_frame_ready:    Option<NotifyFn>
}

impl Pipeline {
    /// Whether the per-slice readiness protocol lets the universal
    /// workers overlap the vertical transform across slices.
    pub fn sync_slices_idwt(&self) -> bool {
        let pi = &self.common.pi;
        pi.decom_v != 0
            && self.universal_threads > 1
            && pi.precincts_per_slice > 2
            && self.common.hdr.cpih == 0
    }

    /// Prepare a pooled instance for a new frame.
    pub fn prepare_instance(&self, instance: &mut DecoderInstance, frame_num: u64, ring_idx: u32) {
        instance.frame_num = frame_num;
        instance.ring_idx = ring_idx;
        instance.sync_slices_idwt = self.sync_slices_idwt();
        instance
            .slices_to_receive
            .store(self.common.pi.slice_num, Ordering::Release);
        for sync in &instance.slice_done {
            sync.reset();
        }
        instance.bitstream = None;
        instance.image = None;
        instance.user_data = 0;
    }
}

fn be16(buf: &[u8], offset: usize) -> Option<u16> {
    let b = buf.get(offset..offset + 2)?;
    Some(u16::from(b[0]) << 8 | u16::from(b[1]))
}

/// Cut the frame into slices and dispatch them to the workers.
///
/// Takes ownership of the `Arc` and moves it into the last dispatched
/// task, so the Final stage can reclaim sole ownership of the instance
/// the moment every slice has reported back.
fn send_slices_tasks(pipeline: &Pipeline, instance: Arc<DecoderInstance>, header_size: usize) {
    let pi = &pipeline.common.pi;

    // walk the slice boundaries first; the walk stops at the first
    // failure and that failure rides along on the failing slice's task
    let mut ranges: Vec<(usize, usize, Option<DecoderError>)> = Vec::new();
    {
        let bitstream: &[u8] = instance.bitstream.as_deref().unwrap_or(&[]);
        let mut offset = header_size;
        for slice in 0..pi.slice_num {
            let mut task_error = None;
            let mut slice_size = 0_usize;

            match get_slice_size(pi, &bitstream[offset.min(bitstream.len())..], slice) {
                Ok(size) => slice_size = size,
                Err(err) => task_error = Some(err)
            }

            if task_error.is_none() && slice + 1 == pi.slice_num {
                // the frame must close with EOC right after its last
                // slice
                let tail = offset + slice_size;
                match be16(bitstream, tail) {
                    Some(markers::EOC) => {
                        let frame_size = (tail + 2) as u32;
                        let lcod = instance.dyn_hdr.lcod;
                        if lcod != 0 && lcod != frame_size {
                            warn!(
                                "Frame decoded but may be broken, stream size {frame_size} \
                                 differs from declared {lcod}"
                            );
                        }
                    }
                    Some(_) => {
                        task_error = Some(DecoderError::invalid("EOC marker not found"));
                    }
                    None => task_error = Some(DecoderError::BitstreamTooShort)
                }
            }

            let failed = task_error.is_some();
            ranges.push((offset, slice_size, task_error));
            offset += slice_size;
            if failed {
                break;
            }
        }
    }

    if let Some((last_idx, &(_, _, ref err))) = ranges.iter().enumerate().last() {
        if err.is_some() {
            instance
                .slices_to_receive
                .store(last_idx as u32 + 1, Ordering::Release);
        }
    }

    let last_idx = ranges.len() - 1;
    let mut instance = Some(instance);
    for (slice, (offset, len, error)) in ranges.into_iter().enumerate() {
        // the last task takes the Arc itself
        let arc = if slice == last_idx {
            instance.take().unwrap_or_else(|| unreachable!())
        } else {
            Arc::clone(instance.as_ref().unwrap_or_else(|| unreachable!()))
        };
        let task = UniversalTask {
            instance: arc,
            slice_id: slice as u32,
            offset,
            len,
            error
        };
        if pipeline.universal.send(task).is_err() {
            return;
        }
    }
}

/// The Init stage: frame intake, header decode, slice dispatch.
pub(crate) fn init_thread(pipeline: Arc<Pipeline>) {
    let mut frame_num = 0_u64;
    let mut ring_idx = 0_u32;

    // initial input-slot availability
    if let Some(callback) = &pipeline.on_send_slot {
        callback();
    }

    while let Ok(task) = pipeline.input.recv() {
        let Ok(mut instance) = pipeline.pool.recv() else {
            break;
        };
        pipeline.prepare_instance(&mut instance, frame_num, ring_idx);
        frame_num += 1;
        ring_idx = (ring_idx + 1) % pipeline.ring_size;

        if pipeline.ring_gate.acquire().is_err() {
            break;
        }

        let mut frame_error = None;
        let mut header_size = 0_usize;
        match task.bitstream {
            None => frame_error = Some(DecoderError::EndOfCodestream),
            Some(bitstream) => {
                match parse_frame_header(&pipeline.common, &bitstream) {
                    Ok((dyn_hdr, size)) => {
                        instance.dyn_hdr = dyn_hdr;
                        header_size = size;
                    }
                    Err(err) => {
                        error!("Invalid header on frame {}", instance.frame_num);
                        frame_error = Some(err);
                    }
                }
                instance.bitstream = Some(bitstream);
                instance.image = task.image.map(SharedImage::new);
                instance.user_data = task.user_data;
            }
        }

        if let Some(err) = frame_error {
            // surface the failure through a single synthetic slice
            instance.slices_to_receive.store(1, Ordering::Release);
            let instance = Arc::new(*instance);
            let task = UniversalTask {
                instance,
                slice_id: 0,
                offset: 0,
                len: 0,
                error: Some(err)
            };
            if pipeline.universal.send(task).is_err() {
                break;
            }
        } else {
            send_slices_tasks(&pipeline, Arc::new(*instance), header_size);
        }

        if let Some(callback) = &pipeline.on_send_slot {
            callback();
        }
    }
}

/// A universal worker: decode whatever slice task comes in, then
/// report to Final.
pub(crate) fn universal_thread(pipeline: Arc<Pipeline>) {
    let mut scratch = WorkerScratch::new(&pipeline.common.pi);

    while let Ok(task) = pipeline.universal.recv() {
        let mut error = task.error;

        if error.is_none() {
            let bytes = task.instance.slice_bytes(task.offset, task.len);
            match decode_slice(
                &task.instance,
                &pipeline.common,
                &mut scratch,
                bytes,
                task.slice_id,
                &pipeline.shutdown
            ) {
                Ok(consumed) => {
                    if consumed != task.len {
                        warn!(
                            "Unexpected slice size on frame {}, expected {}, got {consumed}",
                            task.instance.frame_num, task.len
                        );
                    }
                }
                Err(err) => {
                    error!(
                        "Slice {} of frame {} failed: {err:?}",
                        task.slice_id, task.instance.frame_num
                    );
                    error = Some(err);
                }
            }
        }

        let msg = FinalSyncMsg {
            instance: task.instance,
            slice_id: task.slice_id,
            error
        };
        if pipeline.final_sync.send(msg).is_err() {
            break;
        }
    }
}

/// One slot of the output reorder ring.
struct RingItem {
    in_use:      bool,
    ready:       bool,
    received:    u32,
    frame_num:   u64,
    error:       Option<DecoderError>,
    error_slice: u32,
    next_recalc: u32,
    instance:    Option<Arc<DecoderInstance>>,
    out:         Option<OutputItem>
}

impl RingItem {
    fn empty() -> RingItem {
        RingItem {
            in_use:      false,
            ready:       false,
            received:    0,
            frame_num:   0,
            error:       None,
            error_slice: 0,
            next_recalc: 0,
            instance:    None,
            out:         None
        }
    }
}

/// The Final stage: aggregate slices per frame, recompute seams, run
/// the colour transform, deliver frames in input order.
pub(crate) fn final_thread(pipeline: Arc<Pipeline>) {
    let common = &pipeline.common;
    let pi = &common.pi;
    let cpih = common.hdr.cpih;

    let mut ring: Vec<RingItem> = (0..pipeline.ring_size).map(|_| RingItem::empty()).collect();
    let mut buffer_begin = 0_usize;
    let mut scratch = WorkerScratch::new(pi);
    let mut cpih_planes: Vec<Vec<i32>> = if cpih != 0 {
        pi.components
            .iter()
            .map(|c| vec![0_i32; c.width as usize * c.height as usize])
            .collect()
    } else {
        Vec::new()
    };

    while let Ok(msg) = pipeline.final_sync.recv() {
        let instance = msg.instance;
        let idx = instance.ring_idx as usize;

        // release any sibling waiting on this slice
        if !instance.sync_slices_idwt {
            instance.slice_done[msg.slice_id as usize].set(State::Ok);
        } else if msg.error.is_some() {
            instance.slice_done[msg.slice_id as usize].set(State::Error);
        }

        let item = &mut ring[idx];
        if !item.in_use {
            item.in_use = true;
            item.ready = false;
            item.received = 1;
            item.frame_num = instance.frame_num;
            item.error = msg.error;
            item.error_slice = if msg.error.is_some() { msg.slice_id } else { 0 };
            item.next_recalc = 0;
            item.instance = Some(Arc::clone(&instance));
            item.out = None;
        } else {
            debug_assert_eq!(item.frame_num, instance.frame_num);
            item.received += 1;
            if msg.error.is_some() && (item.error.is_none() || item.error_slice > msg.slice_id) {
                // keep only the first error
                item.error = msg.error;
                item.error_slice = msg.slice_id;
            }
        }

        // vertical overlap between slices when the workers could not
        // do it themselves
        if !instance.sync_slices_idwt && cpih == 0 && item.error.is_none() {
            let expected = instance.slices_to_receive.load(Ordering::Acquire);
            while item.next_recalc < expected
                && instance.slice_done[item.next_recalc as usize].get() != State::Init
            {
                match decode_final_slice_overlap(&instance, common, &mut scratch, item.next_recalc)
                {
                    Ok(()) => item.next_recalc += 1,
                    Err(err) => {
                        if item.next_recalc > msg.slice_id {
                            item.error_slice = item.next_recalc;
                            item.error = Some(err);
                        }
                        break;
                    }
                }
            }
        }

        let expected = instance.slices_to_receive.load(Ordering::Acquire);
        if item.received >= expected {
            // frame complete
            if item.error.is_none() && cpih != 0 {
                if let Err(err) =
                    decode_final_cpih(&instance, common, &mut scratch, &mut cpih_planes)
                {
                    item.error = Some(err);
                }
            }

            // this thread holds the last two references
            drop(instance);
            let arc = item.instance.take().unwrap_or_else(|| unreachable!());
            let mut boxed = match Arc::try_unwrap(arc) {
                Ok(inner) => Box::new(inner),
                Err(_) => {
                    // a task leaked its reference; keep the pipeline
                    // alive with a fresh instance
                    error!("Decoder instance leaked, re-allocating");
                    Box::new(DecoderInstance::new(common, pipeline.packet_mode_size))
                }
            };

            item.out = Some(OutputItem {
                frame_num: item.frame_num,
                bitstream: boxed.bitstream.take(),
                image:     boxed.image.take().map(SharedImage::into_inner),
                user_data: boxed.user_data,
                error:     item.error
            });
            item.ready = true;
            if pipeline.pool.send(boxed).is_err() {
                return;
            }
        } else {
            drop(instance);
        }

        // drain every contiguous ready slot in input order
        while ring[buffer_begin].ready {
            let item = &mut ring[buffer_begin];
            let out = item.out.take().unwrap_or_else(|| unreachable!());
            item.ready = false;
            item.in_use = false;
            pipeline.ring_gate.release();

            if pipeline.output.send(out).is_err() {
                return;
            }
            if let Some(callback) = &pipeline.on_frame_ready {
                callback();
            }
            buffer_begin = (buffer_begin + 1) % ring.len();
        }
    }
}

/// Slice-scheduler state for packet-based ingress.
pub(crate) enum PacketInstance {
    /// Header not complete yet; the instance is still exclusively
    /// owned.
    Filling(Box<DecoderInstance>),
    /// Slices are being dispatched.
    Dispatching(Arc<DecoderInstance>)
}

pub(crate) struct PacketScheduler {
    pub current:         Option<PacketInstance>,
    pub frame_num:       u64,
    pub ring_idx:        u32,
    pub slices_sent:     u32,
    pub header_size:     usize,
    pub bytes_filled:    usize,
    pub bytes_processed: usize
}

impl PacketScheduler {
    pub fn new() -> PacketScheduler {
        PacketScheduler {
            current:         None,
            frame_num:       0,
            ring_idx:        0,
            slices_sent:     0,
            header_size:     0,
            bytes_filled:    0,
            bytes_processed: 0
        }
    }

    fn instance_ref(&self) -> Option<&DecoderInstance> {
        match self.current.as_ref()? {
            PacketInstance::Filling(boxed) => Some(boxed),
            PacketInstance::Dispatching(arc) => Some(arc)
        }
    }
}

/// Accumulate one bitstream chunk and dispatch every slice that
/// becomes complete. Returns the bytes consumed from `bitstream`.
pub(crate) fn packet_send(
    pipeline: &Pipeline, scheduler: &mut PacketScheduler, bitstream: &[u8],
    image: Option<ImageBuffer>, user_data: u64
) -> Result<usize, DecoderError> {
    let pi = &pipeline.common.pi;

    // start a new frame context when none is in flight
    if scheduler.current.is_none() {
        let Ok(mut instance) = pipeline.pool.recv() else {
            return Err(DecoderError::EmptyQueue);
        };
        pipeline.prepare_instance(&mut instance, scheduler.frame_num, scheduler.ring_idx);
        scheduler.frame_num += 1;
        scheduler.ring_idx = (scheduler.ring_idx + 1) % pipeline.ring_size;
        scheduler.slices_sent = 0;
        scheduler.header_size = 0;
        scheduler.bytes_filled = 0;
        scheduler.bytes_processed = 0;

        instance.image = image.map(SharedImage::new);
        instance.user_data = user_data;

        if pipeline.ring_gate.acquire().is_err() {
            return Err(DecoderError::EmptyQueue);
        }
        scheduler.current = Some(PacketInstance::Filling(instance));
    }

    // copy the chunk into the frame buffer
    let capacity = pipeline.packet_mode_size;
    let bytes_used = (capacity - scheduler.bytes_filled).min(bitstream.len());
    {
        let instance = scheduler.instance_ref().ok_or(DecoderError::Internal)?;
        let buf = instance.packet_buf.as_ref().ok_or(DecoderError::Internal)?;
        // the ingress thread owns the unfilled tail of the buffer
        unsafe {
            buf.fill(scheduler.bytes_filled, &bitstream[..bytes_used]);
        }
    }
    scheduler.bytes_filled += bytes_used;

    // parse the header once enough bytes arrived
    if scheduler.header_size == 0 {
        let parse_result = {
            let instance = scheduler.instance_ref().ok_or(DecoderError::Internal)?;
            let buf = instance.packet_buf.as_ref().ok_or(DecoderError::Internal)?;
            let bytes = unsafe { buf.region(0, scheduler.bytes_filled) };
            parse_frame_header(&pipeline.common, bytes)
        };
        match parse_result {
            Ok((dyn_hdr, size)) => {
                let Some(PacketInstance::Filling(instance)) = scheduler.current.as_mut() else {
                    return Err(DecoderError::Internal);
                };
                instance.dyn_hdr = dyn_hdr;
                scheduler.header_size = size;
                scheduler.bytes_processed = size;
            }
            Err(DecoderError::BitstreamTooShort) => {
                if scheduler.bytes_filled == capacity {
                    // a full frame buffer that still cannot produce a
                    // header can never complete
                    let err = DecoderError::invalid("header exceeds declared frame size");
                    dispatch_packet_error(pipeline, scheduler, err)?;
                    return Err(err);
                }
                return Ok(bytes_used);
            }
            Err(err) => {
                // fail the frame through a synthetic slice task
                dispatch_packet_error(pipeline, scheduler, err)?;
                return Err(err);
            }
        }
    }

    // dispatch every complete slice
    loop {
        let slice = scheduler.slices_sent;
        let walk = {
            let instance = scheduler.instance_ref().ok_or(DecoderError::Internal)?;
            let buf = instance.packet_buf.as_ref().ok_or(DecoderError::Internal)?;
            let bytes = unsafe {
                buf.region(
                    scheduler.bytes_processed,
                    scheduler.bytes_filled - scheduler.bytes_processed
                )
            };
            get_slice_size(pi, bytes, slice)
        };
        let slice_size = match walk {
            Ok(size) => size,
            Err(DecoderError::BitstreamTooShort) => {
                if scheduler.bytes_filled == capacity {
                    let err = DecoderError::invalid("slices exceed declared frame size");
                    dispatch_packet_error(pipeline, scheduler, err)?;
                    return Err(err);
                }
                return Ok(bytes_used);
            }
            Err(err) => {
                dispatch_packet_error(pipeline, scheduler, err)?;
                return Err(err);
            }
        };

        let is_last = slice + 1 == pi.slice_num;
        let instance = promote_to_dispatching(scheduler)?;
        if is_last {
            // drop the scheduler's reference before the last task goes
            // out, so Final can reclaim the instance
            scheduler.current = None;
        }
        let task = UniversalTask {
            instance,
            slice_id: slice,
            offset: scheduler.bytes_processed,
            len: slice_size,
            error: None
        };
        if pipeline.universal.send(task).is_err() {
            return Err(DecoderError::EmptyQueue);
        }
        scheduler.slices_sent += 1;
        scheduler.bytes_processed += slice_size;

        if is_last {
            return Ok(bytes_used);
        }
    }
}

/// Arc the in-flight instance on first dispatch.
fn promote_to_dispatching(
    scheduler: &mut PacketScheduler
) -> Result<Arc<DecoderInstance>, DecoderError> {
    match scheduler.current.take() {
        Some(PacketInstance::Filling(boxed)) => {
            let arc = Arc::new(*boxed);
            scheduler.current = Some(PacketInstance::Dispatching(Arc::clone(&arc)));
            Ok(arc)
        }
        Some(PacketInstance::Dispatching(arc)) => {
            scheduler.current = Some(PacketInstance::Dispatching(Arc::clone(&arc)));
            Ok(arc)
        }
        None => Err(DecoderError::Internal)
    }
}

/// Fail the in-flight packet-mode frame through the pipeline so the
/// caller still receives an output descriptor for it.
fn dispatch_packet_error(
    pipeline: &Pipeline, scheduler: &mut PacketScheduler, err: DecoderError
) -> Result<(), DecoderError> {
    let slice = scheduler.slices_sent;
    {
        let instance = scheduler.instance_ref().ok_or(DecoderError::Internal)?;
        instance
            .slices_to_receive
            .store(slice + 1, Ordering::Release);
    }
    let instance = promote_to_dispatching(scheduler)?;
    scheduler.current = None;
    let task = UniversalTask {
        instance,
        slice_id: slice,
        offset: 0,
        len: 0,
        error: Some(err)
    };
    pipeline
        .universal
        .send(task)
        .map_err(|_| DecoderError::EmptyQueue)
}

/// Queue the end-of-codestream token in packet mode.
pub(crate) fn packet_send_eoc(
    pipeline: &Pipeline, scheduler: &mut PacketScheduler
) -> Result<(), DecoderError> {
    let Ok(mut instance) = pipeline.pool.recv() else {
        return Err(DecoderError::EmptyQueue);
    };
    pipeline.prepare_instance(&mut instance, scheduler.frame_num, scheduler.ring_idx);
    scheduler.frame_num += 1;
    scheduler.ring_idx = (scheduler.ring_idx + 1) % pipeline.ring_size;
    instance.slices_to_receive.store(1, Ordering::Release);

    if pipeline.ring_gate.acquire().is_err() {
        return Err(DecoderError::EmptyQueue);
    }

    let task = UniversalTask {
        instance: Arc::new(*instance),
        slice_id: 0,
        offset: 0,
        len: 0,
        error: Some(DecoderError::EndOfCodestream)
    };
    pipeline
        .universal
        .send(task)
        .map_err(|_| DecoderError::EmptyQueue)
}

/// Non-blocking and blocking frame intake used by `send_frame`.
pub(crate) fn frame_send(
    pipeline: &Pipeline, task: InputTask, blocking: bool
) -> Result<(), DecoderError> {
    if blocking {
        pipeline.input.send(task).map_err(|_| DecoderError::EmptyQueue)
    } else {
        match pipeline.input.try_send(task) {
            Ok(()) => Ok(()),
            Err((_, TryError::Full)) => Err(DecoderError::EmptyQueue),
            Err(_) => Err(DecoderError::EmptyQueue)
        }
    }
}
