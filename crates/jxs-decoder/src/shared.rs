/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Shared mutable buffers for the worker pipeline.
//!
//! The frame-wide coefficient store and the output image are written
//! by several worker threads at once, each touching a disjoint region:
//! slice `s` owns precinct rows `[s * pps, (s + 1) * pps)` of the
//! store and the matching image rows, and cross-slice reads only
//! happen after the owning slice's readiness variable says `Ok`.
//!
//! That protocol cannot be expressed to the borrow checker, so the two
//! cell types below hand out raw regions under `unsafe` accessors.
//! This is the only unsafe code in the workspace; every caller states
//! which region of the partition it owns.

use core::cell::UnsafeCell;

use jxs_core::image::{ImageBuffer, PlaneBuffer};

/// The frame-wide 16-bit coefficient store.
///
/// # Safety contract
/// A region may be mutably accessed only by the worker that owns the
/// enclosing slice per the partition above; shared reads of a region
/// require the owning slice to have completed.
pub struct SharedCoeffs {
    data: UnsafeCell<Vec<u16>>
}

// the partition protocol makes concurrent access disjoint
unsafe impl Sync for SharedCoeffs {}

impl SharedCoeffs {
    pub fn new(len: usize) -> SharedCoeffs {
        SharedCoeffs {
            data: UnsafeCell::new(vec![0; len])
        }
    }

    /// Mutable view of `[start, start + len)`.
    ///
    /// # Safety
    /// The caller must own the enclosing slice region and no other
    /// thread may touch the range concurrently.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn region_mut(&self, start: usize, len: usize) -> &mut [u16] {
        &mut (&mut (*self.data.get()))[start..start + len]
    }

    /// Shared view of `[start, start + len)`.
    ///
    /// # Safety
    /// The slice owning the range must have finished writing it.
    pub unsafe fn region(&self, start: usize, len: usize) -> &[u16] {
        &(&(*self.data.get()))[start..start + len]
    }
}

/// The packet-mode accumulation buffer.
///
/// # Safety contract
/// The caller thread appends strictly increasing regions through
/// [`Self::fill`]; a region becomes immutable the moment a slice
/// spanning it is dispatched, and workers only read dispatched
/// regions.
pub struct SharedBytes {
    data: UnsafeCell<Vec<u8>>
}

unsafe impl Sync for SharedBytes {}

impl SharedBytes {
    pub fn new(len: usize) -> SharedBytes {
        SharedBytes {
            data: UnsafeCell::new(vec![0; len])
        }
    }

    /// Copy `bytes` into the buffer at `offset`.
    ///
    /// # Safety
    /// Only the ingress thread may call this, and never over a
    /// dispatched region.
    pub unsafe fn fill(&self, offset: usize, bytes: &[u8]) {
        (&mut (*self.data.get()))[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Shared view of `[start, start + len)`.
    ///
    /// # Safety
    /// The range must have been fully filled and dispatched.
    pub unsafe fn region(&self, start: usize, len: usize) -> &[u8] {
        &(&(*self.data.get()))[start..start + len]
    }
}

/// The caller-provided output image while a frame is in flight.
///
/// # Safety contract
/// Rows are partitioned by slice exactly like the coefficient store;
/// a row is written once, by the stage that reconstructs it.
pub struct SharedImage {
    inner: UnsafeCell<ImageBuffer>
}

unsafe impl Sync for SharedImage {}

impl SharedImage {
    pub fn new(image: ImageBuffer) -> SharedImage {
        SharedImage {
            inner: UnsafeCell::new(image)
        }
    }

    pub fn into_inner(self) -> ImageBuffer {
        self.inner.into_inner()
    }

    pub fn stride(&self, comp: usize) -> usize {
        unsafe { (*self.inner.get()).stride[comp] }
    }

    /// Whether plane `comp` stores 8-bit samples.
    pub fn plane_is_u8(&self, comp: usize) -> bool {
        unsafe { matches!((&(*self.inner.get()).planes)[comp], PlaneBuffer::U8(_)) }
    }

    /// Mutable 8-bit output row `line` of plane `comp`, `width`
    /// samples.
    ///
    /// # Safety
    /// The caller must be the unique writer of this row.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn row_u8_mut(&self, comp: usize, line: usize, width: usize) -> &mut [u8] {
        let image = &mut *self.inner.get();
        let start = line * image.stride[comp];
        match &mut image.planes[comp] {
            PlaneBuffer::U8(plane) => &mut plane[start..start + width],
            PlaneBuffer::U16(_) => unreachable!("plane depth validated at send time")
        }
    }

    /// Mutable 16-bit output row `line` of plane `comp`, `width`
    /// samples.
    ///
    /// # Safety
    /// The caller must be the unique writer of this row.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn row_u16_mut(&self, comp: usize, line: usize, width: usize) -> &mut [u16] {
        let image = &mut *self.inner.get();
        let start = line * image.stride[comp];
        match &mut image.planes[comp] {
            PlaneBuffer::U16(plane) => &mut plane[start..start + width],
            PlaneBuffer::U8(_) => unreachable!("plane depth validated at send time")
        }
    }
}
