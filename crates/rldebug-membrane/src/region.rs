//! Guarded storage regions backing tracked memory blocks.
//!
//! One platform allocation holds `[head guard | payload | tail guard]`:
//! - head guard at offset 0 (`GUARD_SIZE` bytes)
//! - payload at offset `GUARD_SIZE` (`size` bytes)
//! - tail guard at offset `GUARD_SIZE + size` (`GUARD_SIZE` bytes)
//!
//! The payload address is what clients hold. An out-of-bounds write of up
//! to `GUARD_SIZE` bytes on either side lands inside this allocation and is
//! caught by the corruption detector on the next sweep.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::guard::{GUARD_SIZE, GuardPattern, TOTAL_GUARD_OVERHEAD};

/// Alignment of every region (and therefore of every payload).
pub const REGION_ALIGN: usize = 16;

/// Fill byte for payload bytes a plain allocation hands out.
pub const UNINIT_FILL: u8 = 0xCD;

/// How freshly exposed payload bytes are initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Poison pattern (`UNINIT_FILL`), for malloc-like acquisitions.
    Poison,
    /// All zero, for calloc-like acquisitions.
    Zero,
}

/// An owned `[head | payload | tail]` allocation from the platform allocator.
#[derive(Debug)]
pub struct GuardedRegion {
    base: NonNull<u8>,
    size: usize,
}

impl GuardedRegion {
    fn layout_for(size: usize) -> Option<Layout> {
        let total = size.checked_add(TOTAL_GUARD_OVERHEAD)?;
        Layout::from_size_align(total, REGION_ALIGN).ok()
    }

    /// Acquire a region with a `size`-byte payload.
    ///
    /// Returns `None` when the platform allocator reports exhaustion or the
    /// size cannot be laid out. Guards are left zeroed; call
    /// [`stamp_guards`](Self::stamp_guards) before handing the payload out.
    #[must_use]
    pub fn allocate(size: usize, fill: Fill) -> Option<Self> {
        let layout = Self::layout_for(size)?;
        // SAFETY: layout is valid and non-zero (it always includes both guards).
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let base = NonNull::new(raw)?;
        let mut region = Self { base, size };
        if fill == Fill::Poison {
            region.payload_mut().fill(UNINIT_FILL);
        }
        Some(region)
    }

    /// Resize the payload in place, preserving `min(old, new)` payload bytes.
    ///
    /// On platform exhaustion the region is left untouched and `false` is
    /// returned. Newly exposed payload bytes are poisoned; guards must be
    /// restamped by the caller.
    pub fn resize(&mut self, new_size: usize) -> bool {
        let Some(new_layout) = Self::layout_for(new_size) else {
            return false;
        };
        let Some(old_layout) = Self::layout_for(self.size) else {
            return false;
        };
        // SAFETY: `base` was allocated with `old_layout` by this type, and
        // `new_layout` was validated by `Layout::from_size_align`.
        let raw = unsafe { std::alloc::realloc(self.base.as_ptr(), old_layout, new_layout.size()) };
        let Some(base) = NonNull::new(raw) else {
            return false;
        };
        let old_size = self.size;
        self.base = base;
        self.size = new_size;
        if new_size > old_size {
            self.payload_mut()[old_size..].fill(UNINIT_FILL);
        }
        true
    }

    /// Payload size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Address of the first payload byte.
    #[must_use]
    pub fn payload_ptr(&self) -> NonNull<u8> {
        // SAFETY: the allocation is at least GUARD_SIZE bytes long, so the
        // payload offset stays in bounds (one-past-the-end for size 0 + tail).
        unsafe { self.base.add(GUARD_SIZE) }
    }

    /// Write the reference patterns into both guard regions.
    pub fn stamp_guards(&mut self, head: &GuardPattern, tail: &GuardPattern) {
        let tail_offset = GUARD_SIZE + self.size;
        // SAFETY: both guard ranges lie inside the allocation (see layout_for);
        // the source arrays are GUARD_SIZE bytes and do not overlap the region.
        unsafe {
            std::ptr::copy_nonoverlapping(head.bytes.as_ptr(), self.base.as_ptr(), GUARD_SIZE);
            std::ptr::copy_nonoverlapping(
                tail.bytes.as_ptr(),
                self.base.as_ptr().add(tail_offset),
                GUARD_SIZE,
            );
        }
    }

    /// Bytes currently occupying the head guard region.
    #[must_use]
    pub fn head_guard(&self) -> &[u8] {
        // SAFETY: offset 0..GUARD_SIZE is inside the allocation and was
        // initialized by alloc_zeroed.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), GUARD_SIZE) }
    }

    /// Bytes currently occupying the tail guard region.
    #[must_use]
    pub fn tail_guard(&self) -> &[u8] {
        // SAFETY: the tail guard range is inside the allocation and initialized.
        unsafe {
            std::slice::from_raw_parts(self.base.as_ptr().add(GUARD_SIZE + self.size), GUARD_SIZE)
        }
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        // SAFETY: payload range is inside the allocation and always initialized
        // (zeroed or poisoned at allocation/resize time).
        unsafe { std::slice::from_raw_parts(self.payload_ptr().as_ptr(), self.size) }
    }

    /// Mutable payload bytes.
    #[must_use]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: as for `payload`; `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.payload_ptr().as_ptr(), self.size) }
    }
}

impl Drop for GuardedRegion {
    fn drop(&mut self) {
        if let Some(layout) = Self::layout_for(self.size) {
            // SAFETY: base was allocated (or reallocated) with exactly this layout.
            unsafe { std::alloc::dealloc(self.base.as_ptr(), layout) };
        }
    }
}
