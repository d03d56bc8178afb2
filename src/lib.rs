//! Wren VM - the virtual memory subsystem of the Wren teaching kernel
//!
//! This crate implements per-process address spaces, demand paging with
//! copy-on-write sharing, and the page fault resolver:
//! - pframe: physical page-frame cache (page contents plus bookkeeping)
//! - mmobj: memory objects, the polymorphic backing store abstraction
//! - anon: zero-fill anonymous memory
//! - shadow: copy-on-write shadow objects and chains
//! - vmmap: the per-process region map of virtual memory areas
//! - pagefault: fault validation, page resolution, and installation
//!
//! All pools are explicit values (`ObjectCache`, `FrameTable`), so the
//! subsystem runs under the hosted test harness without a live kernel.
//! Hardware page tables, the scheduler, and the file system stay behind
//! the `PageTable`, `ProcessControl`, and `Pager`/`MmapSource` traits.

#![cfg_attr(not(test), no_std)]
// Kernel types have specialized construction that doesn't fit Default
#![allow(clippy::new_without_default)]

extern crate alloc;

pub mod anon;
pub mod mmobj;
pub mod pframe;
pub mod pagefault;
pub mod shadow;
pub mod vmmap;

pub use mmobj::{MmObj, MmObjId, MmObjKind, ObjectCache, Pager};
pub use pagefault::{
    dispatch_fault, handle_pagefault, FaultCause, FaultError, PageTable, ProcessControl, PtFlags,
};
pub use pframe::{FrameId, FrameTable, PFrame, PAGE_SHIFT, PAGE_SIZE};
pub use vmmap::{
    Direction, MapType, MmapSource, Prot, Vmarea, Vmmap, USER_MEM_HIGH, USER_MEM_LOW,
};

/// Recoverable failures of VM operations.
///
/// Structural violations (overlapping inserts, out-of-window ranges) are
/// programming errors and assert instead; this enum covers the conditions
/// a correct caller still has to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No free virtual range of the requested size
    NoSpace,
    /// The frame cache is exhausted
    OutOfMemory,
    /// An address in the requested range is not mapped
    Fault,
    /// The backing store failed to fill or clean a page
    Io,
}

impl VmError {
    /// Negative errno equivalent, for the syscall layer above.
    pub const fn errno(self) -> i32 {
        match self {
            VmError::NoSpace | VmError::OutOfMemory => -12, // ENOMEM
            VmError::Fault => -14,                          // EFAULT
            VmError::Io => -5,                              // EIO
        }
    }
}

/// Handle to the object cache shared by every address space.
///
/// Memory objects are reachable from more than one process once files are
/// mapped or fork has run, so concurrent faulters serialize on this lock.
/// Each core operation takes `&mut ObjectCache`; a caller holds the lock
/// for one whole fault or fork and never across a context switch.
pub type SharedObjects = alloc::sync::Arc<spin::Mutex<ObjectCache>>;

/// Create a fresh shared object cache.
pub fn shared_objects() -> SharedObjects {
    alloc::sync::Arc::new(spin::Mutex::new(ObjectCache::new()))
}
