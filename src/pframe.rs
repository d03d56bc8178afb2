//! Physical page-frame cache.
//!
//! A `PFrame` caches the contents of exactly one page of one memory
//! object and carries the bookkeeping the rest of the subsystem relies
//! on: the busy flag while a fill or clean is in flight, the pin count
//! that keeps a frame from being reclaimed, and the dirty flag consulted
//! on writeback. Frames live in a `FrameTable` arena and are addressed
//! by `FrameId` handles; the table is owned by the object cache and
//! never reached through globals.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use log::trace;

use crate::mmobj::MmObjId;
use crate::VmError;

/// Page size in bytes (4KB).
pub const PAGE_SIZE: usize = 4096;

/// log2 of `PAGE_SIZE`.
pub const PAGE_SHIFT: usize = 12;

/// Virtual page number covering `addr`.
pub const fn addr_to_pn(addr: usize) -> u32 {
    (addr >> PAGE_SHIFT) as u32
}

/// First byte address of page number `pn`.
pub const fn pn_to_addr(pn: u32) -> usize {
    (pn as usize) << PAGE_SHIFT
}

/// Byte offset of `addr` within its page.
pub const fn page_offset(addr: usize) -> usize {
    addr & (PAGE_SIZE - 1)
}

/// Page frame handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub u64);

/// One cached page: contents plus residency bookkeeping.
#[derive(Debug)]
pub struct PFrame {
    /// Object page number this frame caches
    pub pagenum: u32,
    /// Object the frame belongs to
    pub obj: MmObjId,
    pincount: u32,
    busy: bool,
    dirty: bool,
    data: Box<[u8; PAGE_SIZE]>,
}

impl PFrame {
    fn new(obj: MmObjId, pagenum: u32) -> Self {
        Self {
            pagenum,
            obj,
            pincount: 0,
            busy: false,
            dirty: false,
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// Page contents.
    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Mutable page contents. Callers are responsible for dirtying the
    /// frame through the owning object's hook.
    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn set_busy(&mut self) {
        self.busy = true;
    }

    pub fn clear_busy(&mut self) {
        self.busy = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn is_pinned(&self) -> bool {
        self.pincount > 0
    }
}

/// Arena of page frames.
///
/// An optional capacity bound stands in for physical memory pressure:
/// once `in_use == capacity`, `alloc` reports `OutOfMemory` and callers
/// exercise their rollback paths.
#[derive(Debug)]
pub struct FrameTable {
    frames: BTreeMap<FrameId, PFrame>,
    next_id: u64,
    capacity: Option<usize>,
}

impl FrameTable {
    /// Unbounded frame table.
    pub fn new() -> Self {
        Self {
            frames: BTreeMap::new(),
            next_id: 1,
            capacity: None,
        }
    }

    /// Frame table holding at most `nframes` frames.
    pub fn with_capacity(nframes: usize) -> Self {
        Self {
            frames: BTreeMap::new(),
            next_id: 1,
            capacity: Some(nframes),
        }
    }

    /// Number of allocated frames.
    pub fn in_use(&self) -> usize {
        self.frames.len()
    }

    /// Allocate a zeroed frame for page `pagenum` of `obj`.
    pub fn alloc(&mut self, obj: MmObjId, pagenum: u32) -> Result<FrameId, VmError> {
        if let Some(cap) = self.capacity {
            if self.frames.len() >= cap {
                trace!("pframe: out of frames (capacity {})", cap);
                return Err(VmError::OutOfMemory);
            }
        }
        let id = FrameId(self.next_id);
        self.next_id += 1;
        self.frames.insert(id, PFrame::new(obj, pagenum));
        trace!("pframe: alloc {:?} for {:?} page {}", id, obj, pagenum);
        Ok(id)
    }

    /// Release a frame. The frame must already be unpinned and not busy;
    /// the owning object's release path clears both first.
    pub fn free(&mut self, id: FrameId) {
        let frame = self.frames.remove(&id).expect("freeing a stale frame handle");
        assert!(!frame.busy, "freeing a busy frame");
        assert!(frame.pincount == 0, "freeing a pinned frame");
        trace!("pframe: free {:?} ({:?} page {})", id, frame.obj, frame.pagenum);
    }

    pub fn get(&self, id: FrameId) -> Option<&PFrame> {
        self.frames.get(&id)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut PFrame> {
        self.frames.get_mut(&id)
    }

    /// Frame for a handle known to be live.
    pub fn frame(&self, id: FrameId) -> &PFrame {
        self.frames.get(&id).expect("stale frame handle")
    }

    /// Mutable frame for a handle known to be live.
    pub fn frame_mut(&mut self, id: FrameId) -> &mut PFrame {
        self.frames.get_mut(&id).expect("stale frame handle")
    }

    pub fn pin(&mut self, id: FrameId) {
        self.frame_mut(id).pincount += 1;
    }

    pub fn unpin(&mut self, id: FrameId) {
        let frame = self.frame_mut(id);
        assert!(frame.pincount > 0, "unpinning an unpinned frame");
        frame.pincount -= 1;
    }

    /// Copy the full contents of `src` into `dst`.
    pub(crate) fn copy_page(&mut self, src: FrameId, dst: FrameId) {
        let tmp = self.frame(src).data.clone();
        self.frame_mut(dst).data.copy_from_slice(&tmp[..]);
    }
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new()
    }
}
