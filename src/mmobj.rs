//! Memory objects - the backing store abstraction.
//!
//! Every virtual memory area is backed by a memory object: anonymous
//! zero-fill memory, a copy-on-write shadow over another object, or a
//! vnode's pages supplied through an external `Pager`. All objects
//! answer the same capability set (ref/put, lookup, fill, dirty, clean)
//! and are reference counted by hand: each resident frame holds one
//! reference on its object, so an object dies exactly when its count
//! falls to its resident page count and nothing else refers to it.
//!
//! Objects live in the `ObjectCache` arena and are addressed by
//! `MmObjId` handles. The cache also owns the frame table; it is the one
//! structure shared across address spaces and callers serialize on it
//! (see `SharedObjects` at the crate root).

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;

use log::trace;

use crate::pframe::{FrameId, FrameTable, PAGE_SIZE};
use crate::VmError;

/// Memory object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MmObjId(pub u64);

/// Backing store for a vnode-backed object.
///
/// Supplied by the file system when a file is mapped; all methods may
/// block on device I/O. `dirty` is the hook run before the first write
/// to a clean page, where sparse stores allocate backing blocks.
pub trait Pager: Send + Sync {
    /// Populate `buf` with the contents of page `pagenum`.
    fn fill(&self, pagenum: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<(), VmError>;

    /// Write `buf` back to the store as page `pagenum`.
    fn clean(&self, pagenum: u32, buf: &[u8; PAGE_SIZE]) -> Result<(), VmError>;

    /// Prepare page `pagenum` to be written for the first time.
    fn dirty(&self, pagenum: u32) -> Result<(), VmError> {
        let _ = pagenum;
        Ok(())
    }
}

/// Object variant. Dispatch is static per tag; the variant is chosen at
/// creation and never changes.
#[derive(Clone)]
pub enum MmObjKind {
    /// Zero-fill memory, the terminal link of every shadow chain
    Anon,
    /// Copy-on-write layer over `shadowed`
    Shadow {
        /// Backing object; the chain link holds one reference on it
        shadowed: MmObjId,
    },
    /// File pages supplied by an external pager
    Vnode {
        /// The file system's backing store for this object
        pager: Arc<dyn Pager>,
    },
}

impl fmt::Debug for MmObjKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmObjKind::Anon => f.write_str("Anon"),
            MmObjKind::Shadow { shadowed } => f.debug_struct("Shadow").field("shadowed", shadowed).finish(),
            MmObjKind::Vnode { .. } => f.write_str("Vnode"),
        }
    }
}

/// One memory object: variant tag, reference count, resident page set.
#[derive(Debug)]
pub struct MmObj {
    /// Variant tag
    pub kind: MmObjKind,
    refcount: u32,
    pages: BTreeMap<u32, FrameId>,
}

impl MmObj {
    fn new(kind: MmObjKind) -> Self {
        Self {
            kind,
            refcount: 1,
            pages: BTreeMap::new(),
        }
    }

    /// Current reference count (external holders plus resident frames).
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// Number of resident pages.
    pub fn nrespages(&self) -> usize {
        self.pages.len()
    }

    /// Resident frame caching page `pagenum`, if any. Never allocates.
    pub fn resident(&self, pagenum: u32) -> Option<FrameId> {
        self.pages.get(&pagenum).copied()
    }

    pub fn is_shadow(&self) -> bool {
        matches!(self.kind, MmObjKind::Shadow { .. })
    }

    /// Backing object of a shadow, `None` for terminal objects.
    pub fn shadowed(&self) -> Option<MmObjId> {
        match self.kind {
            MmObjKind::Shadow { shadowed } => Some(shadowed),
            _ => None,
        }
    }
}

/// Arena of memory objects plus the frame table backing them.
#[derive(Debug)]
pub struct ObjectCache {
    pub(crate) objects: BTreeMap<MmObjId, MmObj>,
    pub(crate) next_id: u64,
    /// Physical page-frame cache
    pub frames: FrameTable,
}

impl ObjectCache {
    /// Cache with an unbounded frame table.
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            next_id: 1,
            frames: FrameTable::new(),
        }
    }

    /// Cache bounded to `nframes` physical frames.
    pub fn with_frame_capacity(nframes: usize) -> Self {
        Self {
            objects: BTreeMap::new(),
            next_id: 1,
            frames: FrameTable::with_capacity(nframes),
        }
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Object for a handle, `None` once it has been reclaimed.
    pub fn get(&self, id: MmObjId) -> Option<&MmObj> {
        self.objects.get(&id)
    }

    pub(crate) fn obj(&self, id: MmObjId) -> &MmObj {
        self.objects.get(&id).expect("stale mmobj handle")
    }

    pub(crate) fn obj_mut(&mut self, id: MmObjId) -> &mut MmObj {
        self.objects.get_mut(&id).expect("stale mmobj handle")
    }

    pub(crate) fn insert_obj(&mut self, kind: MmObjKind) -> MmObjId {
        let id = MmObjId(self.next_id);
        self.next_id += 1;
        self.objects.insert(id, MmObj::new(kind));
        id
    }

    /// Create an object backed by an external pager. The caller owns the
    /// returned reference.
    pub fn vnode_create(&mut self, pager: Arc<dyn Pager>) -> MmObjId {
        let id = self.insert_obj(MmObjKind::Vnode { pager });
        trace!("mmobj: created vnode object {:?}", id);
        id
    }

    /// Take an additional reference on `id`.
    pub fn obj_ref(&mut self, id: MmObjId) {
        self.obj_mut(id).refcount += 1;
    }

    /// Drop one reference on `id`.
    ///
    /// Once only resident frames keep the count up, the object can never
    /// be reached again: every resident frame is released (busy cleared,
    /// unpinned, freed) and the object itself is reclaimed. Reclaiming a
    /// shadow puts its backing link, cascading down the chain.
    pub fn obj_put(&mut self, id: MmObjId) {
        let obj = self.obj_mut(id);
        assert!(obj.refcount > 0, "putting an object with no references");
        obj.refcount -= 1;
        debug_assert!(
            obj.refcount as usize >= obj.pages.len(),
            "mmobj refcount fell below its resident page count"
        );
        if obj.refcount as usize > obj.pages.len() {
            return;
        }
        let obj = self.objects.remove(&id).expect("stale mmobj handle");
        trace!(
            "mmobj: reclaiming {:?} with {} resident pages",
            id,
            obj.pages.len()
        );
        for (_, frame) in obj.pages {
            self.frames.frame_mut(frame).clear_busy();
            self.frames.unpin(frame);
            self.frames.free(frame);
        }
        if let MmObjKind::Shadow { shadowed } = obj.kind {
            self.obj_put(shadowed);
        }
    }

    /// Resident page lookup, never triggering I/O or allocation.
    ///
    /// Reads through a shadow may be satisfied anywhere down its chain;
    /// a write lookup on a shadow only ever reports the shadow's own
    /// copy, since a deeper page must not be handed out writable.
    pub fn lookup_page(&self, id: MmObjId, pagenum: u32, for_write: bool) -> Option<FrameId> {
        let obj = self.obj(id);
        match obj.kind {
            MmObjKind::Shadow { .. } if !for_write => self.chain_find_resident(id, pagenum),
            _ => obj.resident(pagenum),
        }
    }

    /// Populate a freshly allocated frame with the contents of page
    /// `pagenum` as seen by object `id`. May block on I/O.
    pub fn fill_page(&mut self, id: MmObjId, frame: FrameId) -> Result<(), VmError> {
        let pagenum = self.frames.frame(frame).pagenum;
        let kind = self.obj(id).kind.clone();
        match kind {
            MmObjKind::Anon => {
                self.frames.frame_mut(frame).data_mut().fill(0);
                Ok(())
            }
            MmObjKind::Shadow { shadowed } => {
                // Copy from the nearest resident page below; a full miss
                // fills from the terminal object's source directly.
                if let Some(src) = self.chain_find_resident(shadowed, pagenum) {
                    self.frames.copy_page(src, frame);
                    Ok(())
                } else {
                    let bottom = self.chain_terminal(shadowed);
                    self.fill_page(bottom, frame)
                }
            }
            MmObjKind::Vnode { pager } => {
                pager.fill(pagenum, self.frames.frame_mut(frame).data_mut())
            }
        }
    }

    /// Hook run before a resident page is first written.
    pub fn dirty_page(&mut self, id: MmObjId, frame: FrameId) -> Result<(), VmError> {
        let kind = self.obj(id).kind.clone();
        if let MmObjKind::Vnode { pager } = kind {
            pager.dirty(self.frames.frame(frame).pagenum)?;
        }
        self.frames.frame_mut(frame).set_dirty();
        Ok(())
    }

    /// Write a dirty page back to its backing store. Anonymous and
    /// shadow pages have none and only drop the dirty bit.
    pub fn clean_page(&mut self, id: MmObjId, frame: FrameId) -> Result<(), VmError> {
        let kind = self.obj(id).kind.clone();
        if let MmObjKind::Vnode { pager } = kind {
            let pagenum = self.frames.frame(frame).pagenum;
            pager.clean(pagenum, self.frames.frame(frame).data())?;
        }
        self.frames.frame_mut(frame).clear_dirty();
        Ok(())
    }

    /// Resolve page `pagenum` of object `id` to a resident frame,
    /// filling on demand.
    ///
    /// A read through a shadow is satisfied by the first resident page
    /// anywhere in its chain without copying; a full miss materializes
    /// the page at the chain's terminal so every sibling shadow shares
    /// it. A write on a shadow always lands in the shadow's own private
    /// copy (see `shadow`). Writes run the dirty hook on the returned
    /// frame.
    pub fn get_page(
        &mut self,
        id: MmObjId,
        pagenum: u32,
        for_write: bool,
    ) -> Result<FrameId, VmError> {
        if !for_write && self.obj(id).is_shadow() {
            if let Some(frame) = self.chain_find_resident(id, pagenum) {
                return Ok(frame);
            }
            let bottom = self.chain_terminal(id);
            return self.get_resident_or_fill(bottom, pagenum, false);
        }
        self.get_resident_or_fill(id, pagenum, for_write)
    }

    pub(crate) fn get_resident_or_fill(
        &mut self,
        id: MmObjId,
        pagenum: u32,
        for_write: bool,
    ) -> Result<FrameId, VmError> {
        if let Some(frame) = self.obj(id).resident(pagenum) {
            if for_write {
                self.dirty_page(id, frame)?;
            }
            return Ok(frame);
        }
        let frame = self.frames.alloc(id, pagenum)?;
        self.frames.frame_mut(frame).set_busy();
        match self.fill_page(id, frame) {
            Ok(()) => {
                self.frames.frame_mut(frame).clear_busy();
                self.insert_resident(id, pagenum, frame);
                if for_write {
                    self.dirty_page(id, frame)?;
                }
                Ok(frame)
            }
            Err(e) => {
                self.frames.frame_mut(frame).clear_busy();
                self.frames.free(frame);
                Err(e)
            }
        }
    }

    /// Enter `frame` into `id`'s resident set. The frame takes one
    /// reference on the object and stays pinned while resident.
    pub(crate) fn insert_resident(&mut self, id: MmObjId, pagenum: u32, frame: FrameId) {
        let obj = self.obj_mut(id);
        let prev = obj.pages.insert(pagenum, frame);
        assert!(prev.is_none(), "page {} already resident", pagenum);
        obj.refcount += 1;
        self.frames.pin(frame);
    }
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new()
    }
}
