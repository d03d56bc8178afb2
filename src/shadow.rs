//! Copy-on-write shadow objects.
//!
//! A shadow wraps a backing object without copying anything up front.
//! Reads fall through the chain of shadows until some link has the page
//! resident (share on read); the first write through a shadow allocates
//! a private frame in that shadow, copies the shared contents into it,
//! and diverges from there. Repeated forks stack shadows into chains;
//! the last link is always a terminal (non-shadow) object, so every
//! walk ends.
//!
//! A shadow holds one reference on its backing object for the lifetime
//! of the link; putting the shadow cascades the put down the chain.

use log::trace;

use crate::mmobj::{MmObjId, MmObjKind, ObjectCache};
use crate::pframe::FrameId;

impl ObjectCache {
    /// Interpose a new shadow over `backing`. The chain link takes one
    /// reference on `backing`; the caller owns the returned reference
    /// to the shadow itself.
    pub fn shadow_create(&mut self, backing: MmObjId) -> MmObjId {
        self.obj_ref(backing);
        let id = self.insert_obj(MmObjKind::Shadow { shadowed: backing });
        trace!("shadow: created {:?} over {:?}", id, backing);
        id
    }

    /// First resident copy of `pagenum` at or below `from` in the
    /// chain. Never allocates.
    pub(crate) fn chain_find_resident(&self, from: MmObjId, pagenum: u32) -> Option<FrameId> {
        let mut cur = from;
        loop {
            let obj = self.obj(cur);
            if let Some(frame) = obj.resident(pagenum) {
                return Some(frame);
            }
            match obj.shadowed() {
                Some(next) => cur = next,
                None => return None,
            }
        }
    }

    /// Terminal (non-shadow) object at the bottom of `from`'s chain.
    pub(crate) fn chain_terminal(&self, from: MmObjId) -> MmObjId {
        let mut cur = from;
        while let Some(next) = self.obj(cur).shadowed() {
            cur = next;
        }
        cur
    }

    /// Number of shadow links above the terminal object.
    pub fn chain_depth(&self, from: MmObjId) -> u32 {
        let mut depth = 0;
        let mut cur = from;
        while let Some(next) = self.obj(cur).shadowed() {
            depth += 1;
            cur = next;
        }
        depth
    }
}
