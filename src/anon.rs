//! Anonymous zero-fill memory.
//!
//! An anonymous object has no backing store beyond its resident frames:
//! pages come into existence zero-filled on first touch and are never
//! written back. Every fresh private mapping is backed by one, and every
//! shadow chain terminates in one, which is what guarantees chain walks
//! finish.

use log::trace;

use crate::mmobj::{MmObjId, MmObjKind, ObjectCache};

impl ObjectCache {
    /// Create an anonymous object. The caller owns the returned
    /// reference.
    pub fn anon_create(&mut self) -> MmObjId {
        let id = self.insert_obj(MmObjKind::Anon);
        trace!("anon: created {:?}", id);
        id
    }

    /// Number of live anonymous objects, for diagnostics.
    pub fn anon_count(&self) -> usize {
        self.objects
            .values()
            .filter(|o| matches!(o.kind, MmObjKind::Anon))
            .count()
    }
}
