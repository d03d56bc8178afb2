//! Per-process address space: the region map.
//!
//! A `Vmmap` is an ordered, non-overlapping set of `Vmarea`s, each
//! binding a range of virtual page numbers to a memory object, a
//! protection, and a sharing mode. The map answers lookups and first-fit
//! free-range searches, carries the split/shrink/remove logic of unmap,
//! and implements the cross-address-space read/write helpers the kernel
//! uses to inspect process memory.
//!
//! Structural invariants (ranges inside the user window, no overlap,
//! sorted by start page) are preconditions of correct callers and are
//! asserted, not reported.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;

use log::trace;

use crate::mmobj::{MmObjId, ObjectCache};
use crate::pframe::{addr_to_pn, page_offset, pn_to_addr, PAGE_SIZE};
use crate::VmError;

/// Lowest legal user address.
pub const USER_MEM_LOW: usize = 0x0040_0000;

/// One past the highest legal user address.
pub const USER_MEM_HIGH: usize = 0xc000_0000;

bitflags! {
    /// Area protection bits. An empty set is an explicitly inaccessible
    /// (guard) region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Prot: u32 {
        const READ  = 0x1;
        const WRITE = 0x2;
        const EXEC  = 0x4;
    }
}

/// Sharing mode of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapType {
    /// Writes are visible to every mapper of the object
    Shared,
    /// Copy-on-write: writes diverge behind a shadow
    Private,
}

/// Search direction for `find_range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// First fit from the bottom of the user window
    LowToHigh,
    /// First fit from the top of the user window
    HighToLow,
}

/// Source of a file-backed mapping.
///
/// The file system's vnode implements this; `Vmmap::map` calls it with
/// the fully described area (everything but the object is already set)
/// and receives an object the caller owns one reference on.
pub trait MmapSource {
    fn mmap(&self, objects: &mut ObjectCache, area: &Vmarea) -> Result<MmObjId, VmError>;
}

/// One mapped region of an address space.
#[derive(Debug, Clone)]
pub struct Vmarea {
    /// First page of the range
    pub start: u32,
    /// One past the last page of the range
    pub end: u32,
    /// Page offset into the backing object
    pub off: u32,
    /// Protection bits
    pub prot: Prot,
    /// Sharing mode
    pub flags: MapType,
    /// Backing object; `None` only between `clone_areas` and fork's
    /// object attachment
    pub obj: Option<MmObjId>,
}

impl Vmarea {
    pub fn npages(&self) -> u32 {
        self.end - self.start
    }

    pub fn contains(&self, vfn: u32) -> bool {
        self.start <= vfn && vfn < self.end
    }

    pub fn overlaps(&self, lo: u32, hi: u32) -> bool {
        self.start < hi && lo < self.end
    }

    /// Object page number backing virtual page `vfn`.
    pub fn obj_pagenum(&self, vfn: u32) -> u32 {
        debug_assert!(self.contains(vfn));
        vfn - self.start + self.off
    }
}

/// Ordered region map of one address space.
#[derive(Debug)]
pub struct Vmmap {
    areas: BTreeMap<u32, Vmarea>,
    lo: u32,
    hi: u32,
}

impl Vmmap {
    /// Empty map over the default user window.
    pub fn new() -> Self {
        Self::with_window(addr_to_pn(USER_MEM_LOW), addr_to_pn(USER_MEM_HIGH))
    }

    /// Empty map over the page window `[lo, hi)`.
    pub fn with_window(lo: u32, hi: u32) -> Self {
        assert!(lo < hi);
        Self {
            areas: BTreeMap::new(),
            lo,
            hi,
        }
    }

    /// Areas in ascending start order.
    pub fn iter(&self) -> impl Iterator<Item = &Vmarea> {
        self.areas.values()
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// Insert an area. The range must lie inside the window and must
    /// not intersect any existing area; violating either is a caller
    /// bug.
    pub fn insert(&mut self, area: Vmarea) {
        assert!(area.start < area.end, "empty or inverted area");
        assert!(
            self.lo <= area.start && area.end <= self.hi,
            "area outside the user window"
        );
        assert!(
            self.is_range_empty(area.start, area.npages()),
            "overlapping insert"
        );
        self.areas.insert(area.start, area);
    }

    /// Area covering virtual page `vfn`, if any.
    pub fn lookup(&self, vfn: u32) -> Option<&Vmarea> {
        self.areas
            .range(..=vfn)
            .next_back()
            .map(|(_, a)| a)
            .filter(|a| a.contains(vfn))
    }

    pub fn lookup_mut(&mut self, vfn: u32) -> Option<&mut Vmarea> {
        self.areas
            .range_mut(..=vfn)
            .next_back()
            .map(|(_, a)| a)
            .filter(|a| a.contains(vfn))
    }

    /// True iff no area intersects `[start, start + npages)`.
    pub fn is_range_empty(&self, start: u32, npages: u32) -> bool {
        let end = start + npages;
        // only the last area starting below `end` can intersect
        match self.areas.range(..end).next_back() {
            Some((_, a)) => !a.overlaps(start, end),
            None => true,
        }
    }

    /// First-fit search for `npages` contiguous free pages.
    ///
    /// `LowToHigh` returns the bottom of the lowest adequate gap,
    /// `HighToLow` the topmost placement inside the highest adequate
    /// gap. Gaps are sized with exclusive ends. Does not mutate the
    /// map.
    pub fn find_range(&self, npages: u32, dir: Direction) -> Option<u32> {
        assert!(npages > 0);
        match dir {
            Direction::LowToHigh => {
                let mut prev_end = self.lo;
                for area in self.areas.values() {
                    if area.start - prev_end >= npages {
                        return Some(prev_end);
                    }
                    prev_end = area.end;
                }
                if self.hi - prev_end >= npages {
                    return Some(prev_end);
                }
                None
            }
            Direction::HighToLow => {
                let mut next_start = self.hi;
                for area in self.areas.values().rev() {
                    if next_start - area.end >= npages {
                        return Some(next_start - npages);
                    }
                    next_start = area.start;
                }
                if next_start - self.lo >= npages {
                    return Some(next_start - npages);
                }
                None
            }
        }
    }

    /// Create a mapping of `npages` pages.
    ///
    /// With `lopage == 0` the range is found with `find_range(dir)`;
    /// a fixed, non-empty range is unmapped first. `source` supplies
    /// the backing object for file mappings; without one the mapping is
    /// anonymous zero-fill. Private mappings get a fresh shadow
    /// interposed so later forks and writes diverge. Object attachment
    /// is the last fallible step, so failures leave no partial state.
    ///
    /// Returns the start page of the new mapping.
    #[allow(clippy::too_many_arguments)]
    pub fn map(
        &mut self,
        objects: &mut ObjectCache,
        source: Option<&dyn MmapSource>,
        lopage: u32,
        npages: u32,
        prot: Prot,
        flags: MapType,
        off: u32,
        dir: Direction,
    ) -> Result<u32, VmError> {
        assert!(npages > 0);
        assert!(
            lopage == 0 || (self.lo <= lopage && lopage + npages <= self.hi),
            "fixed mapping outside the user window"
        );

        let start = if lopage == 0 {
            self.find_range(npages, dir).ok_or(VmError::NoSpace)?
        } else {
            if !self.is_range_empty(lopage, npages) {
                self.remove(objects, lopage, npages);
            }
            lopage
        };

        let mut area = Vmarea {
            start,
            end: start + npages,
            off,
            prot,
            flags,
            obj: None,
        };

        let backing = match source {
            None => objects.anon_create(),
            Some(src) => src.mmap(objects, &area)?,
        };
        let obj = match flags {
            MapType::Private => {
                let shadow = objects.shadow_create(backing);
                // the chain link holds the backing now
                objects.obj_put(backing);
                shadow
            }
            MapType::Shared => backing,
        };
        area.obj = Some(obj);

        trace!(
            "vmmap: mapped [{:#x}, {:#x}) {:?} {:?} -> {:?}",
            start,
            start + npages,
            prot,
            flags,
            obj
        );
        self.insert(area);
        Ok(start)
    }

    /// Unmap `[lopage, lopage + npages)`.
    ///
    /// Each affected area falls into one of four cases: the hole splits
    /// it in two (both halves keep the object, which gains a reference
    /// for the duplicate), the hole trims its tail, the hole trims its
    /// head (offset advances with the start), or the hole swallows it
    /// whole (its object reference is put).
    pub fn remove(&mut self, objects: &mut ObjectCache, lopage: u32, npages: u32) {
        let lo = lopage;
        let hi = lopage + npages;

        let affected: Vec<u32> = self
            .areas
            .range(..hi)
            .filter(|(_, a)| a.overlaps(lo, hi))
            .map(|(&s, _)| s)
            .collect();

        for start in affected {
            let area = self.areas.remove(&start).expect("area vanished mid-remove");
            if area.start < lo && hi < area.end {
                // hole strictly inside: split
                trace!("vmmap: split [{:#x}, {:#x}) at [{:#x}, {:#x})", area.start, area.end, lo, hi);
                if let Some(obj) = area.obj {
                    objects.obj_ref(obj);
                }
                let low = Vmarea {
                    start: area.start,
                    end: lo,
                    off: area.off,
                    prot: area.prot,
                    flags: area.flags,
                    obj: area.obj,
                };
                let high = Vmarea {
                    start: hi,
                    end: area.end,
                    off: area.off + (hi - area.start),
                    prot: area.prot,
                    flags: area.flags,
                    obj: area.obj,
                };
                self.areas.insert(low.start, low);
                self.areas.insert(high.start, high);
            } else if area.start < lo {
                // hole covers the tail: shorten
                let mut a = area;
                a.end = lo;
                self.areas.insert(a.start, a);
            } else if hi < area.end {
                // hole covers the head: advance start and offset
                let mut a = area;
                a.off += hi - a.start;
                a.start = hi;
                self.areas.insert(a.start, a);
            } else {
                // hole swallows the area
                trace!("vmmap: removed [{:#x}, {:#x})", area.start, area.end);
                if let Some(obj) = area.obj {
                    objects.obj_put(obj);
                }
            }
        }
    }

    /// Duplicate every area with no object attached.
    ///
    /// Fork uses this and then attaches objects one level up, once per
    /// shared object, so that split siblings end up behind the same
    /// shadow layer.
    pub fn clone_areas(&self) -> Vmmap {
        let mut map = Vmmap::with_window(self.lo, self.hi);
        for area in self.areas.values() {
            map.areas.insert(
                area.start,
                Vmarea {
                    obj: None,
                    ..area.clone()
                },
            );
        }
        map
    }

    /// Fork this address space.
    ///
    /// Shared areas reference the same object from both sides. For each
    /// distinct private object two fresh shadows are interposed, parent
    /// re-pointed behind one and child behind the other, so subsequent
    /// writes on either side diverge while unwritten pages stay shared
    /// through the old chain.
    pub fn fork(&mut self, objects: &mut ObjectCache) -> Vmmap {
        let mut child = self.clone_areas();
        let mut interposed: BTreeMap<MmObjId, (MmObjId, MmObjId)> = BTreeMap::new();

        for (start, area) in self.areas.iter_mut() {
            let obj = area.obj.expect("forking an unbacked area");
            let child_area = child.areas.get_mut(start).expect("clone lost an area");
            match area.flags {
                MapType::Shared => {
                    objects.obj_ref(obj);
                    child_area.obj = Some(obj);
                }
                MapType::Private => {
                    let (parent_shadow, child_shadow) = match interposed.get(&obj) {
                        Some(&pair) => {
                            let (p, c) = pair;
                            objects.obj_ref(p);
                            objects.obj_ref(c);
                            pair
                        }
                        None => {
                            let p = objects.shadow_create(obj);
                            let c = objects.shadow_create(obj);
                            interposed.insert(obj, (p, c));
                            (p, c)
                        }
                    };
                    // the old reference is now held through the chains
                    objects.obj_put(obj);
                    area.obj = Some(parent_shadow);
                    child_area.obj = Some(child_shadow);
                }
            }
        }
        trace!("vmmap: forked {} areas", child.areas.len());
        child
    }

    /// Read `buf.len()` bytes from this address space starting at
    /// `vaddr`, resolving pages on demand. No permission checks; any
    /// unmapped page faults the whole operation.
    pub fn read(
        &self,
        objects: &mut ObjectCache,
        vaddr: usize,
        buf: &mut [u8],
    ) -> Result<(), VmError> {
        let mut pos = 0;
        let mut addr = vaddr;
        while pos < buf.len() {
            let vfn = addr_to_pn(addr);
            let area = self.lookup(vfn).ok_or(VmError::Fault)?;
            let obj = area.obj.ok_or(VmError::Fault)?;
            let frame = objects.get_page(obj, area.obj_pagenum(vfn), false)?;
            let off = page_offset(addr);
            let n = core::cmp::min(PAGE_SIZE - off, buf.len() - pos);
            buf[pos..pos + n].copy_from_slice(&objects.frames.frame(frame).data()[off..off + n]);
            pos += n;
            addr += n;
        }
        Ok(())
    }

    /// Write `buf` into this address space starting at `vaddr`. Every
    /// touched page is resolved for writing (private mappings take
    /// their copy-on-write fault here) and marked dirty.
    pub fn write(
        &self,
        objects: &mut ObjectCache,
        vaddr: usize,
        buf: &[u8],
    ) -> Result<(), VmError> {
        let mut pos = 0;
        let mut addr = vaddr;
        while pos < buf.len() {
            let vfn = addr_to_pn(addr);
            let area = self.lookup(vfn).ok_or(VmError::Fault)?;
            let obj = area.obj.ok_or(VmError::Fault)?;
            let frame = objects.get_page(obj, area.obj_pagenum(vfn), true)?;
            let off = page_offset(addr);
            let n = core::cmp::min(PAGE_SIZE - off, buf.len() - pos);
            objects.frames.frame_mut(frame).data_mut()[off..off + n]
                .copy_from_slice(&buf[pos..pos + n]);
            pos += n;
            addr += n;
        }
        Ok(())
    }

    /// Tear down the address space, putting every area's object.
    pub fn destroy(mut self, objects: &mut ObjectCache) {
        for (_, area) in core::mem::take(&mut self.areas) {
            if let Some(obj) = area.obj {
                objects.obj_put(obj);
            }
        }
    }
}

impl Default for Vmmap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Vmmap {
    /// Debugging dump of the mappings, one area per line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for area in self.areas.values() {
            writeln!(
                f,
                "{:#010x}-{:#010x}  {}{}{}  {} obj={:?} off={:#x}",
                pn_to_addr(area.start),
                pn_to_addr(area.end),
                if area.prot.contains(Prot::READ) { 'r' } else { '-' },
                if area.prot.contains(Prot::WRITE) { 'w' } else { '-' },
                if area.prot.contains(Prot::EXEC) { 'x' } else { '-' },
                match area.flags {
                    MapType::Shared => " SHARED",
                    MapType::Private => "PRIVATE",
                },
                area.obj,
                area.off,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn anon_area(start: u32, end: u32) -> Vmarea {
        Vmarea {
            start,
            end,
            off: 0,
            prot: Prot::READ | Prot::WRITE,
            flags: MapType::Private,
            obj: None,
        }
    }

    fn assert_sorted_nonoverlapping(map: &Vmmap) {
        let mut prev_end = 0;
        for area in map.iter() {
            assert!(area.start < area.end);
            assert!(area.start >= prev_end, "areas overlap or are unsorted");
            prev_end = area.end;
        }
    }

    #[test]
    fn insert_keeps_order() {
        let mut map = Vmmap::with_window(0x10, 0x100);
        map.insert(anon_area(0x40, 0x50));
        map.insert(anon_area(0x20, 0x30));
        map.insert(anon_area(0x80, 0x90));
        assert_sorted_nonoverlapping(&map);
        let starts: Vec<u32> = map.iter().map(|a| a.start).collect();
        assert_eq!(starts, vec![0x20, 0x40, 0x80]);
    }

    #[test]
    #[should_panic(expected = "overlapping insert")]
    fn overlapping_insert_asserts() {
        let mut map = Vmmap::with_window(0x10, 0x100);
        map.insert(anon_area(0x20, 0x30));
        map.insert(anon_area(0x2f, 0x40));
    }

    #[test]
    fn lookup_covers_ranges() {
        let mut map = Vmmap::with_window(0x10, 0x100);
        map.insert(anon_area(0x20, 0x30));
        assert!(map.lookup(0x20).is_some());
        assert!(map.lookup(0x2f).is_some());
        assert!(map.lookup(0x30).is_none());
        assert!(map.lookup(0x1f).is_none());
    }

    #[test]
    fn range_emptiness() {
        let mut map = Vmmap::with_window(0x10, 0x100);
        map.insert(anon_area(0x20, 0x30));
        assert!(map.is_range_empty(0x10, 0x10));
        assert!(map.is_range_empty(0x30, 0x10));
        assert!(!map.is_range_empty(0x28, 0x10));
        assert!(!map.is_range_empty(0x18, 0x10));
        assert!(!map.is_range_empty(0x20, 0x10));
    }

    #[test]
    fn find_range_low_to_high() {
        let mut map = Vmmap::with_window(0x10, 0x100);
        map.insert(anon_area(0x10, 0x20));
        map.insert(anon_area(0x28, 0x30));
        // first adequate gap from the bottom is [0x20, 0x28)
        assert_eq!(map.find_range(0x8, Direction::LowToHigh), Some(0x20));
        assert_eq!(map.find_range(0x9, Direction::LowToHigh), Some(0x30));
        assert_eq!(map.find_range(0xd0, Direction::LowToHigh), Some(0x30));
        assert_eq!(map.find_range(0xd1, Direction::LowToHigh), None);
    }

    #[test]
    fn find_range_high_to_low() {
        let mut map = Vmmap::with_window(0x10, 0x100);
        map.insert(anon_area(0xf0, 0x100));
        map.insert(anon_area(0x80, 0x90));
        // highest adequate gap is [0x90, 0xf0), placed at its top
        assert_eq!(map.find_range(0x10, Direction::HighToLow), Some(0xe0));
        // too big for the top gap, falls to [0x10, 0x80)
        assert_eq!(map.find_range(0x68, Direction::HighToLow), Some(0x18));
        assert_eq!(map.find_range(0x71, Direction::HighToLow), None);
    }

    #[test]
    fn find_range_never_overlaps() {
        let mut map = Vmmap::with_window(0x10, 0x100);
        map.insert(anon_area(0x30, 0x50));
        map.insert(anon_area(0x70, 0xa0));
        for dir in [Direction::LowToHigh, Direction::HighToLow] {
            for npages in [1u32, 0x10, 0x20, 0x40] {
                if let Some(start) = map.find_range(npages, dir) {
                    assert!(map.is_range_empty(start, npages));
                    assert!(start >= 0x10 && start + npages <= 0x100);
                }
            }
        }
    }

    #[test]
    fn map_anonymous_at_any_address() {
        let mut objects = ObjectCache::new();
        let mut map = Vmmap::new();
        let start = map
            .map(
                &mut objects,
                None,
                0,
                4,
                Prot::READ | Prot::WRITE,
                MapType::Private,
                0,
                Direction::LowToHigh,
            )
            .unwrap();
        let area = map.lookup(start).unwrap();
        assert_eq!(area.npages(), 4);
        // private mapping sits behind a fresh shadow over an anon
        let obj = area.obj.unwrap();
        assert!(objects.obj(obj).is_shadow());
        assert_eq!(objects.chain_depth(obj), 1);
        assert_eq!(objects.anon_count(), 1);
        map.destroy(&mut objects);
        assert_eq!(objects.len(), 0);
    }

    #[test]
    fn map_fixed_replaces_existing() {
        let mut objects = ObjectCache::new();
        let mut map = Vmmap::with_window(0x10, 0x100);
        let first = map
            .map(
                &mut objects,
                None,
                0x20,
                8,
                Prot::READ,
                MapType::Private,
                0,
                Direction::LowToHigh,
            )
            .unwrap();
        assert_eq!(first, 0x20);
        map.map(
            &mut objects,
            None,
            0x22,
            2,
            Prot::READ | Prot::WRITE,
            MapType::Private,
            0,
            Direction::LowToHigh,
        )
        .unwrap();
        assert_sorted_nonoverlapping(&map);
        // old mapping was split around the replacement
        assert_eq!(map.len(), 3);
        assert_eq!(map.lookup(0x22).unwrap().prot, Prot::READ | Prot::WRITE);
        map.destroy(&mut objects);
        assert_eq!(objects.len(), 0);
    }

    #[test]
    fn remove_tail_and_head() {
        let mut objects = ObjectCache::new();
        let mut map = Vmmap::with_window(0x10, 0x100);
        map.map(
            &mut objects,
            None,
            0x20,
            0x10,
            Prot::READ,
            MapType::Private,
            0,
            Direction::LowToHigh,
        )
        .unwrap();

        // trim the tail
        map.remove(&mut objects, 0x28, 0x10);
        let area = map.lookup(0x20).unwrap();
        assert_eq!((area.start, area.end, area.off), (0x20, 0x28, 0));

        // trim the head
        map.remove(&mut objects, 0x18, 0xa);
        let area = map.lookup(0x24).unwrap();
        assert_eq!((area.start, area.end, area.off), (0x22, 0x28, 2));
        assert_sorted_nonoverlapping(&map);
        map.destroy(&mut objects);
    }

    #[test]
    fn remove_split_keeps_offsets_and_references() {
        let mut objects = ObjectCache::new();
        let mut map = Vmmap::with_window(0x10, 0x100);
        map.map(
            &mut objects,
            None,
            0x20,
            4,
            Prot::READ | Prot::WRITE,
            MapType::Private,
            0,
            Direction::LowToHigh,
        )
        .unwrap();
        let obj = map.lookup(0x20).unwrap().obj.unwrap();
        assert_eq!(objects.obj(obj).refcount(), 1);

        // punch out the middle two pages
        map.remove(&mut objects, 0x21, 2);
        assert!(map.is_range_empty(0x21, 2));
        assert_eq!(map.len(), 2);
        let low = map.lookup(0x20).unwrap();
        let high = map.lookup(0x23).unwrap();
        assert_eq!((low.start, low.end, low.off), (0x20, 0x21, 0));
        assert_eq!((high.start, high.end, high.off), (0x23, 0x24, 3));
        assert_eq!(low.obj, high.obj);
        assert_eq!(objects.obj(obj).refcount(), 2);

        map.remove(&mut objects, 0x20, 4);
        assert!(map.is_empty());
        assert_eq!(objects.len(), 0);
    }

    #[test]
    fn split_preserves_content_outside_the_hole() {
        let mut objects = ObjectCache::new();
        let mut map = Vmmap::with_window(0x10, 0x100);
        map.map(
            &mut objects,
            None,
            0x20,
            4,
            Prot::READ | Prot::WRITE,
            MapType::Private,
            0,
            Direction::LowToHigh,
        )
        .unwrap();

        map.write(&mut objects, pn_to_addr(0x20), b"low page").unwrap();
        map.write(&mut objects, pn_to_addr(0x23), b"high page").unwrap();

        map.remove(&mut objects, 0x21, 2);

        let mut buf = [0u8; 8];
        map.read(&mut objects, pn_to_addr(0x20), &mut buf).unwrap();
        assert_eq!(&buf, b"low page");
        let mut buf = [0u8; 9];
        map.read(&mut objects, pn_to_addr(0x23), &mut buf).unwrap();
        assert_eq!(&buf, b"high page");
        map.destroy(&mut objects);
    }

    #[test]
    fn clone_areas_detaches_objects() {
        let mut objects = ObjectCache::new();
        let mut map = Vmmap::with_window(0x10, 0x100);
        map.map(
            &mut objects,
            None,
            0x20,
            4,
            Prot::READ,
            MapType::Private,
            0,
            Direction::LowToHigh,
        )
        .unwrap();
        let clone = map.clone_areas();
        assert_eq!(clone.len(), 1);
        let area = clone.lookup(0x20).unwrap();
        assert_eq!(area.obj, None);
        assert_eq!(area.prot, Prot::READ);
        map.destroy(&mut objects);
    }

    #[test]
    fn read_write_across_page_boundary() {
        let mut objects = ObjectCache::new();
        let mut map = Vmmap::with_window(0x10, 0x100);
        map.map(
            &mut objects,
            None,
            0x20,
            2,
            Prot::READ | Prot::WRITE,
            MapType::Private,
            0,
            Direction::LowToHigh,
        )
        .unwrap();

        let addr = pn_to_addr(0x21) - 3;
        map.write(&mut objects, addr, b"straddle").unwrap();
        let mut buf = [0u8; 8];
        map.read(&mut objects, addr, &mut buf).unwrap();
        assert_eq!(&buf, b"straddle");
        map.destroy(&mut objects);
    }

    #[test]
    fn read_unmapped_faults() {
        let mut objects = ObjectCache::new();
        let map = Vmmap::with_window(0x10, 0x100);
        let mut buf = [0u8; 4];
        assert_eq!(
            map.read(&mut objects, pn_to_addr(0x20), &mut buf),
            Err(VmError::Fault)
        );
        assert_eq!(map.write(&mut objects, pn_to_addr(0x20), &buf), Err(VmError::Fault));
    }

    #[test]
    fn fork_isolates_private_writes_both_ways() {
        let mut objects = ObjectCache::new();
        let mut parent = Vmmap::with_window(0x10, 0x100);
        parent
            .map(
                &mut objects,
                None,
                0x20,
                2,
                Prot::READ | Prot::WRITE,
                MapType::Private,
                0,
                Direction::LowToHigh,
            )
            .unwrap();
        parent
            .write(&mut objects, pn_to_addr(0x20), b"original")
            .unwrap();

        let child = parent.fork(&mut objects);

        // unwritten pages read identically on both sides
        let mut pbuf = [0u8; 8];
        let mut cbuf = [0u8; 8];
        parent.read(&mut objects, pn_to_addr(0x20), &mut pbuf).unwrap();
        child.read(&mut objects, pn_to_addr(0x20), &mut cbuf).unwrap();
        assert_eq!(pbuf, cbuf);

        // child writes do not reach the parent
        child
            .write(&mut objects, pn_to_addr(0x20), b"child!!!")
            .unwrap();
        parent.read(&mut objects, pn_to_addr(0x20), &mut pbuf).unwrap();
        assert_eq!(&pbuf, b"original");

        // and parent writes do not reach the child
        parent
            .write(&mut objects, pn_to_addr(0x20), b"parent!!")
            .unwrap();
        child.read(&mut objects, pn_to_addr(0x20), &mut cbuf).unwrap();
        assert_eq!(&cbuf, b"child!!!");

        child.destroy(&mut objects);
        parent.destroy(&mut objects);
        assert_eq!(objects.len(), 0);
        assert_eq!(objects.frames.in_use(), 0);
    }

    #[test]
    fn fork_interposes_once_per_object() {
        let mut objects = ObjectCache::new();
        let mut parent = Vmmap::with_window(0x10, 0x100);
        parent
            .map(
                &mut objects,
                None,
                0x20,
                4,
                Prot::READ | Prot::WRITE,
                MapType::Private,
                0,
                Direction::LowToHigh,
            )
            .unwrap();
        // split so two sibling areas share one object
        parent.remove(&mut objects, 0x21, 2);
        let before = parent.lookup(0x20).unwrap().obj.unwrap();
        assert_eq!(parent.lookup(0x23).unwrap().obj.unwrap(), before);

        let child = parent.fork(&mut objects);

        let p_low = parent.lookup(0x20).unwrap().obj.unwrap();
        let p_high = parent.lookup(0x23).unwrap().obj.unwrap();
        let c_low = child.lookup(0x20).unwrap().obj.unwrap();
        let c_high = child.lookup(0x23).unwrap().obj.unwrap();
        // siblings share one new shadow per side, parent and child differ
        assert_eq!(p_low, p_high);
        assert_eq!(c_low, c_high);
        assert_ne!(p_low, c_low);
        assert_eq!(objects.obj(p_low).shadowed(), Some(before));
        assert_eq!(objects.obj(c_low).shadowed(), Some(before));

        child.destroy(&mut objects);
        parent.destroy(&mut objects);
        assert_eq!(objects.len(), 0);
    }

    #[test]
    fn fork_shares_shared_mappings() {
        let mut objects = ObjectCache::new();
        let mut parent = Vmmap::with_window(0x10, 0x100);
        parent
            .map(
                &mut objects,
                None,
                0x40,
                1,
                Prot::READ | Prot::WRITE,
                MapType::Shared,
                0,
                Direction::LowToHigh,
            )
            .unwrap();

        let child = parent.fork(&mut objects);
        assert_eq!(
            parent.lookup(0x40).unwrap().obj,
            child.lookup(0x40).unwrap().obj
        );

        // a write on one side is visible on the other
        child.write(&mut objects, pn_to_addr(0x40), b"both").unwrap();
        let mut buf = [0u8; 4];
        parent.read(&mut objects, pn_to_addr(0x40), &mut buf).unwrap();
        assert_eq!(&buf, b"both");

        child.destroy(&mut objects);
        parent.destroy(&mut objects);
        assert_eq!(objects.len(), 0);
    }

    #[test]
    fn mapping_info_renders() {
        let mut objects = ObjectCache::new();
        let mut map = Vmmap::new();
        map.map(
            &mut objects,
            None,
            0,
            1,
            Prot::READ | Prot::EXEC,
            MapType::Private,
            0,
            Direction::LowToHigh,
        )
        .unwrap();
        let dump = alloc::format!("{}", map);
        assert!(dump.contains("r-x"));
        assert!(dump.contains("PRIVATE"));
        map.destroy(&mut objects);
    }
}
