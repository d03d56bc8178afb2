//! Page-fault resolution.
//!
//! The trap layer hands us the faulting address and the hardware cause
//! bits; we validate the access against the region map, resolve the
//! backing page (taking the copy-on-write path for private writes), and
//! install the translation through the `PageTable` trait. An access the
//! map cannot legitimize is fatal to the faulting process.

use bitflags::bitflags;
use log::{debug, trace};

use crate::mmobj::ObjectCache;
use crate::pframe::{addr_to_pn, FrameId};
use crate::vmmap::{Prot, Vmmap};
use crate::VmError;

bitflags! {
    /// Hardware fault cause bits, as delivered by the trap frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultCause: u32 {
        /// Fault on a present page (protection violation)
        const PRESENT  = 0x01;
        /// Fault was a write
        const WRITE    = 0x02;
        /// Fault came from user mode
        const USER     = 0x04;
        /// Reserved bit set in a paging structure
        const RESERVED = 0x08;
        /// Fault was an instruction fetch
        const EXEC     = 0x10;
    }
}

bitflags! {
    /// Translation flags passed to the page-table installer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PtFlags: u32 {
        const PRESENT = 0x01;
        const WRITE   = 0x02;
        const USER    = 0x04;
    }
}

/// Hardware page-table installer.
///
/// `pdflags` apply to the intermediate paging structures, `ptflags` to
/// the leaf entry.
pub trait PageTable {
    fn map(
        &mut self,
        vfn: u32,
        frame: FrameId,
        pdflags: PtFlags,
        ptflags: PtFlags,
    ) -> Result<(), VmError>;
}

/// Hook for killing the faulting process.
pub trait ProcessControl {
    fn terminate(&mut self, status: i32);
}

/// Why a fault could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// No area covers the faulting page
    Unmapped,
    /// Reserved paging-structure bit was set
    Reserved,
    /// The area's protection forbids the access
    Permission,
    /// The backing object failed to produce the page
    Object(VmError),
}

impl FaultError {
    /// Exit status for the killed process.
    pub const fn status(&self) -> i32 {
        match self {
            FaultError::Object(e) => e.errno(),
            _ => VmError::Fault.errno(),
        }
    }
}

/// Resolve a fault at `vaddr` with hardware cause `cause`.
///
/// On success the translation has been installed and the backing frame
/// is returned. Permission checks come first, so an illegal access
/// never allocates or copies anything; the object lookup happens only
/// once the access is known to be legitimate.
pub fn handle_pagefault(
    map: &Vmmap,
    objects: &mut ObjectCache,
    pt: &mut dyn PageTable,
    vaddr: usize,
    cause: FaultCause,
) -> Result<FrameId, FaultError> {
    let vfn = addr_to_pn(vaddr);
    trace!("pagefault: vaddr={:#x} cause={:?}", vaddr, cause);

    if cause.contains(FaultCause::RESERVED) {
        return Err(FaultError::Reserved);
    }

    let area = map.lookup(vfn).ok_or(FaultError::Unmapped)?;

    let needed = if cause.contains(FaultCause::WRITE) {
        Prot::WRITE
    } else if cause.contains(FaultCause::EXEC) {
        Prot::EXEC
    } else {
        Prot::READ
    };
    if !area.prot.contains(needed) {
        return Err(FaultError::Permission);
    }

    let obj = area.obj.ok_or(FaultError::Unmapped)?;
    let for_write = cause.contains(FaultCause::WRITE);
    let frame = objects
        .get_page(obj, area.obj_pagenum(vfn), for_write)
        .map_err(FaultError::Object)?;

    let mut flags = PtFlags::PRESENT | PtFlags::USER;
    if for_write {
        flags |= PtFlags::WRITE;
    }
    pt.map(vfn, frame, flags, flags).map_err(FaultError::Object)?;
    Ok(frame)
}

/// Trap-level entry point: resolve the fault or kill the process.
pub fn dispatch_fault(
    map: &Vmmap,
    objects: &mut ObjectCache,
    pt: &mut dyn PageTable,
    proc: &mut dyn ProcessControl,
    vaddr: usize,
    cause: FaultCause,
) {
    if let Err(err) = handle_pagefault(map, objects, pt, vaddr, cause) {
        debug!(
            "pagefault: unresolvable fault at {:#x} ({:?}), killing process",
            vaddr, err
        );
        proc.terminate(err.status());
    }
}
