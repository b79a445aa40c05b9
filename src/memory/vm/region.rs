/*
 * Region List
 *
 * Per-address-space list of contiguous virtual regions carrying a base,
 * size, and RWX permission bits, plus a saved writability shadow used to
 * temporarily loosen permissions while the ELF loader writes a read-only
 * segment.
 *
 * The original design is a singly linked list with new regions prepended
 * at the head; a `Vec` reproduces the same "newest region found first"
 * scan order at a fraction of the bookkeeping, so that's what backs it here.
 */

use alloc::vec::Vec;

use super::{VmError, PAGE_SIZE};

/// A contiguous, page-aligned virtual memory region with uniform permissions.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    /// Page-aligned virtual base address.
    pub vbase: u32,
    /// Page-multiple byte length.
    pub size: u32,
    pub readable: bool,
    pub writeable: bool,
    pub executable: bool,
    /// The region's true writability, saved across prepare_load/complete_load.
    pub writeable_saved: bool,
}

impl Region {
    pub fn contains(&self, vaddr: u32) -> bool {
        vaddr >= self.vbase && (vaddr - self.vbase) < self.size
    }
}

/// Ordered collection of a single address space's regions.
#[derive(Debug, Default)]
pub struct RegionList {
    regions: Vec<Region>,
}

impl RegionList {
    pub const fn new() -> Self {
        Self { regions: Vec::new() }
    }

    /// Page-aligns `vaddr`/`size` and prepends a new region. Rejects ranges
    /// that escape the user segment with `EFAULT`; out-of-memory with `ENOMEM`.
    pub fn define_region(
        &mut self,
        vaddr: u32,
        size: u32,
        readable: bool,
        writeable: bool,
        executable: bool,
    ) -> Result<(), VmError> {
        // Align the base down, extending size by the amount trimmed off the
        // front, then round the length up to a page multiple.
        let misalignment = vaddr & (PAGE_SIZE - 1);
        let aligned_base = vaddr & !(PAGE_SIZE - 1);
        let aligned_size = (size + misalignment + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);

        let end = aligned_base
            .checked_add(aligned_size)
            .ok_or(VmError::InvalidAddress)?;
        if end > super::USERSTACK {
            return Err(VmError::InvalidAddress);
        }

        self.regions
            .try_reserve(1)
            .map_err(|_| VmError::OutOfMemory)?;
        self.regions.insert(
            0,
            Region {
                vbase: aligned_base,
                size: aligned_size,
                readable,
                writeable,
                executable,
                writeable_saved: writeable,
            },
        );
        Ok(())
    }

    /// Returns the first region containing `vaddr`, scanned head-first so a
    /// more recently defined (overlapping) region wins, matching a linked
    /// list with head-insertion.
    pub fn find_containing(&self, vaddr: u32) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(vaddr))
    }

    pub fn find_containing_mut(&mut self, vaddr: u32) -> Option<&mut Region> {
        self.regions.iter_mut().find(|r| r.contains(vaddr))
    }

    /// Deep-copies every region, preserving the head-first ordering.
    pub fn try_clone(&self) -> Result<Self, VmError> {
        let mut cloned = Vec::new();
        cloned
            .try_reserve(self.regions.len())
            .map_err(|_| VmError::OutOfMemory)?;
        cloned.extend_from_slice(&self.regions);
        Ok(Self { regions: cloned })
    }

    /// Sets `writeable = true` on every region, leaving `writeable_saved` alone.
    pub fn prepare_load(&mut self) {
        for region in &mut self.regions {
            region.writeable = true;
        }
    }

    /// Restores `writeable = writeable_saved` on every region.
    pub fn complete_load(&mut self) {
        for region in &mut self.regions {
            region.writeable = region.writeable_saved;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
