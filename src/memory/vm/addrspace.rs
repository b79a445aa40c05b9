/*
 * Address Space
 *
 * Owner of exactly one Region List and one Page Table. No state is shared
 * across address spaces; destroying one returns every frame and interior
 * node it owns to the kernel frame allocator.
 */

use crate::arch::x86_64::interrupts::DisableInterrupts;

use super::pagetable::PageTable;
use super::region::RegionList;
use super::tlb::SoftTlb;
use super::{VmError, USERSTACK, USER_STACK_SIZE};

pub struct AddressSpace {
    pub(crate) regions: RegionList,
    pub(crate) page_table: PageTable,
}

impl AddressSpace {
    /// Allocates an empty page table and an empty region list. Fails with
    /// `OutOfMemory` if the page table's root allocation fails; no partial
    /// state is observable on failure.
    pub fn create() -> Result<Self, VmError> {
        let page_table = PageTable::new()?;
        Ok(Self {
            regions: RegionList::new(),
            page_table,
        })
    }

    /// Deep-copies the region list, then deep-copies the page table (fresh
    /// frames, byte-for-byte contents, preserved dirty bits). Any failure
    /// mid-copy leaves nothing behind; the partial destination is torn down.
    pub fn try_clone(&self) -> Result<Self, VmError> {
        let regions = self.regions.try_clone()?;
        let page_table = match self.page_table.try_clone() {
            Ok(pt) => pt,
            Err(e) => return Err(e),
        };
        Ok(Self { regions, page_table })
    }

    /// Frees every region, then every present frame and interior node of
    /// the page table. Idempotent in the sense that tearing down an
    /// already-empty address space is a harmless no-op.
    pub fn destroy(mut self) {
        self.page_table.teardown();
        // `self.regions` and the now-empty page table root are freed by drop.
    }

    /// Invalidates every TLB entry, bracketed by raised interrupt priority.
    pub fn activate(&self, tlb: &mut SoftTlb) {
        let _guard = DisableInterrupts::new();
        tlb.invalidate_all();
    }

    /// Equivalent to [`Self::activate`].
    pub fn deactivate(&self, tlb: &mut SoftTlb) {
        self.activate(tlb);
    }

    /// Page-aligns and registers a new region. Rejects ranges that escape
    /// the user segment with `InvalidAddress`.
    pub fn define_region(
        &mut self,
        vaddr: u32,
        size: u32,
        readable: bool,
        writeable: bool,
        executable: bool,
    ) -> Result<(), VmError> {
        self.regions
            .define_region(vaddr, size, readable, writeable, executable)
    }

    /// Sets `*stackptr = USERSTACK` and defines the standard 16-page stack
    /// region ending at `USERSTACK`, readable and writable, non-executable.
    pub fn define_stack(&mut self, stackptr: &mut u32) -> Result<(), VmError> {
        *stackptr = USERSTACK;
        self.define_region(USERSTACK - USER_STACK_SIZE, USER_STACK_SIZE, true, true, false)
    }

    /// Relaxes every region to writable, for the ELF loader to write
    /// read-only segments during load.
    pub fn prepare_load(&mut self) {
        self.regions.prepare_load();
    }

    /// Restores every region's true writability and invalidates the TLB.
    pub fn complete_load(&mut self, tlb: &mut SoftTlb) {
        self.regions.complete_load();
        let _guard = DisableInterrupts::new();
        tlb.invalidate_all();
    }
}
