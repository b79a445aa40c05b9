/*
 * Frame Allocator Collaborator
 *
 * Bridges the 32-bit physical addresses this subsystem bit-packs into leaf
 * words onto the kernel's real frame allocator (`memory::phys`) and direct
 * map (`memory::physmap`).
 *
 * The managed physical pool is well under 4 GiB (see `memory::phys::MAX_FRAMES`),
 * so a frame's physical base address fits in a `u32` without truncation —
 * the MIPS convention's `KVADDR_TO_PADDR`/`PADDR_TO_KVADDR` macros collapse
 * to the identity here: a leaf's frame-base field already *is* the physical
 * address, and the direct map is only needed to get a pointer the CPU can
 * dereference to zero or copy the page.
 */

use crate::memory::types::PhysAddr;
use crate::memory::{phys, physmap, PhysFrame};

use super::PAGE_SIZE;

/// Allocates a physical frame and zero-fills it. Returns the frame's
/// physical base address, or `None` if the pool is exhausted.
pub fn alloc_zeroed() -> Option<u32> {
    let frame = phys::alloc_frame()?;
    let paddr = frame.start_address();
    let ptr = physmap::phys_to_virt(PhysAddr::new(paddr)).as_mut_ptr::<u8>();
    unsafe {
        core::ptr::write_bytes(ptr, 0, PAGE_SIZE as usize);
    }
    Some(paddr as u32)
}

/// Returns the frame at physical address `paddr` to the allocator.
pub fn free(paddr: u32) {
    phys::free_frame(PhysFrame::containing_address(paddr as u64));
}

/// Copies one page from `src` to `dst`, both physical frame base addresses.
pub fn copy(dst: u32, src: u32) {
    let dst_ptr = physmap::phys_to_virt(PhysAddr::new(dst as u64)).as_mut_ptr::<u8>();
    let src_ptr = physmap::phys_to_virt(PhysAddr::new(src as u64)).as_ptr::<u8>();
    unsafe {
        core::ptr::copy_nonoverlapping(src_ptr, dst_ptr, PAGE_SIZE as usize);
    }
}
