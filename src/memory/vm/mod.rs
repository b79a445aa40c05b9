/*
 * User-Space Virtual Memory Subsystem
 *
 * Software-refilled TLB virtual memory for a 32-bit user segment, modelled
 * after a MIPS-style three-level page table: a Region List describes the
 * permission of each mapped range, a three-level radix tree translates
 * virtual pages to physical frames, an AddressSpace owns one of each, and
 * the fault handler ties region permissions, page-table state, the frame
 * allocator and the TLB together on every miss.
 *
 * This module is architecture-independent: `frame` is the only piece that
 * reaches into the host's real physical memory (via `memory::phys` and
 * `memory::physmap`), everything else operates purely on the 32-bit
 * addresses and bit-packed leaf words this design uses.
 */

pub mod addrspace;
pub mod fault;
pub mod frame;
pub mod pagetable;
pub mod region;
pub mod tlb;

pub use addrspace::AddressSpace;
pub use fault::{vm_fault, FaultType};
pub use region::Region;
pub use tlb::SoftTlb;

/// Bytes per page.
pub const PAGE_SIZE: u32 = 4096;

/// Mask isolating the frame-number bits of a physical address or leaf word
/// (upper 20 bits of a 32-bit value).
pub const PAGE_FRAME: u32 = 0xffff_f000;

/// Leaf bit marking a page writable (MIPS TLB "dirty" convention: dirty
/// means writable, not "has been written").
pub const TLBLO_DIRTY: u32 = 0x0000_0400;

/// Leaf bit marking a page table entry present/valid.
pub const TLBLO_VALID: u32 = 0x0000_0200;

/// Top of the user segment / bottom of the direct-mapped kernel segment.
/// Addresses at or above this boundary are never mappable by this subsystem.
pub const USERSTACK: u32 = 0x8000_0000;

/// Default size of a newly defined user stack region.
pub const USER_STACK_SIZE: u32 = 16 * PAGE_SIZE;

/// Level-1 table width (8 high bits of a virtual address).
pub const LEVEL1_SIZE: usize = 256;
/// Level-2 table width (6 middle bits).
pub const LEVEL2_SIZE: usize = 64;
/// Level-3 table width (6 low bits, above the 12-bit page offset).
pub const LEVEL3_SIZE: usize = 64;

/// Errors surfaced by the address-space API and the fault handler, mapped
/// onto the classic Unix-ish taxonomy this design is specified against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// ENOMEM: frame or heap allocation failed.
    OutOfMemory,
    /// EFAULT: address not inside any region, no address space, or an
    /// unserviceable write to a read-only page.
    InvalidAddress,
    /// EPERM: access mode forbidden by the region's permission flags.
    PermissionDenied,
    /// ERANGE: address decomposes to an index outside the page table's
    /// fixed dimensions (a kernel-segment address reaching a user fault).
    OutOfRange,
    /// EINVAL: unrecognised fault type, or a required argument was absent.
    BadArgument,
}

impl core::fmt::Display for VmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            VmError::OutOfMemory => "out of memory",
            VmError::InvalidAddress => "invalid address",
            VmError::PermissionDenied => "permission denied",
            VmError::OutOfRange => "address out of range",
            VmError::BadArgument => "bad argument",
        };
        write!(f, "{}", msg)
    }
}

/// Splits a 32-bit user virtual address into its three page-table indices.
///
/// Returns `OutOfRange` for any address at or above [`USERSTACK`] — the
/// direct-mapped kernel segment is never reachable through this page table.
pub fn decompose(vaddr: u32) -> Result<(usize, usize, usize), VmError> {
    if vaddr >= USERSTACK {
        return Err(VmError::OutOfRange);
    }
    let p1 = (vaddr >> 24) as usize;
    let p2 = ((vaddr << 8) >> 26) as usize;
    let p3 = ((vaddr << 14) >> 26) as usize;
    Ok((p1, p2, p3))
}

/// Encodes a leaf word from a physical frame base and the writable bit.
pub fn encode_leaf(frame_base: u32, writeable: bool) -> u32 {
    (frame_base & PAGE_FRAME) | if writeable { TLBLO_DIRTY } else { 0 } | TLBLO_VALID
}
