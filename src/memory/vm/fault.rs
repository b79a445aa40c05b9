/*
 * Fault Handler
 *
 * Classifies the fault, consults the region list for permission, walks or
 * extends the page table, demand-allocates a zero-filled frame for a fresh
 * leaf, and inserts a random TLB entry under raised interrupt priority.
 *
 * Only resources allocated *during this call* are rolled back on failure;
 * a preexisting level-2 table is never freed by this path. Exactly one
 * region lookup is performed, caching its writability for the leaf
 * encoding step, per the design notes below.
 *
 * The original design reads the current address space from a process-wide
 * global (`proc_getas()`); here it is always a value the caller passes in,
 * so "no current process" and "current process has no address space" are
 * the same observable state: `None`.
 */

use crate::arch::x86_64::interrupts::DisableInterrupts;

use super::addrspace::AddressSpace;
use super::tlb::SoftTlb;
use super::{decompose, encode_leaf, frame, PAGE_FRAME, VmError};

/// Fault classification passed to [`vm_fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    Read,
    Write,
    /// A write to a page already known to be read-only. This kernel has no
    /// copy-on-write path and cannot service such a fault.
    ReadOnly,
}

/// Handles a TLB-miss or protection fault at `fault_address` in `current`.
///
/// Returns `Ok(())` once a TLB entry has been inserted for the faulting
/// page, or one of the errors in [`VmError`] with the address space left
/// exactly as it was before the call.
pub fn vm_fault(
    current: Option<&mut AddressSpace>,
    fault_type: FaultType,
    fault_address: u32,
    tlb: &mut SoftTlb,
) -> Result<(), VmError> {
    if fault_type == FaultType::ReadOnly {
        return Err(VmError::InvalidAddress);
    }

    let as_ = current.ok_or(VmError::InvalidAddress)?;

    let (p1, p2, p3) = decompose(fault_address)?;

    // Region check: exactly one lookup, caching `writeable` for step 7.
    let region = as_
        .regions
        .find_containing(fault_address)
        .ok_or(VmError::InvalidAddress)?;
    match fault_type {
        FaultType::Write if !region.writeable => return Err(VmError::PermissionDenied),
        FaultType::Read if !region.readable => return Err(VmError::PermissionDenied),
        FaultType::Write | FaultType::Read => {}
        FaultType::ReadOnly => unreachable!("handled above"),
    }
    let writeable = region.writeable;

    let (created_l2, created_l3) = as_.page_table.ensure_interior(p1, p2)?;

    let leaf = as_.page_table.read_leaf(p1, p2, p3);
    let leaf = if leaf == 0 {
        let new_frame = match frame::alloc_zeroed() {
            Some(f) => f,
            None => {
                as_.page_table.rollback(p1, p2, created_l2, created_l3);
                return Err(VmError::OutOfMemory);
            }
        };
        let encoded = encode_leaf(new_frame & PAGE_FRAME, writeable);
        as_.page_table.write_leaf(p1, p2, p3, encoded);
        encoded
    } else {
        leaf
    };

    let _guard = DisableInterrupts::new();
    tlb.write_random(fault_address & PAGE_FRAME, leaf);
    drop(_guard);

    Ok(())
}
