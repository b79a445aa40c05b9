/*
 * User-Space Virtual Memory Subsystem Self-Tests
 *
 * Exercises the concrete end-to-end scenarios against the live kernel: the
 * real physical frame allocator and the real (software) TLB model. Each
 * scenario returns whether it passed; `run_all` logs a summary and never
 * panics the kernel on a single failing scenario so the rest still run.
 */

use crate::memory::phys;
use crate::memory::physmap;
use crate::memory::vm::{
    decompose, vm_fault, AddressSpace, FaultType, SoftTlb, VmError, PAGE_FRAME, PAGE_SIZE,
    TLBLO_DIRTY, TLBLO_VALID, USERSTACK,
};

/// Tracks how many scenarios passed and failed, for the closing summary.
struct Results {
    passed: usize,
    failed: usize,
}

impl Results {
    fn new() -> Self {
        Self { passed: 0, failed: 0 }
    }

    fn record(&mut self, name: &str, ok: bool) {
        if ok {
            self.passed += 1;
            log::info!("  [PASS] {}", name);
        } else {
            self.failed += 1;
            log::error!("  [FAIL] {}", name);
        }
    }
}

/// Runs every scenario in turn and logs a pass/fail summary.
pub fn run_all() {
    log::info!("Running virtual memory subsystem self-tests...");

    let mut results = Results::new();
    results.record("S1 stack demand page", test_stack_demand_page());
    results.record("S2 read-only violation", test_readonly_violation());
    results.record("S3 kernel-segment touch", test_kernel_segment_touch());
    results.record("S4 prepare/complete round trip", test_prepare_complete());
    results.record("S5 fork copy isolation", test_fork_copy());
    results.record("S6 destroy releases frames", test_destroy_releases_frames());

    log::info!(
        "Virtual memory self-tests: {} passed, {} failed",
        results.passed,
        results.failed
    );
}

/// Property #3: every present leaf packs only frame/dirty/valid bits and is
/// always marked valid.
fn leaf_well_formed(leaf: u32) -> bool {
    (leaf & !PAGE_FRAME & !TLBLO_DIRTY & !TLBLO_VALID) == 0 && leaf & TLBLO_VALID != 0
}

/// Maps the frame backing `leaf` and returns a pointer to its first word.
fn frame_ptr(leaf: u32) -> *mut u32 {
    let phys = x86_64::PhysAddr::new((leaf & PAGE_FRAME) as u64);
    physmap::phys_to_virt(phys).as_mut_ptr::<u32>()
}

/// S1 — stack demand page: first touch of the top of a freshly defined
/// stack region allocates one frame and inserts a valid, dirty TLB entry.
fn test_stack_demand_page() -> bool {
    let mut as_ = match AddressSpace::create() {
        Ok(a) => a,
        Err(_) => return false,
    };

    let mut sp = 0u32;
    if as_.define_stack(&mut sp).is_err() || sp != USERSTACK {
        as_.destroy();
        return false;
    }

    let mut tlb = SoftTlb::new();
    let fault_address = USERSTACK - 4;
    let ok = vm_fault(Some(&mut as_), FaultType::Read, fault_address, &mut tlb).is_ok();

    let hi = fault_address & PAGE_FRAME;
    let leaf = tlb.lookup(hi);
    let leaf_ok = matches!(leaf, Some(l) if leaf_well_formed(l) && l & TLBLO_DIRTY != 0);

    as_.destroy();
    ok && leaf_ok
}

/// S2 — a write to a read-only region is rejected, and the page table is
/// left untouched.
fn test_readonly_violation() -> bool {
    let mut as_ = match AddressSpace::create() {
        Ok(a) => a,
        Err(_) => return false,
    };

    let vbase = 0x0040_0000u32;
    if as_.define_region(vbase, PAGE_SIZE, true, false, true).is_err() {
        as_.destroy();
        return false;
    }

    let mut tlb = SoftTlb::new();
    let fault_address = vbase + 0x0abc;
    let result = vm_fault(Some(&mut as_), FaultType::Write, fault_address, &mut tlb);

    let Ok((p1, p2, p3)) = decompose(fault_address) else {
        as_.destroy();
        return false;
    };
    let unchanged = as_.page_table.read_leaf(p1, p2, p3) == 0;

    as_.destroy();
    matches!(result, Err(VmError::PermissionDenied)) && unchanged
}

/// S3 — touching the kernel segment from a user fault is out of the page
/// table's range and never reaches the region list.
fn test_kernel_segment_touch() -> bool {
    let mut as_ = match AddressSpace::create() {
        Ok(a) => a,
        Err(_) => return false,
    };

    let mut tlb = SoftTlb::new();
    let result = vm_fault(Some(&mut as_), FaultType::Read, 0x8000_0004, &mut tlb);

    as_.destroy();
    matches!(result, Err(VmError::OutOfRange) | Err(VmError::InvalidAddress))
}

/// S4 — `prepare_load` relaxes a read-only region so the loader can write
/// it; `complete_load` restores the original permission for pages not yet
/// touched, while already-mapped pages keep their (now dirty) encoding.
fn test_prepare_complete() -> bool {
    let mut as_ = match AddressSpace::create() {
        Ok(a) => a,
        Err(_) => return false,
    };

    let vbase = 0x0060_0000u32;
    if as_
        .define_region(vbase, 2 * PAGE_SIZE, true, false, false)
        .is_err()
    {
        as_.destroy();
        return false;
    }

    as_.prepare_load();

    let mut tlb = SoftTlb::new();
    let first_page = vbase;
    let load_write_ok = vm_fault(Some(&mut as_), FaultType::Write, first_page, &mut tlb).is_ok();

    let hi = first_page & PAGE_FRAME;
    let leaf_after_load = tlb.lookup(hi);
    let dirty_after_load = matches!(leaf_after_load, Some(l) if l & TLBLO_DIRTY != 0);

    as_.complete_load(&mut tlb);

    let second_page = vbase + PAGE_SIZE;
    let post_complete_write = vm_fault(Some(&mut as_), FaultType::Write, second_page, &mut tlb);
    let now_rejected = matches!(post_complete_write, Err(VmError::PermissionDenied));

    as_.destroy();
    load_write_ok && dirty_after_load && now_rejected
}

/// S5 — copying an address space gives the clone private frames with
/// identical contents; mutating the parent's frame never changes the
/// child's.
fn test_fork_copy() -> bool {
    let mut src = match AddressSpace::create() {
        Ok(a) => a,
        Err(_) => return false,
    };

    let vbase = 0x0050_0000u32;
    if src.define_region(vbase, PAGE_SIZE, true, true, false).is_err() {
        src.destroy();
        return false;
    }

    let mut tlb = SoftTlb::new();
    if vm_fault(Some(&mut src), FaultType::Write, vbase, &mut tlb).is_err() {
        src.destroy();
        return false;
    }

    let Ok((p1, p2, p3)) = decompose(vbase) else {
        src.destroy();
        return false;
    };
    let src_leaf = src.page_table.read_leaf(p1, p2, p3);
    if src_leaf == 0 {
        src.destroy();
        return false;
    }

    const PATTERN: u32 = 0xdead_beef;
    unsafe { frame_ptr(src_leaf).write_volatile(PATTERN) };

    let dst = match src.try_clone() {
        Ok(d) => d,
        Err(_) => {
            src.destroy();
            return false;
        }
    };

    let dst_leaf = dst.page_table.read_leaf(p1, p2, p3);
    let distinct_frames = dst_leaf != 0 && (dst_leaf & PAGE_FRAME) != (src_leaf & PAGE_FRAME);
    let same_pattern = dst_leaf != 0 && unsafe { frame_ptr(dst_leaf).read_volatile() } == PATTERN;
    let dirty_preserved = (dst_leaf & TLBLO_DIRTY) == (src_leaf & TLBLO_DIRTY);

    unsafe { frame_ptr(src_leaf).write_volatile(0x1111_2222) };
    let child_unaffected = unsafe { frame_ptr(dst_leaf).read_volatile() } == PATTERN;

    src.destroy();
    dst.destroy();

    distinct_frames && same_pattern && dirty_preserved && child_unaffected
}

/// S6 — destroying an address space returns exactly the frames it faulted
/// in to the allocator.
fn test_destroy_releases_frames() -> bool {
    let (used_before, _) = phys::get_stats();

    let mut as_ = match AddressSpace::create() {
        Ok(a) => a,
        Err(_) => return false,
    };

    // Three pages in three distinct level-1 buckets (16 MiB apart, so their
    // top 8 bits differ).
    let addresses = [0x0000_1000u32, 0x0100_1000u32, 0x0200_1000u32];
    for &addr in &addresses {
        if as_.define_region(addr, PAGE_SIZE, true, true, false).is_err() {
            as_.destroy();
            return false;
        }
    }

    let mut tlb = SoftTlb::new();
    let mut leaves_ok = true;
    for &addr in &addresses {
        if vm_fault(Some(&mut as_), FaultType::Write, addr, &mut tlb).is_err() {
            as_.destroy();
            return false;
        }
        let Ok((p1, p2, p3)) = decompose(addr) else {
            as_.destroy();
            return false;
        };
        leaves_ok &= leaf_well_formed(as_.page_table.read_leaf(p1, p2, p3));
    }

    let (used_mid, _) = phys::get_stats();
    let grew = used_mid >= used_before + addresses.len();

    as_.destroy();

    let (used_after, _) = phys::get_stats();
    grew && leaves_ok && used_after == used_before
}
