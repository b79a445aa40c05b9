/*
 * Kernel Paging and Virtual Memory Management
 *
 * Page table manipulation for the kernel's own address space, using physmap
 * for all access once it is up. No CR3-switching hack is needed: any root
 * PhysAddr can be walked directly.
 *
 * This is the "out of scope" collaborator the design calls the physical
 * frame allocator and the direct-mapped kernel segment through: the
 * three-level user page table in `memory::vm` never calls into this module
 * directly (it talks to `vm::frame`, which already assumes a working
 * physmap). This module exists to bring that physmap up in the first place
 * and to back the kernel heap with real memory.
 *
 * ARCHITECTURE:
 * - x86_64 4-level paging: PML4 -> PDPT -> PD -> PT -> 4K page
 * - Each level is 512 entries (9 bits)
 * - Entry format: [physical address (12-51)] | [flags (0-11, 52-63)]
 */

use x86_64::structures::paging::PageTableFlags;
use x86_64::{PhysAddr, VirtAddr};

use crate::memory::{phys as pmm, physmap, PhysFrame};

/// Get a pointer to physical memory.
///
/// During bootstrap (before physmap is mapped), uses BOOTBOOT's identity
/// mapping. After physmap is marked active, uses physmap.
///
/// # Safety
/// - During bootstrap: BOOTBOOT must have identity mapped the physical address
/// - After bootstrap: Physmap must be properly set up
#[inline]
unsafe fn phys_ptr<T>(phys: PhysAddr) -> *mut T {
    if physmap::is_active() {
        unsafe { physmap::phys_ptr(phys) }
    } else {
        phys.as_u64() as *mut T
    }
}

/// Page table entry.
#[repr(transparent)]
#[derive(Clone, Copy)]
struct PageTableEntry(u64);

impl PageTableEntry {
    fn addr(&self) -> PhysAddr {
        PhysAddr::new(self.0 & 0x000f_ffff_ffff_f000)
    }

    fn set(&mut self, addr: PhysAddr, flags: PageTableFlags) {
        let addr_u64 = addr.as_u64();
        assert!(
            addr_u64 & 0xfff == 0,
            "page table entry address must be 4KB aligned, got 0x{:x}",
            addr_u64
        );
        if addr_u64 >= physmap::PHYS_MAP_BASE {
            panic!(
                "attempted to store virtual address 0x{:x} in a page table entry",
                addr_u64
            );
        }

        let addr_bits = addr_u64 & 0x000f_ffff_ffff_f000;
        self.0 = addr_bits | flags.bits();
    }

    fn is_present(&self) -> bool {
        (self.0 & 0x1) != 0
    }

    fn clear(&mut self) {
        self.0 = 0;
    }

    fn flags(&self) -> PageTableFlags {
        PageTableFlags::from_bits_truncate(self.0)
    }
}

/// One level of the 4-level x86_64 page table (512 entries).
#[repr(align(4096))]
struct PageTable {
    entries: [PageTableEntry; 512],
}

impl PageTable {
    fn entry(&self, index: usize) -> PageTableEntry {
        self.entries[index]
    }

    fn entry_mut(&mut self, index: usize) -> &mut PageTableEntry {
        &mut self.entries[index]
    }

    fn zero(&mut self) {
        for entry in &mut self.entries {
            entry.clear();
        }
    }
}

fn page_table_indices(virt: VirtAddr) -> (usize, usize, usize, usize) {
    let addr = virt.as_u64();
    let pml4_idx = ((addr >> 39) & 0x1ff) as usize;
    let pdpt_idx = ((addr >> 30) & 0x1ff) as usize;
    let pd_idx = ((addr >> 21) & 0x1ff) as usize;
    let pt_idx = ((addr >> 12) & 0x1ff) as usize;
    (pml4_idx, pdpt_idx, pd_idx, pt_idx)
}

/// Walks the page table rooted at `root` to find the mapping for `virt`.
pub fn translate(root: PhysAddr, virt: VirtAddr) -> Option<(PhysAddr, PageTableFlags)> {
    let (pml4_idx, pdpt_idx, pd_idx, pt_idx) = page_table_indices(virt);

    let pml4 = unsafe { &*phys_ptr::<PageTable>(root) };
    let pml4e = pml4.entry(pml4_idx);
    if !pml4e.is_present() {
        return None;
    }

    let pdpt = unsafe { &*phys_ptr::<PageTable>(pml4e.addr()) };
    let pdpte = pdpt.entry(pdpt_idx);
    if !pdpte.is_present() {
        return None;
    }
    if (pdpte.flags().bits() & (1 << 7)) != 0 {
        let offset = virt.as_u64() & 0x3fff_ffff;
        let phys = PhysAddr::new((pdpte.addr().as_u64() & !0x3fff_ffff) + offset);
        return Some((phys, pdpte.flags()));
    }

    let pd = unsafe { &*phys_ptr::<PageTable>(pdpte.addr()) };
    let pde = pd.entry(pd_idx);
    if !pde.is_present() {
        return None;
    }
    if (pde.flags().bits() & (1 << 7)) != 0 {
        let offset = virt.as_u64() & 0x1f_ffff;
        let phys = PhysAddr::new((pde.addr().as_u64() & !0x1f_ffff) + offset);
        return Some((phys, pde.flags()));
    }

    let pt = unsafe { &*phys_ptr::<PageTable>(pde.addr()) };
    let pte = pt.entry(pt_idx);
    if !pte.is_present() {
        return None;
    }

    let offset = virt.as_u64() & 0xfff;
    let phys = PhysAddr::new(pte.addr().as_u64() + offset);
    Some((phys, pte.flags()))
}

/// Maps a single 4K page in the page table rooted at `root`, allocating
/// intermediate tables as needed.
pub fn map_4k(
    root: PhysAddr,
    virt: VirtAddr,
    phys: PhysAddr,
    flags: PageTableFlags,
) -> Result<(), &'static str> {
    let virt_aligned = VirtAddr::new(virt.as_u64() & !0xfff);
    let phys_aligned = PhysAddr::new(phys.as_u64() & !0xfff);

    let (pml4_idx, pdpt_idx, pd_idx, pt_idx) = page_table_indices(virt_aligned);

    let mut table_flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
    if flags.contains(PageTableFlags::USER_ACCESSIBLE) {
        table_flags |= PageTableFlags::USER_ACCESSIBLE;
    }

    let pml4 = unsafe { &mut *phys_ptr::<PageTable>(root) };
    let pdpt_addr = if !pml4.entry(pml4_idx).is_present() {
        let frame = pmm::alloc_frame().ok_or("out of memory allocating PDPT")?;
        let pdpt_addr = PhysAddr::new(frame.start_address());
        unsafe { (*phys_ptr::<PageTable>(pdpt_addr)).zero() };
        pml4.entry_mut(pml4_idx).set(pdpt_addr, table_flags);
        pdpt_addr
    } else {
        pml4.entry(pml4_idx).addr()
    };

    let pdpt = unsafe { &mut *phys_ptr::<PageTable>(pdpt_addr) };
    let pd_addr = if !pdpt.entry(pdpt_idx).is_present() {
        let frame = pmm::alloc_frame().ok_or("out of memory allocating PD")?;
        let pd_addr = PhysAddr::new(frame.start_address());
        unsafe { (*phys_ptr::<PageTable>(pd_addr)).zero() };
        pdpt.entry_mut(pdpt_idx).set(pd_addr, table_flags);
        pd_addr
    } else {
        pdpt.entry(pdpt_idx).addr()
    };

    let pd = unsafe { &mut *phys_ptr::<PageTable>(pd_addr) };
    let pt_addr = if !pd.entry(pd_idx).is_present() {
        let frame = pmm::alloc_frame().ok_or("out of memory allocating PT")?;
        let pt_addr = PhysAddr::new(frame.start_address());
        unsafe { (*phys_ptr::<PageTable>(pt_addr)).zero() };
        pd.entry_mut(pd_idx).set(pt_addr, table_flags);
        pt_addr
    } else {
        pd.entry(pd_idx).addr()
    };

    let pt = unsafe { &mut *phys_ptr::<PageTable>(pt_addr) };
    if pt.entry(pt_idx).is_present() {
        return Err("page already mapped");
    }
    pt.entry_mut(pt_idx)
        .set(phys_aligned, flags | PageTableFlags::PRESENT);

    Ok(())
}

/// Unmaps a single 4K page, returning the physical address that was mapped.
pub fn unmap_4k(root: PhysAddr, virt: VirtAddr) -> Result<PhysAddr, &'static str> {
    let virt_aligned = VirtAddr::new(virt.as_u64() & !0xfff);
    let (pml4_idx, pdpt_idx, pd_idx, pt_idx) = page_table_indices(virt_aligned);

    let pml4 = unsafe { &mut *phys_ptr::<PageTable>(root) };
    if !pml4.entry(pml4_idx).is_present() {
        return Err("page not mapped (PML4)");
    }
    let pdpt = unsafe { &mut *phys_ptr::<PageTable>(pml4.entry(pml4_idx).addr()) };
    if !pdpt.entry(pdpt_idx).is_present() {
        return Err("page not mapped (PDPT)");
    }
    let pd = unsafe { &mut *phys_ptr::<PageTable>(pdpt.entry(pdpt_idx).addr()) };
    if !pd.entry(pd_idx).is_present() {
        return Err("page not mapped (PD)");
    }
    let pt = unsafe { &mut *phys_ptr::<PageTable>(pd.entry(pd_idx).addr()) };
    if !pt.entry(pt_idx).is_present() {
        return Err("page not mapped (PT)");
    }

    let phys = pt.entry(pt_idx).addr();
    pt.entry_mut(pt_idx).clear();
    Ok(phys)
}

/// Maps `virt_start..virt_start+size` to newly allocated physical frames in
/// the page table rooted at `root`.
pub fn map_range_4k(
    root: PhysAddr,
    virt_start: VirtAddr,
    size: u64,
    flags: PageTableFlags,
) -> Result<(), &'static str> {
    let page_count = (size + 0xfff) / 0x1000;
    for i in 0..page_count {
        let virt = VirtAddr::new(virt_start.as_u64() + i * 0x1000);
        let frame = pmm::alloc_frame().ok_or("out of physical memory")?;
        let phys = PhysAddr::new(frame.start_address());
        map_4k(root, virt, phys, flags)?;
    }
    Ok(())
}

/// Maps `virt_start..virt_start+size` onto `phys_start..phys_start+size`
/// one-to-one, without consuming frames from the allocator. Used to stand
/// up the physmap's direct mapping of all managed physical memory.
pub fn map_range_4k_phys(
    root: PhysAddr,
    virt_start: VirtAddr,
    phys_start: PhysAddr,
    size: u64,
    flags: PageTableFlags,
) -> Result<(), &'static str> {
    let page_count = (size + 0xfff) / 0x1000;
    for i in 0..page_count {
        let virt = VirtAddr::new(virt_start.as_u64() + i * 0x1000);
        let phys = PhysAddr::new(phys_start.as_u64() + i * 0x1000);
        map_4k(root, virt, phys, flags)?;
    }
    Ok(())
}

/// Unmaps `virt_start..virt_start+size` and frees the backing frames.
pub fn unmap_range_4k(root: PhysAddr, virt_start: VirtAddr, size: u64) -> Result<(), &'static str> {
    let page_count = (size + 0xfff) / 0x1000;
    let mut any_failed = false;

    for i in 0..page_count {
        let virt = VirtAddr::new(virt_start.as_u64() + i * 0x1000);
        match unmap_4k(root, virt) {
            Ok(phys) => pmm::free_frame(PhysFrame::containing_address(phys.as_u64())),
            Err(_) => any_failed = true,
        }
    }

    if any_failed {
        Err("failed to unmap one or more pages")
    } else {
        Ok(())
    }
}

/// Returns the currently loaded page table root (CR3).
pub fn get_current_cr3() -> PhysAddr {
    use x86_64::registers::control::Cr3;
    let (frame, _flags) = Cr3::read();
    frame.start_address()
}

/// Flushes the TLB entry for a single virtual address.
#[inline]
pub fn flush_tlb(virt: VirtAddr) {
    x86_64::instructions::tlb::flush(virt);
}

/// Flushes the entire TLB.
#[inline]
pub fn flush_tlb_all() {
    x86_64::instructions::tlb::flush_all();
}

/// Brings up the kernel's own virtual memory state: maps the physmap's
/// direct window over every frame the physical allocator manages into the
/// page table BOOTBOOT left active, then marks physmap usable.
///
/// Must run after `phys::init_from_bootboot` and before `heap::init`.
pub fn init() {
    log::info!("Mapping kernel physmap...");

    let root = get_current_cr3();
    let max_phys = pmm::max_phys();
    let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::NO_EXECUTE;

    map_range_4k_phys(root, VirtAddr::new(physmap::PHYS_MAP_BASE), PhysAddr::new(0), max_phys, flags)
        .expect("failed to map physmap");

    unsafe {
        physmap::init(max_phys);
        physmap::activate();
    }

    log::info!("Physmap mapped and active");
}

/// Maps a fresh virtual range, backed by newly allocated frames, into the
/// currently active page table. Used by the kernel heap.
pub fn map_range(virt: VirtAddr, size: u64, flags: PageTableFlags) -> Result<(), &'static str> {
    map_range_4k(get_current_cr3(), virt, size, flags)
}
