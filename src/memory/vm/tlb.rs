/*
 * Software TLB
 *
 * Stand-in for the hardware translation cache this design assumes: a
 * fixed-size set of (virtual page, leaf word) entries refilled entirely by
 * software on every miss, with random replacement. There is no real MIPS
 * TLB under this kernel, so this module simulates the same external
 * surface (`tlb_write`, `tlb_random`, `NUM_TLB`, invalid-entry constants)
 * the fault handler and address-space activation are specified against.
 */

/// Number of hardware TLB entries.
pub const NUM_TLB: usize = 64;

/// The `entry_hi` value written into a deliberately invalidated slot.
pub fn tlbhi_invalid(index: usize) -> u32 {
    (index as u32) << 12
}

/// The `entry_lo` value written into a deliberately invalidated slot.
pub const fn tlblo_invalid() -> u32 {
    0
}

#[derive(Clone, Copy)]
struct Entry {
    hi: u32,
    lo: u32,
}

/// A `NUM_TLB`-entry software translation cache with random replacement.
pub struct SoftTlb {
    entries: [Entry; NUM_TLB],
    next_victim: usize,
}

impl SoftTlb {
    pub const fn new() -> Self {
        Self {
            entries: [Entry { hi: 0, lo: 0 }; NUM_TLB],
            next_victim: 0,
        }
    }

    /// Writes `(hi, lo)` into a specific slot.
    pub fn write(&mut self, hi: u32, lo: u32, index: usize) {
        self.entries[index] = Entry { hi, lo };
    }

    /// Writes `(hi, lo)` into a pseudo-randomly chosen slot (round robin;
    /// real MIPS TLBWR uses a hardware random register, which this
    /// single-CPU software model has no need to reproduce faithfully).
    pub fn write_random(&mut self, hi: u32, lo: u32) {
        let index = self.next_victim;
        self.entries[index] = Entry { hi, lo };
        self.next_victim = (self.next_victim + 1) % NUM_TLB;
    }

    /// Invalidates every entry.
    pub fn invalidate_all(&mut self) {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.hi = tlbhi_invalid(i);
            entry.lo = tlblo_invalid();
        }
    }

    /// Looks up a valid translation for `hi`, mirroring a hardware TLB probe.
    pub fn lookup(&self, hi: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.hi == hi && (e.lo & super::TLBLO_VALID) != 0)
            .map(|e| e.lo)
    }
}

impl Default for SoftTlb {
    fn default() -> Self {
        Self::new()
    }
}
