/*
 * Three-Level Page Table
 *
 * A value-typed radix tree: level 1 owns an array of optional boxed
 * level-2 nodes, which own optional boxed level-3 nodes, whose leaves are
 * bit-packed TLB-low words. Interior nodes are allocated lazily the first
 * time a child under them is touched, and never freed until the owning
 * address space is destroyed.
 *
 * Interior-node allocation uses a fallible raw-allocator path instead of
 * `Box::new`/`Vec::push`, because the fault handler's rollback protocol
 * depends on allocation failure producing `Err(OutOfMemory)` rather than
 * aborting the kernel.
 */

use alloc::boxed::Box;
use core::array;

use super::{frame, VmError, LEVEL1_SIZE, LEVEL2_SIZE, LEVEL3_SIZE, PAGE_FRAME};

/// Allocates a `T` on the heap, returning `None` instead of aborting when
/// the allocator is exhausted.
fn try_alloc<T>(value: T) -> Option<Box<T>> {
    use core::alloc::Layout;

    let layout = Layout::new::<T>();
    unsafe {
        let ptr = alloc::alloc::alloc(layout) as *mut T;
        if ptr.is_null() {
            return None;
        }
        ptr.write(value);
        Some(Box::from_raw(ptr))
    }
}

pub struct Level3 {
    leaves: [u32; LEVEL3_SIZE],
}

impl Level3 {
    fn new() -> Self {
        Self { leaves: [0; LEVEL3_SIZE] }
    }
}

pub struct Level2 {
    slots: [Option<Box<Level3>>; LEVEL2_SIZE],
}

impl Level2 {
    fn new() -> Self {
        Self { slots: array::from_fn(|_| None) }
    }
}

/// A process's three-level translation tree.
pub struct PageTable {
    level1: Box<[Option<Box<Level2>>; LEVEL1_SIZE]>,
}

impl PageTable {
    /// Allocates an empty page table (all 256 level-1 slots null).
    pub fn new() -> Result<Self, VmError> {
        let level1 = try_alloc(array::from_fn(|_| None)).ok_or(VmError::OutOfMemory)?;
        Ok(Self { level1 })
    }

    /// Reads the leaf at `[p1][p2][p3]`, or 0 if any level of the path is absent.
    pub fn read_leaf(&self, p1: usize, p2: usize, p3: usize) -> u32 {
        self.level1[p1]
            .as_deref()
            .and_then(|l2| l2.slots[p2].as_deref())
            .map(|l3| l3.leaves[p3])
            .unwrap_or(0)
    }

    /// Writes a leaf value. The interior nodes on the path must already exist
    /// (see [`ensure_interior`](Self::ensure_interior)).
    pub fn write_leaf(&mut self, p1: usize, p2: usize, p3: usize, value: u32) {
        let l2 = self.level1[p1].as_deref_mut().expect("level-2 table missing");
        let l3 = l2.slots[p2].as_deref_mut().expect("level-3 table missing");
        l3.leaves[p3] = value;
    }

    /// Ensures a level-2 and level-3 table exist along the path to `(p1, p2)`,
    /// allocating whichever are missing. Returns `(created_l2, created_l3)`
    /// so the caller can roll back exactly what this call allocated.
    ///
    /// If the level-3 allocation fails after a fresh level-2 was created in
    /// the same call, the level-2 table is freed before returning the error,
    /// so a failed call never leaves a dangling all-null level-2 behind.
    pub fn ensure_interior(&mut self, p1: usize, p2: usize) -> Result<(bool, bool), VmError> {
        let mut created_l2 = false;
        if self.level1[p1].is_none() {
            let l2 = try_alloc(Level2::new()).ok_or(VmError::OutOfMemory)?;
            self.level1[p1] = Some(l2);
            created_l2 = true;
        }

        let l2 = self.level1[p1].as_deref_mut().unwrap();
        let mut created_l3 = false;
        if l2.slots[p2].is_none() {
            match try_alloc(Level3::new()) {
                Some(l3) => {
                    l2.slots[p2] = Some(l3);
                    created_l3 = true;
                }
                None => {
                    if created_l2 {
                        self.level1[p1] = None;
                    }
                    return Err(VmError::OutOfMemory);
                }
            }
        }

        Ok((created_l2, created_l3))
    }

    /// Undoes whatever `ensure_interior` created in the same fault, after a
    /// later step (frame allocation) fails.
    pub fn rollback(&mut self, p1: usize, p2: usize, created_l2: bool, created_l3: bool) {
        if created_l2 {
            self.level1[p1] = None;
        } else if created_l3 {
            if let Some(l2) = self.level1[p1].as_deref_mut() {
                l2.slots[p2] = None;
            }
        }
    }

    /// Deep-copies every mapped page into a fresh page table: allocates
    /// matching interior nodes, allocates a fresh frame per present leaf,
    /// copies its contents, and preserves the leaf's dirty bit. Aborts and
    /// tears down everything allocated so far on the first failure.
    pub fn try_clone(&self) -> Result<Self, VmError> {
        let mut dst = PageTable::new()?;

        for p1 in 0..LEVEL1_SIZE {
            let Some(src_l2) = self.level1[p1].as_deref() else { continue };

            for p2 in 0..LEVEL2_SIZE {
                let Some(src_l3) = src_l2.slots[p2].as_deref() else { continue };

                for p3 in 0..LEVEL3_SIZE {
                    let leaf = src_l3.leaves[p3];
                    if leaf == 0 {
                        continue;
                    }

                    if let Err(e) = dst.clone_leaf(p1, p2, p3, leaf) {
                        dst.teardown();
                        return Err(e);
                    }
                }
            }
        }

        Ok(dst)
    }

    fn clone_leaf(&mut self, p1: usize, p2: usize, p3: usize, src_leaf: u32) -> Result<(), VmError> {
        let (created_l2, created_l3) = self.ensure_interior(p1, p2)?;

        let new_frame = match frame::alloc_zeroed() {
            Some(f) => f,
            None => {
                self.rollback(p1, p2, created_l2, created_l3);
                return Err(VmError::OutOfMemory);
            }
        };

        frame::copy(new_frame, src_leaf & PAGE_FRAME);

        let new_leaf = (new_frame & PAGE_FRAME)
            | (src_leaf & super::TLBLO_DIRTY)
            | super::TLBLO_VALID;
        self.write_leaf(p1, p2, p3, new_leaf);
        Ok(())
    }

    /// Frees every present frame and every interior node, then leaves the
    /// level-1 table itself for the caller ([`Self::new`]'s allocation) to drop.
    /// Visits every slot unconditionally; there is no early exit.
    pub fn teardown(&mut self) {
        for p1 in 0..LEVEL1_SIZE {
            let Some(l2) = self.level1[p1].as_deref_mut() else { continue };

            for p2 in 0..LEVEL2_SIZE {
                let Some(l3) = l2.slots[p2].as_deref() else { continue };

                for p3 in 0..LEVEL3_SIZE {
                    let leaf = l3.leaves[p3];
                    if leaf != 0 {
                        frame::free(leaf & PAGE_FRAME);
                    }
                }

                l2.slots[p2] = None;
            }

            self.level1[p1] = None;
        }
    }
}
