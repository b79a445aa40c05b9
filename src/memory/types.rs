/*
 * Memory Types
 *
 * Re-exports the address types from the x86_64 crate so the rest of the
 * memory subsystem doesn't need to import it directly.
 */

pub use x86_64::{PhysAddr, VirtAddr};
