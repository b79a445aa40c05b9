/*
 * Architecture Support
 *
 * Boot and CPU-level glue is architecture-specific; everything above this
 * module (memory, tests) is written against the x86_64 submodule's public
 * interface so a second `#[cfg(target_arch = ...)]` arm could be added here
 * without touching the rest of the kernel.
 */

#[cfg(target_arch = "x86_64")]
#[macro_use]
pub mod x86_64;
