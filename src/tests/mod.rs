/*
 * Kernel Self-Test Suite
 *
 * There is no hosted test runner in a `no_std`/`no_main` kernel binary, so
 * these tests run as ordinary functions invoked once from `kstart`, against
 * the real subsystems the kernel just brought up (the physical frame
 * allocator, the heap). Failures are logged rather than panicking the
 * kernel, so one failing scenario doesn't hide the rest.
 */

pub mod vm_tests;
