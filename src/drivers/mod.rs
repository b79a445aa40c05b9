/*
 * Hardware Drivers
 *
 * This module contains hardware-specific drivers for the kernel. The
 * virtual memory subsystem only needs a console to log through, so the
 * display/input/system drivers the full CLUU kernel carries are not part
 * of this tree.
 */

pub mod serial;
