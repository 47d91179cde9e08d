/*
 * Build-time kernel tuning constants.
 *
 * Mirrors the OSPORT_* configuration macros of the port contract this
 * kernel was distilled from: a small set of compile-time values rather
 * than a runtime-configurable policy, since priority count and
 * allocator granularity are baked into array sizes.
 */

/// Number of priority levels. Priority 0 is highest; `PRIO_COUNT - 1` is
/// reserved for the idle thread.
pub const PRIO_COUNT: usize = 32;

/// Allocator granularity; must be a power of two.
pub const MEM_ALIGN: usize = 8;

/// Smallest user payload the allocator guarantees it can satisfy.
pub const MIN_BLOCK_PAYLOAD: usize = MEM_ALIGN;

/// Default stack size reserved for the idle thread.
pub const IDLE_STACK_SIZE: usize = 4096;

/// Interrupt-lock nesting depth above which we assume the counter
/// underflowed or the lock/unlock pairing is corrupted.
pub const MAX_LOCK_DEPTH: u32 = 100;

pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
