/*
 * Port trait — the architecture seam.
 *
 * Stack frame layout, the actual interrupt mask instructions, the
 * context-switch trigger, and the idle loop body are all
 * hardware-specific and live outside this crate, consumed here only
 * through this trait. No concrete port ships with the kernel core;
 * `test_port` supplies a host-only stand-in used exclusively by the
 * test suite.
 */

use crate::thread::ThreadHandle;

/// Opaque, port-defined representation of a thread's saved stack pointer.
pub type StackPointer = usize;

/// Architecture/host operations the kernel core needs from its embedder.
///
/// A `Port` implementation must not call back into the kernel from within
/// `disable_interrupts`/`enable_interrupts`/`request_context_switch` — those
/// are invoked while the kernel's own interrupt-masking lock (`crate::lock`)
/// is being acquired or released.
pub trait Port {
    /// Unconditionally mask interrupts. Called exactly once per outermost
    /// `Lock::acquire`.
    fn disable_interrupts(&self);

    /// Unconditionally unmask interrupts. Called exactly once per outermost
    /// `Lock::release`.
    fn enable_interrupts(&self);

    /// Build a synthetic initial frame on `stack` (a region of `stack_size`
    /// bytes) such that resuming it for the first time starts execution at
    /// `entry`, with `return_hook` wired in as the implicit return address
    /// (`entry` returning normally must resume at `return_hook`, never at
    /// undefined memory).
    fn init_stack(
        &self,
        stack: *mut u8,
        stack_size: usize,
        entry: extern "C" fn(usize),
        entry_arg: usize,
        return_hook: extern "C" fn(),
    ) -> StackPointer;

    /// Ask the port to perform a context switch at the next safe moment.
    /// The port is expected to read the scheduler's `current`/`next`
    /// thread handles and, once the switch has physically happened,
    /// report back that `current` has become `next` — this crate does
    /// not assume the switch happened synchronously within this call.
    fn request_context_switch(&self);

    /// Hand control to the first thread. Never returns.
    fn start_kernel(&self) -> !;

    /// Idle thread body. Typically a low-power wait loop; must return
    /// control to the scheduler only by being preempted.
    fn idle_loop(&self) -> !;
}

/// Marker placeholder used where a thread job function needs an
/// argument slot but the caller has none (the common case).
pub const NO_ARG: usize = 0;

/// Reference into the `Port` used by a given thread's return hook.
/// Not part of the public trait: the thread manager wires this in when
/// it builds the job/return pair handed to `init_stack`.
pub type ThreadEntry = extern "C" fn(usize);

/// Handle recorded by the port when it finishes servicing
/// `request_context_switch`, purely for test/diagnostic purposes; the
/// kernel core itself never reads this back synchronously.
pub type SwitchTarget = Option<ThreadHandle>;
