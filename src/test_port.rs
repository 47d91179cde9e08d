/*
 * Host-only `Port` implementation.
 *
 * No real interrupts, no real stack switch: `disable_interrupts`/
 * `enable_interrupts` just count calls so `lock.rs`'s tests can assert
 * on masking behavior, and `request_context_switch` records that a
 * switch was asked for rather than performing one — there is no
 * second stack to jump to on the host. Kernel-level tests drive the
 * scheduler directly (advance ticks, call blocking/wake entry points)
 * and assert on the resulting `Kernel` state rather than on actually
 * running thread bodies.
 */

use core::cell::Cell;

use crate::port::{Port, StackPointer};

pub struct TestPort {
    mask_count: Cell<u32>,
    unmask_count: Cell<u32>,
    switch_requests: Cell<u32>,
    next_sp: Cell<usize>,
}

impl TestPort {
    pub fn new() -> Self {
        TestPort {
            mask_count: Cell::new(0),
            unmask_count: Cell::new(0),
            switch_requests: Cell::new(0),
            next_sp: Cell::new(0x1000),
        }
    }

    pub fn mask_count(&self) -> u32 {
        self.mask_count.get()
    }

    pub fn unmask_count(&self) -> u32 {
        self.unmask_count.get()
    }

    pub fn switch_requests(&self) -> u32 {
        self.switch_requests.get()
    }
}

impl Default for TestPort {
    fn default() -> Self {
        Self::new()
    }
}

extern "C" fn noop_entry(_arg: usize) {}
extern "C" fn noop_return_hook() {}

/// Placeholder job/return-hook pair a test can pass to `Kernel::create`
/// when the test never actually "runs" the thread body, driving kernel
/// state directly instead.
pub const NOOP_JOB: extern "C" fn(usize) = noop_entry;
pub const NOOP_RETURN_HOOK: extern "C" fn() = noop_return_hook;

impl Port for TestPort {
    fn disable_interrupts(&self) {
        self.mask_count.set(self.mask_count.get() + 1);
    }

    fn enable_interrupts(&self) {
        self.unmask_count.set(self.unmask_count.get() + 1);
    }

    fn init_stack(
        &self,
        _stack: *mut u8,
        _stack_size: usize,
        _entry: extern "C" fn(usize),
        _entry_arg: usize,
        _return_hook: extern "C" fn(),
    ) -> StackPointer {
        let sp = self.next_sp.get();
        self.next_sp.set(sp + 0x1000);
        sp
    }

    fn request_context_switch(&self) {
        self.switch_requests.set(self.switch_requests.get() + 1);
    }

    fn start_kernel(&self) -> ! {
        panic!("TestPort::start_kernel is never exercised by host tests");
    }

    fn idle_loop(&self) -> ! {
        panic!("TestPort::idle_loop is never exercised by host tests");
    }
}
