/*
 * Thread control block and thread arena.
 *
 * TCBs live in `Kernel.threads: Vec<Thread>`, addressed by the
 * generation-free `ThreadHandle` index rather than a raw pointer. Each
 * TCB carries exactly two link slots (`sched_link`, `delay_link`),
 * reused by whichever queue currently owns them — a thread's
 * scheduling item moves between the ready queue and a sync object's
 * waiter queue, while its delay item moves between the normal and
 * overflow delay queues.
 */

use alloc::vec::Vec;

use crate::list::Link;
use crate::wait::WaitRequest;

/// Opaque handle to a TCB. Index into `Kernel.threads`. Slot reuse
/// after delete is fine: stale-handle use is a programmer error caught
/// by a debug assertion, not a memory-safety hazard, since the arena
/// never actually frees a `Vec` slot — it marks it
/// `Deleted` and a later `create` may place a new thread in a *new*
/// slot (we never physically reuse indices, keeping handle comparisons
/// meaningful for the lifetime of the kernel).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadHandle(pub u32);

impl ThreadHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn from_index(i: usize) -> Self {
        ThreadHandle(i as u32)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Blocked,
    Suspended,
    Deleted,
}

/// Which list currently owns a thread's *scheduling* item. `None` means
/// detached (can only happen transiently, mid-transition, under the
/// lock). Distinct from `ThreadState` only in that this says *where*,
/// while state says *what kind of where*.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SchedOwner {
    Ready(u8),
    SemWait(crate::sync::semaphore::SemHandle),
    MutexWait(crate::sync::mutex::MutexHandle),
    QueueRead(crate::sync::queue::QueueHandle),
    QueueWrite(crate::sync::queue::QueueHandle),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DelayOwner {
    Normal,
    Overflow,
}

pub struct Thread {
    pub state: ThreadState,
    pub priority: u8,

    pub sched_link: Link,
    pub sched_tag: i64,
    pub sched_owner: Option<SchedOwner>,

    pub delay_link: Link,
    pub delay_tag: u32,
    pub delay_owner: Option<DelayOwner>,

    /// Base and length of the thread's owned stack region, as returned
    /// by the allocator; `None` for a thread that did not own its stack
    /// (not used in this implementation, but keeps the field honest).
    pub stack_base: *mut u8,
    pub stack_size: usize,
    pub stack_pointer: crate::port::StackPointer,
    /// The pool block backing `stack_base`, freed on delete. Distinct
    /// from `owned_blocks`: the stack is a structural resource of the
    /// thread itself, not a user allocation it happens to own.
    pub stack_block: Option<crate::pool::BlockHandle>,

    /// Head of this thread's owned-allocation list, threaded through
    /// the same `prev`/`next` fields `crate::pool::BlockHeader` uses
    /// for the pool's free ring.
    pub owned_blocks: Option<crate::pool::BlockHandle>,

    /// Set while `Blocked`; describes which sync object is being
    /// waited on and carries the outcome the waiter will read on
    /// resume. `None` when not blocked.
    pub wait: Option<WaitRequest>,
}

// SAFETY: `stack_base` is only ever touched under the kernel's single
// interrupt-masking lock, and the kernel is single-core.
unsafe impl Send for Thread {}

impl Thread {
    pub fn new(priority: u8) -> Self {
        Thread {
            state: ThreadState::Suspended,
            priority,
            sched_link: Link::detached(ThreadHandle(0)),
            sched_tag: priority as i64,
            sched_owner: None,
            delay_link: Link::detached(ThreadHandle(0)),
            delay_tag: 0,
            delay_owner: None,
            stack_base: core::ptr::null_mut(),
            stack_size: 0,
            stack_pointer: 0,
            stack_block: None,
            owned_blocks: None,
            wait: None,
        }
    }
}

pub struct ThreadArena {
    pub threads: Vec<Thread>,
}

impl ThreadArena {
    pub fn new() -> Self {
        ThreadArena { threads: Vec::new() }
    }

    pub fn insert(&mut self, thread: Thread) -> ThreadHandle {
        let handle = ThreadHandle::from_index(self.threads.len());
        self.threads.push(thread);
        // Fix up self-loop sentinels now that we know our own handle.
        self.threads[handle.index()].sched_link = Link::detached(handle);
        self.threads[handle.index()].delay_link = Link::detached(handle);
        handle
    }

    pub fn get(&self, h: ThreadHandle) -> &Thread {
        &self.threads[h.index()]
    }

    pub fn get_mut(&mut self, h: ThreadHandle) -> &mut Thread {
        &mut self.threads[h.index()]
    }
}

impl Default for ThreadArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn make_arena(n: usize) -> Vec<Thread> {
        let mut v = Vec::with_capacity(n);
        for i in 0..n {
            let mut t = Thread::new(0);
            let h = ThreadHandle::from_index(i);
            t.sched_link = Link::detached(h);
            t.delay_link = Link::detached(h);
            v.push(t);
        }
        v
    }
}
