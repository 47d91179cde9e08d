/*
 * Byte queue: a ring buffer with one reserved slot to disambiguate
 * full from empty, two priority waiter queues (readers, writers), and
 * a cross-side wake engine (`unlock_threads`) that keeps serving both
 * sides until neither can make progress.
 *
 * All transfers are byte-granular and all-or-nothing: a request that
 * does not currently fit blocks in full rather than transferring a
 * partial run.
 */

use crate::blocking::{self, reschedule_req};
use crate::lock::Lock;
use crate::pool::{self, BlockHandle, Pool};
use crate::port::Port;
use crate::sched::Scheduler;
use crate::thread::{SchedOwner, ThreadArena, ThreadHandle};
use crate::wait::{WaitKind, WaitRequest};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueueHandle(pub u32);

impl QueueHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The byte buffer backing a queue is user payload like any
/// `allocate()` block, so it comes from the same pool rather than a
/// host `Vec` — only the control block itself (this struct) lives in
/// the handle-addressed arena.
pub struct Queue {
    block: BlockHandle,
    cap: usize,
    read: usize,
    write: usize,
    pub readers: Option<ThreadHandle>,
    pub writers: Option<ThreadHandle>,
}

impl Queue {
    /// `create(size)`: carve `usable_size + 1` bytes out of the pool.
    /// `None` on exhaustion.
    pub fn create(pool: &mut Pool, usable_size: usize) -> Option<Self> {
        let cap = usable_size + 1;
        let block = unsafe { pool.alloc(cap) }?;
        Some(Queue { block, cap, read: 0, write: 0, readers: None, writers: None })
    }

    /// Return the backing block to the pool. Caller must have already
    /// woken every waiter (`delete`) before calling this.
    ///
    /// # Safety
    /// Must be called at most once, and only after this queue is no
    /// longer reachable.
    pub unsafe fn destroy(self, pool: &mut Pool) {
        unsafe { pool.free(self.block) };
    }

    fn as_ptr(&self) -> *mut u8 {
        unsafe { pool::user_ptr(self.block) }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn usable_size(&self) -> usize {
        self.cap - 1
    }

    pub fn used_size(&self) -> usize {
        (self.write + self.cap - self.read) % self.cap
    }

    pub fn free_space(&self) -> usize {
        self.usable_size() - self.used_size()
    }

    /// Copy `len` bytes from `src` into the ring starting at `at`,
    /// advancing in the forward direction, with wraparound split into
    /// at most two linear runs.
    unsafe fn copy_in(&mut self, src: *const u8, len: usize, at: usize) {
        let base = self.as_ptr();
        let first = core::cmp::min(len, self.cap - at);
        unsafe {
            core::ptr::copy_nonoverlapping(src, base.add(at), first);
            if first < len {
                core::ptr::copy_nonoverlapping(src.add(first), base, len - first);
            }
        }
    }

    /// Copy `len` bytes out of the ring starting at `at` into `dst`.
    unsafe fn copy_out(&self, dst: *mut u8, len: usize, at: usize) {
        let base = self.as_ptr();
        let first = core::cmp::min(len, self.cap - at);
        unsafe {
            core::ptr::copy_nonoverlapping(base.add(at), dst, first);
            if first < len {
                core::ptr::copy_nonoverlapping(base, dst.add(first), len - first);
            }
        }
    }

    fn advance_write(&mut self, len: usize) {
        self.write = (self.write + len) % self.cap;
    }

    fn advance_read(&mut self, len: usize) {
        self.read = (self.read + len) % self.cap;
    }

    fn retreat_read(&mut self, len: usize) -> usize {
        self.read = (self.read + self.cap - len % self.cap) % self.cap;
        self.read
    }
}

fn do_send(q: &mut Queue, data: *const u8, n: usize, write_ahead: bool) {
    if write_ahead {
        let at = q.retreat_read(n);
        unsafe { q.copy_in(data, n, at) };
    } else {
        let at = q.write;
        unsafe { q.copy_in(data, n, at) };
        q.advance_write(n);
    }
}

fn do_receive(q: &mut Queue, buf: *mut u8, n: usize, peek: bool) {
    unsafe { q.copy_out(buf, n, q.read) };
    if !peek {
        q.advance_read(n);
    }
}

/// `send(data, n, timeout)`: fast path if `n` bytes fit, else block on
/// the writers queue.
#[allow(clippy::too_many_arguments)]
pub fn send(
    q: &mut Queue,
    handle: QueueHandle,
    threads: &mut ThreadArena,
    sched: &mut Scheduler,
    lock: &Lock,
    port: &dyn Port,
    current: ThreadHandle,
    data: *const u8,
    n: usize,
    timeout: u32,
    write_ahead: bool,
) -> bool {
    if n <= q.free_space() {
        do_send(q, data, n, write_ahead);
        unlock_threads(q, threads, sched, port);
        return true;
    }
    let kind = WaitKind::QueueWrite { data, len: n, write_ahead };
    blocking::block_current(
        threads,
        sched,
        lock,
        port,
        current,
        Some((&mut q.writers, SchedOwner::QueueWrite(handle))),
        WaitRequest::new(kind),
        timeout,
    )
}

/// `receive(buf, n, timeout)` / `peek(buf, n, timeout)`: fast path if
/// `n` bytes are available, else block on the readers queue.
#[allow(clippy::too_many_arguments)]
pub fn receive(
    q: &mut Queue,
    handle: QueueHandle,
    threads: &mut ThreadArena,
    sched: &mut Scheduler,
    lock: &Lock,
    port: &dyn Port,
    current: ThreadHandle,
    buf: *mut u8,
    n: usize,
    timeout: u32,
    peek: bool,
) -> bool {
    if n <= q.used_size() {
        do_receive(q, buf, n, peek);
        unlock_threads(q, threads, sched, port);
        return true;
    }
    let kind = WaitKind::QueueRead { buf, len: n, peek };
    blocking::block_current(
        threads,
        sched,
        lock,
        port,
        current,
        Some((&mut q.readers, SchedOwner::QueueRead(handle))),
        WaitRequest::new(kind),
        timeout,
    )
}

/// Serve one writer transfer if the head waiter's request now fits.
/// Returns whether progress was made.
fn try_serve_writer(q: &mut Queue, threads: &mut ThreadArena) -> bool {
    let Some(head) = q.writers else { return false };
    let Some(WaitKind::QueueWrite { data, len, write_ahead }) = threads.get(head).wait.map(|w| w.kind) else {
        return false;
    };
    if len > q.free_space() {
        return false;
    }
    let popped = Scheduler::waiter_pop(&mut threads.threads, &mut q.writers);
    debug_assert_eq!(popped, Some(head));
    do_send(q, data, len, write_ahead);
    threads.get_mut(head).wait.as_mut().unwrap().result = true;
    true
}

/// Serve one reader transfer if the head waiter's request can now be
/// satisfied. Returns whether progress was made.
fn try_serve_reader(q: &mut Queue, threads: &mut ThreadArena) -> bool {
    let Some(head) = q.readers else { return false };
    let Some(WaitKind::QueueRead { buf, len, peek }) = threads.get(head).wait.map(|w| w.kind) else {
        return false;
    };
    if len > q.used_size() {
        return false;
    }
    let popped = Scheduler::waiter_pop(&mut threads.threads, &mut q.readers);
    debug_assert_eq!(popped, Some(head));
    do_receive(q, buf, len, peek);
    threads.get_mut(head).wait.as_mut().unwrap().result = true;
    true
}

/// The cross-side wake engine: keeps trying to serve the writers' and
/// readers' heads, flipping the opposite side's flag back on after
/// every successful transfer, until neither side can make progress.
/// Readied threads are collected and woken via `blocking::ready_thread`
/// as each transfer completes, then a single reschedule is requested
/// at the end.
pub fn unlock_threads(q: &mut Queue, threads: &mut ThreadArena, sched: &mut Scheduler, port: &dyn Port) {
    let mut can_write = true;
    let mut can_read = true;
    while can_write || can_read {
        if can_write {
            let head_before = q.writers;
            can_write = try_serve_writer(q, threads);
            if can_write {
                if let Some(h) = head_before {
                    blocking::ready_thread(threads, sched, h);
                }
                can_read = true;
            }
        }
        if can_read {
            let head_before = q.readers;
            can_read = try_serve_reader(q, threads);
            if can_read {
                if let Some(h) = head_before {
                    blocking::ready_thread(threads, sched, h);
                }
                can_write = true;
            }
        }
    }
    reschedule_req(threads, sched, port);
}

/// `reset`: clear to empty, then run the wake engine (there should be
/// no waiters left in a well-behaved program, but the wake engine is
/// harmless to run regardless).
pub fn reset(q: &mut Queue, threads: &mut ThreadArena, sched: &mut Scheduler, port: &dyn Port) {
    q.read = 0;
    q.write = 0;
    unlock_threads(q, threads, sched, port);
}

/// `delete`: wake every waiter on both queues with a false result.
/// Caller frees the `Queue` slot (and its buffer) afterward.
pub fn delete(q: &mut Queue, threads: &mut ThreadArena, sched: &mut Scheduler, port: &dyn Port) {
    while let Some(head) = Scheduler::waiter_pop(&mut threads.threads, &mut q.writers) {
        threads.get_mut(head).wait.as_mut().unwrap().result = false;
        blocking::ready_thread(threads, sched, head);
    }
    while let Some(head) = Scheduler::waiter_pop(&mut threads.threads, &mut q.readers) {
        threads.get_mut(head).wait.as_mut().unwrap().result = false;
        blocking::ready_thread(threads, sched, head);
    }
    reschedule_req(threads, sched, port);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    fn new_test_pool(len: usize) -> (Pool, Box<[u8]>) {
        let mut mem = alloc::vec![0u8; len].into_boxed_slice();
        let pool = unsafe { Pool::init(mem.as_mut_ptr(), len) };
        (pool, mem)
    }

    #[test]
    fn send_and_receive_round_trip() {
        let (mut pool, _mem) = new_test_pool(4096);
        let mut q = Queue::create(&mut pool, 8).unwrap();
        assert_eq!(q.free_space(), 8);
        unsafe { q.copy_in(b"ab".as_ptr(), 2, q.write) };
        q.advance_write(2);
        assert_eq!(q.used_size(), 2);
        let mut out = [0u8; 2];
        unsafe { q.copy_out(out.as_mut_ptr(), 2, q.read) };
        q.advance_read(2);
        assert_eq!(&out, b"ab");
        assert_eq!(q.used_size(), 0);
        unsafe { q.destroy(&mut pool) };
    }

    #[test]
    fn write_ahead_prepends_at_the_read_cursor() {
        let (mut pool, _mem) = new_test_pool(4096);
        let mut q = Queue::create(&mut pool, 8).unwrap();
        do_send(&mut q, b"bb".as_ptr(), 2, false);
        do_send(&mut q, b"a".as_ptr(), 1, true);
        let mut out = [0u8; 3];
        do_receive(&mut q, out.as_mut_ptr(), 3, false);
        assert_eq!(&out, b"abb");
        unsafe { q.destroy(&mut pool) };
    }

    #[test]
    fn peek_leaves_the_read_cursor_unmoved() {
        let (mut pool, _mem) = new_test_pool(4096);
        let mut q = Queue::create(&mut pool, 8).unwrap();
        do_send(&mut q, b"xy".as_ptr(), 2, false);
        let mut out = [0u8; 2];
        do_receive(&mut q, out.as_mut_ptr(), 2, true);
        assert_eq!(&out, b"xy");
        assert_eq!(q.used_size(), 2, "peek must not advance the read cursor");
        unsafe { q.destroy(&mut pool) };
    }
}
