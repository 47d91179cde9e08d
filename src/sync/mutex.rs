/*
 * Recursive mutex. Ownership is tracked as `(owner, depth)`; a `None`
 * owner means unlocked. Priority inheritance is not part of this
 * design.
 */

use crate::blocking::{self, reschedule_req};
use crate::lock::Lock;
use crate::port::Port;
use crate::sched::Scheduler;
use crate::thread::{SchedOwner, ThreadArena, ThreadHandle};
use crate::wait::{WaitKind, WaitRequest};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MutexHandle(pub u32);

impl MutexHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub struct Mutex {
    pub owner: Option<ThreadHandle>,
    pub depth: u32,
    pub waiters: Option<ThreadHandle>,
}

impl Mutex {
    pub fn new() -> Self {
        Mutex { owner: None, depth: 0, waiters: None }
    }

    /// `peek_lock(handle)` as a pure query: can `current` lock right now
    /// without blocking? Distinct from the blocking `peek_lock(timeout)`
    /// wait variant below.
    pub fn would_lock(&self, current: ThreadHandle) -> bool {
        self.depth == 0 || self.owner == Some(current)
    }

    pub fn is_locked(&self) -> bool {
        self.depth > 0
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_common(
    mutex: &mut Mutex,
    handle: MutexHandle,
    threads: &mut ThreadArena,
    sched: &mut Scheduler,
    lock: &Lock,
    port: &dyn Port,
    current: ThreadHandle,
    timeout: u32,
    peek: bool,
) -> bool {
    if mutex.depth == 0 || mutex.owner == Some(current) {
        if !peek {
            mutex.owner = Some(current);
            mutex.depth += 1;
        }
        return true;
    }
    let kind = if peek { WaitKind::MutexPeek } else { WaitKind::MutexLock };
    blocking::block_current(
        threads,
        sched,
        lock,
        port,
        current,
        Some((&mut mutex.waiters, SchedOwner::MutexWait(handle))),
        WaitRequest::new(kind),
        timeout,
    )
}

/// `lock(timeout)`: recursive fast path for the current owner, else
/// block with a "lock" tag.
pub fn lock(
    mutex: &mut Mutex,
    handle: MutexHandle,
    threads: &mut ThreadArena,
    sched: &mut Scheduler,
    lock: &Lock,
    port: &dyn Port,
    current: ThreadHandle,
    timeout: u32,
) -> bool {
    lock_common(mutex, handle, threads, sched, lock, port, current, timeout, false)
}

/// `lock_nonblocking()`: fast path only, `timeout` forced to 0 so a
/// miss never blocks.
pub fn lock_nonblocking(mutex: &mut Mutex, current: ThreadHandle) -> bool {
    if mutex.depth == 0 || mutex.owner == Some(current) {
        mutex.owner = Some(current);
        mutex.depth += 1;
        true
    } else {
        false
    }
}

/// `peek_lock(timeout)`: identical wait shape to `lock` but never takes
/// ownership, on either the fast path or a wake.
pub fn peek_lock(
    mutex: &mut Mutex,
    handle: MutexHandle,
    threads: &mut ThreadArena,
    sched: &mut Scheduler,
    lock: &Lock,
    port: &dyn Port,
    current: ThreadHandle,
    timeout: u32,
) -> bool {
    lock_common(mutex, handle, threads, sched, lock, port, current, timeout, true)
}

/// `unlock()`: no-op unless `current` owns the mutex. Decrements a
/// recursive hold; at depth zero, grants the lock to waiters in
/// priority order — peeking waiters are granted (woken, not given
/// ownership) and the loop continues, a locking waiter gets ownership
/// and the loop stops.
pub fn unlock(mutex: &mut Mutex, threads: &mut ThreadArena, sched: &mut Scheduler, port: &dyn Port, current: ThreadHandle) {
    if mutex.owner != Some(current) {
        return;
    }
    if mutex.depth > 1 {
        mutex.depth -= 1;
        return;
    }

    mutex.depth = 0;
    mutex.owner = None;
    loop {
        let Some(head) = Scheduler::waiter_pop(&mut threads.threads, &mut mutex.waiters) else { break };
        let peek = matches!(threads.get(head).wait.map(|w| w.kind), Some(WaitKind::MutexPeek));
        threads.get_mut(head).wait.as_mut().unwrap().result = true;
        blocking::ready_thread(threads, sched, head);
        if !peek {
            mutex.owner = Some(head);
            mutex.depth = 1;
            break;
        }
    }
    reschedule_req(threads, sched, port);
}

/// `delete`: wake every waiter with a false result, reschedule. Caller
/// frees the `Mutex` slot afterward.
pub fn delete(mutex: &mut Mutex, threads: &mut ThreadArena, sched: &mut Scheduler, port: &dyn Port) {
    while let Some(head) = Scheduler::waiter_pop(&mut threads.threads, &mut mutex.waiters) {
        threads.get_mut(head).wait.as_mut().unwrap().result = false;
        blocking::ready_thread(threads, sched, head);
    }
    reschedule_req(threads, sched, port);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::Lock;
    use crate::test_port::TestPort;
    use crate::thread::tests::make_arena;
    use crate::thread::ThreadState;

    #[test]
    fn unlock_grants_ownership_to_the_first_locking_waiter_past_any_peekers() {
        let port = TestPort::new();
        let irq_lock = Lock::new();
        let mut sched = Scheduler::new(4);
        let mut threads = ThreadArena { threads: make_arena(3) };
        let mut mutex = Mutex::new();
        let handle = MutexHandle(0);

        let owner = ThreadHandle::from_index(0);
        threads.get_mut(owner).state = ThreadState::Ready;
        sched.ready_enqueue(&mut threads.threads, owner, 1);
        sched.set_current(Some(owner));
        assert!(lock(&mut mutex, handle, &mut threads, &mut sched, &irq_lock, &port, owner, 0));

        let peeker = ThreadHandle::from_index(1);
        threads.get_mut(peeker).state = ThreadState::Ready;
        sched.ready_enqueue(&mut threads.threads, peeker, 1);
        sched.set_current(Some(peeker));
        assert!(!peek_lock(&mut mutex, handle, &mut threads, &mut sched, &irq_lock, &port, peeker, 0));

        let locker = ThreadHandle::from_index(2);
        threads.get_mut(locker).state = ThreadState::Ready;
        sched.ready_enqueue(&mut threads.threads, locker, 1);
        sched.set_current(Some(locker));
        assert!(!lock(&mut mutex, handle, &mut threads, &mut sched, &irq_lock, &port, locker, 0));

        unlock(&mut mutex, &mut threads, &mut sched, &port, owner);

        assert_eq!(threads.get(peeker).state, ThreadState::Ready, "a peeker is woken but never owns the mutex");
        assert_eq!(threads.get(locker).state, ThreadState::Ready);
        assert_eq!(mutex.owner, Some(locker));
        assert_eq!(mutex.depth, 1);
    }

    #[test]
    fn lock_nonblocking_never_blocks_on_a_contended_mutex() {
        let mut mutex = Mutex::new();
        let owner = ThreadHandle::from_index(0);
        let other = ThreadHandle::from_index(1);
        assert!(lock_nonblocking(&mut mutex, owner));
        assert!(!lock_nonblocking(&mut mutex, other));
        assert!(lock_nonblocking(&mut mutex, owner), "recursive re-lock by the owner still succeeds");
    }
}
