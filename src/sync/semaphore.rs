/*
 * Counting semaphore. State is just a counter and a priority-ordered
 * waiter queue; everything else is the shared blocking protocol in
 * blocking.rs.
 */

use crate::blocking::{self, reschedule_req};
use crate::lock::Lock;
use crate::port::Port;
use crate::thread::{SchedOwner, ThreadArena, ThreadHandle};
use crate::wait::{WaitKind, WaitRequest};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SemHandle(pub u32);

impl SemHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub struct Semaphore {
    pub counter: u32,
    pub waiters: Option<ThreadHandle>,
}

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        Semaphore { counter: initial, waiters: None }
    }
}

fn wait_common(
    sem: &mut Semaphore,
    handle: SemHandle,
    threads: &mut ThreadArena,
    sched: &mut crate::sched::Scheduler,
    lock: &Lock,
    port: &dyn Port,
    current: ThreadHandle,
    timeout: u32,
    peek: bool,
) -> bool {
    if sem.counter > 0 {
        if !peek {
            sem.counter -= 1;
        }
        return true;
    }
    let kind = if peek { WaitKind::SemPeek } else { WaitKind::SemTake };
    blocking::block_current(
        threads,
        sched,
        lock,
        port,
        current,
        Some((&mut sem.waiters, SchedOwner::SemWait(handle))),
        WaitRequest::new(kind),
        timeout,
    )
}

/// `wait(timeout)`: fast-path decrement, else block with a "take" tag.
pub fn wait(
    sem: &mut Semaphore,
    handle: SemHandle,
    threads: &mut ThreadArena,
    sched: &mut crate::sched::Scheduler,
    lock: &Lock,
    port: &dyn Port,
    current: ThreadHandle,
    timeout: u32,
) -> bool {
    wait_common(sem, handle, threads, sched, lock, port, current, timeout, false)
}

/// `peek(timeout)`: same as `wait` but never consumes a count, on
/// either the fast path or a producer-granted wake.
pub fn peek(
    sem: &mut Semaphore,
    handle: SemHandle,
    threads: &mut ThreadArena,
    sched: &mut crate::sched::Scheduler,
    lock: &Lock,
    port: &dyn Port,
    current: ThreadHandle,
    timeout: u32,
) -> bool {
    wait_common(sem, handle, threads, sched, lock, port, current, timeout, true)
}

/// `reset(new_value)`: wake waiters the new count can afford, in
/// priority order, then store whatever is left over as the counter.
/// `post()` is `reset(counter + 1)`.
pub fn reset(sem: &mut Semaphore, threads: &mut ThreadArena, sched: &mut crate::sched::Scheduler, port: &dyn Port, mut new_value: u32) {
    while new_value > 0 {
        let Some(head) = crate::sched::Scheduler::waiter_pop(&mut threads.threads, &mut sem.waiters) else { break };
        let take = matches!(threads.get(head).wait.map(|w| w.kind), Some(WaitKind::SemTake));
        threads.get_mut(head).wait.as_mut().unwrap().result = true;
        if take {
            new_value -= 1;
        }
        blocking::ready_thread(threads, sched, head);
    }
    sem.counter = new_value;
    reschedule_req(threads, sched, port);
}

pub fn post(sem: &mut Semaphore, threads: &mut ThreadArena, sched: &mut crate::sched::Scheduler, port: &dyn Port) {
    reset(sem, threads, sched, port, sem.counter + 1);
}

/// `delete`: wake every waiter with a false result, reschedule. Caller
/// frees the `Semaphore` slot afterward.
pub fn delete(sem: &mut Semaphore, threads: &mut ThreadArena, sched: &mut crate::sched::Scheduler, port: &dyn Port) {
    while let Some(head) = crate::sched::Scheduler::waiter_pop(&mut threads.threads, &mut sem.waiters) {
        threads.get_mut(head).wait.as_mut().unwrap().result = false;
        blocking::ready_thread(threads, sched, head);
    }
    reschedule_req(threads, sched, port);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::Lock;
    use crate::sched::Scheduler;
    use crate::test_port::TestPort;
    use crate::thread::tests::make_arena;
    use crate::thread::ThreadState;

    #[test]
    fn reset_wakes_only_as_many_takers_as_the_new_value_covers() {
        let port = TestPort::new();
        let lock = Lock::new();
        let mut sched = Scheduler::new(4);
        let mut threads = ThreadArena { threads: make_arena(3) };
        let mut sem = Semaphore::new(0);
        let handle = SemHandle(0);

        for i in 0..3 {
            let h = ThreadHandle::from_index(i);
            threads.get_mut(h).state = ThreadState::Ready;
            sched.ready_enqueue(&mut threads.threads, h, 1);
            sched.set_current(Some(h));
            assert!(!wait(&mut sem, handle, &mut threads, &mut sched, &lock, &port, h, 0));
        }

        reset(&mut sem, &mut threads, &mut sched, &port, 2);
        let woken = (0..3).filter(|&i| threads.get(ThreadHandle::from_index(i)).state == ThreadState::Ready).count();
        assert_eq!(woken, 2);
        assert_eq!(sem.counter, 0);
    }

    #[test]
    fn peek_never_consumes_the_counter() {
        let port = TestPort::new();
        let mut threads = ThreadArena { threads: make_arena(1) };
        let mut sched = Scheduler::new(4);
        let mut sem = Semaphore::new(1);
        let current = ThreadHandle::from_index(0);

        assert!(peek(&mut sem, SemHandle(0), &mut threads, &mut sched, &Lock::new(), &port, current, 0));
        assert_eq!(sem.counter, 1, "peek must not decrement");
        assert!(wait(&mut sem, SemHandle(0), &mut threads, &mut sched, &Lock::new(), &port, current, 0));
        assert_eq!(sem.counter, 0);
    }
}
