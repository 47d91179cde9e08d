/*
 * The `Kernel` singleton: the one struct every public operation routes
 * through. It owns the allocator pool, the thread arena, the
 * scheduler, the master interrupt-masking lock, the `Port`, and the
 * slab arenas for semaphores/mutexes/queues.
 *
 * This crate never instantiates a process-wide `static Kernel` itself
 * — that wiring, together with the thin C-style entry points that
 * would forward into it, is left to the embedder. An embedder that
 * wants exactly one kernel instance for the whole program owns a
 * single `Kernel` in its own static; the host test suite instead
 * creates one independent `Kernel` per test, which is why this type
 * carries no hidden statics of its own.
 */

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr::NonNull;

use log::{debug, info, warn};

use crate::blocking;
use crate::config::PRIO_COUNT;
use crate::error::KernelError;
use crate::pool::{self, BlockInfo, Pool, PoolInfo};
use crate::port::Port;
use crate::sched::Scheduler;
use crate::sync::mutex::{Mutex, MutexHandle};
use crate::sync::queue::{Queue, QueueHandle};
use crate::sync::semaphore::{SemHandle, Semaphore};
use crate::sync::{mutex, queue, semaphore};
use crate::thread::{SchedOwner, Thread, ThreadArena, ThreadHandle, ThreadState};
use crate::wait::WaitRequest;

#[derive(Copy, Clone, Debug)]
pub struct ThreadInfo {
    pub state: ThreadState,
    pub priority: u8,
    pub stack_size: usize,
}

pub struct Kernel {
    pool: Pool,
    threads: ThreadArena,
    sched: Scheduler,
    lock: crate::lock::Lock,
    port: Box<dyn Port>,
    semaphores: Vec<Option<Semaphore>>,
    mutexes: Vec<Option<Mutex>>,
    queues: Vec<Option<Queue>>,
    started: bool,
}

impl Kernel {
    /// `init(pool_mem, pool_size)`: wire up a fresh kernel over the
    /// given pool region and `Port`. No thread exists yet; `start()`
    /// must create at least one thread (typically the application's
    /// first task plus an idle task at `PRIO_COUNT - 1`) before being
    /// called, since `select_next` otherwise has nothing ready to run.
    ///
    /// # Safety
    /// `pool_mem` must point to at least `pool_size` valid,
    /// exclusively-owned, `MEM_ALIGN`-aligned bytes that outlive this
    /// `Kernel`.
    pub unsafe fn init(pool_mem: *mut u8, pool_size: usize, port: Box<dyn Port>) -> Self {
        info!("kernel init: pool_size={pool_size} prio_count={PRIO_COUNT}");
        Kernel {
            pool: unsafe { Pool::init(pool_mem, pool_size) },
            threads: ThreadArena::new(),
            sched: Scheduler::new(PRIO_COUNT),
            lock: crate::lock::Lock::new(),
            port,
            semaphores: Vec::new(),
            mutexes: Vec::new(),
            queues: Vec::new(),
            started: false,
        }
    }

    fn port(&self) -> &dyn Port {
        self.port.as_ref()
    }

    fn resolve(&self, h: Option<ThreadHandle>) -> ThreadHandle {
        h.or_else(|| self.sched.current())
            .expect("no current thread and no explicit handle given")
    }

    // ---- Lifecycle --------------------------------------------------

    pub fn enter_critical(&self) {
        blocking::enter_critical(&self.lock, self.port.as_ref());
    }

    pub fn exit_critical(&mut self) {
        blocking::exit_critical(&mut self.sched, &self.lock, self.port.as_ref());
    }

    /// `start()`: picks the highest-priority ready thread as `current`
    /// and hands control to the port. Never returns — the host test
    /// suite does not call this, tests drive kernel operations directly
    /// instead.
    pub fn start(&mut self) -> ! {
        debug_assert!(!self.started, "start() called twice");
        self.started = true;
        let next = self.sched.select_next(&mut self.threads.threads);
        info!("kernel start: first thread = {next:?}");
        self.sched.set_current(next);
        self.port.start_kernel()
    }

    pub fn handle_heartbeat(&mut self) {
        self.enter_critical();
        blocking::heartbeat(&mut self.threads, &mut self.sched, self.port.as_ref());
        self.exit_critical();
    }

    pub fn get_heartbeat_counter(&self) -> u32 {
        self.sched.tick()
    }

    /// Test-only stand-in for the part of `start()` that happens
    /// before the port hands control to the first thread: picks
    /// `current` via `select_next` without calling
    /// `Port::start_kernel` (which never returns, so it cannot be
    /// exercised from a `#[test]` function). Tests drive every thread
    /// "body" as an explicit sequence of `Kernel` calls rather than by
    /// actually running job functions, so this is the only boot step
    /// they need.
    #[cfg(test)]
    pub fn test_boot(&mut self) {
        let next = self.sched.select_next(&mut self.threads.threads);
        self.sched.set_current(next);
    }

    // ---- Memory -------------------------------------------------------

    /// `allocate(size)`: carve `size` bytes out of the pool and link
    /// the block into the current thread's owned list, so it is
    /// reclaimed in bulk on that thread's death.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.enter_critical();
        let current = self.sched.current();
        let result = (|| {
            let Some(block) = (unsafe { self.pool.alloc(size) }) else {
                warn!("allocate: pool exhausted requesting {size} bytes");
                return None;
            };
            if let Some(owner) = current {
                unsafe { pool::set_owner(block, Some(owner.0)) };
                let thread = self.threads.get_mut(owner);
                pool::thread_list_insert(&mut thread.owned_blocks, block);
            }
            Some(unsafe { NonNull::new_unchecked(pool::user_ptr(block)) })
        })();
        self.exit_critical();
        result
    }

    /// `free(p)`: return a block to the pool, first unlinking it from
    /// whichever thread's owned list it is in (if any — pool-internal
    /// allocations like queue buffers have no owning thread).
    ///
    /// # Safety
    /// `p` must be a pointer this kernel previously returned from
    /// `allocate` and not yet freed.
    pub unsafe fn free(&mut self, p: *mut u8) {
        self.enter_critical();
        unsafe {
            let block = pool::block_from_user_ptr(p);
            if let Some(owner_idx) = pool::owner_of(block) {
                let thread = self.threads.get_mut(ThreadHandle(owner_idx));
                pool::thread_list_remove(&mut thread.owned_blocks, block);
            }
            self.pool.free(block);
        }
        self.exit_critical();
    }

    /// `block_info(p)`: describe the block backing `p`. A block still
    /// on the free ring (already freed, or never allocated through this
    /// pool) reports `KernelError::InvalidHandle` rather than handing
    /// back stale size/ownership data.
    ///
    /// # Safety
    /// `p` must be a pointer this kernel previously returned from
    /// `allocate`.
    pub unsafe fn block_info(&self, p: *mut u8) -> Result<BlockInfo, KernelError> {
        let info = unsafe { pool::block_info(pool::block_from_user_ptr(p)) };
        if info.allocated {
            Ok(info)
        } else {
            Err(KernelError::InvalidHandle)
        }
    }

    pub fn pool_info(&self) -> PoolInfo {
        self.pool.info()
    }

    pub fn thread_info(&self, h: ThreadHandle) -> Result<ThreadInfo, KernelError> {
        if h.index() >= self.threads.threads.len() {
            return Err(KernelError::InvalidHandle);
        }
        let t = self.threads.get(h);
        if t.state == ThreadState::Deleted {
            return Err(KernelError::InvalidHandle);
        }
        Ok(ThreadInfo { state: t.state, priority: t.priority, stack_size: t.stack_size })
    }

    // ---- Thread manager ----------------------------------------------

    /// `create(prio, stack_size, job_fn)`: carve a stack out of the
    /// pool, ask the port to build its initial frame, and mark it
    /// Ready. Only triggers a preemption check if a thread is already
    /// loaded (during boot, before `start()`, there is none yet).
    ///
    /// The port's stack-return trampoline is not wired to a specific
    /// `Kernel` instance by this crate (there is no process-global
    /// `Kernel` here to close over — see the module doc); callers that
    /// want "job function returns normally -> thread auto-deletes"
    /// supply their own `return_hook` that calls back into whichever
    /// `Kernel` they own. Tests model a thread's exit explicitly with
    /// `delete(Some(handle))` instead of letting a job "return".
    pub fn create_thread(
        &mut self,
        prio: u8,
        stack_size: usize,
        job_fn: extern "C" fn(usize),
        arg: usize,
        return_hook: extern "C" fn(),
    ) -> Option<ThreadHandle> {
        debug_assert!((prio as usize) < self.sched.prio_count(), "invalid priority");
        self.enter_critical();
        let result = (|| {
            let Some(block) = (unsafe { self.pool.alloc(stack_size) }) else {
                warn!("create_thread: pool exhausted requesting {stack_size} byte stack at prio {prio}");
                return None;
            };
            let stack_base = unsafe { pool::user_ptr(block) };
            let sp = self.port().init_stack(stack_base, stack_size, job_fn, arg, return_hook);

            let mut thread = Thread::new(prio);
            thread.stack_base = stack_base;
            thread.stack_size = stack_size;
            thread.stack_pointer = sp;
            thread.stack_block = Some(block);

            let handle = self.threads.insert(thread);
            self.threads.get_mut(handle).state = ThreadState::Ready;
            self.sched.ready_enqueue(&mut self.threads.threads, handle, prio);
            info!("thread {handle:?} created: prio={prio} stack_size={stack_size}");

            if self.sched.current().is_some() {
                blocking::reschedule_req(&mut self.threads, &mut self.sched, self.port.as_ref());
            }
            Some(handle)
        })();
        self.exit_critical();
        result
    }

    /// Detach `thread`'s scheduling item from whichever queue
    /// `sched_owner` says it is currently on — a ready queue, or one
    /// of a sync object's waiter queues — and its delay item from
    /// whichever of the two delay queues it is armed on, if any.
    fn detach_thread(&mut self, thread: ThreadHandle) {
        let owner = self.threads.get(thread).sched_owner;
        match owner {
            Some(SchedOwner::Ready(_)) | None => {
                self.sched.ready_remove(&mut self.threads.threads, thread);
            }
            Some(SchedOwner::SemWait(h)) => {
                if let Some(sem) = self.semaphores.get_mut(h.index()).and_then(|s| s.as_mut()) {
                    Scheduler::waiter_remove(&mut self.threads.threads, &mut sem.waiters, thread);
                }
            }
            Some(SchedOwner::MutexWait(h)) => {
                if let Some(m) = self.mutexes.get_mut(h.index()).and_then(|s| s.as_mut()) {
                    Scheduler::waiter_remove(&mut self.threads.threads, &mut m.waiters, thread);
                }
            }
            Some(SchedOwner::QueueRead(h)) => {
                if let Some(q) = self.queues.get_mut(h.index()).and_then(|s| s.as_mut()) {
                    Scheduler::waiter_remove(&mut self.threads.threads, &mut q.readers, thread);
                }
            }
            Some(SchedOwner::QueueWrite(h)) => {
                if let Some(q) = self.queues.get_mut(h.index()).and_then(|s| s.as_mut()) {
                    Scheduler::waiter_remove(&mut self.threads.threads, &mut q.writers, thread);
                }
            }
        }
        self.sched.disarm_delay(&mut self.threads.threads, thread);
    }

    /// `delete(handle|0)`: detach from every queue, reclaim owned
    /// memory and the stack, mark Deleted. Deleting the current thread
    /// releases the CPU; control never returns to it.
    pub fn delete(&mut self, h: Option<ThreadHandle>) {
        self.enter_critical();
        let thread = self.resolve(h);
        let is_current = self.sched.current() == Some(thread);

        self.detach_thread(thread);
        self.threads.get_mut(thread).wait = None;

        let owned = self.threads.get(thread).owned_blocks;
        let mut owned = owned;
        unsafe { pool::reclaim_thread_blocks(&mut self.pool, &mut owned) };
        self.threads.get_mut(thread).owned_blocks = None;

        if let Some(stack) = self.threads.get(thread).stack_block.take() {
            unsafe { self.pool.free(stack) };
        }

        self.threads.get_mut(thread).state = ThreadState::Deleted;
        debug!("thread {thread:?} deleted (was_current={is_current})");

        if is_current {
            blocking::unload_current(&mut self.threads, &mut self.sched, &self.lock, self.port.as_ref());
        }
        self.exit_critical();
    }

    /// `suspend(handle|0)`: detach scheduling/delay items, mark
    /// Suspended. Suspending the current thread releases the CPU.
    pub fn suspend(&mut self, h: Option<ThreadHandle>) {
        self.enter_critical();
        let thread = self.resolve(h);
        let is_current = self.sched.current() == Some(thread);

        self.detach_thread(thread);
        self.threads.get_mut(thread).state = ThreadState::Suspended;

        if is_current {
            blocking::unload_current(&mut self.threads, &mut self.sched, &self.lock, self.port.as_ref());
        }
        self.exit_critical();
    }

    /// `resume(handle)`: unconditionally ready a (typically Suspended)
    /// thread. Does not itself request a reschedule — callers that
    /// need the newly-ready thread to preempt immediately call
    /// `reschedule_req` afterward.
    pub fn resume(&mut self, h: ThreadHandle) {
        self.enter_critical();
        blocking::ready_thread(&mut self.threads, &mut self.sched, h);
        self.exit_critical();
    }

    /// Like `resume`, but also runs the preemption check — the
    /// convenience most callers actually want.
    pub fn resume_and_reschedule(&mut self, h: ThreadHandle) {
        self.enter_critical();
        blocking::ready_thread(&mut self.threads, &mut self.sched, h);
        blocking::reschedule_req(&mut self.threads, &mut self.sched, self.port.as_ref());
        self.exit_critical();
    }

    pub fn get_state(&self, h: Option<ThreadHandle>) -> ThreadState {
        self.threads.get(self.resolve(h)).state
    }

    pub fn get_current(&self) -> Option<ThreadHandle> {
        self.sched.current()
    }

    /// `set_priority(handle|0, prio)`: four cases by state. Deleted and
    /// Suspended threads only get their tag updated; Ready re-sorts
    /// into the target ready queue; Blocked re-sorts the same waiter
    /// queue it's already on so wake order reflects the new priority.
    pub fn set_priority(&mut self, h: Option<ThreadHandle>, prio: u8) {
        debug_assert!((prio as usize) < self.sched.prio_count(), "invalid priority");
        self.enter_critical();
        let thread = self.resolve(h);
        let state = self.threads.get(thread).state;
        match state {
            ThreadState::Deleted | ThreadState::Suspended => {
                self.threads.get_mut(thread).priority = prio;
                self.threads.get_mut(thread).sched_tag = prio as i64;
            }
            ThreadState::Ready => {
                self.sched.ready_remove(&mut self.threads.threads, thread);
                self.threads.get_mut(thread).priority = prio;
                self.sched.ready_enqueue(&mut self.threads.threads, thread, prio);
            }
            ThreadState::Blocked => {
                let owner = self.threads.get(thread).sched_owner;
                self.threads.get_mut(thread).priority = prio;
                match owner {
                    Some(SchedOwner::SemWait(hd)) => self.resort_waiter(hd.index(), &Kind::Sem, thread, prio),
                    Some(SchedOwner::MutexWait(hd)) => self.resort_waiter(hd.index(), &Kind::Mutex, thread, prio),
                    Some(SchedOwner::QueueRead(hd)) => self.resort_waiter(hd.index(), &Kind::QueueRead, thread, prio),
                    Some(SchedOwner::QueueWrite(hd)) => self.resort_waiter(hd.index(), &Kind::QueueWrite, thread, prio),
                    _ => {}
                }
            }
        }
        self.exit_critical();
    }

    fn resort_waiter(&mut self, idx: usize, kind: &Kind, thread: ThreadHandle, prio: u8) {
        let head = match kind {
            Kind::Sem => self.semaphores.get_mut(idx).and_then(|s| s.as_mut()).map(|s| &mut s.waiters),
            Kind::Mutex => self.mutexes.get_mut(idx).and_then(|s| s.as_mut()).map(|s| &mut s.waiters),
            Kind::QueueRead => self.queues.get_mut(idx).and_then(|s| s.as_mut()).map(|s| &mut s.readers),
            Kind::QueueWrite => self.queues.get_mut(idx).and_then(|s| s.as_mut()).map(|s| &mut s.writers),
        };
        let Some(head) = head else { return };
        Scheduler::waiter_remove(&mut self.threads.threads, head, thread);
        let owner = match kind {
            Kind::Sem => SchedOwner::SemWait(SemHandle(idx as u32)),
            Kind::Mutex => SchedOwner::MutexWait(MutexHandle(idx as u32)),
            Kind::QueueRead => SchedOwner::QueueRead(QueueHandle(idx as u32)),
            Kind::QueueWrite => SchedOwner::QueueWrite(QueueHandle(idx as u32)),
        };
        Scheduler::waiter_enqueue(&mut self.threads.threads, head, thread, prio, owner);
    }

    pub fn get_priority(&self, h: Option<ThreadHandle>) -> u8 {
        self.threads.get(self.resolve(h)).priority
    }

    /// `yield()`: equivalent to `unload_current` — the thread stays
    /// Ready; if nothing of equal-or-higher priority is waiting the
    /// scheduler hands the CPU right back.
    pub fn yield_now(&mut self) {
        self.enter_critical();
        blocking::unload_current(&mut self.threads, &mut self.sched, &self.lock, self.port.as_ref());
        self.exit_critical();
    }

    /// `delay(ticks)`: a no-op for `ticks == 0`; otherwise blocks with
    /// no waiter queue and a `PlainDelay` wait kind, woken only by the
    /// heartbeat's timeout drain.
    pub fn delay(&mut self, ticks: u32) {
        if ticks == 0 {
            return;
        }
        self.enter_critical();
        let current = self.resolve(None);
        blocking::block_current(
            &mut self.threads,
            &mut self.sched,
            &self.lock,
            self.port.as_ref(),
            current,
            None,
            WaitRequest::new(crate::wait::WaitKind::PlainDelay),
            ticks,
        );
        self.exit_critical();
    }

    // ---- Semaphore ------------------------------------------------

    pub fn sem_create(&mut self, initial: u32) -> Option<SemHandle> {
        let handle = SemHandle(self.semaphores.len() as u32);
        self.semaphores.push(Some(Semaphore::new(initial)));
        info!("semaphore {handle:?} created: initial={initial}");
        Some(handle)
    }

    pub fn sem_delete(&mut self, h: SemHandle) {
        self.enter_critical();
        if let Some(mut sem) = self.semaphores.get_mut(h.index()).and_then(|s| s.take()) {
            semaphore::delete(&mut sem, &mut self.threads, &mut self.sched, self.port.as_ref());
        }
        self.exit_critical();
    }

    pub fn sem_reset(&mut self, h: SemHandle, new_value: u32) {
        self.enter_critical();
        if let Some(sem) = self.semaphores.get_mut(h.index()).and_then(|s| s.as_mut()) {
            semaphore::reset(sem, &mut self.threads, &mut self.sched, self.port.as_ref(), new_value);
        }
        self.exit_critical();
    }

    pub fn sem_get_counter(&self, h: SemHandle) -> u32 {
        self.semaphores.get(h.index()).and_then(|s| s.as_ref()).map_or(0, |s| s.counter)
    }

    pub fn sem_post(&mut self, h: SemHandle) {
        self.enter_critical();
        if let Some(sem) = self.semaphores.get_mut(h.index()).and_then(|s| s.as_mut()) {
            semaphore::post(sem, &mut self.threads, &mut self.sched, self.port.as_ref());
        }
        self.exit_critical();
    }

    pub fn sem_wait(&mut self, h: SemHandle, timeout: u32) -> bool {
        self.enter_critical();
        let current = self.resolve(None);
        let result = match self.semaphores.get_mut(h.index()).and_then(|s| s.as_mut()) {
            Some(sem) => semaphore::wait(
                sem,
                h,
                &mut self.threads,
                &mut self.sched,
                &self.lock,
                self.port.as_ref(),
                current,
                timeout,
            ),
            None => false,
        };
        self.exit_critical();
        result
    }

    /// Fast-path-only variant: a timeout of `0` means "block forever",
    /// so non-blocking cannot be expressed by calling `wait` with
    /// `timeout = 0` — this decrements the counter only if it is
    /// already positive and never enters the blocking protocol.
    pub fn sem_wait_nonblocking(&mut self, h: SemHandle) -> bool {
        self.enter_critical();
        let result = match self.semaphores.get_mut(h.index()).and_then(|s| s.as_mut()) {
            Some(sem) if sem.counter > 0 => {
                sem.counter -= 1;
                true
            }
            _ => false,
        };
        self.exit_critical();
        result
    }

    pub fn sem_peek_wait(&mut self, h: SemHandle, timeout: u32) -> bool {
        self.enter_critical();
        let current = self.resolve(None);
        let result = match self.semaphores.get_mut(h.index()).and_then(|s| s.as_mut()) {
            Some(sem) => semaphore::peek(
                sem,
                h,
                &mut self.threads,
                &mut self.sched,
                &self.lock,
                self.port.as_ref(),
                current,
                timeout,
            ),
            None => false,
        };
        self.exit_critical();
        result
    }

    // ---- Mutex ------------------------------------------------------

    pub fn mutex_create(&mut self) -> Option<MutexHandle> {
        let handle = MutexHandle(self.mutexes.len() as u32);
        self.mutexes.push(Some(Mutex::new()));
        info!("mutex {handle:?} created");
        Some(handle)
    }

    pub fn mutex_delete(&mut self, h: MutexHandle) {
        self.enter_critical();
        if let Some(mut m) = self.mutexes.get_mut(h.index()).and_then(|s| s.take()) {
            mutex::delete(&mut m, &mut self.threads, &mut self.sched, self.port.as_ref());
        }
        self.exit_critical();
    }

    /// Non-blocking boolean query: would `lock()` succeed right now
    /// without blocking?
    pub fn mutex_would_lock(&self, h: MutexHandle) -> bool {
        let current = self.sched.current();
        match (self.mutexes.get(h.index()).and_then(|s| s.as_ref()), current) {
            (Some(m), Some(current)) => m.would_lock(current),
            _ => false,
        }
    }

    pub fn mutex_is_locked(&self, h: MutexHandle) -> bool {
        self.mutexes.get(h.index()).and_then(|s| s.as_ref()).is_some_and(|m| m.is_locked())
    }

    pub fn mutex_lock_nonblocking(&mut self, h: MutexHandle) -> bool {
        self.enter_critical();
        let current = self.resolve(None);
        let result = match self.mutexes.get_mut(h.index()).and_then(|s| s.as_mut()) {
            Some(m) => mutex::lock_nonblocking(m, current),
            None => false,
        };
        self.exit_critical();
        result
    }

    pub fn mutex_lock(&mut self, h: MutexHandle, timeout: u32) -> bool {
        self.enter_critical();
        let current = self.resolve(None);
        let result = match self.mutexes.get_mut(h.index()).and_then(|s| s.as_mut()) {
            Some(m) => mutex::lock(
                m,
                h,
                &mut self.threads,
                &mut self.sched,
                &self.lock,
                self.port.as_ref(),
                current,
                timeout,
            ),
            None => false,
        };
        self.exit_critical();
        result
    }

    /// Blocking `peek_lock(timeout)` variant: waits like `lock` but
    /// never takes ownership, on either the fast path or a wake.
    pub fn mutex_peek_lock(&mut self, h: MutexHandle, timeout: u32) -> bool {
        self.enter_critical();
        let current = self.resolve(None);
        let result = match self.mutexes.get_mut(h.index()).and_then(|s| s.as_mut()) {
            Some(m) => mutex::peek_lock(
                m,
                h,
                &mut self.threads,
                &mut self.sched,
                &self.lock,
                self.port.as_ref(),
                current,
                timeout,
            ),
            None => false,
        };
        self.exit_critical();
        result
    }

    pub fn mutex_unlock(&mut self, h: MutexHandle) {
        self.enter_critical();
        let current = self.resolve(None);
        if let Some(m) = self.mutexes.get_mut(h.index()).and_then(|s| s.as_mut()) {
            mutex::unlock(m, &mut self.threads, &mut self.sched, self.port.as_ref(), current);
        }
        self.exit_critical();
    }

    // ---- Byte queue ---------------------------------------------------

    pub fn queue_create(&mut self, usable_size: usize) -> Option<QueueHandle> {
        self.enter_critical();
        let result = Queue::create(&mut self.pool, usable_size).map(|q| {
            let handle = QueueHandle(self.queues.len() as u32);
            self.queues.push(Some(q));
            info!("queue {handle:?} created: usable_size={usable_size}");
            handle
        });
        if result.is_none() {
            warn!("queue_create: pool exhausted requesting {usable_size} usable bytes");
        }
        self.exit_critical();
        result
    }

    pub fn queue_delete(&mut self, h: QueueHandle) {
        self.enter_critical();
        if let Some(mut q) = self.queues.get_mut(h.index()).and_then(|s| s.take()) {
            queue::delete(&mut q, &mut self.threads, &mut self.sched, self.port.as_ref());
            unsafe { q.destroy(&mut self.pool) };
        }
        self.exit_critical();
    }

    pub fn queue_reset(&mut self, h: QueueHandle) {
        self.enter_critical();
        if let Some(q) = self.queues.get_mut(h.index()).and_then(|s| s.as_mut()) {
            queue::reset(q, &mut self.threads, &mut self.sched, self.port.as_ref());
        }
        self.exit_critical();
    }

    pub fn queue_get_size(&self, h: QueueHandle) -> usize {
        self.queues.get(h.index()).and_then(|s| s.as_ref()).map_or(0, |q| q.usable_size())
    }

    pub fn queue_get_used_size(&self, h: QueueHandle) -> usize {
        self.queues.get(h.index()).and_then(|s| s.as_ref()).map_or(0, |q| q.used_size())
    }

    pub fn queue_get_free_size(&self, h: QueueHandle) -> usize {
        self.queues.get(h.index()).and_then(|s| s.as_ref()).map_or(0, |q| q.free_space())
    }

    fn queue_send_impl(&mut self, h: QueueHandle, data: &[u8], timeout: u32, write_ahead: bool) -> bool {
        self.enter_critical();
        let current = self.resolve(None);
        let result = match self.queues.get_mut(h.index()).and_then(|s| s.as_mut()) {
            Some(q) => queue::send(
                q,
                h,
                &mut self.threads,
                &mut self.sched,
                &self.lock,
                self.port.as_ref(),
                current,
                data.as_ptr(),
                data.len(),
                timeout,
                write_ahead,
            ),
            None => false,
        };
        self.exit_critical();
        result
    }

    pub fn queue_send(&mut self, h: QueueHandle, data: &[u8], timeout: u32) -> bool {
        self.queue_send_impl(h, data, timeout, false)
    }

    pub fn queue_send_nonblocking(&mut self, h: QueueHandle, data: &[u8]) -> bool {
        let fits = self.queues.get(h.index()).and_then(|s| s.as_ref()).is_some_and(|q| data.len() <= q.free_space());
        if !fits {
            return false;
        }
        self.queue_send_impl(h, data, 0, false)
    }

    pub fn queue_send_ahead(&mut self, h: QueueHandle, data: &[u8], timeout: u32) -> bool {
        self.queue_send_impl(h, data, timeout, true)
    }

    pub fn queue_send_ahead_nonblocking(&mut self, h: QueueHandle, data: &[u8]) -> bool {
        let fits = self.queues.get(h.index()).and_then(|s| s.as_ref()).is_some_and(|q| data.len() <= q.free_space());
        if !fits {
            return false;
        }
        self.queue_send_impl(h, data, 0, true)
    }

    fn queue_receive_impl(&mut self, h: QueueHandle, buf: &mut [u8], timeout: u32, peek: bool) -> bool {
        self.enter_critical();
        let current = self.resolve(None);
        let result = match self.queues.get_mut(h.index()).and_then(|s| s.as_mut()) {
            Some(q) => queue::receive(
                q,
                h,
                &mut self.threads,
                &mut self.sched,
                &self.lock,
                self.port.as_ref(),
                current,
                buf.as_mut_ptr(),
                buf.len(),
                timeout,
                peek,
            ),
            None => false,
        };
        self.exit_critical();
        result
    }

    pub fn queue_receive(&mut self, h: QueueHandle, buf: &mut [u8], timeout: u32) -> bool {
        self.queue_receive_impl(h, buf, timeout, false)
    }

    pub fn queue_receive_nonblocking(&mut self, h: QueueHandle, buf: &mut [u8]) -> bool {
        let fits = self.queues.get(h.index()).and_then(|s| s.as_ref()).is_some_and(|q| buf.len() <= q.used_size());
        if !fits {
            return false;
        }
        self.queue_receive_impl(h, buf, 0, false)
    }

    pub fn queue_peek(&mut self, h: QueueHandle, buf: &mut [u8], timeout: u32) -> bool {
        self.queue_receive_impl(h, buf, timeout, true)
    }

    pub fn queue_peek_nonblocking(&mut self, h: QueueHandle, buf: &mut [u8]) -> bool {
        let fits = self.queues.get(h.index()).and_then(|s| s.as_ref()).is_some_and(|q| buf.len() <= q.used_size());
        if !fits {
            return false;
        }
        self.queue_receive_impl(h, buf, 0, true)
    }
}

enum Kind {
    Sem,
    Mutex,
    QueueRead,
    QueueWrite,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_port::{TestPort, NOOP_JOB, NOOP_RETURN_HOOK};
    use alloc::boxed::Box as AllocBox;

    const IDLE_PRIO: u8 = (PRIO_COUNT - 1) as u8;

    /// A fresh `Kernel` over a host-heap-backed pool, large enough for
    /// every scenario below. `_mem` must outlive `Kernel` (it owns the
    /// region `init` was told to treat as borrowed).
    fn new_kernel(pool_len: usize) -> (Kernel, alloc::boxed::Box<[u8]>) {
        let mut mem = alloc::vec![0u8; pool_len].into_boxed_slice();
        let kernel = unsafe { Kernel::init(mem.as_mut_ptr(), pool_len, AllocBox::new(TestPort::new())) };
        (kernel, mem)
    }

    /// A high-priority thread blocks on an empty semaphore; a
    /// lower-priority thread runs instead; posting the semaphore
    /// readies the high-priority thread and immediately preempts back
    /// to it.
    #[test]
    fn semaphore_post_wakes_waiter_and_preempts_lower_priority_current() {
        let (mut k, _mem) = new_kernel(16 * 1024);
        let idle = k.create_thread(IDLE_PRIO, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let high = k.create_thread(0, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let low = k.create_thread(2, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        k.test_boot();
        assert_eq!(k.get_current(), Some(high));

        let sem = k.sem_create(0).unwrap();
        assert!(!k.sem_wait(sem, 0), "a genuine block never completes synchronously on this side");
        assert_eq!(k.get_state(Some(high)), ThreadState::Blocked);
        assert_eq!(k.get_current(), Some(low), "low is the next-highest ready thread");

        k.sem_post(sem);
        assert_eq!(k.get_state(Some(high)), ThreadState::Ready);
        assert_eq!(k.get_current(), Some(high), "posting must preempt back to the higher-priority waiter");
        let _ = idle;
    }

    /// A wait with a finite timeout is woken by the heartbeat, not by a
    /// producer, once enough ticks elapse.
    #[test]
    fn semaphore_wait_times_out_via_heartbeat() {
        let (mut k, _mem) = new_kernel(16 * 1024);
        let idle = k.create_thread(IDLE_PRIO, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let waiter = k.create_thread(5, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        k.test_boot();
        assert_eq!(k.get_current(), Some(waiter));

        let sem = k.sem_create(0).unwrap();
        assert!(!k.sem_wait(sem, 3));
        assert_eq!(k.get_current(), Some(idle));

        k.handle_heartbeat();
        assert_eq!(k.get_state(Some(waiter)), ThreadState::Blocked);
        k.handle_heartbeat();
        assert_eq!(k.get_state(Some(waiter)), ThreadState::Blocked);
        k.handle_heartbeat();
        assert_eq!(k.get_state(Some(waiter)), ThreadState::Ready);
        assert_eq!(k.get_current(), Some(waiter), "timeout wake outranks idle and preempts");
        assert_eq!(k.sem_get_counter(sem), 0, "a timed-out wait must not have consumed the counter");
    }

    /// Deleting a semaphore while a thread waits on it wakes that
    /// thread with a false result rather than leaving it blocked
    /// forever.
    #[test]
    fn sem_delete_wakes_blocked_waiter_and_preempts() {
        let (mut k, _mem) = new_kernel(16 * 1024);
        let idle = k.create_thread(IDLE_PRIO, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let waiter = k.create_thread(5, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        k.test_boot();
        assert_eq!(k.get_current(), Some(waiter));

        let sem = k.sem_create(0).unwrap();
        assert!(!k.sem_wait(sem, 0));
        assert_eq!(k.get_state(Some(waiter)), ThreadState::Blocked);
        assert_eq!(k.get_current(), Some(idle));

        k.sem_delete(sem);
        assert_eq!(k.get_state(Some(waiter)), ThreadState::Ready);
        assert_eq!(k.get_current(), Some(waiter), "the woken waiter outranks idle and preempts back");
    }

    /// Same shape as the semaphore case, for a thread blocked on a
    /// contended mutex.
    #[test]
    fn mutex_delete_wakes_blocked_waiter() {
        let (mut k, _mem) = new_kernel(16 * 1024);
        let _idle = k.create_thread(IDLE_PRIO, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let owner = k.create_thread(5, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        k.test_boot();
        assert_eq!(k.get_current(), Some(owner));

        let m = k.mutex_create().unwrap();
        assert!(k.mutex_lock(m, 0));

        // Park `owner` without releasing the mutex, so a second thread
        // created afterward can become current and actually attempt the
        // (now contended) lock itself.
        k.suspend(Some(owner));
        assert_eq!(k.get_current(), Some(_idle));

        let waiter = k.create_thread(10, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        assert_eq!(k.get_current(), Some(waiter), "waiter outranks idle and becomes current");
        assert!(!k.mutex_lock(m, 0), "owner still holds the mutex even while suspended");
        assert_eq!(k.get_state(Some(waiter)), ThreadState::Blocked);

        k.mutex_delete(m);
        assert_eq!(k.get_state(Some(waiter)), ThreadState::Ready);
        assert_eq!(k.get_current(), Some(waiter), "the woken waiter outranks idle and preempts back");
    }

    /// Same shape for a reader blocked on an empty queue.
    #[test]
    fn queue_delete_wakes_blocked_reader() {
        let (mut k, _mem) = new_kernel(16 * 1024);
        let _idle = k.create_thread(IDLE_PRIO, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let reader = k.create_thread(5, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        k.test_boot();
        assert_eq!(k.get_current(), Some(reader));

        let q = k.queue_create(8).unwrap();
        let mut buf = [0u8; 4];
        assert!(!k.queue_receive(q, &mut buf, 0));
        assert_eq!(k.get_state(Some(reader)), ThreadState::Blocked);

        k.queue_delete(q);
        assert_eq!(k.get_state(Some(reader)), ThreadState::Ready);
        assert_eq!(k.get_current(), Some(reader));
    }

    /// Raising a blocked thread's priority re-sorts it within the
    /// waiter queue it is already on, so it wakes ahead of threads that
    /// were waiting before it but outrank its old priority.
    #[test]
    fn set_priority_on_a_blocked_thread_resorts_its_waiter_queue() {
        let (mut k, _mem) = new_kernel(16 * 1024);
        let _idle = k.create_thread(IDLE_PRIO, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let first = k.create_thread(5, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        k.test_boot();
        assert_eq!(k.get_current(), Some(first));

        let sem = k.sem_create(0).unwrap();
        assert!(!k.sem_wait(sem, 0), "first blocks, yielding the CPU to idle");
        assert_eq!(k.get_current(), Some(_idle));

        let second = k.create_thread(5, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        assert_eq!(k.get_current(), Some(second), "second outranks idle and becomes current");
        assert!(!k.sem_wait(sem, 0), "second blocks too, queued behind first at equal priority");
        assert_eq!(k.get_current(), Some(_idle));

        // `first` was queued ahead of `second` at equal priority;
        // raising `second`'s priority above `first`'s must move it to
        // the head of the waiter queue.
        k.set_priority(Some(second), 0);

        k.sem_post(sem);
        assert_eq!(k.get_state(Some(second)), ThreadState::Ready);
        assert_eq!(k.get_state(Some(first)), ThreadState::Blocked, "only one unit was posted");
        assert_eq!(k.get_current(), Some(second), "the re-sorted higher-priority waiter wakes first");
    }

    /// Suspending the current thread releases the CPU; resuming it
    /// later readies it again without disturbing its priority or
    /// identity.
    #[test]
    fn suspend_then_resume_round_trips_thread_state() {
        let (mut k, _mem) = new_kernel(16 * 1024);
        let idle = k.create_thread(IDLE_PRIO, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let t = k.create_thread(5, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        k.test_boot();
        assert_eq!(k.get_current(), Some(t));

        k.suspend(Some(t));
        assert_eq!(k.get_state(Some(t)), ThreadState::Suspended);
        assert_eq!(k.get_current(), Some(idle));

        k.resume_and_reschedule(t);
        assert_eq!(k.get_state(Some(t)), ThreadState::Ready);
        assert_eq!(k.get_current(), Some(t), "resuming the only non-idle thread preempts idle back");
    }

    /// A stack request that does not fit in the remaining pool fails
    /// closed with `None` rather than panicking or silently truncating
    /// the stack.
    #[test]
    fn create_thread_returns_none_when_the_pool_is_exhausted() {
        let (mut k, _mem) = new_kernel(1024);
        let _idle = k.create_thread(IDLE_PRIO, 64, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let before = k.pool_info();

        let huge = k.create_thread(5, 1024 * 1024, NOOP_JOB, 0, NOOP_RETURN_HOOK);
        assert!(huge.is_none());
        assert_eq!(k.pool_info().free_size, before.free_size, "a failed request must not touch the pool");
    }

    /// `send_ahead` prepends at the read cursor instead of appending at
    /// the write cursor, so a later plain `receive` sees it before data
    /// already queued.
    #[test]
    fn queue_send_ahead_prepends_ahead_of_queued_data() {
        let (mut k, _mem) = new_kernel(16 * 1024);
        let _idle = k.create_thread(IDLE_PRIO, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let t = k.create_thread(5, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        k.test_boot();
        assert_eq!(k.get_current(), Some(t));

        let q = k.queue_create(8).unwrap();
        assert!(k.queue_send(q, b"bb", 0));
        assert!(k.queue_send_ahead(q, b"a", 0));

        let mut out = [0u8; 3];
        assert!(k.queue_receive(q, &mut out, 0));
        assert_eq!(&out, b"abb");
    }

    #[test]
    fn mutex_lock_is_recursive_for_its_owner() {
        let (mut k, _mem) = new_kernel(16 * 1024);
        let _idle = k.create_thread(IDLE_PRIO, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let t = k.create_thread(5, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        k.test_boot();
        assert_eq!(k.get_current(), Some(t));

        let m = k.mutex_create().unwrap();
        assert!(k.mutex_lock(m, 0));
        assert!(k.mutex_lock(m, 0), "same owner relocking must not block");
        assert!(k.mutex_is_locked(m));

        k.mutex_unlock(m);
        assert!(k.mutex_is_locked(m), "one unlock only drops one level of recursion");
        k.mutex_unlock(m);
        assert!(!k.mutex_is_locked(m));
    }

    /// A reader blocked on an empty queue is woken directly by a
    /// producer's fast-path send, with the bytes already copied into
    /// its buffer by the time it is Ready again.
    #[test]
    fn queue_send_wakes_blocked_reader_with_data_in_place() {
        let (mut k, _mem) = new_kernel(16 * 1024);
        let idle = k.create_thread(IDLE_PRIO, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let reader = k.create_thread(5, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let writer = k.create_thread(10, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        k.test_boot();
        assert_eq!(k.get_current(), Some(reader));

        let q = k.queue_create(8).unwrap();
        let mut buf = [0u8; 4];
        assert!(!k.queue_receive(q, &mut buf, 0));
        assert_eq!(k.get_state(Some(reader)), ThreadState::Blocked);
        assert_eq!(k.get_current(), Some(writer));

        assert!(k.queue_send(q, b"abcd", 0));
        assert_eq!(k.get_state(Some(reader)), ThreadState::Ready);
        assert_eq!(&buf, b"abcd");
        assert_eq!(k.get_current(), Some(reader), "reader outranks writer and preempts back");
        let _ = idle;
    }

    /// Deleting a thread reclaims both its own allocations and its
    /// stack, returning the pool to exactly the state it was in before
    /// that thread existed.
    #[test]
    fn deleting_a_thread_reclaims_its_allocations_and_stack() {
        let (mut k, _mem) = new_kernel(16 * 1024);
        let idle = k.create_thread(IDLE_PRIO, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let before = k.pool_info();

        let t = k.create_thread(5, 256, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        k.test_boot();
        assert_eq!(k.get_current(), Some(t));

        let p1 = k.allocate(32).unwrap();
        let p2 = k.allocate(64).unwrap();
        let mid = k.pool_info();
        assert!(mid.free_size < before.free_size);

        k.delete(Some(t));
        let after = k.pool_info();
        assert_eq!(after.free_size, before.free_size, "stack plus both owned blocks must come back");
        assert_eq!(k.get_state(Some(t)), ThreadState::Deleted);
        assert_eq!(k.get_current(), Some(idle));
        let _ = (p1, p2);
    }

    #[test]
    fn create_thread_preempts_when_it_outranks_the_running_thread() {
        let (mut k, _mem) = new_kernel(16 * 1024);
        let _idle = k.create_thread(IDLE_PRIO, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        let low = k.create_thread(10, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        k.test_boot();
        assert_eq!(k.get_current(), Some(low));

        let high = k.create_thread(0, 512, NOOP_JOB, 0, NOOP_RETURN_HOOK).unwrap();
        assert_eq!(k.get_current(), Some(high), "a newly created higher-priority thread preempts immediately");
    }
}
