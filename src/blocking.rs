/*
 * The blocking/wakeup protocol shared by every synchronization object.
 * This is the narrow waist: semaphore wait, mutex lock, queue
 * send/receive, and thread delay all go through exactly these
 * functions.
 *
 * Kept free of any reference to Semaphore/Mutex/Queue so it stays a
 * single reusable component — callers pass the waiter-queue head they
 * want the scheduling item enqueued onto (or `None` for a plain
 * delay), and read the outcome back out of `Thread.wait.result` via
 * the `bool` this module returns.
 */

use alloc::vec::Vec;

use crate::lock::Lock;
use crate::port::Port;
use crate::sched::Scheduler;
use crate::thread::{SchedOwner, ThreadArena, ThreadHandle, ThreadState};
use crate::wait::WaitRequest;

/// Acquire the master lock. Pairs with `exit_critical`.
pub fn enter_critical(lock: &Lock, port: &dyn Port) {
    lock.acquire(port);
}

/// Release the master lock. If this is the outermost release and a
/// context switch was requested since the last release (by
/// `reschedule_req`), service it now — this is the software stand-in
/// for the pended low-priority interrupt firing as soon as interrupts
/// actually unmask.
pub fn exit_critical(sched: &mut Scheduler, lock: &Lock, port: &dyn Port) {
    if lock.depth() == 1 {
        if let Some(next) = sched.take_pending_switch() {
            sched.set_current(Some(next));
        }
    }
    lock.release(port);
}

/// Block the current thread. Asserts it is Ready and on a ready queue,
/// transitions it to Blocked, optionally enqueues its scheduling item
/// onto `waiter` (priority-ordered) and arms a delay for `timeout`.
/// Calls `unload_current`, which does not return until this thread is
/// later resumed (by a producer's `ready_thread` or by a timeout).
/// Returns the wait outcome.
pub fn block_current(
    threads: &mut ThreadArena,
    sched: &mut Scheduler,
    lock: &Lock,
    port: &dyn Port,
    current: ThreadHandle,
    waiter: Option<(&mut Option<ThreadHandle>, SchedOwner)>,
    wait: WaitRequest,
    timeout: u32,
) -> bool {
    debug_assert_eq!(threads.get(current).state, ThreadState::Ready);
    debug_assert!(matches!(threads.get(current).sched_owner, Some(SchedOwner::Ready(_))));

    sched.ready_remove(&mut threads.threads, current);
    threads.get_mut(current).state = ThreadState::Blocked;
    threads.get_mut(current).wait = Some(wait);

    if let Some((head, owner)) = waiter {
        let prio = threads.get(current).priority;
        Scheduler::waiter_enqueue(&mut threads.threads, head, current, prio, owner);
    }

    sched.arm_delay(&mut threads.threads, current, timeout);

    unload_current(threads, sched, lock, port);

    // On real hardware this line is not reached until some later
    // context switch restores `current`'s own stack, by which point a
    // producer or the heartbeat has already readied it and filled in
    // `wait.result`. A host harness has only one call stack, so it
    // cannot model that suspension — callers there must
    // drive the wake (post/ready/heartbeat) through a *separate*
    // `Kernel` call before this one is considered "resumed", and should
    // read state back via `get_state`/`wait` rather than trust this
    // return value to reflect a wake that hasn't happened yet.
    let outcome = threads.get(current).wait.map(|w| w.result).unwrap_or(false);
    threads.get_mut(current).wait = None;
    outcome
}

/// Ready a thread: detach it from whatever scheduling/delay queues it
/// is on (wherever it came from — a ready queue, a waiter queue, or
/// neither), set it Ready, and enqueue it on its priority's ready
/// queue. Used both by producers waking a waiter and by the heartbeat
/// draining an expired delay. Does not itself request a reschedule;
/// callers batch that after handling every waiter they intend to wake.
pub fn ready_thread(threads: &mut ThreadArena, sched: &mut Scheduler, thread: ThreadHandle) {
    sched.ready_remove(&mut threads.threads, thread);
    sched.disarm_delay(&mut threads.threads, thread);
    threads.get_mut(thread).state = ThreadState::Ready;
    let prio = threads.get(thread).priority;
    sched.ready_enqueue(&mut threads.threads, thread, prio);
}

/// Preempt-on-wake: if the highest ready priority is strictly higher
/// (numerically smaller) than `current`'s, arm a pending switch to
/// that thread and ask the port to trigger one. Does nothing if the
/// current thread is itself the highest-priority ready thread.
pub fn reschedule_req(threads: &mut ThreadArena, sched: &mut Scheduler, port: &dyn Port) {
    let Some(current) = sched.current() else { return };
    let Some(highest) = sched.highest_ready_priority() else { return };
    let current_prio = threads.get(current).priority;
    if highest < current_prio {
        if let Some(next) = sched.select_next(&mut threads.threads) {
            sched.request_switch(next);
            port.request_context_switch();
        }
    }
}

/// Tick-driven reschedule: same as `reschedule_req` but with `<=`
/// instead of `<`, which is what lets round-robin among equal
/// priorities actually rotate on a timer.
pub fn heartbeat_reschedule(threads: &mut ThreadArena, sched: &mut Scheduler, port: &dyn Port) {
    let Some(current) = sched.current() else { return };
    let Some(highest) = sched.highest_ready_priority() else { return };
    let current_prio = threads.get(current).priority;
    if highest <= current_prio {
        if let Some(next) = sched.select_next(&mut threads.threads) {
            sched.request_switch(next);
            port.request_context_switch();
        }
    }
}

/// Advance the tick counter, drain every delay item now due, ready
/// each one, and finally run the `<=` reschedule check. Returns the
/// threads woken by timeout (for callers that need to tell a timeout
/// wake apart from other housekeeping — none currently do, but this
/// keeps the signature honest).
pub fn heartbeat(threads: &mut ThreadArena, sched: &mut Scheduler, port: &dyn Port) -> Vec<ThreadHandle> {
    let due = sched.heartbeat_advance(&mut threads.threads);
    for &h in &due {
        // Timed out: the wait's result stays false.
        ready_thread(threads, sched, h);
    }
    heartbeat_reschedule(threads, sched, port);
    due
}

/// The natural preemption point: set `next` via `select_next`, and if
/// it differs from `current`, temporarily loan the master lock to the
/// port — depth to zero, unmask, request the switch, re-mask, restore
/// depth — then record the switch. This crate has no real second stack
/// to jump to, so the switch is applied synchronously as the `current`
/// handle update the moment the port call returns, standing in for the
/// port's asynchronous "update current := next once the switch
/// physically happens" contract — see DESIGN.md.
pub fn unload_current(threads: &mut ThreadArena, sched: &mut Scheduler, lock: &Lock, port: &dyn Port) {
    sched.take_pending_switch(); // superseded by the fresh decision below
    let current = sched.current();
    let next = sched.select_next(&mut threads.threads);
    if next == current {
        return;
    }

    let saved_depth = lock.depth();
    lock.set_depth(0);
    port.enable_interrupts();
    port.request_context_switch();
    port.disable_interrupts();
    lock.set_depth(saved_depth);

    sched.set_current(next);
}
