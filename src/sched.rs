/*
 * Scheduler core: ready queues and the two-queue delay engine.
 *
 * This module owns only the queues and the tick counter. The
 * cross-cutting operations that also touch sync-object waiter queues
 * — `ready()`, `block_current()`, `unload_current()` — live on `Kernel`
 * (kernel.rs) because they need simultaneous access to whichever
 * object a thread happens to be waiting on.
 */

use alloc::vec::Vec;

use crate::list::{self, SchedField, DelayField};
use crate::thread::{DelayOwner, SchedOwner, Thread, ThreadHandle};

pub struct Scheduler {
    ready: Vec<Option<ThreadHandle>>,
    delay_a: Option<ThreadHandle>,
    delay_b: Option<ThreadHandle>,
    /// `true` while queue `a` plays the role of "normal" (current-epoch)
    /// delay queue and `b` is "overflow". Swapped on every tick-counter
    /// wrap.
    normal_is_a: bool,
    tick: u32,
    current: Option<ThreadHandle>,
    /// Set by `reschedule_req`/a drained timeout to the thread a
    /// pending context switch should land on; consumed by whichever
    /// call next reaches the bottom of the interrupt-lock nest —
    /// preemption happens on the next lock release.
    pending_switch: Option<ThreadHandle>,
}

impl Scheduler {
    pub fn new(prio_count: usize) -> Self {
        Scheduler {
            ready: alloc::vec![None; prio_count],
            delay_a: None,
            delay_b: None,
            normal_is_a: true,
            tick: 0,
            current: None,
            pending_switch: None,
        }
    }

    pub fn prio_count(&self) -> usize {
        self.ready.len()
    }

    pub fn current(&self) -> Option<ThreadHandle> {
        self.current
    }

    pub fn set_current(&mut self, h: Option<ThreadHandle>) {
        self.current = h;
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Test-only: force the tick counter near `u32::MAX` so wraparound
    /// behavior is reachable without two billion `heartbeat_advance`
    /// calls.
    #[cfg(test)]
    pub fn set_tick(&mut self, tick: u32) {
        self.tick = tick;
    }

    pub fn take_pending_switch(&mut self) -> Option<ThreadHandle> {
        self.pending_switch.take()
    }

    pub fn request_switch(&mut self, to: ThreadHandle) {
        self.pending_switch = Some(to);
    }

    fn normal_head(&self) -> Option<ThreadHandle> {
        if self.normal_is_a { self.delay_a } else { self.delay_b }
    }

    fn normal_head_mut(&mut self) -> &mut Option<ThreadHandle> {
        if self.normal_is_a { &mut self.delay_a } else { &mut self.delay_b }
    }

    fn overflow_head_mut(&mut self) -> &mut Option<ThreadHandle> {
        if self.normal_is_a { &mut self.delay_b } else { &mut self.delay_a }
    }

    /// Highest ready priority currently occupied, without rotating
    /// anything (a pure peek).
    pub fn highest_ready_priority(&self) -> Option<u8> {
        self.ready.iter().position(|q| q.is_some()).map(|p| p as u8)
    }

    /// Pick the next thread to run: the head of the highest (numerically
    /// smallest) non-empty ready queue, rotating that queue's head to
    /// `head.next` in the same motion (round-robin among equals).
    pub fn select_next(&mut self, arena: &mut [Thread]) -> Option<ThreadHandle> {
        let prio = self.highest_ready_priority()? as usize;
        let head = self.ready[prio];
        list::rotate::<SchedField>(arena, &mut self.ready[prio]);
        head
    }

    /// Insert `thread` into the ready queue for `prio`. Caller is
    /// responsible for `thread.state = Ready` and clearing any prior
    /// `sched_owner`.
    pub fn ready_enqueue(&mut self, arena: &mut [Thread], thread: ThreadHandle, prio: u8) {
        list::fifo_enqueue::<SchedField>(arena, &mut self.ready[prio as usize], thread);
        arena[thread.index()].sched_owner = Some(SchedOwner::Ready(prio));
    }

    /// Detach `thread` from whichever ready queue it is recorded as
    /// belonging to in `sched_owner`. No-op if it isn't on a ready
    /// queue.
    pub fn ready_remove(&mut self, arena: &mut [Thread], thread: ThreadHandle) {
        if let Some(SchedOwner::Ready(p)) = arena[thread.index()].sched_owner {
            list::remove_item::<SchedField>(arena, &mut self.ready[p as usize], thread);
            arena[thread.index()].sched_owner = None;
        }
    }

    /// Enqueue `thread`'s scheduling item onto an externally-owned
    /// priority waiter queue (a sync object's waiter list), tagged by
    /// `prio` (ties broken FIFO).
    pub fn waiter_enqueue(
        arena: &mut [Thread],
        head: &mut Option<ThreadHandle>,
        thread: ThreadHandle,
        prio: u8,
        owner: SchedOwner,
    ) {
        list::prio_enqueue::<SchedField>(arena, head, thread, prio as i64);
        arena[thread.index()].sched_owner = Some(owner);
    }

    /// Detach `thread` from an externally-owned waiter queue.
    pub fn waiter_remove(arena: &mut [Thread], head: &mut Option<ThreadHandle>, thread: ThreadHandle) {
        list::remove_item::<SchedField>(arena, head, thread);
        arena[thread.index()].sched_owner = None;
    }

    /// Pop the head of an externally-owned waiter queue, clearing its
    /// `sched_owner` so it is fully detached before the caller readies
    /// it. Used by every sync object's wake loop.
    pub fn waiter_pop(arena: &mut [Thread], head: &mut Option<ThreadHandle>) -> Option<ThreadHandle> {
        let popped = list::pop::<SchedField>(arena, head)?;
        arena[popped.index()].sched_owner = None;
        Some(popped)
    }

    /// Arm a delay for `thread`: wakeup = tick + timeout. Routes to the
    /// overflow queue on unsigned wraparound. A timeout of zero is a
    /// no-op (caller wants "block forever").
    pub fn arm_delay(&mut self, arena: &mut [Thread], thread: ThreadHandle, timeout: u32) {
        if timeout == 0 {
            return;
        }
        let wakeup = self.tick.wrapping_add(timeout);
        let (head, owner) = if wakeup < self.tick {
            (self.overflow_head_mut(), DelayOwner::Overflow)
        } else {
            (self.normal_head_mut(), DelayOwner::Normal)
        };
        list::prio_enqueue::<DelayField>(arena, head, thread, wakeup as i64);
        arena[thread.index()].delay_owner = Some(owner);
    }

    /// Detach `thread`'s delay item, if armed.
    pub fn disarm_delay(&mut self, arena: &mut [Thread], thread: ThreadHandle) {
        match arena[thread.index()].delay_owner {
            Some(DelayOwner::Normal) => {
                let head = self.normal_head_mut();
                list::remove_item::<DelayField>(arena, head, thread);
            }
            Some(DelayOwner::Overflow) => {
                let head = self.overflow_head_mut();
                list::remove_item::<DelayField>(arena, head, thread);
            }
            None => {}
        }
        arena[thread.index()].delay_owner = None;
    }

    /// Advance the tick counter by one, swap the normal/overflow roles
    /// on wraparound, and pop every delay item whose wakeup tag is now
    /// due. Returns the due threads in wake order; it is the caller's
    /// job (Kernel) to actually ready() them and to decide whether to
    /// request a switch (the `<=` comparison against current priority).
    pub fn heartbeat_advance(&mut self, arena: &mut [Thread]) -> Vec<ThreadHandle> {
        let (new_tick, wrapped) = self.tick.overflowing_add(1);
        self.tick = new_tick;
        if wrapped {
            self.normal_is_a = !self.normal_is_a;
        }

        let mut due = Vec::new();
        loop {
            let Some(h) = self.normal_head() else { break };
            if arena[h.index()].delay_tag > self.tick {
                break;
            }
            let popped = list::pop::<DelayField>(arena, self.normal_head_mut());
            debug_assert_eq!(popped, Some(h));
            arena[h.index()].delay_owner = None;
            due.push(h);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::tests::make_arena;

    #[test]
    fn heartbeat_handles_tick_counter_wraparound() {
        let mut sched = Scheduler::new(4);
        let mut arena = make_arena(1);
        let thread = ThreadHandle::from_index(0);
        sched.set_tick(u32::MAX - 1);

        // wakeup = (MAX - 1) + 3 wraps past MAX, landing in the overflow
        // queue since the wakeup tag (1) is numerically less than the
        // current tick.
        sched.arm_delay(&mut arena, thread, 3);
        assert_eq!(arena[thread.index()].delay_owner, Some(DelayOwner::Overflow));

        let due = sched.heartbeat_advance(&mut arena); // tick: MAX-1 -> MAX
        assert!(due.is_empty());
        let due = sched.heartbeat_advance(&mut arena); // tick: MAX -> 0, wraps
        assert!(due.is_empty());
        assert!(!sched.normal_is_a, "wraparound must swap the normal/overflow roles");
        let due = sched.heartbeat_advance(&mut arena); // tick: 0 -> 1, now due
        assert_eq!(due, alloc::vec![thread]);
    }

    #[test]
    fn round_robins_equal_priority_ready_threads() {
        let mut sched = Scheduler::new(4);
        let mut arena = make_arena(3);
        for i in 0..3 {
            sched.ready_enqueue(&mut arena, ThreadHandle::from_index(i), 0);
        }
        let first = sched.select_next(&mut arena).unwrap();
        let second = sched.select_next(&mut arena).unwrap();
        let third = sched.select_next(&mut arena).unwrap();
        assert_ne!(first, second);
        assert_ne!(second, third);
        // Three distinct threads rotate back to the first after one full cycle.
        let fourth = sched.select_next(&mut arena).unwrap();
        assert_eq!(first, fourth);
    }
}
