/*
 * Blocking/wakeup protocol scratch record.
 *
 * One tagged enum stands in for a per-wait "schinfo" pointer plus an
 * object-specific wait-flag: each sync object's wake loop matches on
 * its own variant instead of reaching into a `dyn` object or an
 * untyped union. `result` carries the boolean outcome the waiter reads
 * on resume: true means a producer (or the fast path) completed the
 * operation on the waiter's behalf; false means the wait timed out or
 * the object was deleted while the thread waited.
 *
 * Waking is a protocol, not a copy: for queues, the producer performs
 * the actual byte transfer into/out of the pointers stored here before
 * readying the waiter, so the waiter resumes with the operation
 * already finished — there is no retry loop on wake.
 */

#[derive(Copy, Clone, Debug)]
pub enum WaitKind {
    SemTake,
    SemPeek,
    MutexLock,
    MutexPeek,
    /// Reader blocked on a byte queue. `buf`/`len` name where the
    /// producer should copy bytes; `peek` means don't advance `read`.
    QueueRead { buf: *mut u8, len: usize, peek: bool },
    /// Writer blocked on a byte queue. `data`/`len` name what the
    /// consumer should copy in; `write_ahead` means prepend instead of
    /// append.
    QueueWrite { data: *const u8, len: usize, write_ahead: bool },
    /// A plain `delay()`/`sleep()` with no associated waiter queue —
    /// only the delay item is armed; wake always comes from the
    /// scheduler's heartbeat, never a producer.
    PlainDelay,
}

#[derive(Copy, Clone, Debug)]
pub struct WaitRequest {
    pub kind: WaitKind,
    pub result: bool,
}

impl WaitRequest {
    pub fn new(kind: WaitKind) -> Self {
        WaitRequest { kind, result: false }
    }
}

// SAFETY: the raw pointers embedded in `QueueRead`/`QueueWrite` name
// caller-owned buffers that are only touched by the producer thread
// while this kernel's single interrupt-masking lock is held, and only
// for the duration of that one transfer — never retained afterward.
unsafe impl Send for WaitKind {}
