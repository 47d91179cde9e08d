/*
 * Release-visible error values.
 *
 * Most of the public API reports failure via `bool`/`Option` (wait,
 * lock, and send return bool; allocate returns Option<NonNull<u8>>).
 * `KernelError` exists only for the handful of introspection calls
 * that benefit from a reason richer than a bare `None`.
 */

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// The allocator pool has no block large enough to satisfy a request.
    PoolExhausted,
    /// A handle did not name a live object/thread.
    InvalidHandle,
    /// The caller does not hold the resource it tried to release.
    NotOwner,
    /// A queue transfer could not proceed because the buffer is full.
    QueueFull,
    /// A queue transfer could not proceed because the buffer is empty.
    QueueEmpty,
}
