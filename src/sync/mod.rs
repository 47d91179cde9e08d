//! Synchronization primitives built on the shared blocking protocol in
//! `crate::blocking`: counting semaphore, recursive mutex, and byte
//! queue.

pub mod mutex;
pub mod queue;
pub mod semaphore;
