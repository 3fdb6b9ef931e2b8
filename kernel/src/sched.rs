//! Stand-in for the assumed external thread dispatcher.
//!
//! Every blocking point in this kernel (`pipe_write` on a full buffer,
//! `accept` on an empty backlog, `thread_join` on a live target, ...) is
//! written as "atomically release the kernel lock and suspend the caller
//! until woken", exactly as `ipc/anon_pipe.rs` pairs `block_current_thread()`
//! with `wake_thread(tid)` around a polling retry loop. That pairing assumed
//! a scheduler underneath that never shipped — `sync/mutex.rs` and
//! `sync/semaphore.rs` both admit they still spin. This module supplies the
//! missing half with real blocking primitives: `std::sync::Condvar` paired
//! with the single [`crate::Kernel`] lock, and `std::thread` standing in for
//! `spawn_thread`.
//!
//! Nothing outside this module calls `std::thread`, `Condvar`, or the raw
//! `Mutex` directly — every suspension point in the kernel routes through
//! `wait`/`timed_wait`/`signal`/`broadcast` here.

use std::sync::{Condvar, MutexGuard};
use std::time::Duration;

/// Release `guard`, block until `cv` is signalled, then reacquire it.
pub(crate) fn wait<'a, T>(cv: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cv.wait(guard).expect("kernel lock poisoned")
}

/// As [`wait`], but gives up after `timeout_ms` milliseconds. `None` means
/// wait forever. Returns the reacquired guard plus whether the deadline
/// passed before a signal arrived.
pub(crate) fn timed_wait<'a, T>(
    cv: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout_ms: Option<u64>,
) -> (MutexGuard<'a, T>, bool) {
    match timeout_ms {
        None => (wait(cv, guard), false),
        Some(ms) => {
            let (guard, status) = cv
                .wait_timeout(guard, Duration::from_millis(ms))
                .expect("kernel lock poisoned");
            (guard, status.timed_out())
        }
    }
}

pub(crate) fn signal(cv: &Condvar) {
    cv.notify_one();
}

pub(crate) fn broadcast(cv: &Condvar) {
    cv.notify_all();
}
