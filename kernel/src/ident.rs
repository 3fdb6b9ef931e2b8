//! Resolves "the calling thread"'s kernel identity.
//!
//! The spec's no-argument syscalls (`ThreadSelf`, `Pipe`, `Read`, ...)
//! implicitly operate on "the calling thread's current process" — on real
//! hardware that's whatever the CPU's current TCB pointer says. Here, each
//! Rust OS thread records its `(process, tid)` pair in thread-local storage
//! the moment it starts acting as a kernel thread: see
//! `Kernel::spawn_process` for a process's initial thread, and the
//! `create_thread` trampoline for every thread spawned afterward.

use std::cell::Cell;

use crate::error::KernelError;
use crate::process::ProcessId;
use crate::thread::TidT;

thread_local! {
    static CURRENT: Cell<Option<(ProcessId, TidT)>> = const { Cell::new(None) };
}

pub(crate) fn current() -> Result<(ProcessId, TidT), KernelError> {
    CURRENT.with(Cell::get).ok_or(KernelError::NotFound)
}

pub(crate) fn set_current(pid: ProcessId, tid: TidT) {
    CURRENT.with(|c| c.set(Some((pid, tid))));
}

pub(crate) fn clear_current() {
    CURRENT.with(|c| c.set(None));
}
