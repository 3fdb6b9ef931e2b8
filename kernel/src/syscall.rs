//! Stable, no-argument-process, sentinel-return syscall surface.
//!
//! This is the literal C-shaped surface the spec's interface section
//! describes: every call implicitly operates on "the calling thread's
//! process" (resolved via `crate::ident`) and reports failure as `-1`
//! (or `0`/[`crate::thread::NOTID`] where the spec uses that convention)
//! rather than a typed error. It exists purely as a thin translation over
//! the `Kernel::` methods in `kernel.rs`/`pipe.rs`/`thread.rs`/`socket.rs` —
//! prefer those directly from Rust code; this module is for parity with
//! the spec's documented call signatures.

use std::sync::Arc;

use crate::fcb::{FidT, NOFILE};
use crate::ident;
use crate::kernel::Kernel;
use crate::socket::ShutdownMode;
use crate::thread::{ThreadTask, TidT, NOTID};

/// Output of [`pipe`], mirroring the spec's `pipe_t` out-parameter struct.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipeT {
    pub read: FidT,
    pub write: FidT,
}

pub fn create_thread(kernel: &Arc<Kernel>, task: ThreadTask, argl: i32, args: Arc<[u8]>) -> TidT {
    match ident::current() {
        Ok((pid, _)) => kernel.create_thread(pid, task, argl, args),
        Err(_) => NOTID,
    }
}

pub fn thread_self(kernel: &Kernel) -> TidT {
    kernel.thread_self()
}

pub fn thread_join(kernel: &Kernel, tid: TidT) -> i32 {
    match kernel.thread_join(tid, None) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn thread_join_with_exitval(kernel: &Kernel, tid: TidT, out_exitval: &mut i32) -> i32 {
    match kernel.thread_join(tid, Some(out_exitval)) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn thread_detach(kernel: &Kernel, tid: TidT) -> i32 {
    match kernel.thread_detach(tid) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn thread_exit(kernel: &Kernel, exitval: i32) {
    kernel.thread_exit(exitval);
}

pub fn pipe(kernel: &Kernel, out: &mut PipeT) -> i32 {
    let Ok((pid, _)) = ident::current() else { return -1 };
    match kernel.pipe(pid) {
        Ok((read, write)) => {
            *out = PipeT { read, write };
            0
        }
        Err(_) => -1,
    }
}

pub fn socket(kernel: &Kernel, port: u16) -> FidT {
    let Ok((pid, _)) = ident::current() else { return NOFILE };
    kernel.socket(pid, port).unwrap_or(NOFILE)
}

pub fn listen(kernel: &Kernel, fid: FidT) -> i32 {
    let Ok((pid, _)) = ident::current() else { return -1 };
    if kernel.listen(pid, fid).is_ok() { 0 } else { -1 }
}

pub fn accept(kernel: &Kernel, lfid: FidT) -> FidT {
    let Ok((pid, _)) = ident::current() else { return NOFILE };
    kernel.accept(pid, lfid).unwrap_or(NOFILE)
}

pub fn connect(kernel: &Kernel, fid: FidT, port: u16, timeout_ms: Option<u64>) -> i32 {
    let Ok((pid, _)) = ident::current() else { return -1 };
    if kernel.connect(pid, fid, port, timeout_ms).is_ok() { 0 } else { -1 }
}

pub fn shutdown(kernel: &Kernel, fid: FidT, mode: ShutdownMode) -> i32 {
    let Ok((pid, _)) = ident::current() else { return -1 };
    if kernel.shutdown(pid, fid, mode).is_ok() { 0 } else { -1 }
}

pub fn read(kernel: &Kernel, fid: FidT, buf: &mut [u8]) -> i32 {
    let Ok((pid, _)) = ident::current() else { return -1 };
    kernel.read(pid, fid, buf).map(|n| n as i32).unwrap_or(-1)
}

pub fn write(kernel: &Kernel, fid: FidT, buf: &[u8]) -> i32 {
    let Ok((pid, _)) = ident::current() else { return -1 };
    kernel.write(pid, fid, buf).map(|n| n as i32).unwrap_or(-1)
}

pub fn close(kernel: &Kernel, fid: FidT) -> i32 {
    let Ok((pid, _)) = ident::current() else { return -1 };
    kernel.close(pid, fid).unwrap_or(-1)
}
