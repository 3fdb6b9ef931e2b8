//! File control blocks: the reference-counted, refcounted indirection layer
//! between a process's file-id table and the pipe/socket object a fid
//! actually streams to.
//!
//! Grounded on `fs/fd_table.rs`'s `FdEntry`/`FdKind` pair — same idea
//! (a small tagged union behind a flat table), generalized from that
//! table's four hardware-facing kinds (file, pipe-read, pipe-write, tty) to
//! this kernel's two backing objects (pipe end, socket) plus the
//! freshly-reserved `Uninit` state a slot sits in between `reserve` and the
//! owning syscall installing its real vtable.
//!
//! Rather than a literal `dyn` vtable (which would need the closed-over
//! `&mut State` to cross a trait-object call while that same state is
//! already borrowed — a well-known pain point), the vtable is realized as a
//! closed three-variant enum matched on at each read/write/close call site.
//! For a fixed, small variant set this is the idiomatic Rust equivalent of
//! a vtable, without the aliasing headache.

use crate::kernel::State;
use crate::pipe::PipeId;
use crate::process::ProcessId;
use crate::socket::SocketId;

pub type FcbId = usize;
pub type FidT = i32;

/// Returned in place of a fid by any syscall that fails before allocating one.
pub const NOFILE: FidT = -1;

#[derive(Debug, Clone, Copy)]
pub(crate) enum StreamKind {
    /// Reserved but not yet wired to a pipe or socket.
    Uninit,
    PipeReader(PipeId),
    PipeWriter(PipeId),
    Socket(SocketId),
}

#[derive(Debug)]
pub(crate) struct FcbEntry {
    pub(crate) refcount: u32,
    pub(crate) kind: StreamKind,
}

impl State {
    /// Atomically reserve `n` fids plus `n` FCB pool entries in `pid`'s file
    /// table. Fails with no side effect if fewer than `n` slots are free.
    pub(crate) fn fcb_reserve(&mut self, pid: ProcessId, n: usize) -> Option<Vec<(FidT, FcbId)>> {
        let process = self.processes.get(pid)?;
        let mut free_fids = Vec::with_capacity(n);
        for (fid, slot) in process.file_table.iter().enumerate() {
            if slot.is_none() {
                free_fids.push(fid);
                if free_fids.len() == n {
                    break;
                }
            }
        }
        if free_fids.len() < n {
            return None;
        }
        let mut out = Vec::with_capacity(n);
        for fid in free_fids {
            let fcb_id = self.fcbs.insert(FcbEntry { refcount: 1, kind: StreamKind::Uninit });
            self.processes.get_mut(pid).expect("checked above").file_table[fid] = Some(fcb_id);
            out.push((fid as FidT, fcb_id));
        }
        Some(out)
    }

    /// Inverse of [`State::fcb_reserve`]: drop the fids from `pid`'s file
    /// table and free the FCB pool entries directly, without running any
    /// kind-specific close. Used when a syscall reserves fids up front but
    /// fails before wiring them to a real pipe/socket backing object, so
    /// there is nothing for `close` to tear down yet.
    pub(crate) fn fcb_unreserve(&mut self, pid: ProcessId, reserved: &[(FidT, FcbId)]) {
        for &(fid, fcb_id) in reserved {
            if let Some(p) = self.processes.get_mut(pid) {
                if fid >= 0 {
                    p.file_table[fid as usize] = None;
                }
            }
            self.fcbs.remove(fcb_id);
        }
    }

    pub(crate) fn fcb_get(&self, pid: ProcessId, fid: FidT) -> Option<FcbId> {
        if fid < 0 {
            return None;
        }
        self.processes.get(pid)?.file_table.get(fid as usize).copied().flatten()
    }

    pub(crate) fn fcb_socket_id(&self, fcb_id: FcbId) -> Option<SocketId> {
        match self.fcbs.get(fcb_id)?.kind {
            StreamKind::Socket(sid) => Some(sid),
            _ => None,
        }
    }

    pub(crate) fn fcb_set_kind(&mut self, fcb_id: FcbId, kind: StreamKind) {
        if let Some(entry) = self.fcbs.get_mut(fcb_id) {
            entry.kind = kind;
        }
    }

    /// Drop the process's file-id reference to `fid` and decref its FCB.
    pub(crate) fn close_fid(&mut self, pid: ProcessId, fid: FidT) -> Option<i32> {
        let fcb_id = self.fcb_get(pid, fid)?;
        if fid >= 0 {
            if let Some(p) = self.processes.get_mut(pid) {
                p.file_table[fid as usize] = None;
            }
        }
        Some(self.fcb_decref(fcb_id))
    }

    /// Decrement an FCB's refcount, running the kind-specific close and
    /// freeing the entry once it reaches zero. Returns the close return
    /// value (always `0` here — none of this kernel's close paths fail).
    pub(crate) fn fcb_decref(&mut self, fcb_id: FcbId) -> i32 {
        let Some(entry) = self.fcbs.get_mut(fcb_id) else { return 0 };
        debug_assert!(entry.refcount > 0, "fcb refcount underflow");
        entry.refcount -= 1;
        if entry.refcount > 0 {
            return 0;
        }
        let kind = self.fcbs.remove(fcb_id).expect("checked above").kind;
        match kind {
            StreamKind::Uninit => 0,
            StreamKind::PipeReader(p) => {
                self.pipe_reader_close(p);
                0
            }
            StreamKind::PipeWriter(p) => {
                self.pipe_writer_close(p);
                0
            }
            StreamKind::Socket(s) => {
                self.socket_close(s);
                0
            }
        }
    }

    /// Inverse of [`State::fcb_decref`]. No production call site currently
    /// takes a second reference out on an already-wired FCB (`dup`/`fork`
    /// style sharing is out of scope), but the operation is a direct spec
    /// primitive and `incref_delays_close_until_matching_decref` below
    /// exercises it against `fcb_decref`'s refcounting.
    #[allow(dead_code)]
    pub(crate) fn fcb_incref(&mut self, fcb_id: FcbId) {
        if let Some(entry) = self.fcbs.get_mut(fcb_id) {
            entry.refcount += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::kernel::Kernel;

    fn fresh_pid(kernel: &std::sync::Arc<Kernel>) -> ProcessId {
        kernel.spawn_process()
    }

    #[test]
    fn reserve_is_all_or_nothing() {
        let kernel = Kernel::new(Config { max_fileid: 2, max_port: 8, max_pipes: 8 });
        let pid = fresh_pid(&kernel);
        let mut guard = kernel.state.lock().unwrap();
        // Two free slots: reserving three must fail and touch nothing.
        assert!(guard.fcb_reserve(pid, 3).is_none());
        let reserved = guard.fcb_reserve(pid, 2).expect("exactly two slots free");
        assert_eq!(reserved.len(), 2);
        for (fid, _) in &reserved {
            assert!(guard.fcb_get(pid, *fid).is_some());
        }
    }

    #[test]
    fn unreserve_frees_fids_and_pool_entries_without_closing() {
        let kernel = Kernel::new(Config { max_fileid: 4, max_port: 8, max_pipes: 8 });
        let pid = fresh_pid(&kernel);
        let mut guard = kernel.state.lock().unwrap();
        let reserved = guard.fcb_reserve(pid, 2).expect("room for two");
        guard.fcb_unreserve(pid, &reserved);
        for (fid, _) in &reserved {
            assert!(guard.fcb_get(pid, *fid).is_none());
        }
        // The slots must be reusable, proving they were actually returned.
        assert!(guard.fcb_reserve(pid, 4).is_some());
    }

    #[test]
    fn incref_delays_close_until_matching_decref() {
        let kernel = Kernel::new(Config::default());
        let pid = fresh_pid(&kernel);
        let mut guard = kernel.state.lock().unwrap();
        let (_fid, fcb_id) = guard.fcb_reserve(pid, 1).expect("one slot")[0];
        guard.fcb_incref(fcb_id);
        assert_eq!(guard.fcb_decref(fcb_id), 0);
        assert!(guard.fcbs.get(fcb_id).is_some(), "still referenced once more");
        assert_eq!(guard.fcb_decref(fcb_id), 0);
        assert!(guard.fcbs.get(fcb_id).is_none(), "last decref frees the slot");
    }

    #[test]
    fn get_rejects_out_of_range_and_empty_fids() {
        let kernel = Kernel::new(Config { max_fileid: 2, max_port: 8, max_pipes: 8 });
        let pid = fresh_pid(&kernel);
        let guard = kernel.state.lock().unwrap();
        assert!(guard.fcb_get(pid, -1).is_none());
        assert!(guard.fcb_get(pid, 99).is_none());
        assert!(guard.fcb_get(pid, 0).is_none(), "slot 0 was never reserved");
    }
}
