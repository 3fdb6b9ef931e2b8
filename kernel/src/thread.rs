//! Process thread control blocks and the `CreateThread`/`ThreadJoin`/
//! `ThreadDetach`/`ThreadExit` family.
//!
//! `task/thread.rs`'s `Thread` carries ~25 fields for context-switching a
//! bare-metal CPU (register file, kernel stack, FPU state); all of that is
//! the externalized dispatcher's job here (see `crate::sched`'s module
//! doc), so `PtcbData` keeps only what the spec's PTCB actually needs:
//! identity, exit bookkeeping, and the join/detach condition variable. The
//! task closure itself is never stored — it's captured by the spawned
//! `std::thread` and consumed exactly once.

use std::sync::{Arc, Condvar};

use crate::error::{KResult, KernelError};
use crate::ident;
use crate::kernel::Kernel;
use crate::process::ProcessId;

pub type PtcbId = usize;
/// Opaque thread id; `0` is never issued and means "no such thread".
pub type TidT = i64;
pub const NOTID: TidT = 0;

/// The spec's `task(argl, args)` entry point, rendered as a one-shot
/// closure instead of a raw function pointer plus argument buffer.
pub type ThreadTask = Box<dyn FnOnce(i32, Arc<[u8]>) -> i32 + Send + 'static>;

#[derive(Debug)]
pub(crate) struct PtcbData {
    pub(crate) owner: ProcessId,
    pub(crate) argl: i32,
    pub(crate) args: Arc<[u8]>,
    pub(crate) exitval: i32,
    pub(crate) exited: bool,
    pub(crate) detached: bool,
    /// One ref for the running thread, one more per blocked joiner.
    pub(crate) refcount: u32,
    pub(crate) exit_cv: Arc<Condvar>,
}

pub(crate) fn ptcb_id_to_tid(id: PtcbId) -> TidT {
    (id as TidT) + 1
}

fn tid_to_ptcb_id(tid: TidT) -> Option<PtcbId> {
    if tid <= 0 {
        None
    } else {
        Some((tid - 1) as PtcbId)
    }
}

impl Kernel {
    /// Spawn a new thread in `pid`, running `task(argl, args)` on a fresh
    /// OS thread. Returns [`NOTID`] if the process id is unknown or the
    /// underlying OS thread could not be spawned.
    pub fn create_thread(
        self: &Arc<Self>,
        pid: ProcessId,
        task: ThreadTask,
        argl: i32,
        args: Arc<[u8]>,
    ) -> TidT {
        let ptcb_id = {
            let mut guard = self.state.lock().expect("kernel lock poisoned");
            if guard.processes.get(pid).is_none() {
                return NOTID;
            }
            let ptcb = PtcbData {
                owner: pid,
                argl,
                args: Arc::clone(&args),
                exitval: 0,
                exited: false,
                detached: false,
                refcount: 1,
                exit_cv: Arc::new(Condvar::new()),
            };
            let id = guard.ptcbs.insert(ptcb);
            let process = guard.processes.get_mut(pid).expect("checked above");
            process.ptcb_ids.push(id);
            process.thread_count += 1;
            id
        };
        let tid = ptcb_id_to_tid(ptcb_id);
        let kernel = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("ptcb-{tid}"))
            .spawn(move || {
                ident::set_current(pid, tid);
                tracing::debug!(tid, "thread started");
                let result = task(argl, args);
                kernel.thread_exit(result);
            });
        match spawned {
            Ok(_handle) => tid,
            Err(_) => {
                let mut guard = self.state.lock().expect("kernel lock poisoned");
                guard.ptcbs.remove(ptcb_id);
                if let Some(p) = guard.processes.get_mut(pid) {
                    p.ptcb_ids.retain(|&x| x != ptcb_id);
                    p.thread_count -= 1;
                }
                NOTID
            }
        }
    }

    /// `ThreadSelf()`: the calling OS thread's own tid, or [`NOTID`] if it
    /// was never registered as a kernel thread.
    pub fn thread_self(&self) -> TidT {
        ident::current().map(|(_, tid)| tid).unwrap_or(NOTID)
    }

    /// Block until `tid` exits, writing its exit value into `out_exitval`
    /// if given. Fails if `tid` is `0`/self, doesn't belong to the calling
    /// process, or was already exited/detached at call time. A target that
    /// gets detached while we're blocked also makes us fail, even if it
    /// goes on to exit — once detached, the detaching caller owns that
    /// outcome, not us.
    pub fn thread_join(&self, tid: TidT, out_exitval: Option<&mut i32>) -> KResult<()> {
        let (pid, self_tid) = ident::current()?;
        if tid == NOTID || tid == self_tid {
            return Err(KernelError::InvalidArgument);
        }
        let ptcb_id = tid_to_ptcb_id(tid).ok_or(KernelError::InvalidArgument)?;
        let mut guard = self.state.lock().expect("kernel lock poisoned");
        let belongs = guard.processes.get(pid).is_some_and(|p| p.ptcb_ids.contains(&ptcb_id));
        if !belongs {
            return Err(KernelError::NotFound);
        }
        {
            let ptcb = guard.ptcbs.get(ptcb_id).ok_or(KernelError::NotFound)?;
            if ptcb.exited || ptcb.detached {
                return Err(KernelError::InvalidArgument);
            }
        }
        guard.ptcbs.get_mut(ptcb_id).expect("checked above").refcount += 1;
        loop {
            let ptcb = guard.ptcbs.get(ptcb_id).expect("joiner holds a refcount");
            if ptcb.exited || ptcb.detached {
                break;
            }
            let cv = Arc::clone(&ptcb.exit_cv);
            guard = crate::sched::wait(&cv, guard);
        }
        if guard.ptcbs.get(ptcb_id).expect("joiner holds a refcount").detached {
            guard.ptcbs.get_mut(ptcb_id).expect("checked above").refcount -= 1;
            return Err(KernelError::InvalidArgument);
        }
        let ptcb = guard.ptcbs.get_mut(ptcb_id).expect("joiner holds a refcount");
        let exitval = ptcb.exitval;
        ptcb.refcount -= 1;
        if ptcb.refcount == 0 {
            if let Some(p) = guard.processes.get_mut(pid) {
                p.ptcb_ids.retain(|&x| x != ptcb_id);
            }
            guard.ptcbs.remove(ptcb_id);
        }
        if let Some(out) = out_exitval {
            *out = exitval;
        }
        Ok(())
    }

    /// Mark `tid` as detached: no future `ThreadJoin` will succeed on it,
    /// and its PTCB is freed on exit without anyone needing to collect it.
    /// Fails if `tid` already exited or isn't one of CURPROC's threads.
    pub fn thread_detach(&self, tid: TidT) -> KResult<()> {
        let (pid, _) = ident::current()?;
        let ptcb_id = tid_to_ptcb_id(tid).ok_or(KernelError::InvalidArgument)?;
        let mut guard = self.state.lock().expect("kernel lock poisoned");
        let belongs = guard.processes.get(pid).is_some_and(|p| p.ptcb_ids.contains(&ptcb_id));
        if !belongs {
            return Err(KernelError::NotFound);
        }
        let ptcb = guard.ptcbs.get_mut(ptcb_id).ok_or(KernelError::NotFound)?;
        if ptcb.exited {
            return Err(KernelError::InvalidArgument);
        }
        ptcb.detached = true;
        let cv = Arc::clone(&ptcb.exit_cv);
        crate::sched::broadcast(&cv);
        Ok(())
    }

    /// Record `exitval`, wake any joiner, and — if this was the process's
    /// last thread — reclaim every fid still open in its file table.
    ///
    /// The spec's `ThreadExit` never returns to its caller (the TCB goes to
    /// sleep forever once the scheduler takes over). Under this crate's
    /// std-backed model there is no further scheduler handoff to wait for:
    /// once the PTCB bookkeeping below is done, the real OS thread backing
    /// it is free to actually terminate, so this returns normally instead
    /// of parking forever — see DESIGN.md.
    pub fn thread_exit(&self, exitval: i32) {
        let Ok((pid, tid)) = ident::current() else { return };
        let ptcb_id = match tid_to_ptcb_id(tid) {
            Some(id) => id,
            None => return,
        };
        let mut guard = self.state.lock().expect("kernel lock poisoned");
        if let Some(ptcb) = guard.ptcbs.get_mut(ptcb_id) {
            ptcb.exitval = exitval;
            ptcb.exited = true;
            ptcb.refcount -= 1;
            let cv = Arc::clone(&ptcb.exit_cv);
            let refcount = ptcb.refcount;
            crate::sched::broadcast(&cv);
            if refcount == 0 {
                if let Some(p) = guard.processes.get_mut(pid) {
                    p.ptcb_ids.retain(|&x| x != ptcb_id);
                }
                guard.ptcbs.remove(ptcb_id);
            }
        }
        if let Some(p) = guard.processes.get_mut(pid) {
            p.thread_count = p.thread_count.saturating_sub(1);
            if p.thread_count == 0 {
                let fcb_ids: Vec<_> = p.file_table.iter_mut().filter_map(Option::take).collect();
                p.zombie = true;
                for fcb_id in fcb_ids {
                    guard.fcb_decref(fcb_id);
                }
            }
        }
        tracing::debug!(tid, exitval, "thread exited");
        ident::clear_current();
    }
}
