//! The kernel lock and the top-level `Kernel` handle.
//!
//! `State` is every mutable kernel data structure (FCB pool, PTCB arena,
//! pipe arena, socket arena, pending connection requests, process table,
//! port map) sitting behind one `Mutex` — the "single big kernel lock"
//! model the spec assumes throughout, realized literally instead of as a
//! collection of per-object locks. Individual pipes, sockets and PTCBs
//! still get their own `Condvar`s (see `crate::sched`), but there is
//! exactly one mutex in the whole crate.
//!
//! A `Kernel` can host more than one [`ProcessData`] — `spawn_process`
//! creates an independent process on top of the same lock — which is what
//! lets a socket's two peer pipes be shared across processes (a listener
//! in one process, a connector in another) while still letting
//! `ThreadJoin` correctly reject a tid that belongs to a different process.

use std::sync::{Arc, Mutex};

use crate::arena::Arena;
use crate::config::Config;
use crate::error::{KResult, KernelError};
use crate::fcb::{FcbEntry, FidT, StreamKind};
use crate::ident;
use crate::pipe::PipeData;
use crate::process::{ProcessData, ProcessId};
use crate::socket::{ConnRequestData, SocketData, SocketId};
use crate::thread::PtcbData;

pub(crate) struct State {
    pub(crate) processes: Arena<ProcessData>,
    pub(crate) fcbs: Arena<FcbEntry>,
    pub(crate) ptcbs: Arena<PtcbData>,
    pub(crate) pipes: Arena<PipeData>,
    pub(crate) sockets: Arena<SocketData>,
    pub(crate) conn_requests: Arena<ConnRequestData>,
    pub(crate) port_map: Vec<Option<SocketId>>,
}

impl State {
    fn new(config: &Config) -> Self {
        State {
            processes: Arena::new(),
            fcbs: Arena::new(),
            ptcbs: Arena::new(),
            pipes: Arena::new(),
            sockets: Arena::new(),
            conn_requests: Arena::new(),
            port_map: vec![None; config.max_port + 1],
        }
    }
}

/// The kernel. Construct with [`Kernel::new`], which returns an `Arc`
/// since thread creation needs to clone a handle into the spawned thread.
pub struct Kernel {
    pub(crate) state: Mutex<State>,
    pub(crate) config: Config,
}

impl Kernel {
    pub fn new(config: Config) -> Arc<Kernel> {
        Arc::new(Kernel { state: Mutex::new(State::new(&config)), config })
    }

    /// Create a new process and register the *calling* OS thread as its
    /// first (main) PTCB. Fork/exec/process trees are out of scope (see
    /// the crate's design notes); a `Kernel` simply hosts as many
    /// independent processes as callers create, each with its own file-id
    /// table and thread list.
    pub fn spawn_process(self: &Arc<Self>) -> ProcessId {
        let mut guard = self.state.lock().expect("kernel lock poisoned");
        let pid = guard.processes.insert(ProcessData::new(self.config.max_fileid));
        let ptcb = PtcbData {
            owner: pid,
            argl: 0,
            args: Arc::from([]),
            exitval: 0,
            exited: false,
            detached: false,
            refcount: 1,
            exit_cv: Arc::new(std::sync::Condvar::new()),
        };
        let ptcb_id = guard.ptcbs.insert(ptcb);
        let process = guard.processes.get_mut(pid).expect("just created");
        process.ptcb_ids.push(ptcb_id);
        process.thread_count += 1;
        let tid = crate::thread::ptcb_id_to_tid(ptcb_id);
        drop(guard);
        ident::set_current(pid, tid);
        pid
    }

    fn read_pipe_for_fid(&self, pid: ProcessId, fid: FidT) -> KResult<crate::pipe::PipeId> {
        let guard = self.state.lock().expect("kernel lock poisoned");
        let fcb_id = guard.fcb_get(pid, fid).ok_or(KernelError::InvalidArgument)?;
        match guard.fcbs.get(fcb_id).ok_or(KernelError::InvalidArgument)?.kind {
            StreamKind::PipeReader(p) => Ok(p),
            StreamKind::Socket(sid) => guard.socket_pipe_for(sid, true),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    fn write_pipe_for_fid(&self, pid: ProcessId, fid: FidT) -> KResult<crate::pipe::PipeId> {
        let guard = self.state.lock().expect("kernel lock poisoned");
        let fcb_id = guard.fcb_get(pid, fid).ok_or(KernelError::InvalidArgument)?;
        match guard.fcbs.get(fcb_id).ok_or(KernelError::InvalidArgument)?.kind {
            StreamKind::PipeWriter(p) => Ok(p),
            StreamKind::Socket(sid) => guard.socket_pipe_for(sid, false),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// `Read(fid, buf)`: dispatch through the fid's FCB to either a pipe
    /// reader end or (for a connected socket) its peer's read pipe.
    pub fn read(&self, pid: ProcessId, fid: FidT, buf: &mut [u8]) -> KResult<usize> {
        let pipe_id = self.read_pipe_for_fid(pid, fid)?;
        self.pipe_read(pipe_id, buf)
    }

    /// `Write(fid, buf)`: symmetric to [`Kernel::read`].
    pub fn write(&self, pid: ProcessId, fid: FidT, buf: &[u8]) -> KResult<usize> {
        let pipe_id = self.write_pipe_for_fid(pid, fid)?;
        self.pipe_write(pipe_id, buf)
    }

    /// `Close(fid)`: release the fid's FCB reference, invoking the
    /// kind-specific close once the last reference is gone.
    pub fn close(&self, pid: ProcessId, fid: FidT) -> KResult<i32> {
        let mut guard = self.state.lock().expect("kernel lock poisoned");
        guard.close_fid(pid, fid).ok_or(KernelError::InvalidArgument)
    }

    /// `Pipe()`: create a new bounded pipe and reserve its two FCB
    /// endpoints in the calling process. If the fids reserve fine but the
    /// process-global pipe pool (`Config::max_pipes`) turns out to be full,
    /// the reservation is rolled back via `fcb_unreserve` rather than
    /// leaving two dangling `Uninit` fids behind.
    pub fn pipe(&self, pid: ProcessId) -> KResult<(FidT, FidT)> {
        let mut guard = self.state.lock().expect("kernel lock poisoned");
        let reserved = guard.fcb_reserve(pid, 2).ok_or(KernelError::ResourceExhausted)?;
        let Some(pipe_id) = guard.pipe_create(self.config.max_pipes) else {
            guard.fcb_unreserve(pid, &reserved);
            return Err(KernelError::ResourceExhausted);
        };
        let (read_fid, read_fcb) = reserved[0];
        let (write_fid, write_fcb) = reserved[1];
        guard.fcb_set_kind(read_fcb, StreamKind::PipeReader(pipe_id));
        guard.fcb_set_kind(write_fcb, StreamKind::PipeWriter(pipe_id));
        Ok((read_fid, write_fid))
    }

    /// Diagnostic-only snapshot of how many bytes are currently buffered in
    /// the pipe backing `fid` — works on either endpoint fid, or on a
    /// connected socket's fid (in which case it reports its write pipe's
    /// occupancy, the one a blocked writer would be waiting on). Never
    /// consulted by `pipe_read`/`pipe_write` themselves.
    pub fn pipe_bytes_buffered(&self, pid: ProcessId, fid: FidT) -> KResult<usize> {
        let pipe_id = self
            .write_pipe_for_fid(pid, fid)
            .or_else(|_| self.read_pipe_for_fid(pid, fid))?;
        let guard = self.state.lock().expect("kernel lock poisoned");
        guard.pipe_bytes_buffered(pipe_id).ok_or(KernelError::InvalidArgument)
    }

    /// Diagnostic-only check of whether the pipe backing `fid`'s write side
    /// has already had its writer end closed (i.e. a reader on it would see
    /// EOF once the buffer drains).
    pub fn pipe_is_writer_closed(&self, pid: ProcessId, fid: FidT) -> KResult<bool> {
        let pipe_id = self
            .read_pipe_for_fid(pid, fid)
            .or_else(|_| self.write_pipe_for_fid(pid, fid))?;
        let guard = self.state.lock().expect("kernel lock poisoned");
        guard.pipe_is_writer_closed(pipe_id).ok_or(KernelError::InvalidArgument)
    }
}
