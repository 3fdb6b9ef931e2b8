//! Sockets: the `UNBOUND -> LISTENER|PEER` state machine, the port map, and
//! the connect/accept rendezvous.
//!
//! Loosely grounded on `net/tcp.rs`'s connection-oriented vocabulary
//! (`connect`, `listen`-shaped port binding, `status`) and on its peer
//! state tracked per socket id, but none of the actual TCP state machine or
//! wire format carries over — `net/tcp.rs` only ever implements active-open
//! (`connect`), has no `listen`/`accept` pair, and is a real network stack
//! besides. The passive-open rendezvous (a listener's FIFO backlog of
//! pending requests, each woken individually by `accept`) has no analogue
//! in the teacher and is built fresh from the spec, using the same
//! `Arc<Condvar>` + arena pattern as `crate::pipe`. A connected peer is
//! realized as two `crate::pipe` pipes wired crosswise, exactly as the spec
//! describes — no separate socket-level buffer exists.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar};

use crate::error::{KResult, KernelError};
use crate::fcb::{FidT, StreamKind};
use crate::kernel::{Kernel, State};
use crate::pipe::PipeId;
use crate::process::ProcessId;
use crate::sched;

pub type SocketId = usize;
type ReqId = usize;

pub const NOPORT: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Read,
    Write,
    Both,
}

#[derive(Debug)]
pub(crate) enum SocketVariant {
    Unbound,
    Listener {
        queue: VecDeque<ReqId>,
        req_available: Arc<Condvar>,
    },
    Peer {
        read_pipe: Option<PipeId>,
        write_pipe: Option<PipeId>,
        /// Descriptive only; never dereferenced after the peer is wired up.
        #[allow(dead_code)]
        peer: Option<SocketId>,
    },
}

#[derive(Debug)]
pub(crate) struct SocketData {
    pub(crate) port: u16,
    /// Transient pin count held by in-flight `accept`/`connect` calls on a
    /// *listener*, independent of the FCB refcount. `socket_close` performs
    /// its state transition immediately but only frees the entry once this
    /// reaches zero, so a blocked `accept` never dereferences a freed slot.
    pub(crate) refcount: u32,
    pub(crate) closed: bool,
    pub(crate) variant: SocketVariant,
}

#[derive(Debug)]
pub(crate) struct ConnRequestData {
    peer_socket: SocketId,
    admitted: bool,
    connected_cv: Arc<Condvar>,
}

impl State {
    fn socket_maybe_free(&mut self, sid: SocketId) {
        if self.sockets.get(sid).is_some_and(|s| s.closed && s.refcount == 0) {
            self.sockets.remove(sid);
        }
    }

    /// `Socket(port)`: reserve one FCB and install a fresh `UNBOUND` socket
    /// behind it. Does not check port availability — `Listen` does that.
    pub(crate) fn socket_create(&mut self, pid: ProcessId, port: u16) -> Option<FidT> {
        let reserved = self.fcb_reserve(pid, 1)?;
        let (fid, fcb_id) = reserved[0];
        let sid = self.sockets.insert(SocketData {
            port,
            refcount: 0,
            closed: false,
            variant: SocketVariant::Unbound,
        });
        self.fcb_set_kind(fcb_id, StreamKind::Socket(sid));
        Some(fid)
    }

    /// `Listen(fid)`: move an `UNBOUND` socket with a real port to
    /// `LISTENER` and claim that port in the port map.
    pub(crate) fn socket_listen(&mut self, pid: ProcessId, fid: FidT) -> KResult<()> {
        let sid = self.socket_of(pid, fid)?;
        let sock = self.sockets.get(sid).ok_or(KernelError::InvalidArgument)?;
        if sock.port == NOPORT || !matches!(sock.variant, SocketVariant::Unbound) {
            return Err(KernelError::InvalidArgument);
        }
        let port = sock.port;
        if self.port_map[port as usize].is_some() {
            return Err(KernelError::InvalidArgument);
        }
        self.sockets.get_mut(sid).expect("checked above").variant = SocketVariant::Listener {
            queue: VecDeque::new(),
            req_available: Arc::new(Condvar::new()),
        };
        self.port_map[port as usize] = Some(sid);
        Ok(())
    }

    /// `ShutDown(fid, mode)`: close one or both of a peer socket's pipe
    /// endpoints, clearing the corresponding pointer so later reads/writes
    /// on this socket fail outright instead of just seeing EOF/backpressure.
    pub(crate) fn socket_shutdown(&mut self, pid: ProcessId, fid: FidT, mode: ShutdownMode) -> KResult<()> {
        let sid = self.socket_of(pid, fid)?;
        let (read_pipe, write_pipe) = match &self.sockets.get(sid).ok_or(KernelError::InvalidArgument)?.variant {
            SocketVariant::Peer { read_pipe, write_pipe, .. } => (*read_pipe, *write_pipe),
            _ => return Err(KernelError::InvalidArgument),
        };
        if matches!(mode, ShutdownMode::Read | ShutdownMode::Both) {
            if let Some(rp) = read_pipe {
                self.pipe_reader_close(rp);
                if let SocketVariant::Peer { read_pipe, .. } = &mut self.sockets.get_mut(sid).expect("checked above").variant {
                    *read_pipe = None;
                }
            }
        }
        if matches!(mode, ShutdownMode::Write | ShutdownMode::Both) {
            if let Some(wp) = write_pipe {
                self.pipe_writer_close(wp);
                if let SocketVariant::Peer { write_pipe, .. } = &mut self.sockets.get_mut(sid).expect("checked above").variant {
                    *write_pipe = None;
                }
            }
        }
        Ok(())
    }

    /// Invoked when the owning FCB's refcount hits zero. Tears down
    /// whatever the socket's current variant holds, then frees the slot
    /// once nothing else is pinning it (see [`SocketData::refcount`]).
    pub(crate) fn socket_close(&mut self, sid: SocketId) {
        if let Some(sock) = self.sockets.get_mut(sid) {
            match &mut sock.variant {
                SocketVariant::Unbound => {}
                SocketVariant::Listener { req_available, .. } => {
                    let port = sock.port;
                    if self.port_map[port as usize] == Some(sid) {
                        self.port_map[port as usize] = None;
                    }
                    let cv = Arc::clone(req_available);
                    sched::broadcast(&cv);
                }
                SocketVariant::Peer { read_pipe, write_pipe, .. } => {
                    if let Some(wp) = write_pipe.take() {
                        self.pipe_writer_close(wp);
                    }
                    if let Some(rp) = read_pipe.take() {
                        self.pipe_reader_close(rp);
                    }
                }
            }
            sock.closed = true;
        }
        self.socket_maybe_free(sid);
    }

    fn socket_of(&self, pid: ProcessId, fid: FidT) -> KResult<SocketId> {
        let fcb_id = self.fcb_get(pid, fid).ok_or(KernelError::InvalidArgument)?;
        self.fcb_socket_id(fcb_id).ok_or(KernelError::InvalidArgument)
    }

    fn wire_peer(&mut self, sid: SocketId, read_pipe: PipeId, write_pipe: PipeId, peer: SocketId) {
        if let Some(sock) = self.sockets.get_mut(sid) {
            sock.variant = SocketVariant::Peer {
                read_pipe: Some(read_pipe),
                write_pipe: Some(write_pipe),
                peer: Some(peer),
            };
        }
    }

    pub(crate) fn socket_pipe_for(&self, sid: SocketId, for_read: bool) -> KResult<PipeId> {
        match &self.sockets.get(sid).ok_or(KernelError::InvalidArgument)?.variant {
            SocketVariant::Peer { read_pipe, write_pipe, .. } => {
                let slot = if for_read { read_pipe } else { write_pipe };
                slot.ok_or(KernelError::InvalidArgument)
            }
            _ => Err(KernelError::InvalidArgument),
        }
    }
}

impl Kernel {
    pub fn socket(&self, pid: ProcessId, port: u16) -> KResult<FidT> {
        if port as usize > self.config.max_port {
            return Err(KernelError::InvalidArgument);
        }
        let mut guard = self.state.lock().expect("kernel lock poisoned");
        guard.socket_create(pid, port).ok_or(KernelError::ResourceExhausted)
    }

    pub fn listen(&self, pid: ProcessId, fid: FidT) -> KResult<()> {
        let mut guard = self.state.lock().expect("kernel lock poisoned");
        guard.socket_listen(pid, fid)
    }

    pub fn shutdown(&self, pid: ProcessId, fid: FidT, mode: ShutdownMode) -> KResult<()> {
        let mut guard = self.state.lock().expect("kernel lock poisoned");
        guard.socket_shutdown(pid, fid, mode)
    }

    /// Diagnostic-only count of connection requests currently queued on a
    /// listener, for tests and instrumentation that want to assert on
    /// backlog depth without reaching into private socket state. Fails if
    /// `fid` isn't a `LISTENER` socket.
    pub fn listener_pending_len(&self, pid: ProcessId, fid: FidT) -> KResult<usize> {
        let guard = self.state.lock().expect("kernel lock poisoned");
        let sid = guard.socket_of(pid, fid)?;
        match &guard.sockets.get(sid).ok_or(KernelError::InvalidArgument)?.variant {
            SocketVariant::Listener { queue, .. } => Ok(queue.len()),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// `Connect(fid, port, timeout)`: enqueue a rendezvous request on the
    /// listener bound to `port` and block until `accept` admits it or the
    /// timeout elapses. On success the calling socket is wired up as a
    /// `PEER`; `timeout_ms = None` waits indefinitely.
    pub fn connect(&self, pid: ProcessId, fid: FidT, port: u16, timeout_ms: Option<u64>) -> KResult<()> {
        let mut guard = self.state.lock().expect("kernel lock poisoned");
        let caller_sid = guard.socket_of(pid, fid)?;
        if port == NOPORT || port as usize > self.config.max_port {
            return Err(KernelError::InvalidArgument);
        }
        let listener_sid = guard.port_map[port as usize].ok_or(KernelError::InvalidArgument)?;
        if !matches!(guard.sockets.get(listener_sid).map(|s| &s.variant), Some(SocketVariant::Listener { .. })) {
            return Err(KernelError::InvalidArgument);
        }

        guard.sockets.get_mut(listener_sid).expect("checked above").refcount += 1;
        let req_id = guard.conn_requests.insert(ConnRequestData {
            peer_socket: caller_sid,
            admitted: false,
            connected_cv: Arc::new(Condvar::new()),
        });
        if let SocketVariant::Listener { queue, req_available } =
            &mut guard.sockets.get_mut(listener_sid).expect("pinned above").variant
        {
            queue.push_back(req_id);
            sched::signal(req_available);
        }

        loop {
            let admitted = guard.conn_requests.get(req_id).is_some_and(|r| r.admitted);
            if admitted {
                break;
            }
            let cv = Arc::clone(&guard.conn_requests.get(req_id).expect("we own this request").connected_cv);
            let (new_guard, timed_out) = sched::timed_wait(&cv, guard, timeout_ms);
            guard = new_guard;
            if timed_out {
                break;
            }
        }

        // Re-check `admitted` once more regardless of how the loop ended:
        // accept may have admitted us in the same instant the deadline
        // expired, and it should win that race if it got the lock first.
        let admitted = guard.conn_requests.get(req_id).is_some_and(|r| r.admitted);
        guard.sockets.get_mut(listener_sid).expect("still pinned").refcount -= 1;
        guard.socket_maybe_free(listener_sid);

        if admitted {
            guard.conn_requests.remove(req_id);
            Ok(())
        } else {
            if let Some(sock) = guard.sockets.get_mut(listener_sid) {
                if let SocketVariant::Listener { queue, .. } = &mut sock.variant {
                    queue.retain(|&id| id != req_id);
                }
            }
            guard.conn_requests.remove(req_id);
            Err(KernelError::PeerClosed)
        }
    }

    /// `Accept(lfid)`: block until a request lands on the listener's
    /// backlog, then wire the admitted request's socket and a freshly
    /// allocated socket together as a connected pair.
    pub fn accept(&self, pid: ProcessId, lfid: FidT) -> KResult<FidT> {
        let mut guard = self.state.lock().expect("kernel lock poisoned");
        let listener_sid = guard.socket_of(pid, lfid)?;
        if !matches!(guard.sockets.get(listener_sid).map(|s| &s.variant), Some(SocketVariant::Listener { .. })) {
            return Err(KernelError::InvalidArgument);
        }
        guard.sockets.get_mut(listener_sid).expect("checked above").refcount += 1;

        let req_id = loop {
            let sock = guard.sockets.get(listener_sid).expect("pinned, can't vanish");
            if sock.closed {
                guard.sockets.get_mut(listener_sid).expect("pinned").refcount -= 1;
                guard.socket_maybe_free(listener_sid);
                return Err(KernelError::PeerClosed);
            }
            let SocketVariant::Listener { queue, req_available } = &sock.variant else {
                unreachable!("listener variant is pinned and never changes shape")
            };
            if let Some(&front) = queue.front() {
                break front;
            }
            let cv = Arc::clone(req_available);
            guard = sched::wait(&cv, guard);
        };

        if let SocketVariant::Listener { queue, .. } = &mut guard.sockets.get_mut(listener_sid).expect("pinned").variant {
            queue.pop_front();
        }

        let port = guard.sockets.get(listener_sid).expect("pinned").port;
        let new_fid = match guard.socket_create(pid, port) {
            Some(fid) => fid,
            None => {
                if let SocketVariant::Listener { queue, .. } = &mut guard.sockets.get_mut(listener_sid).expect("pinned").variant {
                    queue.push_front(req_id);
                }
                guard.sockets.get_mut(listener_sid).expect("pinned").refcount -= 1;
                guard.socket_maybe_free(listener_sid);
                return Err(KernelError::ResourceExhausted);
            }
        };
        let new_sid = guard.socket_of(pid, new_fid).expect("just created as a socket");
        let peer_sid = guard.conn_requests.get(req_id).expect("request is ours until we remove it").peer_socket;

        // Unlike `new_fid`'s FCB (reserved but not yet wired to anything,
        // the case `fcb_unreserve` exists for), this socket already has a
        // real `Socket` vtable installed, so its own `close_fid` path is
        // what undoes it on a failure here.
        let requeue_and_fail = |state: &mut State| {
            if let SocketVariant::Listener { queue, .. } = &mut state.sockets.get_mut(listener_sid).expect("pinned").variant {
                queue.push_front(req_id);
            }
            state.sockets.get_mut(listener_sid).expect("pinned").refcount -= 1;
            state.socket_maybe_free(listener_sid);
        };
        let Some(p1) = guard.pipe_create(self.config.max_pipes) else {
            guard.close_fid(pid, new_fid);
            requeue_and_fail(&mut *guard);
            return Err(KernelError::ResourceExhausted);
        };
        let Some(p2) = guard.pipe_create(self.config.max_pipes) else {
            guard.pipes.remove(p1);
            guard.close_fid(pid, new_fid);
            requeue_and_fail(&mut *guard);
            return Err(KernelError::ResourceExhausted);
        };
        guard.wire_peer(new_sid, p1, p2, peer_sid);
        guard.wire_peer(peer_sid, p2, p1, new_sid);

        guard.conn_requests.get_mut(req_id).expect("checked above").admitted = true;
        let connected_cv = Arc::clone(&guard.conn_requests.get(req_id).expect("checked above").connected_cv);
        sched::signal(&connected_cv);

        guard.sockets.get_mut(listener_sid).expect("pinned").refcount -= 1;
        guard.socket_maybe_free(listener_sid);

        Ok(new_fid)
    }
}
