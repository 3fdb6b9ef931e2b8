//! Bounded, blocking one-directional byte pipe.
//!
//! Grounded on `ipc/anon_pipe.rs`'s `AnonPipe`: a fixed-capacity circular
//! `buffer` with `read_refs`/`write_refs` presence tracking, generalized
//! from that file's `block_current_thread()`/`wake_thread(tid)` retry loop
//! to real `Condvar` waits (see `crate::sched`), and from its fixed
//! `MAX_PIPES`-slot array to an arena entry reached through the kernel's
//! single lock. `bytes_available`/`is_write_closed` carry over as
//! non-blocking introspection queries for callers that want to poll instead
//! of committing to a read.

use std::sync::{Arc, Condvar};

use crate::error::{KResult, KernelError};
use crate::kernel::{Kernel, State};
use crate::sched;

pub type PipeId = usize;

pub const PIPE_BUFFER_SIZE: usize = 16384;

#[derive(Debug)]
pub(crate) struct PipeData {
    buffer: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
    bytes_in_buffer: usize,
    reader_open: bool,
    writer_open: bool,
    has_space: Arc<Condvar>,
    has_data: Arc<Condvar>,
}

impl PipeData {
    fn new() -> Self {
        PipeData {
            buffer: vec![0u8; PIPE_BUFFER_SIZE].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            bytes_in_buffer: 0,
            reader_open: true,
            writer_open: true,
            has_space: Arc::new(Condvar::new()),
            has_data: Arc::new(Condvar::new()),
        }
    }
}

impl State {
    /// Allocate a fresh pipe, or `None` if the process-global pipe pool
    /// (`Config::max_pipes`) is already full.
    pub(crate) fn pipe_create(&mut self, max_pipes: usize) -> Option<PipeId> {
        if self.pipes.len() >= max_pipes {
            return None;
        }
        let id = self.pipes.insert(PipeData::new());
        tracing::trace!(pipe_id = id, "pipe created");
        Some(id)
    }

    /// Clear the writer endpoint. Frees the pipe immediately if the reader
    /// end is already closed too, otherwise wakes any blocked reader so it
    /// can observe EOF.
    pub(crate) fn pipe_writer_close(&mut self, id: PipeId) {
        let Some(pipe) = self.pipes.get_mut(id) else { return };
        pipe.writer_open = false;
        if !pipe.reader_open {
            self.pipes.remove(id);
        } else {
            let cv = Arc::clone(&pipe.has_data);
            sched::broadcast(&cv);
        }
    }

    /// Symmetric to [`State::pipe_writer_close`].
    pub(crate) fn pipe_reader_close(&mut self, id: PipeId) {
        let Some(pipe) = self.pipes.get_mut(id) else { return };
        pipe.reader_open = false;
        if !pipe.writer_open {
            self.pipes.remove(id);
        } else {
            let cv = Arc::clone(&pipe.has_space);
            sched::broadcast(&cv);
        }
    }

    pub(crate) fn pipe_bytes_buffered(&self, id: PipeId) -> Option<usize> {
        self.pipes.get(id).map(|p| p.bytes_in_buffer)
    }

    pub(crate) fn pipe_is_writer_closed(&self, id: PipeId) -> Option<bool> {
        self.pipes.get(id).map(|p| !p.writer_open)
    }
}

impl Kernel {
    /// Blocking write. Fails immediately (no bytes copied) if the writer end
    /// is already closed or the reader end is gone; otherwise blocks while
    /// the buffer is full, re-checking the reader on every wake, and copies
    /// `min(buf.len(), free space)` bytes before returning.
    pub(crate) fn pipe_write(&self, id: PipeId, buf: &[u8]) -> KResult<usize> {
        let mut guard = self.state.lock().expect("kernel lock poisoned");
        loop {
            let pipe = guard.pipes.get(id).ok_or(KernelError::InvalidArgument)?;
            if !pipe.writer_open {
                return Err(KernelError::InvalidArgument);
            }
            if !pipe.reader_open {
                return Err(KernelError::PeerClosed);
            }
            if pipe.bytes_in_buffer < PIPE_BUFFER_SIZE {
                break;
            }
            let has_space = Arc::clone(&pipe.has_space);
            guard = sched::wait(&has_space, guard);
        }
        let pipe = guard.pipes.get_mut(id).expect("pipe can't vanish while writer holds it open");
        let space = PIPE_BUFFER_SIZE - pipe.bytes_in_buffer;
        let n = buf.len().min(space);
        for (i, &b) in buf[..n].iter().enumerate() {
            let idx = (pipe.write_pos + i) % PIPE_BUFFER_SIZE;
            pipe.buffer[idx] = b;
        }
        pipe.write_pos = (pipe.write_pos + n) % PIPE_BUFFER_SIZE;
        pipe.bytes_in_buffer += n;
        let has_data = Arc::clone(&pipe.has_data);
        sched::broadcast(&has_data);
        Ok(n)
    }

    /// Blocking read. Returns `Ok(0)` on EOF (buffer empty and writer
    /// closed) rather than an error — draining a closed pipe is normal
    /// control flow, not a fault.
    pub(crate) fn pipe_read(&self, id: PipeId, buf: &mut [u8]) -> KResult<usize> {
        let mut guard = self.state.lock().expect("kernel lock poisoned");
        loop {
            let pipe = guard.pipes.get(id).ok_or(KernelError::InvalidArgument)?;
            if !pipe.reader_open {
                return Err(KernelError::InvalidArgument);
            }
            if pipe.bytes_in_buffer > 0 {
                break;
            }
            if !pipe.writer_open {
                return Ok(0);
            }
            let has_data = Arc::clone(&pipe.has_data);
            guard = sched::wait(&has_data, guard);
        }
        let pipe = guard.pipes.get_mut(id).expect("pipe can't vanish while reader holds it open");
        let n = buf.len().min(pipe.bytes_in_buffer);
        for (i, slot) in buf[..n].iter_mut().enumerate() {
            let idx = (pipe.read_pos + i) % PIPE_BUFFER_SIZE;
            *slot = pipe.buffer[idx];
        }
        pipe.read_pos = (pipe.read_pos + n) % PIPE_BUFFER_SIZE;
        pipe.bytes_in_buffer -= n;
        let has_space = Arc::clone(&pipe.has_space);
        sched::broadcast(&has_space);
        Ok(n)
    }
}
