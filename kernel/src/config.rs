//! Kernel-wide tunables.
//!
//! The spec treats `MAX_FILEID`, `MAX_PORT`, and `PIPE_BUFFER_SIZE` as
//! compile-time constants; `PIPE_BUFFER_SIZE` stays one (see
//! `crate::pipe::PIPE_BUFFER_SIZE`) since nothing needs it to vary per
//! kernel instance, but the per-process file-id table size, the port
//! space, and the process-global pipe pool are exposed here instead,
//! following `task/scheduler/thread_config.rs`'s pattern of pulling sizing
//! knobs out of hardcoded constants and into a plain settings struct
//! callers can override for tests.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Size of each process's file-id table; fids run `0..max_fileid`.
    pub max_fileid: usize,
    /// Highest valid port number; ports run `1..=max_port` (`0` is [`crate::socket::NOPORT`]).
    pub max_port: usize,
    /// Cap on live pipe objects across the whole kernel, modeling the
    /// spec's "process-global pool" a pipe's backing buffer is drawn from.
    /// `Pipe()`/`Accept()` fail with `ResourceExhausted` once it's reached.
    pub max_pipes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config { max_fileid: 16, max_port: 1024, max_pipes: 4096 }
    }
}
