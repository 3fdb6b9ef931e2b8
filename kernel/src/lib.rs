//! A small teaching kernel's thread, pipe and socket primitives.
//!
//! Everything in this crate operates under one big lock (see
//! [`kernel::State`]'s module doc): a user-facing call resolves a file id
//! to an FCB, dispatches through its operation vector to a pipe or socket,
//! and that operation may block on a condition variable while still
//! holding the same lock other callers need to make progress — waiting
//! atomically releases it (`crate::sched`) exactly as the spec requires.
//!
//! Two API layers are exposed:
//!
//! - [`Kernel`]'s inherent methods: idiomatic, `Result`-returning, and take
//!   an explicit [`process::ProcessId`] rather than relying on thread-local
//!   lookup. This is the layer to use from Rust code, including tests that
//!   need more than one process in play.
//! - [`syscall`]: the literal no-argument, sentinel-return surface the spec
//!   describes, resolving "the calling process" from thread-local state
//!   set by [`Kernel::spawn_process`] and thread creation.
//!
//! Process lifecycle (fork/exec/wait) is out of scope; see `process` for
//! what little process state this crate does track.

mod arena;
mod config;
mod error;
mod fcb;
mod ident;
mod kernel;
mod pipe;
mod process;
mod sched;
pub mod socket;
pub mod syscall;
mod thread;

pub use config::Config;
pub use error::{KResult, KernelError};
pub use fcb::{FidT, NOFILE};
pub use kernel::Kernel;
pub use process::ProcessId;
pub use socket::ShutdownMode;
pub use thread::{ThreadTask, TidT, NOTID};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn new_kernel() -> Arc<Kernel> {
        Kernel::new(Config::default())
    }

    #[test]
    fn pipe_small_write_then_read() {
        let kernel = new_kernel();
        let pid = kernel.spawn_process();
        let (r, w) = kernel.pipe(pid).expect("pipe");
        assert_eq!(kernel.write(pid, w, b"hello").unwrap(), 5);
        let mut buf = [0u8; 16];
        let n = kernel.read(pid, r, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn pipe_read_sees_eof_after_writer_closes() {
        let kernel = new_kernel();
        let pid = kernel.spawn_process();
        let (r, w) = kernel.pipe(pid).expect("pipe");
        kernel.write(pid, w, b"hi").unwrap();
        kernel.close(pid, w).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(kernel.read(pid, r, &mut buf).unwrap(), 2);
        // Buffer drained; writer gone: next read is EOF, not an error.
        assert_eq!(kernel.read(pid, r, &mut buf).unwrap(), 0);
    }

    #[test]
    fn pipe_diagnostics_report_occupancy_and_writer_state() {
        let kernel = new_kernel();
        let pid = kernel.spawn_process();
        let (r, w) = kernel.pipe(pid).expect("pipe");

        assert_eq!(kernel.pipe_bytes_buffered(pid, w), Ok(0));
        assert_eq!(kernel.pipe_is_writer_closed(pid, r), Ok(false));

        kernel.write(pid, w, b"abc").unwrap();
        assert_eq!(kernel.pipe_bytes_buffered(pid, r), Ok(3));

        kernel.close(pid, w).unwrap();
        assert_eq!(kernel.pipe_is_writer_closed(pid, r), Ok(true));
        // Buffered bytes are unaffected by the writer closing.
        assert_eq!(kernel.pipe_bytes_buffered(pid, r), Ok(3));
    }

    #[test]
    fn pipe_write_blocks_until_reader_drains() {
        let kernel = new_kernel();
        let pid = kernel.spawn_process();
        let (r, w) = kernel.pipe(pid).expect("pipe");

        let filler = vec![b'x'; crate::pipe::PIPE_BUFFER_SIZE];
        assert_eq!(kernel.write(pid, w, &filler).unwrap(), filler.len());

        let k2 = Arc::clone(&kernel);
        let writer = k2.create_thread(
            pid,
            Box::new(move |_argl, _args| {
                // One more byte than fits: must block until the reader
                // drains at least one byte of the full buffer.
                k2_write_one_extra_byte(&k2, pid, w)
            }),
            0,
            Arc::from([]),
        );
        assert_ne!(writer, NOTID);

        std::thread::sleep(Duration::from_millis(20));
        let mut buf = [0u8; 1];
        assert_eq!(kernel.read(pid, r, &mut buf).unwrap(), 1);

        let mut exitval = -1;
        assert_eq!(kernel.thread_join(writer, Some(&mut exitval)), Ok(()));
        assert_eq!(exitval, 1);
    }

    fn k2_write_one_extra_byte(kernel: &Arc<Kernel>, pid: ProcessId, w: FidT) -> i32 {
        kernel.write(pid, w, b"y").unwrap_or(-1) as i32
    }

    #[test]
    fn socket_connect_accept_ping_pong() {
        // Mirrors the canonical accept/connect exchange: the listener's
        // accepted peer speaks first ("ping"), the connector answers
        // ("pong") on the very same fid — proving the two pipes that make
        // up a peer connection carry independent, correctly-crossed traffic
        // in both directions rather than looping one pipe back on itself.
        let kernel = new_kernel();
        let server_pid = kernel.spawn_process();
        let client_pid = kernel.spawn_process();

        let listener = kernel.socket(server_pid, 100).unwrap();
        kernel.listen(server_pid, listener).unwrap();

        // Gate the server thread's return behind a channel so it cannot
        // race `thread_exit` ahead of this test's own `thread_join` call
        // below (real OS threads, unlike the spec's cooperative scheduler,
        // can finish before the joiner gets there).
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let k2 = Arc::clone(&kernel);
        let server_thread = k2.create_thread(
            server_pid,
            Box::new(move |_argl, _args| {
                let Ok(peer_fid) = k2.accept(server_pid, listener) else { return -1 };
                if k2.write(server_pid, peer_fid, b"ping").unwrap_or(0) != 4 {
                    return -1;
                }
                let mut buf = [0u8; 4];
                let n = k2.read(server_pid, peer_fid, &mut buf).unwrap_or(0);
                release_rx.recv().ok();
                if n != 4 || &buf != b"pong" {
                    return -1;
                }
                0
            }),
            0,
            Arc::from([]),
        );
        assert_ne!(server_thread, NOTID);

        let client_fid = kernel.socket(client_pid, 0).unwrap();
        kernel.connect(client_pid, client_fid, 100, Some(1000)).unwrap();
        let mut buf = [0u8; 4];
        let n = kernel.read(client_pid, client_fid, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        kernel.write(client_pid, client_fid, b"pong").unwrap();

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let _ = release_tx.send(());
        });
        let mut exitval = -1;
        ident_as(server_pid, || {
            assert_eq!(kernel.thread_join(server_thread, Some(&mut exitval)), Ok(()));
        });
        assert_eq!(exitval, 0);
    }

    #[test]
    fn listener_backlog_counts_pending_requests_fifo() {
        let kernel = new_kernel();
        let server_pid = kernel.spawn_process();
        let listener = kernel.socket(server_pid, 101).unwrap();
        kernel.listen(server_pid, listener).unwrap();
        assert_eq!(kernel.listener_pending_len(server_pid, listener), Ok(0));

        let client_pid = kernel.spawn_process();
        // Gate the connector's return so it can't beat this test's final
        // `thread_join` — see `socket_connect_accept_ping_pong` for why.
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let k2 = Arc::clone(&kernel);
        let connector = k2.create_thread(
            client_pid,
            Box::new(move |_argl, _args| {
                let fid = k2.socket(client_pid, 0).unwrap();
                let result = k2.connect(client_pid, fid, 101, None).map(|_| 0).unwrap_or(-1);
                release_rx.recv().ok();
                result
            }),
            0,
            Arc::from([]),
        );
        assert_ne!(connector, NOTID);

        // Give the connector a moment to enqueue its request before we poll.
        let mut seen_pending = false;
        for _ in 0..50 {
            if kernel.listener_pending_len(server_pid, listener) == Ok(1) {
                seen_pending = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(seen_pending, "connect should have queued exactly one request");

        let peer_fid = kernel.accept(server_pid, listener).unwrap();
        assert_eq!(kernel.listener_pending_len(server_pid, listener), Ok(0));
        assert_ne!(peer_fid, NOFILE);

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let _ = release_tx.send(());
        });
        ident_as(client_pid, || {
            assert_eq!(kernel.thread_join(connector, None), Ok(()));
        });
    }

    #[test]
    fn connect_times_out_with_no_listener() {
        let kernel = new_kernel();
        let pid = kernel.spawn_process();
        let fid = kernel.socket(pid, 0).unwrap();
        let start = std::time::Instant::now();
        let result = kernel.connect(pid, fid, 42, Some(100));
        assert_eq!(result, Err(KernelError::InvalidArgument));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn connect_times_out_when_nobody_accepts() {
        let kernel = new_kernel();
        let server_pid = kernel.spawn_process();
        let client_pid = kernel.spawn_process();
        let listener = kernel.socket(server_pid, 102).unwrap();
        kernel.listen(server_pid, listener).unwrap();

        let fid = kernel.socket(client_pid, 0).unwrap();
        let start = std::time::Instant::now();
        let result = kernel.connect(client_pid, fid, 102, Some(100));
        assert_eq!(result, Err(KernelError::PeerClosed));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(90));
        assert!(elapsed < Duration::from_millis(1000));
    }

    #[test]
    fn thread_join_rejects_cross_process_tid() {
        let kernel = new_kernel();
        let pid_a = kernel.spawn_process();
        let pid_b = kernel.spawn_process();
        // Gate the target thread's exit behind a channel: a real OS thread
        // backing it could otherwise run to completion (and free its PTCB,
        // since nobody has joined it yet) before either `thread_join` call
        // below runs, which the spec's cooperative scheduler never allows.
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let k2 = Arc::clone(&kernel);
        let tid = k2.create_thread(
            pid_a,
            Box::new(move |_, _| {
                release_rx.recv().ok();
                0
            }),
            0,
            Arc::from([]),
        );
        assert_ne!(tid, NOTID);

        // Borrow pid_b's identity to attempt the join from "inside" process b.
        ident_as(pid_b, || {
            assert_eq!(kernel.thread_join(tid, None), Err(KernelError::NotFound));
        });

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let _ = release_tx.send(());
        });
        let mut exitval = -1;
        ident_as(pid_a, || {
            assert_eq!(kernel.thread_join(tid, Some(&mut exitval)), Ok(()));
        });
    }

    #[test]
    fn double_join_fails_second_time() {
        let kernel = new_kernel();
        let pid = kernel.spawn_process();
        // Same gating as `thread_join_rejects_cross_process_tid`: the
        // target must still be alive when the first join call is made.
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let k2 = Arc::clone(&kernel);
        let tid = k2.create_thread(
            pid,
            Box::new(move |_, _| {
                release_rx.recv().ok();
                5
            }),
            0,
            Arc::from([]),
        );
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let _ = release_tx.send(());
        });
        let mut exitval = -1;
        assert_eq!(kernel.thread_join(tid, Some(&mut exitval)), Ok(()));
        assert_eq!(exitval, 5);
        assert_eq!(kernel.thread_join(tid, None), Err(KernelError::NotFound));
    }

    #[test]
    fn detach_races_a_blocked_joiner_to_failure() {
        let kernel = new_kernel();
        let pid = kernel.spawn_process();
        let k2 = Arc::clone(&kernel);
        let tid = k2.create_thread(
            pid,
            Box::new(|_, _| {
                std::thread::sleep(Duration::from_millis(150));
                0
            }),
            0,
            Arc::from([]),
        );

        let kernel_for_joiner = Arc::clone(&kernel);
        let joiner = std::thread::spawn(move || {
            ident_as(pid, || kernel_for_joiner.thread_join(tid, None))
        });
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(kernel.thread_detach(tid), Ok(()));
        assert_eq!(joiner.join().unwrap(), Err(KernelError::InvalidArgument));
    }

    /// Runs `f` with thread-local kernel identity temporarily set to `pid`
    /// under a synthetic tid, for tests that need to simulate "calling
    /// from inside a different process" on the current OS thread.
    fn ident_as<R>(pid: ProcessId, f: impl FnOnce() -> R) -> R {
        crate::ident::set_current(pid, crate::thread::NOTID + 1_000_000);
        let result = f();
        crate::ident::clear_current();
        result
    }
}
