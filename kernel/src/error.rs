//! Error taxonomy returned by the idiomatic [`crate::Kernel`] API.
//!
//! The syscall layer (`crate::syscall`) collapses every variant here down to
//! the stable `-1` sentinel; callers that want to know *why* an operation
//! failed use the `Kernel::` methods directly instead.

use thiserror::Error;

/// Everything that can go wrong inside the kernel.
///
/// End-of-file and "the rendezvous partner vanished before we could pair up"
/// are modelled as `Ok` values, not errors — see the pipe and socket module
/// docs for where each of those shows up.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A pool (file ids, pipes, sockets, threads) had no free slot.
    #[error("resource exhausted")]
    ResourceExhausted,
    /// A caller-supplied id, port, or flag combination is out of range or
    /// doesn't make sense for the target object's current state.
    #[error("invalid argument")]
    InvalidArgument,
    /// The other end of a connection attempt closed, was never installed,
    /// or timed out before a peer showed up.
    #[error("peer closed")]
    PeerClosed,
    /// A referenced id does not belong to the calling process.
    #[error("not found")]
    NotFound,
}

/// Convenience alias used throughout the crate.
pub type KResult<T> = Result<T, KernelError>;
