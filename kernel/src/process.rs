//! Minimal process control block.
//!
//! Fork/exec/wait and the process tree are out of scope (see the spec's
//! Non-goals); what's left is exactly enough to give [`crate::fcb`] and
//! [`crate::thread`] a CURPROC to hang the file-id table and the PTCB list
//! off of: a process is just a file-id table plus the set of threads
//! running inside it.

use crate::fcb::FcbId;
use crate::thread::PtcbId;

pub type ProcessId = usize;

#[derive(Debug)]
pub(crate) struct ProcessData {
    pub(crate) file_table: Vec<Option<FcbId>>,
    pub(crate) ptcb_ids: Vec<PtcbId>,
    pub(crate) thread_count: usize,
    /// Set once the last thread has exited and its open fids were reclaimed.
    /// Nothing currently reaps zombie processes (no parent/wait exists in
    /// this crate), so this is purely a diagnostic/introspection flag.
    pub(crate) zombie: bool,
}

impl ProcessData {
    pub(crate) fn new(max_fileid: usize) -> Self {
        ProcessData {
            file_table: vec![None; max_fileid],
            ptcb_ids: Vec::new(),
            thread_count: 0,
            zombie: false,
        }
    }
}
