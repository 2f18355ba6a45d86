//! The plan executor (C6): runs the filesystem phase of a claimed batch
//! outside any database transaction, then commits every inode's decided
//! outcome in a single atomic transaction (spec §4.6). The two phases are
//! deliberately separate functions — the worker loop sits between them to
//! reconcile filesystem failures against the per-worker retry ledger
//! (`ntt-diagnostics`) before deciding what, if anything, to write to the
//! database this round.

mod db_phase;
mod error;
mod fs_phase;

pub use db_phase::{commit_batch, PlannedUpdate};
pub use error::ExecutorError;
pub use fs_phase::{execute_fs_phase, FsFailure, FsOutcome, FsSuccess};
