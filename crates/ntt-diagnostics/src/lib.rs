//! Per-inode retry diagnostics (C2) and medium-level summary aggregation
//! (C8): everything that turns repeated failures into a decision, and
//! everything that records the result somewhere an operator can find it.

mod error;
mod event;
mod ledger;
mod pending;
mod summary;

pub use error::DiagnosticsError;
pub use event::{
    decide_action, diagnose_at_checkpoint, force_skip_event, Action, DiagnosticEvent, FileKernelLog, KernelLog,
    DEFAULT_TAIL_BYTES,
};
pub use ledger::{Disposition, RetryLedger, DEFAULT_CHECKPOINT, DEFAULT_MAX_RETRY};
pub use pending::{flush_problems, PendingDiagnostics};
pub use summary::{record_medium_summary, BatchStats, HIGH_ERROR_RATE_MIN_PROCESSED, HIGH_ERROR_RATE_THRESHOLD};
