//! Reconciles one batch's filesystem-phase outcomes against the per-worker
//! retry ledger, deciding what (if anything) gets written to the database
//! this round (spec §4.2's retry checkpoint algorithm, run from here since
//! `ntt-diagnostics` never sees an [`FsOutcome`] and `ntt-executor` never
//! decides retry disposition — both crates stay ignorant of each other by
//! design).

use std::path::Path;

use ntt_diagnostics::{
    diagnose_at_checkpoint, force_skip_event, Action, BatchStats, DiagnosticEvent, Disposition, KernelLog,
    RetryLedger,
};
use ntt_executor::{FsFailure, FsOutcome, FsSuccess, PlannedUpdate};
use ntt_types::{ErrorType, InodeKey, Status};

/// Turns one inode's filesystem-phase outcome into this round's database
/// update, if any. `None` means the inode stays `pending`: its claim was
/// already released by `execute_fs_phase`, and either nothing has gone
/// wrong yet or the retry ledger decided to keep trying without a terminal
/// decision this round.
pub fn reconcile(
    outcome: FsOutcome,
    ledger: &mut RetryLedger,
    kernel_log: &dyn KernelLog,
    mount_point: &Path,
    tail_bytes: usize,
    stats: &mut BatchStats,
    events: &mut Vec<DiagnosticEvent>,
) -> Option<PlannedUpdate> {
    match outcome {
        FsOutcome::Success(s) => {
            stats.processed_count += 1;
            ledger.clear(s.key);
            Some(success_update(s))
        }

        // Defensive: claim_batch's EXCLUDED filter should already keep
        // every-path-excluded inodes out of the claimable set, so this
        // arm exists for a row that slipped through some other way. Treat
        // it as terminal rather than looping it back to pending forever.
        FsOutcome::Skipped { key, reason } => {
            stats.processed_count += 1;
            stats.error_count += 1;
            ledger.clear(key);
            Some(PlannedUpdate {
                key,
                status: Status::FailedPermanent,
                error_type: Some(ErrorType::PathError),
                blobid: None,
                mime_type: None,
                append_error: Some(reason),
                n_new_links: 0,
            })
        }

        FsOutcome::Failure(f) => {
            stats.processed_count += 1;
            stats.error_count += 1;
            reconcile_failure(f, ledger, kernel_log, mount_point, tail_bytes, stats, events)
        }
    }
}

fn success_update(s: FsSuccess) -> PlannedUpdate {
    PlannedUpdate {
        key: s.key,
        status: Status::Success,
        error_type: None,
        blobid: s.blobid,
        mime_type: s.mime_type,
        append_error: None,
        n_new_links: s.n_new_links,
    }
}

/// Drives spec §4.2 steps 1, 3, and 5 for one failed inode: increments the
/// ledger, and at `Checkpoint`/`ForceSkip` produces both the queued
/// [`DiagnosticEvent`] and, when the disposition is a skip, this round's
/// terminal [`PlannedUpdate`].
fn reconcile_failure(
    f: FsFailure,
    ledger: &mut RetryLedger,
    kernel_log: &dyn KernelLog,
    mount_point: &Path,
    tail_bytes: usize,
    stats: &mut BatchStats,
    events: &mut Vec<DiagnosticEvent>,
) -> Option<PlannedUpdate> {
    match ledger.record_failure(f.key) {
        Disposition::Continue => None,

        Disposition::Checkpoint => {
            // The original `io::Error` doesn't survive past the store
            // layer's `StoreError::error_type()` call; a synthetic error
            // built from the same message `classify()` already saw keeps
            // `diagnose_at_checkpoint`'s own reclassification faithful to
            // spec §4.2 step 2 without plumbing a live error object through
            // the claim/release boundary.
            let synthetic = std::io::Error::other(f.message.clone());
            let retry_count = ledger.retry_count(f.key);
            let event = diagnose_at_checkpoint(f.key, &synthetic, retry_count, kernel_log, mount_point, tail_bytes);

            if event.checks.iter().any(|c| c == "dmesg:beyond_eof") {
                stats.beyond_eof_detected = true;
            }

            let (action, error_type) = (event.action, event.error_type);
            events.push(event);

            match action {
                Action::DiagnosticSkip => {
                    ledger.clear(f.key);
                    Some(terminal_update(f.key, error_type, f.message))
                }
                Action::Continuing => None,
            }
        }

        Disposition::ForceSkip => {
            let retry_count = ledger.retry_count(f.key);
            let event = force_skip_event(f.key, retry_count);
            events.push(event);
            ledger.clear(f.key);
            // `force_skip_event` always classifies `unknown`, which is
            // retryable (spec §4.1) — forcing a skip bounds retry cost
            // without asserting the source data is unrecoverable, so the
            // inode is left eligible for a future `reset-failures` replay
            // rather than marked permanently dead.
            Some(terminal_update(f.key, ErrorType::Unknown, f.message))
        }
    }
}

fn terminal_update(key: InodeKey, error_type: ErrorType, message: String) -> PlannedUpdate {
    let status = if error_type.permanent() {
        Status::FailedPermanent
    } else {
        Status::FailedRetryable
    };
    PlannedUpdate {
        key,
        status,
        error_type: Some(error_type),
        blobid: None,
        mime_type: None,
        append_error: Some(message),
        n_new_links: 0,
    }
}
