//! Queries backing the recovery tool (C7): the `(status, error_type)`
//! failure histogram for a medium, and the bulk `failed_retryable -> pending`
//! reset spec §4.7 describes. Kept separate from `repo.rs` because these
//! are operator-driven, not part of the worker's per-batch transaction.

use ntt_types::{ErrorType, MediumHash, Status};
use tokio_postgres::Client;

use crate::error::DbError;

/// One row of the failure histogram: how many inodes on this medium sit in
/// `(status, error_type)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureCount {
    pub status: Status,
    pub error_type: Option<ErrorType>,
    pub count: i64,
}

/// Groups every non-`pending`, non-`success` inode on `medium_hash` by
/// `(status, error_type)` with counts (spec §4.7 item 1).
pub async fn list_failures(client: &Client, medium_hash: MediumHash) -> Result<Vec<FailureCount>, DbError> {
    let rows = client
        .query(
            "SELECT status, error_type, count(*) AS n FROM inode \
             WHERE medium_hash = $1 AND status IN ('failed_retryable', 'failed_permanent') \
             GROUP BY status, error_type \
             ORDER BY status, error_type",
            &[&medium_hash.to_string()],
        )
        .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let status_str: String = row.try_get("status")?;
        let error_type_str: Option<String> = row.try_get("error_type")?;
        out.push(FailureCount {
            status: status_str.parse().map_err(DbError::from)?,
            error_type: error_type_str.map(|s| s.parse()).transpose().map_err(DbError::from)?,
            count: row.try_get("n")?,
        });
    }
    Ok(out)
}

/// Counts how many `failed_retryable` rows on `medium_hash` with the given
/// `error_type` a reset would affect, without mutating anything (spec
/// §4.7 item 3: `--dry-run`).
pub async fn count_resettable(
    client: &Client,
    medium_hash: MediumHash,
    error_type: ErrorType,
) -> Result<i64, DbError> {
    let row = client
        .query_one(
            "SELECT count(*) AS n FROM inode \
             WHERE medium_hash = $1 AND status = 'failed_retryable' AND error_type = $2",
            &[&medium_hash.to_string(), &error_type.as_db_str()],
        )
        .await?;
    Ok(row.try_get("n")?)
}

/// Resets every `failed_retryable` row on `medium_hash` with the given
/// `error_type` back to `pending`, clearing `error_type`, `errors[]`,
/// `claimed_by`, `claimed_at`, and `blobid` (spec §3's lifecycle: "clears
/// `claimed_by`, `errors[]`, `blobid`, `copied` flag" — this schema has no
/// separate `copied` column, `blobid IS NULL` is the copied flag's
/// equivalent). Only ever touches `failed_retryable` rows, which workers
/// never claim, so this has no lock contention with running workers (spec
/// §4.7's concurrency argument). Returns the number of rows reset.
const RESET_FAILURES_SQL: &str = "UPDATE inode SET status = 'pending', error_type = NULL, errors = '[]'::jsonb, \
     claimed_by = NULL, claimed_at = NULL, blobid = NULL, processed_at = NULL \
     WHERE medium_hash = $1 AND status = 'failed_retryable' AND error_type = $2";

pub async fn reset_failures(client: &Client, medium_hash: MediumHash, error_type: ErrorType) -> Result<u64, DbError> {
    let n = client
        .execute(RESET_FAILURES_SQL, &[&medium_hash.to_string(), &error_type.as_db_str()])
        .await?;
    Ok(n)
}
