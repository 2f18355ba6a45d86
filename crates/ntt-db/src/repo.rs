//! Database-phase repository functions: everything `ntt-executor` calls
//! inside its single per-batch transaction, plus the medium-health lookup
//! `ntt-mount` needs before acquiring a mount.

use ntt_types::{BlobId, ErrorType, Health, InodeKey, MediumHash, Status};
use tokio_postgres::{Client, Transaction};

use crate::error::DbError;

/// Every blob id currently known to the store, for seeding a worker's
/// in-memory dedup cache at startup (spec §4.5: the analyzer's blob lookup
/// has no database dependency of its own, so the caller prefetches this
/// once rather than querying per inode).
pub async fn list_known_blob_ids(client: &Client) -> Result<Vec<BlobId>, DbError> {
    let rows = client.query("SELECT blobid FROM blob", &[]).await?;
    rows.iter()
        .map(|row| {
            let s: String = row.try_get("blobid")?;
            s.parse::<BlobId>().map_err(DbError::from)
        })
        .collect()
}

/// `errors[]` is capped at this many most-recent entries (spec §9 open
/// question, resolved: unbounded growth is a real operational hazard on a
/// partition with millions of inodes).
pub const MAX_ERRORS_LEN: i64 = 32;

/// One inode's terminal or still-pending outcome for this attempt.
pub struct InodeUpdate<'a> {
    pub key: InodeKey,
    pub status: Status,
    pub error_type: Option<ErrorType>,
    pub blobid: Option<BlobId>,
    pub mime_type: Option<&'a str>,
    /// Appended to `errors[]` when set; `None` means "nothing new to log"
    /// (e.g. a clean success).
    pub append_error: Option<&'a str>,
}

// The cap keeps only the `MAX_ERRORS_LEN` most recently appended entries:
// ordinality-order the array plus the new entry, take the last N by
// descending ordinality, then re-sort ascending so `errors[]` reads in
// chronological order. Plain `errors || to_jsonb($n)` with no cap would let
// a flapping inode grow this column without bound.
const UPDATE_INODE_SQL: &str = r#"
UPDATE inode
SET status = $4,
    error_type = $5,
    blobid = $6,
    mime_type = coalesce($7, mime_type),
    processed_at = CASE WHEN $4 IN ('success', 'failed_permanent') THEN now() ELSE processed_at END,
    claimed_by = NULL,
    claimed_at = NULL,
    errors = CASE
        WHEN $8::text IS NULL THEN errors
        ELSE (
            SELECT jsonb_agg(v ORDER BY ord)
            FROM (
                SELECT v, ord
                FROM jsonb_array_elements(coalesce(errors, '[]'::jsonb) || jsonb_build_array($8::text))
                    WITH ORDINALITY AS t(v, ord)
                ORDER BY ord DESC
                LIMIT $9
            ) AS capped(v, ord)
        )
    END
WHERE medium_hash = $1 AND device = $2 AND inode_number = $3
"#;

pub async fn apply_inode_update(tx: &Transaction<'_>, update: &InodeUpdate<'_>) -> Result<(), DbError> {
    tx.execute(
        UPDATE_INODE_SQL,
        &[
            &update.key.medium_hash.to_string(),
            &update.key.device,
            &update.key.inode_number,
            &update.status.as_db_str(),
            &update.error_type.map(ErrorType::as_db_str),
            &update.blobid.map(|b| b.to_string()),
            &update.mime_type,
            &update.append_error,
            &MAX_ERRORS_LEN,
        ],
    )
    .await?;
    Ok(())
}

/// Upserts the blob row, adding `n_new_links` to any existing
/// `n_hardlinks` count (spec §4.3: the publisher's delta is the number of
/// paths it is about to link, not 1).
pub async fn upsert_blob(tx: &Transaction<'_>, blobid: BlobId, n_new_links: i64) -> Result<(), DbError> {
    tx.execute(
        "INSERT INTO blob (blobid, n_hardlinks) VALUES ($1, $2) \
         ON CONFLICT (blobid) DO UPDATE SET n_hardlinks = blob.n_hardlinks + excluded.n_hardlinks",
        &[&blobid.to_string(), &n_new_links],
    )
    .await?;
    Ok(())
}

/// Best-effort path `mime_type` update. Wrapped in its own savepoint so a
/// failure here (e.g. a path row removed out from under us) cannot abort
/// the whole batch transaction (spec §4.6: "never fails the batch").
pub async fn update_path_mime(tx: &Transaction<'_>, key: &InodeKey, mime_type: &str) -> Result<(), DbError> {
    tx.execute("SAVEPOINT path_mime_update", &[]).await?;

    let result = tx
        .execute(
            "UPDATE path SET mime_type = $4 \
             WHERE medium_hash = $1 AND device = $2 AND inode_number = $3",
            &[&key.medium_hash.to_string(), &key.device, &key.inode_number, &mime_type],
        )
        .await;

    match result {
        Ok(_) => {
            tx.execute("RELEASE SAVEPOINT path_mime_update", &[]).await?;
            Ok(())
        }
        Err(e) => {
            tracing::warn!(error = %e, "path mime_type update failed, continuing batch");
            tx.execute("ROLLBACK TO SAVEPOINT path_mime_update", &[]).await?;
            Ok(())
        }
    }
}

/// The medium's current `health`, or `None` if the row has none set yet
/// (imager hasn't populated it, or the medium row itself does not exist —
/// both treated as "proceed" by the mount guard).
pub async fn medium_health(client: &Client, medium_hash: MediumHash) -> Result<Option<Health>, DbError> {
    let row = client
        .query_opt(
            "SELECT health FROM medium WHERE medium_hash = $1",
            &[&medium_hash.to_string()],
        )
        .await?;
    let Some(row) = row else { return Ok(None) };
    let raw: Option<String> = row.try_get("health")?;
    raw.map(|s| s.parse::<Health>()).transpose().map_err(DbError::from)
}

/// The medium's `image_path` column, or `None` if unset (the worker falls
/// back to `{IMAGE_ROOT}/{medium_hash}.img` per spec §6's filesystem
/// layout when this is absent).
pub async fn medium_image_path(client: &Client, medium_hash: MediumHash) -> Result<Option<String>, DbError> {
    let row = client
        .query_opt(
            "SELECT image_path FROM medium WHERE medium_hash = $1",
            &[&medium_hash.to_string()],
        )
        .await?;
    let Some(row) = row else { return Ok(None) };
    Ok(row.try_get("image_path")?)
}

/// Marks an inode whose every path is excluded as `claimed_by='EXCLUDED'`,
/// leaving `status='pending'` untouched (spec §3: "skipped by the copy
/// engine via `claimed_by='EXCLUDED'`" is a third bucket alongside
/// `success`/`failed_permanent`, not a failure). `claim_batch`'s predicate
/// already filters `claimed_by IS DISTINCT FROM 'EXCLUDED'`, so this row
/// simply never becomes claimable again.
const MARK_EXCLUDED_SQL: &str = "UPDATE inode SET claimed_by = 'EXCLUDED', claimed_at = NULL \
     WHERE medium_hash = $1 AND device = $2 AND inode_number = $3";

pub async fn mark_excluded(client: &Client, key: &InodeKey) -> Result<(), DbError> {
    client
        .execute(
            MARK_EXCLUDED_SQL,
            &[&key.medium_hash.to_string(), &key.device, &key.inode_number],
        )
        .await?;
    Ok(())
}

/// Marks every still-`pending` inode on a `health='failed'` medium
/// `failed_permanent` with `error_type='io_error'` (spec §7): a dead disk
/// is never worth retrying.
pub async fn mark_medium_failed_permanent(client: &Client, medium_hash: MediumHash) -> Result<u64, DbError> {
    let n = client
        .execute(
            "UPDATE inode SET status = 'failed_permanent', error_type = 'io_error', \
             processed_at = now(), claimed_by = NULL, claimed_at = NULL \
             WHERE medium_hash = $1 AND status = 'pending'",
            &[&medium_hash.to_string()],
        )
        .await?;
    Ok(n)
}
