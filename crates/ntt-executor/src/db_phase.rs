//! The database phase of plan execution (spec §4.6 part 2): a single
//! atomic transaction applying every inode's terminal update, the blob
//! refcount upserts its successes imply, and best-effort path mime-type
//! updates, for one whole batch.

use ntt_db::{apply_inode_update, update_path_mime, upsert_blob, InodeUpdate};
use ntt_types::{BlobId, ErrorType, InodeKey, Status};
use tokio_postgres::Client;

use crate::error::ExecutorError;

/// One inode's decided database update for this batch. Produced by the
/// caller after reconciling an [`crate::FsOutcome`] with the worker's retry
/// ledger (spec §4.2) — this crate does not itself decide retry
/// disposition, only applies whatever the caller decided.
pub struct PlannedUpdate {
    pub key: InodeKey,
    pub status: Status,
    pub error_type: Option<ErrorType>,
    pub blobid: Option<BlobId>,
    pub mime_type: Option<String>,
    pub append_error: Option<String>,
    /// Added to the blob's `n_hardlinks` via the `ON CONFLICT` upsert.
    /// Ignored when `blobid` is `None`.
    pub n_new_links: i64,
}

/// Which follow-up repository calls one [`PlannedUpdate`] requires, decided
/// without touching a connection so the branching can be unit-tested on its
/// own (spec §4.6: `upsert_blob` only when a blob actually gained links this
/// round, `update_path_mime` only when a mime type was actually sniffed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PlannedOps {
    upsert_blob: Option<(BlobId, i64)>,
    update_mime: bool,
}

fn planned_ops(update: &PlannedUpdate) -> PlannedOps {
    PlannedOps {
        upsert_blob: match update.blobid {
            Some(blobid) if update.n_new_links > 0 => Some((blobid, update.n_new_links)),
            _ => None,
        },
        update_mime: update.mime_type.is_some(),
    }
}

/// Commits every planned update in one transaction (spec §4.6: "single
/// atomic transaction per batch"). On error the transaction is dropped
/// unused by `tokio_postgres`, which rolls it back; the filesystem is
/// already correct, so a future retry of the same inodes converges via
/// stale-claim reclamation.
pub async fn commit_batch(client: &mut Client, updates: &[PlannedUpdate]) -> Result<(), ExecutorError> {
    if updates.is_empty() {
        return Ok(());
    }

    let tx = client.transaction().await?;

    for update in updates {
        apply_inode_update(
            &tx,
            &InodeUpdate {
                key: update.key,
                status: update.status,
                error_type: update.error_type,
                blobid: update.blobid,
                mime_type: update.mime_type.as_deref(),
                append_error: update.append_error.as_deref(),
            },
        )
        .await?;

        let ops = planned_ops(update);

        if let Some((blobid, n_new_links)) = ops.upsert_blob {
            upsert_blob(&tx, blobid, n_new_links).await?;
        }

        if ops.update_mime {
            update_path_mime(&tx, &update.key, update.mime_type.as_deref().unwrap()).await?;
        }
    }

    tx.commit().await?;
    Ok(())
}
