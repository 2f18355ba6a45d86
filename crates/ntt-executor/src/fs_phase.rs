//! The filesystem phase of plan execution (spec §4.6 part 1): runs outside
//! any database transaction, dispatches each claimed inode's [`Plan`]
//! through the blob store and archive mirror, and releases the claim of
//! any inode whose filesystem work fails so a future worker can retry it.

use std::sync::atomic::{AtomicBool, Ordering};

use ntt_store::{ArchiveMirror, ByHashStore, StoreError};
use ntt_types::{BlobId, ClaimedInode, ErrorType, InodeKey, Plan, RawPath};
use tokio_postgres::Client;

use crate::error::ExecutorError;

/// One claimed inode's filesystem-phase result.
pub enum FsOutcome {
    /// Every filesystem step for this inode succeeded.
    Success(FsSuccess),
    /// A filesystem step failed; the claim has already been released.
    /// The caller (the worker loop, which owns the per-worker retry
    /// ledger) decides whether this is still retryable or should become
    /// terminal.
    Failure(FsFailure),
    /// The analyzer could not produce an actionable plan (e.g. every path
    /// for this inode turned out excluded). Nothing was touched on disk.
    Skipped { key: InodeKey, reason: String },
}

pub struct FsSuccess {
    pub key: InodeKey,
    pub blobid: Option<BlobId>,
    pub mime_type: Option<String>,
    /// Number of paths just linked against `blobid`, contributing to the
    /// blob's `n_hardlinks` upsert delta (spec §4.3 item 4). Zero for
    /// plans with no associated blob (directories, symlinks, specials).
    pub n_new_links: i64,
    /// `true` when this worker's atomic rename won the publish race for a
    /// brand-new blob (spec §4.6's `by_hash_created_by_this_worker`).
    pub by_hash_created_by_this_worker: bool,
}

pub struct FsFailure {
    pub key: InodeKey,
    pub error_type: ErrorType,
    pub message: String,
}

/// Sorts an inode's paths lexicographically on raw bytes (spec §4.5's
/// ordering guarantee), so two attempts at the same inode fan out
/// hardlinks/directories/symlinks in the same order.
fn sorted_paths(paths: &[RawPath]) -> Vec<&RawPath> {
    let mut sorted: Vec<&RawPath> = paths.iter().collect();
    sorted.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
    sorted
}

/// Runs the filesystem phase for one batch of (claimed inode, plan) pairs.
/// Never touches the batch's eventual database transaction; any release of
/// a failed inode's claim happens in its own small transaction, matching
/// spec §4.6.
///
/// `shutdown` is checked between inodes (spec §4.6's cancellation
/// discipline): once set, every remaining inode in the batch has its claim
/// released without attempting any filesystem work and is left out of the
/// returned outcomes entirely — there is nothing for the caller's database
/// phase to do for it, it simply stays `pending` for a future attempt.
pub async fn execute_fs_phase(
    client: &Client,
    batch: Vec<(ClaimedInode, Plan)>,
    store: &ByHashStore,
    mirror: &ArchiveMirror,
    shutdown: &AtomicBool,
) -> Result<Vec<FsOutcome>, ExecutorError> {
    let mut outcomes = Vec::with_capacity(batch.len());
    let mut batch = batch.into_iter();

    for (inode, plan) in &mut batch {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!(key = ?inode.key, "shutdown requested, releasing claim without further work");
            ntt_db::release_claim(client, &inode.key).await?;
            break;
        }

        let key = inode.key;
        match execute_one(&inode, &plan, store, mirror) {
            Ok(outcome) => outcomes.push(outcome),
            Err(store_err) => {
                ntt_db::release_claim(client, &key).await?;
                outcomes.push(FsOutcome::Failure(FsFailure {
                    key,
                    error_type: store_err.error_type(),
                    message: store_err.to_string(),
                }));
            }
        }
    }

    // Whatever the loop above didn't reach (because shutdown fired) still
    // holds a claim and must release it the same way.
    for (inode, _plan) in batch {
        ntt_db::release_claim(client, &inode.key).await?;
    }

    Ok(outcomes)
}

fn execute_one(
    inode: &ClaimedInode,
    plan: &Plan,
    store: &ByHashStore,
    mirror: &ArchiveMirror,
) -> Result<FsOutcome, StoreError> {
    let key = inode.key;
    let paths = sorted_paths(&inode.paths);

    match plan {
        Plan::Skip { reason } => Ok(FsOutcome::Skipped {
            key,
            reason: reason.clone(),
        }),

        Plan::HandleEmpty => {
            store.ensure_empty_blob()?;
            let blob_path = store.empty_blob_path();
            link_all(mirror, key, &paths, &blob_path)?;
            Ok(FsOutcome::Success(FsSuccess {
                key,
                blobid: Some(ntt_hash::empty_hash()),
                mime_type: None,
                n_new_links: paths.len() as i64,
                by_hash_created_by_this_worker: false,
            }))
        }

        Plan::PublishNewBlob {
            tmp_path,
            hash,
            mime_type,
        } => {
            let outcome = store.publish(tmp_path, *hash)?;
            let blob_path = store.blob_path(*hash);
            link_all(mirror, key, &paths, &blob_path)?;
            Ok(FsOutcome::Success(FsSuccess {
                key,
                blobid: Some(*hash),
                mime_type: mime_type.clone(),
                n_new_links: paths.len() as i64,
                by_hash_created_by_this_worker: outcome == ntt_store::PublishOutcome::Created,
            }))
        }

        Plan::LinkExistingBlob { hash, mime_type } => {
            let blob_path = store.blob_path(*hash);
            link_all(mirror, key, &paths, &blob_path)?;
            Ok(FsOutcome::Success(FsSuccess {
                key,
                blobid: Some(*hash),
                mime_type: mime_type.clone(),
                n_new_links: paths.len() as i64,
                by_hash_created_by_this_worker: false,
            }))
        }

        Plan::CreateDirectory => {
            for path in &paths {
                mirror.create_directory(key.medium_hash, path.as_bytes())?;
            }
            Ok(FsOutcome::Success(FsSuccess {
                key,
                blobid: None,
                mime_type: None,
                n_new_links: 0,
                by_hash_created_by_this_worker: false,
            }))
        }

        Plan::CreateSymlink { target } => {
            for path in &paths {
                mirror.create_symlink(key.medium_hash, path.as_bytes(), target)?;
            }
            Ok(FsOutcome::Success(FsSuccess {
                key,
                blobid: None,
                mime_type: None,
                n_new_links: 0,
                by_hash_created_by_this_worker: false,
            }))
        }

        Plan::RecordSpecial => Ok(FsOutcome::Success(FsSuccess {
            key,
            blobid: None,
            mime_type: None,
            n_new_links: 0,
            by_hash_created_by_this_worker: false,
        })),
    }
}

fn link_all(
    mirror: &ArchiveMirror,
    key: InodeKey,
    paths: &[&RawPath],
    blob_path: &std::path::Path,
) -> Result<(), StoreError> {
    for path in paths {
        mirror.link_path(key.medium_hash, path.as_bytes(), blob_path)?;
    }
    Ok(())
}
