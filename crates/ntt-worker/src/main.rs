//! The worker process (spec §3's "data/control flow"): repeatedly claims a
//! batch of one medium's unclaimed inodes, ensures the medium is mounted,
//! runs each inode through the analyzer and executor, reconciles the
//! results against the per-worker retry ledger, and commits. Exactly one
//! medium per process; running several media concurrently means running
//! several worker processes.

mod batch;
mod blob_cache;
mod config;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ntt_analyzer::analyze;
use ntt_diagnostics::{
    flush_problems, record_medium_summary, BatchStats, FileKernelLog, RetryLedger, DEFAULT_TAIL_BYTES,
};
use ntt_executor::{commit_batch, execute_fs_phase, FsFailure, FsOutcome};
use ntt_mount::{MountError, MountGuard};
use ntt_store::{ArchiveMirror, ByHashStore};
use ntt_types::{ClaimedInode, Health, MediumHash, Plan};
use tokio_postgres::Client;

use blob_cache::BlobCache;
use config::Config;

/// Copies one medium's enumerated inodes into the deduplicated archive.
#[derive(Parser, Debug)]
#[command(name = "ntt-worker", about = "Processes one medium's claimed inodes to completion")]
struct Cli {
    /// The medium to process, 32 lowercase hex characters.
    medium: MediumHash,
}

/// Where the kernel log is read from for checkpoint diagnostics (spec
/// §4.2 step 2). Not configurable: every worker on a host shares one
/// kernel ring buffer mirror.
const KERNEL_LOG_PATH: &str = "/var/log/kern.log";

/// Ceiling on the empty-batch backoff so a quiet medium doesn't leave a
/// worker sleeping for unreasonably long once more work arrives.
const MAX_EMPTY_BACKOFF: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.log_filter.clone()))
        .init();

    tracing::info!(medium = %cli.medium, worker_id = %config.worker_id, "starting worker");

    let mut client = ntt_db::connect(&config.database_url).await?;
    ntt_db::ensure_core_tables(&client).await?;
    ntt_db::ensure_medium_partitions(&client, cli.medium).await?;

    let shutdown = install_shutdown_signal();

    let store = ByHashStore::new(&config.byhash_root);
    let mirror = ArchiveMirror::new(&config.archive_root);
    let mount = MountGuard::new(&config.mount_helper);
    let kernel_log = FileKernelLog::new(KERNEL_LOG_PATH);

    let known_blobs = ntt_db::list_known_blob_ids(&client).await?;
    let mut blob_lookup = BlobCache::new(known_blobs);

    let mut ledger = RetryLedger::with_thresholds(config.checkpoint_retries, config.max_retries);
    let mut empty_backoff = Duration::from_secs(1);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("shutdown requested, exiting before next claim");
            break;
        }

        let health = ntt_db::medium_health(&client, cli.medium).await?;
        if health == Some(Health::Failed) {
            let n = ntt_db::mark_medium_failed_permanent(&client, cli.medium).await?;
            tracing::warn!(medium = %cli.medium, marked = n, "medium health=failed, marked remaining inodes failed_permanent");
            break;
        }

        let image_path = resolve_image_path(&client, &config, cli.medium).await?;
        if let Err(e) = mount.ensure_mounted(cli.medium, &image_path, health) {
            match e {
                MountError::MediumFailed(_) => {
                    let n = ntt_db::mark_medium_failed_permanent(&client, cli.medium).await?;
                    tracing::warn!(medium = %cli.medium, marked = n, "mount refused on failed health, marked remaining inodes");
                    break;
                }
                other => return Err(other.into()),
            }
        }
        let source_root = mount.mount_point(cli.medium);

        let claimed = ntt_db::claim_batch(
            &client,
            cli.medium,
            &config.worker_id,
            config.batch_size,
            config.stale_claim_secs,
        )
        .await?;

        if claimed.is_empty() {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            tracing::debug!(backoff_secs = empty_backoff.as_secs(), "no claimable work, backing off");
            tokio::time::sleep(empty_backoff).await;
            empty_backoff = (empty_backoff * 2).min(MAX_EMPTY_BACKOFF);
            continue;
        }

        let mut workable = Vec::with_capacity(claimed.len());
        for inode in claimed {
            if inode.paths.is_empty() {
                tracing::debug!(key = ?inode.key, "every path excluded, marking claimed_by=EXCLUDED");
                ntt_db::mark_excluded(&client, &inode.key).await?;
            } else {
                workable.push(inode);
            }
        }
        if workable.is_empty() {
            continue;
        }

        let (planned, analyzer_failures) = analyze_batch(&client, workable, &source_root, &store, &blob_lookup).await?;

        let mut outcomes = execute_fs_phase(&client, planned, &store, &mirror, &shutdown).await?;
        outcomes.extend(analyzer_failures);

        let mut updates = Vec::with_capacity(outcomes.len());
        let mut events = Vec::new();
        let mut stats = BatchStats::default();

        for outcome in outcomes {
            if let FsOutcome::Success(ref s) = outcome {
                if let Some(hash) = s.blobid {
                    blob_lookup.insert(hash);
                }
            }
            if let Some(update) = batch::reconcile(
                outcome,
                &mut ledger,
                &kernel_log,
                &source_root,
                DEFAULT_TAIL_BYTES,
                &mut stats,
                &mut events,
            ) {
                updates.push(update);
            }
        }

        commit_batch(&mut client, &updates).await?;
        flush_problems(&mut client, &events).await?;
        record_medium_summary(&mut client, cli.medium, stats).await?;

        if updates.is_empty() {
            // Every outcome this round left its inode `pending` for another
            // attempt (e.g. analyzer failures still below the ledger's
            // checkpoint threshold) — nothing terminal happened, so back off
            // the same way the no-claimable-work branch does rather than
            // re-claiming and re-failing the same rows as fast as the DB
            // round-trip allows.
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            tracing::debug!(backoff_secs = empty_backoff.as_secs(), "batch made no terminal progress, backing off");
            tokio::time::sleep(empty_backoff).await;
            empty_backoff = (empty_backoff * 2).min(MAX_EMPTY_BACKOFF);
        } else {
            empty_backoff = Duration::from_secs(1);
        }
    }

    Ok(())
}

/// Runs the analyzer over one claimed batch. An inode whose analysis
/// itself fails (e.g. the source file vanished between enumeration and
/// copy, or a failing medium surfaces ENOENT/EIO on the read) has its
/// claim released here, exactly as `execute_fs_phase` releases a
/// filesystem-phase failure's claim, and is returned as an
/// `FsOutcome::Failure` so it flows through the same
/// `ledger.record_failure` / `diagnose_at_checkpoint` / checkpoint-retry
/// discipline as any other failure (spec §4.2) instead of being retried
/// forever with no retry count and no diagnostic event.
async fn analyze_batch(
    client: &Client,
    claimed: Vec<ClaimedInode>,
    source_root: &std::path::Path,
    store: &ByHashStore,
    blob_lookup: &BlobCache,
) -> anyhow::Result<(Vec<(ClaimedInode, Plan)>, Vec<FsOutcome>)> {
    let mut planned = Vec::with_capacity(claimed.len());
    let mut failures = Vec::new();
    for inode in claimed {
        match analyze(&inode, source_root, store, blob_lookup) {
            Ok(plan) => planned.push((inode, plan)),
            Err(e) => {
                let key = inode.key;
                tracing::warn!(key = ?key, error = %e, "analyzer failed, releasing claim for retry");
                ntt_db::release_claim(client, &key).await?;
                failures.push(FsOutcome::Failure(FsFailure {
                    key,
                    error_type: e.error_type(),
                    message: e.to_string(),
                }));
            }
        }
    }
    Ok((planned, failures))
}

/// The medium's configured `image_path`, or the spec §6 filesystem-layout
/// default of `{IMAGE_ROOT}/{medium_hash}.img` when unset.
async fn resolve_image_path(client: &Client, config: &Config, medium_hash: MediumHash) -> anyhow::Result<PathBuf> {
    let configured = ntt_db::medium_image_path(client, medium_hash).await?;
    Ok(match configured {
        Some(p) => PathBuf::from(p),
        None => config.image_root.join(format!("{medium_hash}.img")),
    })
}

/// Installs SIGINT/SIGTERM handling and returns the flag `execute_fs_phase`
/// checks between inodes (spec §4.6's cancellation discipline).
fn install_shutdown_signal() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let task_flag = Arc::clone(&flag);

    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }

        tracing::info!("shutdown signal received");
        task_flag.store(true, Ordering::Relaxed);
    });

    flag
}
