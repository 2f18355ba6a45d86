//! Ambient operational knobs read once at startup (spec §6). Everything
//! here has a conservative compiled-in default; only `NTT_DB_URL` is
//! mandatory. Matches the teacher's `Config::load` idiom of plain
//! `std::env::var` reads with `anyhow::Context` messages rather than a
//! derive-macro env layer, since these are process-wide knobs rather than
//! a CLI argument surface.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// This worker's claim identity, `hostname:pid` unless overridden (spec §6
/// table, `NTT_WORKER_ID`).
fn default_worker_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{host}:{}", std::process::id())
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub image_root: PathBuf,
    pub byhash_root: PathBuf,
    pub archive_root: PathBuf,
    /// Read but not re-applied: ignore patterns are a load-time concern
    /// owned by the loader (spec §9), the worker never re-checks them.
    pub ignore_patterns_path: Option<PathBuf>,
    pub worker_id: String,
    pub batch_size: i64,
    pub stale_claim_secs: i64,
    pub checkpoint_retries: u32,
    pub max_retries: u32,
    pub log_filter: String,
    pub mount_helper: PathBuf,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{name}={raw:?} is not valid: {e}")),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(e).with_context(|| format!("reading {name}")),
    }
}

impl Config {
    /// Loads every knob from the process environment, matching spec §6's
    /// table plus the ambient stack additions from SPEC_FULL.md §6.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("NTT_DB_URL").context("NTT_DB_URL must be set")?;

        Ok(Config {
            database_url,
            image_root: PathBuf::from(env_or("IMAGE_ROOT", "/var/lib/ntt/images")),
            byhash_root: PathBuf::from(env_or("BYHASH_ROOT", "/var/lib/ntt/byhash")),
            archive_root: PathBuf::from(env_or("ARCHIVE_ROOT", "/var/lib/ntt/archive")),
            ignore_patterns_path: std::env::var("NTT_IGNORE_PATTERNS").ok().map(PathBuf::from),
            worker_id: std::env::var("NTT_WORKER_ID").unwrap_or_else(|_| default_worker_id()),
            batch_size: env_parsed("NTT_BATCH_SIZE", 100)?,
            stale_claim_secs: env_parsed("NTT_STALE_CLAIM_SECS", 3600)?,
            checkpoint_retries: env_parsed("NTT_CHECKPOINT_RETRIES", ntt_diagnostics::DEFAULT_CHECKPOINT)?,
            max_retries: env_parsed("NTT_MAX_RETRIES", ntt_diagnostics::DEFAULT_MAX_RETRY)?,
            log_filter: env_or("NTT_LOG", "ntt=info"),
            mount_helper: PathBuf::from(env_or("NTT_MOUNT_HELPER", "/usr/local/sbin/ntt-mount-helper")),
        })
    }

    pub fn stale_claim_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_claim_secs.max(0) as u64)
    }
}
