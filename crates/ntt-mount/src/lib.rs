//! Per-medium mount acquisition. Many worker processes race to read files
//! off the same medium; this type serializes the first one through the
//! privileged mount helper while the rest fast-path off an in-process
//! cache or the helper's own idempotent `status` check.

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;

use fs2::FileExt;
use ntt_types::{Health, MediumHash};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MountError {
    #[error("medium {0} has health='failed'; refusing to mount")]
    MediumFailed(MediumHash),

    #[error("lock file error for medium {medium_hash}: {source}")]
    Lock {
        medium_hash: MediumHash,
        #[source]
        source: std::io::Error,
    },

    #[error("mount helper invocation failed: {0}")]
    HelperIo(#[source] std::io::Error),

    #[error("mount helper exited with status {0}")]
    HelperFailed(i32),
}

/// Root of the per-medium mount lock files, `/var/lock/ntt` per spec §6's
/// filesystem layout.
const LOCK_ROOT: &str = "/var/lock/ntt";

/// Root of the read-only medium mounts, `/mnt/ntt` per spec §6.
const MOUNT_ROOT: &str = "/mnt/ntt";

/// Acquires and tracks per-medium mounts. One instance per worker process;
/// the `mounted` cache and the lock file together prevent N racing workers
/// from each invoking the mount helper for a medium already mounted.
pub struct MountGuard {
    mount_helper: PathBuf,
    mounted: Mutex<HashSet<MediumHash>>,
}

impl MountGuard {
    pub fn new(mount_helper: impl Into<PathBuf>) -> Self {
        MountGuard {
            mount_helper: mount_helper.into(),
            mounted: Mutex::new(HashSet::new()),
        }
    }

    pub fn mount_point(&self, medium_hash: MediumHash) -> PathBuf {
        Path::new(MOUNT_ROOT).join(medium_hash.to_string())
    }

    fn lock_path(&self, medium_hash: MediumHash) -> PathBuf {
        Path::new(LOCK_ROOT).join(format!("mount-{medium_hash}.lock"))
    }

    /// Runs the five-step discipline from spec §4.4. `health` is the
    /// medium's current `health` column, read by the caller before this
    /// call (this crate has no database dependency of its own).
    #[tracing::instrument(level = "debug", skip(self, image_path), fields(medium_hash = %medium_hash))]
    pub fn ensure_mounted(
        &self,
        medium_hash: MediumHash,
        image_path: &Path,
        health: Option<Health>,
    ) -> Result<(), MountError> {
        // Step 1: fast path.
        if self.mounted.lock().contains(&medium_hash) {
            return Ok(());
        }

        // Step 2: acquire the per-medium exclusive lock, blocking.
        let lock_path = self.lock_path(medium_hash);
        if let Some(parent) = lock_path.parent() {
            fs_err::create_dir_all(parent).map_err(|e| MountError::Lock {
                medium_hash,
                source: e.into(),
            })?;
        }
        let lock_file = File::create(&lock_path).map_err(|source| MountError::Lock { medium_hash, source })?;
        lock_file
            .lock_exclusive()
            .map_err(|source| MountError::Lock { medium_hash, source })?;
        let guard = scopeguard::guard(lock_file, |f| {
            if let Err(e) = f.unlock() {
                tracing::warn!(%medium_hash, error = %e, "failed to release mount lock");
            }
        });

        // Step 3: re-check mount state now that we hold the lock.
        if self.is_mounted(medium_hash)? {
            self.mounted.lock().insert(medium_hash);
            return Ok(());
        }

        // Step 4: refuse a medium the imager marked unusable.
        if health == Some(Health::Failed) {
            return Err(MountError::MediumFailed(medium_hash));
        }

        // Step 5: unwind any stacked mounts left behind by a prior crash.
        self.unwind_overmounts(medium_hash)?;

        // Step 6: invoke the privileged helper.
        self.run_helper(&["mount", &medium_hash.to_string(), &image_path.to_string_lossy()])?;

        self.mounted.lock().insert(medium_hash);
        drop(guard); // releases the lock on scope exit, including on panics via scopeguard
        Ok(())
    }

    fn is_mounted(&self, medium_hash: MediumHash) -> Result<bool, MountError> {
        let status = Command::new(&self.mount_helper)
            .args(["status", &medium_hash.to_string()])
            .status()
            .map_err(MountError::HelperIo)?;
        Ok(status.success())
    }

    fn unwind_overmounts(&self, medium_hash: MediumHash) -> Result<(), MountError> {
        let mount_point = self.mount_point(medium_hash);
        loop {
            let count = overmount_count(&mount_point).map_err(MountError::HelperIo)?;
            if count <= 1 {
                return Ok(());
            }
            tracing::warn!(%medium_hash, stacked = count, "unwinding overmount before remount");
            self.run_helper(&["unmount", &medium_hash.to_string()])?;
        }
    }

    fn run_helper(&self, args: &[&str]) -> Result<(), MountError> {
        let status = Command::new(&self.mount_helper)
            .args(args)
            .status()
            .map_err(MountError::HelperIo)?;
        if !status.success() {
            return Err(MountError::HelperFailed(status.code().unwrap_or(-1)));
        }
        Ok(())
    }
}

fn overmount_count(mount_point: &Path) -> std::io::Result<usize> {
    let contents = fs_err::read_to_string("/proc/self/mounts")?;
    let target = mount_point.to_string_lossy();
    Ok(contents
        .lines()
        .filter(|line| line.split_whitespace().nth(1) == Some(target.as_ref()))
        .count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn fake_helper(dir: &Path, script: &str) -> PathBuf {
        let path = dir.join("fake-mount-helper");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\n{script}").unwrap();
        drop(f);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn medium() -> MediumHash {
        "cc".repeat(16).parse().unwrap()
    }

    #[test]
    fn ensure_mounted_caches_after_first_success() {
        let dir = tempfile::tempdir().unwrap();
        let calls_file = dir.path().join("calls");
        let script = format!(
            "echo \"$@\" >> {calls}\ncase \"$1\" in\n  status) exit 1 ;;\n  mount) exit 0 ;;\n  *) exit 0 ;;\nesac",
            calls = calls_file.display()
        );
        let helper = fake_helper(dir.path(), &script);
        let guard = MountGuard::new(helper);
        let image = dir.path().join("image.img");

        guard.ensure_mounted(medium(), &image, Some(Health::Ok)).unwrap();
        guard.ensure_mounted(medium(), &image, Some(Health::Ok)).unwrap();

        let calls = std::fs::read_to_string(&calls_file).unwrap();
        // The second call should have hit the in-process cache and never
        // re-invoked the helper at all.
        assert_eq!(calls.lines().filter(|l| l.starts_with("mount")).count(), 1);
    }

    #[test]
    fn ensure_mounted_refuses_failed_health() {
        let dir = tempfile::tempdir().unwrap();
        let helper = fake_helper(dir.path(), "case \"$1\" in status) exit 1 ;; *) exit 0 ;; esac");
        let guard = MountGuard::new(helper);
        let image = dir.path().join("image.img");

        let err = guard
            .ensure_mounted(medium(), &image, Some(Health::Failed))
            .unwrap_err();
        assert!(matches!(err, MountError::MediumFailed(_)));
    }

    #[test]
    fn ensure_mounted_propagates_helper_failure() {
        let dir = tempfile::tempdir().unwrap();
        let helper = fake_helper(dir.path(), "case \"$1\" in status) exit 1 ;; mount) exit 3 ;; *) exit 0 ;; esac");
        let guard = MountGuard::new(helper);
        let image = dir.path().join("image.img");

        let err = guard.ensure_mounted(medium(), &image, Some(Health::Ok)).unwrap_err();
        assert!(matches!(err, MountError::HelperFailed(3)));
    }
}
