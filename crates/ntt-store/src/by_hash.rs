use std::io;
use std::path::{Path, PathBuf};

use ntt_types::BlobId;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// This call created the blob file.
    Created,
    /// Another worker (or an earlier attempt) already published it.
    AlreadyExisted,
}

/// The two-level sharded content-addressed store rooted at `BYHASH_ROOT`.
/// A dumb, idempotent primitive with no ordering opinion of its own — the
/// analyzer/executor decide what order paths get linked in; this type only
/// ever answers "does this content exist, and can I make it exist safely".
#[derive(Debug, Clone)]
pub struct ByHashStore {
    root: PathBuf,
}

impl ByHashStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ByHashStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{BYHASH_ROOT}/{hash[0:2]}/{hash[2:4]}/{hash}`.
    pub fn blob_path(&self, hash: BlobId) -> PathBuf {
        let (a, b) = hash.shard();
        self.root.join(a).join(b).join(hash.to_string())
    }

    pub fn empty_blob_path(&self) -> PathBuf {
        self.blob_path(ntt_hash::empty_hash())
    }

    /// Publishes `tmp_path` (already hashed to `hash` by the caller) as the
    /// canonical blob file.
    ///
    /// Uses link-then-unlink rather than `rename` for the atomic "create
    /// only if absent" step: plain `rename(2)` silently replaces an
    /// existing destination on Linux, which would let a losing worker
    /// clobber a winner's already-published bytes instead of detecting the
    /// race. `hard_link` fails with `AlreadyExists` if the destination is
    /// already there, giving the three-outcome contract spec §4.3
    /// describes without a TOCTOU window.
    pub fn publish(&self, tmp_path: &Path, hash: BlobId) -> Result<PublishOutcome, StoreError> {
        let dest = self.blob_path(hash);
        let shard_dir = dest
            .parent()
            .expect("blob_path always nests under two shard directories");
        fs_err::create_dir_all(shard_dir).map_err(StoreError::from_io)?;

        match fs_err::hard_link(tmp_path, &dest) {
            Ok(()) => {
                fs_err::remove_file(tmp_path).map_err(StoreError::from_io)?;
                Ok(PublishOutcome::Created)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                fs_err::remove_file(tmp_path).map_err(StoreError::from_io)?;
                Ok(PublishOutcome::AlreadyExisted)
            }
            Err(e) => {
                let _ = fs_err::remove_file(tmp_path);
                Err(StoreError::from_io(e))
            }
        }
    }

    /// Ensures the pinned empty-file blob exists, publishing a zero-byte
    /// file the first time any worker reaches it.
    pub fn ensure_empty_blob(&self) -> Result<PublishOutcome, StoreError> {
        let dest = self.empty_blob_path();
        if dest.exists() {
            return Ok(PublishOutcome::AlreadyExisted);
        }

        let tmp = tempfile::Builder::new()
            .prefix(".ntt-empty-")
            .tempfile_in(&self.root)
            .map_err(StoreError::from_io)?;
        let tmp_path = tmp.into_temp_path();
        let kept = tmp_path.keep().map_err(|e| StoreError::from_io(e.error))?;
        self.publish(&kept, ntt_hash::empty_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn publish_new_blob_reports_created_then_already_existed_on_replay() {
        let dir = tempfile::tempdir().unwrap();
        let store = ByHashStore::new(dir.path());
        let hash = ntt_hash::empty_hash();

        let mut tmp1 = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        tmp1.write_all(b"").unwrap();
        let tmp1_path = tmp1.into_temp_path().keep().unwrap();
        assert_eq!(store.publish(&tmp1_path, hash).unwrap(), PublishOutcome::Created);

        let mut tmp2 = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        tmp2.write_all(b"").unwrap();
        let tmp2_path = tmp2.into_temp_path().keep().unwrap();
        assert_eq!(store.publish(&tmp2_path, hash).unwrap(), PublishOutcome::AlreadyExisted);

        assert!(store.blob_path(hash).exists());
        assert!(!tmp1_path.exists());
        assert!(!tmp2_path.exists());
    }

    #[test]
    fn concurrent_publish_race_leaves_exactly_one_winner_and_no_duplicated_bytes() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ByHashStore::new(dir.path()));
        let hash = ntt_hash::empty_hash();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let tmp = tempfile::NamedTempFile::new_in(store.root()).unwrap();
                    let tmp_path = tmp.into_temp_path().keep().unwrap();
                    store.publish(&tmp_path, hash).unwrap()
                })
            })
            .collect();

        let outcomes: Vec<PublishOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let created = outcomes.iter().filter(|o| **o == PublishOutcome::Created).count();
        assert_eq!(created, 1);
        assert!(store.blob_path(hash).is_file());
    }

    #[test]
    fn empty_blob_path_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ByHashStore::new(dir.path());
        assert_eq!(store.ensure_empty_blob().unwrap(), PublishOutcome::Created);
        assert_eq!(store.ensure_empty_blob().unwrap(), PublishOutcome::AlreadyExisted);
    }
}
