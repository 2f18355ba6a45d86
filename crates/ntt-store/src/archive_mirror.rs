use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use ntt_types::MediumHash;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// This call created the hardlink.
    Created,
    /// The destination already existed and pointed at the same blob
    /// (dev/ino match) — idempotent no-op.
    AlreadyLinked,
}

/// The per-medium mirror of the original directory tree, populated
/// exclusively by hardlinks into [`crate::ByHashStore`].
#[derive(Debug, Clone)]
pub struct ArchiveMirror {
    root: PathBuf,
}

impl ArchiveMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArchiveMirror { root: root.into() }
    }

    /// `{ARCHIVE_ROOT}/{medium_hash}/{path_bytes}`. `path_bytes` is never
    /// decoded or normalized (spec §3's Path invariant): on Unix a byte
    /// sequence maps directly onto `OsStr` with no charset assumption.
    pub fn dest_path(&self, medium_hash: MediumHash, path_bytes: &[u8]) -> PathBuf {
        let os_str = std::ffi::OsStr::from_bytes(path_bytes);
        self.root.join(medium_hash.to_string()).join(os_str)
    }

    /// Creates a hardlink at `{ARCHIVE_ROOT}/{medium_hash}/{path_bytes}`
    /// pointing at `blob_path`, creating byte-safe parent directories as
    /// needed. Idempotent: re-running the same link when it already exists
    /// (and points at the same blob) is a no-op success.
    pub fn link_path(
        &self,
        medium_hash: MediumHash,
        path_bytes: &[u8],
        blob_path: &Path,
    ) -> Result<LinkOutcome, StoreError> {
        let dest = self.dest_path(medium_hash, path_bytes);
        let parent = dest.parent().expect("dest_path always has a medium-root parent");
        fs_err::create_dir_all(parent).map_err(StoreError::from_io)?;

        match fs_err::hard_link(blob_path, &dest) {
            Ok(()) => Ok(LinkOutcome::Created),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                self.check_already_linked(&dest, blob_path)
            }
            Err(e) => Err(StoreError::from_io(e)),
        }
    }

    fn check_already_linked(&self, dest: &Path, blob_path: &Path) -> Result<LinkOutcome, StoreError> {
        let dest_meta = fs_err::metadata(dest).map_err(StoreError::from_io)?;
        let blob_meta = fs_err::metadata(blob_path).map_err(StoreError::from_io)?;
        if dest_meta.dev() == blob_meta.dev() && dest_meta.ino() == blob_meta.ino() {
            Ok(LinkOutcome::AlreadyLinked)
        } else {
            Err(StoreError::Consistency)
        }
    }

    /// Creates `{ARCHIVE_ROOT}/{medium_hash}/{path_bytes}` as a directory,
    /// including any byte-safe parents. Idempotent: `fs_err::create_dir_all`
    /// succeeds whether or not the directory already exists.
    pub fn create_directory(&self, medium_hash: MediumHash, path_bytes: &[u8]) -> Result<(), StoreError> {
        let dest = self.dest_path(medium_hash, path_bytes);
        fs_err::create_dir_all(&dest).map_err(StoreError::from_io)
    }

    /// Creates a symlink at `{ARCHIVE_ROOT}/{medium_hash}/{path_bytes}`
    /// pointing at the literal byte target read from the source medium.
    /// Idempotent: if the destination already exists as a symlink with the
    /// same raw target, this is a no-op success; a different target is a
    /// consistency error (spec §4.3's "should never occur under the claim
    /// discipline" — reclassified as `unknown` by the executor).
    pub fn create_symlink(&self, medium_hash: MediumHash, path_bytes: &[u8], target: &[u8]) -> Result<(), StoreError> {
        let dest = self.dest_path(medium_hash, path_bytes);
        let parent = dest.parent().expect("dest_path always has a medium-root parent");
        fs_err::create_dir_all(parent).map_err(StoreError::from_io)?;

        let target_os = std::ffi::OsStr::from_bytes(target);
        match std::os::unix::fs::symlink(target_os, &dest) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let existing = fs_err::read_link(&dest).map_err(StoreError::from_io)?;
                if existing.as_os_str().as_bytes() == target {
                    Ok(())
                } else {
                    Err(StoreError::Consistency)
                }
            }
            Err(e) => Err(StoreError::from_io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::ffi::OsStringExt;

    fn medium() -> MediumHash {
        "aa".repeat(16).parse().unwrap()
    }

    #[test]
    fn link_path_preserves_raw_bytes_with_no_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = ArchiveMirror::new(dir.path());
        // A path with an embedded control character and no valid UTF-8
        // trailing byte; must round-trip exactly.
        let weird_path = b"dir/sub\x01dir/file\xffname";
        let dest = mirror.dest_path(medium(), weird_path);
        assert_eq!(dest.as_os_str().as_bytes(), {
            let mut expected = dir.path().join(medium().to_string()).into_os_string().into_vec();
            expected.push(b'/');
            expected.extend_from_slice(weird_path);
            expected
        });
    }

    #[test]
    fn link_path_is_idempotent_when_already_linked_to_same_blob() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = ArchiveMirror::new(dir.path());
        let blob_path = dir.path().join("blob-content");
        std::fs::File::create(&blob_path).unwrap().write_all(b"hello\n").unwrap();

        let outcome1 = mirror.link_path(medium(), b"a/b/file.txt", &blob_path).unwrap();
        assert_eq!(outcome1, LinkOutcome::Created);

        let outcome2 = mirror.link_path(medium(), b"a/b/file.txt", &blob_path).unwrap();
        assert_eq!(outcome2, LinkOutcome::AlreadyLinked);
    }

    #[test]
    fn link_path_detects_consistency_error_on_mismatched_target() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = ArchiveMirror::new(dir.path());
        let blob_a = dir.path().join("blob-a");
        let blob_b = dir.path().join("blob-b");
        std::fs::write(&blob_a, b"a").unwrap();
        std::fs::write(&blob_b, b"b").unwrap();

        mirror.link_path(medium(), b"file.txt", &blob_a).unwrap();
        let err = mirror.link_path(medium(), b"file.txt", &blob_b).unwrap_err();
        assert!(matches!(err, StoreError::Consistency));
    }
}
