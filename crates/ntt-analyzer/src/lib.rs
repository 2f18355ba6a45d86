//! The inode analyzer (C5): given one claimed inode and its non-excluded
//! paths, decides the action from spec §4.5's dispatch table and produces
//! the tagged-variant [`Plan`] the executor consumes. For regular files
//! this means copying the source bytes to a temp file colocated with
//! `BYHASH_ROOT`, hashing in the same pass, and consulting an injected
//! blob lookup to decide whether the content is new.

use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use ntt_hash::HashingReader;
use ntt_store::ByHashStore;
use ntt_types::{BlobId, ClaimedInode, ErrorType, FsType, Plan, RawPath};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("i/o error reading source: {0}")]
    Io(#[from] io::Error),
}

impl AnalyzeError {
    /// Classifies this error via the same five-class taxonomy `ntt-hash`
    /// applies to executor failures (spec §4.1), so a read failure during
    /// analysis (e.g. ENOENT after a remount, EIO/"beyond EOF" on a dying
    /// medium) feeds the same retry-ledger/checkpoint discipline as a
    /// filesystem-phase failure rather than being silently retried forever.
    pub fn error_type(&self) -> ErrorType {
        match self {
            AnalyzeError::Io(e) => ntt_hash::classify(e),
        }
    }
}

/// Injected lookup over the blob table so the analyzer's decision logic can
/// be exercised in unit tests without a database connection (spec §4.5).
pub trait BlobLookup {
    fn exists(&self, hash: BlobId) -> Result<bool, AnalyzeError>;
}

/// A `BlobLookup` backed by a fixed in-memory set, used by tests and by
/// callers that have already pulled the relevant blob ids into memory.
pub struct StaticBlobSet(std::collections::HashSet<BlobId>);

impl StaticBlobSet {
    pub fn new(known: impl IntoIterator<Item = BlobId>) -> Self {
        StaticBlobSet(known.into_iter().collect())
    }
}

impl BlobLookup for StaticBlobSet {
    fn exists(&self, hash: BlobId) -> Result<bool, AnalyzeError> {
        Ok(self.0.contains(&hash))
    }
}

fn resolve_source(source_root: &Path, path: &RawPath) -> PathBuf {
    source_root.join(OsStr::from_bytes(path.as_bytes()))
}

/// Decides the plan for one claimed inode (spec §4.5's dispatch table).
/// `source_root` is the mounted medium's read-only root; `byhash` is the
/// content store a new file's temp copy is colocated with (same
/// filesystem, required so the later publish can rename/hardlink across
/// siblings).
pub fn analyze(
    inode: &ClaimedInode,
    source_root: &Path,
    byhash: &ByHashStore,
    blob_lookup: &dyn BlobLookup,
) -> Result<Plan, AnalyzeError> {
    if inode.paths.is_empty() {
        return Ok(Plan::Skip {
            reason: "inode has no non-excluded paths".to_string(),
        });
    }

    match inode.fs_type {
        FsType::File if inode.size == 0 => Ok(Plan::HandleEmpty),
        FsType::File => analyze_file(inode, source_root, byhash, blob_lookup),
        FsType::Directory => Ok(Plan::CreateDirectory),
        FsType::Symlink => analyze_symlink(inode, source_root),
        FsType::BlockDevice | FsType::CharDevice | FsType::Pipe | FsType::Socket => Ok(Plan::RecordSpecial),
    }
}

/// Copies the source file's bytes to a temp file colocated with `byhash`,
/// hashing and MIME-sniffing in the same pass (spec §4.1's `HashingReader`),
/// then consults `blob_lookup` to decide which of the two file-plan shapes
/// to return. On `LinkExistingBlob`, the temp file is deleted before
/// returning (spec §4.5: "temp already deleted").
fn analyze_file(
    inode: &ClaimedInode,
    source_root: &Path,
    byhash: &ByHashStore,
    blob_lookup: &dyn BlobLookup,
) -> Result<Plan, AnalyzeError> {
    // The first (lexicographically smallest) path is representative: every
    // path of this inode shares the same underlying content, hardlinked on
    // the source filesystem, so any one of them reads the same bytes.
    let path = &inode.paths[0];
    let source_path = resolve_source(source_root, path);

    let src = fs_err::File::open(&source_path)?;
    let mut reader = HashingReader::new(src);
    let mut tmp = tempfile::NamedTempFile::new_in(byhash.root())?;
    io::copy(&mut reader, tmp.as_file_mut())?;
    let (hash, mime_type) = reader.finish();

    if blob_lookup.exists(hash)? {
        drop(tmp); // NamedTempFile's Drop unlinks the temp file.
        Ok(Plan::LinkExistingBlob { hash, mime_type })
    } else {
        let tmp_path = tmp.into_temp_path();
        let kept = tmp_path.keep().map_err(|e| AnalyzeError::Io(e.error))?;
        Ok(Plan::PublishNewBlob {
            tmp_path: kept,
            hash,
            mime_type,
        })
    }
}

/// Reads a symlink's target byte-for-byte (spec §4.5: "no charset
/// assumption"). On Unix, `OsStr`'s bytes are the raw bytes the kernel
/// returned, so no decoding step can corrupt an unusual target.
fn analyze_symlink(inode: &ClaimedInode, source_root: &Path) -> Result<Plan, AnalyzeError> {
    let path = &inode.paths[0];
    let source_path = resolve_source(source_root, path);
    let target = fs_err::read_link(&source_path)?;
    Ok(Plan::CreateSymlink {
        target: target.as_os_str().as_bytes().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntt_types::{InodeKey, MediumHash};
    use std::io::Write;

    fn medium() -> MediumHash {
        "de".repeat(16).parse().unwrap()
    }

    #[test]
    fn analyze_error_classifies_not_found_as_path_error() {
        let err = AnalyzeError::Io(io::Error::new(io::ErrorKind::NotFound, "enoent"));
        assert_eq!(err.error_type(), ErrorType::PathError);
    }

    #[test]
    fn analyze_error_classifies_io_error_text_as_permanent() {
        let err = AnalyzeError::Io(io::Error::other("Input/output error reading sector"));
        assert_eq!(err.error_type(), ErrorType::IoError);
    }

    #[test]
    fn missing_source_file_surfaces_as_analyze_error() {
        let source = tempfile::tempdir().unwrap();
        let byhash_dir = tempfile::tempdir().unwrap();
        let byhash = ByHashStore::new(byhash_dir.path());
        let inode = claimed(FsType::File, 10, vec![b"does/not/exist"]);
        let lookup = StaticBlobSet::new([]);

        let err = analyze(&inode, source.path(), &byhash, &lookup).unwrap_err();
        assert_eq!(err.error_type(), ErrorType::PathError);
    }

    fn claimed(fs_type: FsType, size: i64, paths: Vec<&[u8]>) -> ClaimedInode {
        ClaimedInode {
            key: InodeKey {
                medium_hash: medium(),
                device: 1,
                inode_number: 7,
            },
            size,
            nlink: paths.len() as i32,
            fs_type,
            errors_len: 0,
            paths: paths.into_iter().map(|p| RawPath(p.to_vec())).collect(),
        }
    }

    #[test]
    fn empty_file_always_gets_handle_empty_plan() {
        let dir = tempfile::tempdir().unwrap();
        let byhash = ByHashStore::new(dir.path());
        let inode = claimed(FsType::File, 0, vec![b"a/empty.txt"]);
        let lookup = StaticBlobSet::new([]);
        let plan = analyze(&inode, dir.path(), &byhash, &lookup).unwrap();
        assert!(matches!(plan, Plan::HandleEmpty));
    }

    #[test]
    fn directory_inode_is_create_directory_regardless_of_size() {
        let dir = tempfile::tempdir().unwrap();
        let byhash = ByHashStore::new(dir.path());
        let inode = claimed(FsType::Directory, 4096, vec![b"a/subdir"]);
        let lookup = StaticBlobSet::new([]);
        let plan = analyze(&inode, dir.path(), &byhash, &lookup).unwrap();
        assert!(matches!(plan, Plan::CreateDirectory));
    }

    #[test]
    fn special_file_types_are_recorded_without_touching_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let byhash = ByHashStore::new(dir.path());
        let lookup = StaticBlobSet::new([]);
        for fs_type in [FsType::BlockDevice, FsType::CharDevice, FsType::Pipe, FsType::Socket] {
            let inode = claimed(fs_type, 0, vec![b"dev/node"]);
            let plan = analyze(&inode, dir.path(), &byhash, &lookup).unwrap();
            assert!(matches!(plan, Plan::RecordSpecial));
        }
    }

    #[test]
    fn inode_with_no_paths_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let byhash = ByHashStore::new(dir.path());
        let inode = claimed(FsType::File, 10, vec![]);
        let lookup = StaticBlobSet::new([]);
        let plan = analyze(&inode, dir.path(), &byhash, &lookup).unwrap();
        assert!(matches!(plan, Plan::Skip { .. }));
    }

    #[test]
    fn new_file_content_produces_publish_new_blob_with_correct_hash() {
        let source = tempfile::tempdir().unwrap();
        let byhash_dir = tempfile::tempdir().unwrap();
        let byhash = ByHashStore::new(byhash_dir.path());

        std::fs::create_dir_all(source.path().join("a")).unwrap();
        let mut f = std::fs::File::create(source.path().join("a/hello.txt")).unwrap();
        f.write_all(b"hello\n").unwrap();
        drop(f);

        let inode = claimed(FsType::File, 6, vec![b"a/hello.txt"]);
        let lookup = StaticBlobSet::new([]);
        let plan = analyze(&inode, source.path(), &byhash, &lookup).unwrap();

        match plan {
            Plan::PublishNewBlob { tmp_path, hash, .. } => {
                assert_eq!(hash, BlobId::from_bytes(*blake3::hash(b"hello\n").as_bytes()));
                assert!(tmp_path.exists());
                assert_eq!(std::fs::read(&tmp_path).unwrap(), b"hello\n");
            }
            other => panic!("expected PublishNewBlob, got {other:?}"),
        }
    }

    #[test]
    fn known_hash_produces_link_existing_blob_and_deletes_temp() {
        let source = tempfile::tempdir().unwrap();
        let byhash_dir = tempfile::tempdir().unwrap();
        let byhash = ByHashStore::new(byhash_dir.path());

        std::fs::write(source.path().join("file.bin"), b"same bytes").unwrap();
        let hash = BlobId::from_bytes(*blake3::hash(b"same bytes").as_bytes());

        let inode = claimed(FsType::File, 10, vec![b"file.bin"]);
        let lookup = StaticBlobSet::new([hash]);
        let plan = analyze(&inode, source.path(), &byhash, &lookup).unwrap();

        assert!(matches!(plan, Plan::LinkExistingBlob { hash: h, .. } if h == hash));
        let leftover: Vec<_> = std::fs::read_dir(byhash_dir.path()).unwrap().collect();
        assert!(leftover.is_empty(), "temp file should have been deleted");
    }

    #[test]
    fn symlink_target_round_trips_byte_for_byte() {
        let source = tempfile::tempdir().unwrap();
        let target: &[u8] = b"../weird\xfftarget";
        std::os::unix::fs::symlink(OsStr::from_bytes(target), source.path().join("link")).unwrap();

        let byhash = ByHashStore::new(source.path());
        let inode = claimed(FsType::Symlink, 0, vec![b"link"]);
        let lookup = StaticBlobSet::new([]);
        let plan = analyze(&inode, source.path(), &byhash, &lookup).unwrap();

        match plan {
            Plan::CreateSymlink { target: t } => assert_eq!(t, target),
            other => panic!("expected CreateSymlink, got {other:?}"),
        }
    }
}
