//! Domain types shared by every stage of the copy engine: the medium and
//! inode identity types, the lifecycle enums from the data model, and the
//! executable plan variants produced by the analyzer and consumed by the
//! executor.
//!
//! Kept dependency-free except for `serde` (for the diagnostic event JSON
//! blobs) and `thiserror` (for the few conversions that can fail), so that
//! every other crate in the workspace can depend on it without dragging in
//! a database client or a filesystem API.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod medium_hash;
pub use medium_hash::{MediumHash, MediumHashError};

/// `fs_type` tag recorded by the enumerator for each inode (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FsType {
    File,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Pipe,
    Socket,
}

impl FsType {
    /// Single-character tag as stored by the enumerator / loader.
    pub fn as_char(self) -> char {
        match self {
            FsType::File => 'f',
            FsType::Directory => 'd',
            FsType::Symlink => 'l',
            FsType::BlockDevice => 'b',
            FsType::CharDevice => 'c',
            FsType::Pipe => 'p',
            FsType::Socket => 's',
        }
    }
}

impl TryFrom<char> for FsType {
    type Error = UnknownFsType;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        Ok(match c {
            'f' => FsType::File,
            'd' => FsType::Directory,
            'l' => FsType::Symlink,
            'b' => FsType::BlockDevice,
            'c' => FsType::CharDevice,
            'p' => FsType::Pipe,
            's' => FsType::Socket,
            other => return Err(UnknownFsType(other)),
        })
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char(self.as_char())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized fs_type tag '{0}'")]
pub struct UnknownFsType(pub char);

/// Inode lifecycle status (spec §3's lifecycle pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Success,
    FailedRetryable,
    FailedPermanent,
}

impl Status {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Success => "success",
            Status::FailedRetryable => "failed_retryable",
            Status::FailedPermanent => "failed_permanent",
        }
    }

    /// True for the two states in which a claim must not be held (spec §8
    /// invariant: `claimed_by IS NULL` whenever `status IN (success,
    /// failed_permanent)`). `failed_retryable` also releases its claim
    /// (only the recovery tool or a future claim touches it again), so the
    /// only status that may legitimately be claimed is `pending`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Success | Status::FailedPermanent)
    }
}

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Status::Pending,
            "success" => Status::Success,
            "failed_retryable" => Status::FailedRetryable,
            "failed_permanent" => Status::FailedPermanent,
            other => return Err(UnknownStatus(other.to_string())),
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized status '{0}'")]
pub struct UnknownStatus(pub String);

/// Error classification (spec §4.1). `retryable()` distinguishes the three
/// "tooling problem, fix and replay" classes from the two "source media is
/// dead" classes (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    PathError,
    IoError,
    HashError,
    PermissionError,
    Unknown,
}

impl ErrorType {
    pub fn as_db_str(self) -> &'static str {
        match self {
            ErrorType::PathError => "path_error",
            ErrorType::IoError => "io_error",
            ErrorType::HashError => "hash_error",
            ErrorType::PermissionError => "permission_error",
            ErrorType::Unknown => "unknown",
        }
    }

    /// `true` for the three classes the recovery tool can usefully replay
    /// after an operator fixes the underlying tooling/environment issue.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorType::PathError | ErrorType::PermissionError | ErrorType::Unknown
        )
    }

    /// `true` for the two classes implying the source data cannot be
    /// trusted without operator action on the medium itself.
    pub fn permanent(self) -> bool {
        !self.retryable()
    }
}

impl FromStr for ErrorType {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "path_error" => ErrorType::PathError,
            "io_error" => ErrorType::IoError,
            "hash_error" => ErrorType::HashError,
            "permission_error" => ErrorType::PermissionError,
            "unknown" => ErrorType::Unknown,
            other => return Err(UnknownStatus(other.to_string())),
        })
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Medium health as set by the imager from rescued percentage (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Ok,
    Incomplete,
    Corrupt,
    Failed,
}

impl FromStr for Health {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ok" => Health::Ok,
            "incomplete" => Health::Incomplete,
            "corrupt" => Health::Corrupt,
            "failed" => Health::Failed,
            other => return Err(UnknownStatus(other.to_string())),
        })
    }
}

/// A 64-character lowercase hex content hash (BLAKE3-256). Newtype so it
/// can never be confused with a `medium_hash` or an arbitrary string at a
/// call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobId([u8; 32]);

impl BlobId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        BlobId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Two-level shard prefix components, `(hash[0:2], hash[2:4])`.
    pub fn shard(&self) -> (String, String) {
        let hex = self.to_string();
        (hex[0..2].to_string(), hex[2..4].to_string())
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for BlobId {
    type Err = BlobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(BlobIdError::WrongLength(s.len()));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| BlobIdError::NotHex)?;
        Ok(BlobId(bytes))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlobIdError {
    #[error("blob id must be 64 hex characters, got {0}")]
    WrongLength(usize),
    #[error("blob id is not valid hex")]
    NotHex,
}

/// Identifies one inode within one medium: `(device, inode_number)` is only
/// unique per `medium_hash`, so the full key always carries all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InodeKey {
    pub medium_hash: MediumHash,
    pub device: i64,
    pub inode_number: i64,
}

/// A path row's raw bytes. Never decoded or normalized; stored and hardlinked
/// byte-for-byte (spec §3, §8).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawPath(pub Vec<u8>);

impl RawPath {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A claimed inode row joined to its (non-excluded) paths, as returned by
/// the work-claim coordinator's batch claim query.
#[derive(Debug, Clone)]
pub struct ClaimedInode {
    pub key: InodeKey,
    pub size: i64,
    pub nlink: i32,
    pub fs_type: FsType,
    pub errors_len: usize,
    pub paths: Vec<RawPath>,
}

/// The tagged-variant executable plan produced by the analyzer (C5) and
/// consumed by the executor (C6). Each variant carries exactly the fields
/// its executor arm reads (spec §9: avoid a single "plan dict" shape).
#[derive(Debug, Clone)]
pub enum Plan {
    /// `fs_type='f'`, `size=0`: link to the pinned empty blob.
    HandleEmpty,
    /// `fs_type='f'`, `size>0`, no existing blob row: the temp file at
    /// `tmp_path` holds the copied bytes, already hashed to `hash`.
    PublishNewBlob {
        tmp_path: PathBuf,
        hash: BlobId,
        mime_type: Option<String>,
    },
    /// `fs_type='f'`, `size>0`, a blob row for `hash` already exists; the
    /// temp file (if any was created while probing) has already been
    /// deleted.
    LinkExistingBlob {
        hash: BlobId,
        mime_type: Option<String>,
    },
    /// `fs_type='d'`: create each path as a directory.
    CreateDirectory,
    /// `fs_type='l'`: create a symlink with this literal byte target.
    CreateSymlink { target: Vec<u8> },
    /// `fs_type` is a block/char device, fifo, or socket: recorded in the
    /// database only, no filesystem object is created.
    RecordSpecial,
    /// The inode cannot be processed; record why and move on.
    Skip { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_type_round_trips_through_char() {
        for c in ['f', 'd', 'l', 'b', 'c', 'p', 's'] {
            let t = FsType::try_from(c).unwrap();
            assert_eq!(t.as_char(), c);
        }
        assert!(FsType::try_from('x').is_err());
    }

    #[test]
    fn status_round_trips_through_db_str() {
        for s in [
            Status::Pending,
            Status::Success,
            Status::FailedRetryable,
            Status::FailedPermanent,
        ] {
            assert_eq!(Status::from_str(s.as_db_str()).unwrap(), s);
        }
    }

    #[test]
    fn error_type_retryable_split_matches_spec_taxonomy() {
        assert!(ErrorType::PathError.retryable());
        assert!(ErrorType::PermissionError.retryable());
        assert!(ErrorType::Unknown.retryable());
        assert!(ErrorType::IoError.permanent());
        assert!(ErrorType::HashError.permanent());
    }

    #[test]
    fn blob_id_round_trips_through_hex_string() {
        let bytes = [7u8; 32];
        let id = BlobId::from_bytes(bytes);
        let s = id.to_string();
        assert_eq!(s.len(), 64);
        assert_eq!(BlobId::from_str(&s).unwrap(), id);
    }

    #[test]
    fn blob_id_shard_is_first_two_byte_pairs() {
        let id = BlobId::from_str(&"ab".repeat(32)).unwrap();
        assert_eq!(id.shard(), ("ab".to_string(), "ab".to_string()));
    }

    #[test]
    fn blob_id_rejects_wrong_length() {
        assert!(matches!(BlobId::from_str("abcd"), Err(BlobIdError::WrongLength(4))));
    }
}
