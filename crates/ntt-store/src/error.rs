use ntt_types::ErrorType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob store io error: {0}")]
    Io(#[source] std::io::Error, ErrorType),

    #[error("hardlink destination exists and points at a different blob than expected (dev/ino mismatch)")]
    Consistency,
}

impl StoreError {
    pub fn from_io(err: std::io::Error) -> Self {
        let kind = ntt_hash::classify(&err);
        StoreError::Io(err, kind)
    }

    /// The error classification the executor should record against the
    /// inode. `Consistency` is reclassified as `unknown` per spec §4.3:
    /// "should never occur under the claim discipline".
    pub fn error_type(&self) -> ErrorType {
        match self {
            StoreError::Io(_, kind) => *kind,
            StoreError::Consistency => ErrorType::Unknown,
        }
    }
}
