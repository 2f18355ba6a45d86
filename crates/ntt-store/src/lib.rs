//! The content-addressed blob store (`BYHASH_ROOT`) and per-medium
//! hardlink mirror (`ARCHIVE_ROOT`) that together form the copy engine's
//! filesystem side.

mod archive_mirror;
mod by_hash;
mod error;

pub use archive_mirror::{ArchiveMirror, LinkOutcome};
pub use by_hash::{ByHashStore, PublishOutcome};
pub use error::StoreError;
