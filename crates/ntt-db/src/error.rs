use thiserror::Error;

/// Errors surfaced by every query/migration helper in this crate. Mirrors
/// the teacher's one-enum-per-concern split: callers match on variants they
/// can act on (`RowDecode` usually means a schema/code drift bug, not a
/// transient condition) rather than pattern-matching Postgres error codes
/// themselves.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("row decode error: {0}")]
    FsType(#[from] ntt_types::UnknownFsType),

    #[error("row decode error: {0}")]
    Status(#[from] ntt_types::UnknownStatus),

    #[error("row decode error: {0}")]
    BlobId(#[from] ntt_types::BlobIdError),

    #[error("row decode error: {0}")]
    MediumHash(#[from] ntt_types::MediumHashError),

    #[error("row missing expected column '{0}'")]
    MissingColumn(&'static str),
}
