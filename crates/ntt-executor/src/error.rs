use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("database error: {0}")]
    Db(#[from] ntt_db::DbError),
}
