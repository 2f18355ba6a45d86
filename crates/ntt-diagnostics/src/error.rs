use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
