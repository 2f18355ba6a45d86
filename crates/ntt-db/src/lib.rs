//! PostgreSQL access layer: connection setup, idempotent schema migrations,
//! the work-claim query, and the per-batch repository functions the
//! executor drives from inside its one commit.

mod claim;
mod error;
mod recovery;
mod repo;
mod schema;

pub use claim::{claim_batch, release_claim};
pub use error::DbError;
pub use recovery::{count_resettable, list_failures, reset_failures, FailureCount};
pub use repo::{
    apply_inode_update, list_known_blob_ids, mark_excluded, mark_medium_failed_permanent, medium_health,
    medium_image_path, update_path_mime, upsert_blob, InodeUpdate, MAX_ERRORS_LEN,
};
pub use schema::{ensure_core_tables, ensure_medium_partitions};

use tokio_postgres::{Client, NoTls};

/// Connects to Postgres and spawns the connection's I/O driver task on the
/// current runtime, matching the usage pattern `tokio_postgres::Client`
/// requires (the driver future must be polled somewhere or the client can
/// never make progress).
pub async fn connect(database_url: &str) -> Result<Client, DbError> {
    let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(error = %e, "postgres connection task terminated");
        }
    });
    Ok(client)
}
