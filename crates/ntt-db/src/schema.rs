//! Idempotent DDL. The loader (out of scope) owns partition creation and
//! per-partition FK wiring in steady state; these helpers exist so a worker
//! started against a bare database (integration tests, a fresh dev
//! environment) converges to the same schema rather than erroring out.

use ntt_types::MediumHash;
use tokio_postgres::error::SqlState;
use tokio_postgres::Client;

use crate::error::DbError;

const CORE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS medium (
    medium_hash     TEXT PRIMARY KEY,
    label           TEXT,
    image_path      TEXT,
    enum_done       TIMESTAMPTZ,
    copy_done       TIMESTAMPTZ,
    health          TEXT CHECK (health IN ('ok', 'incomplete', 'corrupt', 'failed')),
    problems        JSONB NOT NULL DEFAULT '{}'::jsonb,
    diagnostics     JSONB NOT NULL DEFAULT '{}'::jsonb
);

CREATE TABLE IF NOT EXISTS blob (
    blobid          TEXT PRIMARY KEY,
    n_hardlinks     BIGINT NOT NULL DEFAULT 0,
    external_copied BOOLEAN NOT NULL DEFAULT false,
    last_checked    TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS inode (
    medium_hash     TEXT NOT NULL REFERENCES medium (medium_hash),
    device          BIGINT NOT NULL,
    inode_number    BIGINT NOT NULL,
    size            BIGINT NOT NULL,
    nlink           INTEGER NOT NULL,
    mtime           TIMESTAMPTZ,
    fs_type         TEXT NOT NULL CHECK (fs_type IN ('f', 'd', 'l', 'b', 'c', 'p', 's')),
    blobid          TEXT REFERENCES blob (blobid),
    mime_type       TEXT,
    processed_at    TIMESTAMPTZ,
    claimed_by      TEXT,
    claimed_at      TIMESTAMPTZ,
    errors          JSONB NOT NULL DEFAULT '[]'::jsonb,
    status          TEXT NOT NULL DEFAULT 'pending'
                        CHECK (status IN ('pending', 'success', 'failed_retryable', 'failed_permanent')),
    error_type      TEXT CHECK (error_type IN ('path_error', 'io_error', 'hash_error', 'permission_error', 'unknown')),
    PRIMARY KEY (medium_hash, device, inode_number),
    CHECK (status != 'success' OR error_type IS NULL),
    CHECK (status != 'pending' OR (error_type IS NULL AND blobid IS NULL))
) PARTITION BY LIST (medium_hash);

CREATE TABLE IF NOT EXISTS path (
    medium_hash     TEXT NOT NULL,
    device          BIGINT NOT NULL,
    inode_number    BIGINT NOT NULL,
    path            BYTEA NOT NULL,
    exclude_reason  TEXT,
    mime_type       TEXT,
    PRIMARY KEY (medium_hash, path)
) PARTITION BY LIST (medium_hash);
"#;

/// Creates the four parent tables if they are absent. Safe to call from
/// every worker at startup; `CREATE TABLE IF NOT EXISTS` makes this a no-op
/// once the loader (or an earlier worker) has run it.
pub async fn ensure_core_tables(client: &Client) -> Result<(), DbError> {
    client.batch_execute(CORE_TABLES_SQL).await?;
    Ok(())
}

/// Creates the `inode_p_*` / `path_p_*` partitions for one medium, their
/// per-partition indexes, and the partition-to-partition FK from `path` to
/// `inode` (spec §9's "partition-to-partition FKs", not a naive parent-level
/// FK). `medium_hash` is 32 hex characters validated at parse time, so it
/// is safe to interpolate directly into identifiers and literals here;
/// nothing under this path is ever sourced from unvalidated operator input.
pub async fn ensure_medium_partitions(client: &Client, medium_hash: MediumHash) -> Result<(), DbError> {
    let suffix = medium_hash.partition_suffix();
    let hash = medium_hash.to_string();
    let inode_partition = format!("inode_p_{suffix}");
    let path_partition = format!("path_p_{suffix}");

    client
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {inode_partition} \
             PARTITION OF inode FOR VALUES IN ('{hash}');
             CREATE INDEX IF NOT EXISTS {inode_partition}_claim_idx \
             ON {inode_partition} (status, claimed_by, claimed_at);
             CREATE INDEX IF NOT EXISTS {inode_partition}_blobid_idx \
             ON {inode_partition} (blobid);"
        ))
        .await?;

    client
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {path_partition} \
             PARTITION OF path FOR VALUES IN ('{hash}');"
        ))
        .await?;

    let add_fk = format!(
        "ALTER TABLE {path_partition} ADD CONSTRAINT {path_partition}_inode_fk \
         FOREIGN KEY (medium_hash, device, inode_number) \
         REFERENCES {inode_partition} (medium_hash, device, inode_number)"
    );
    match client.batch_execute(&add_fk).await {
        Ok(()) => {}
        Err(e) if e.code() == Some(&SqlState::DUPLICATE_OBJECT) => {}
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_table_names_are_derived_from_hex_suffix_only() {
        let h: MediumHash = "ab".repeat(16).parse().unwrap();
        let suffix = h.partition_suffix();
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(suffix.len(), 32);
    }
}
