//! Operator tool for inspecting and replaying failed inodes (spec §4.7).
//! Talks to the same database as `ntt-worker` but never claims work itself
//! — every query here is read-only or touches exclusively `failed_retryable`
//! rows, which a running worker never claims (spec §4.4's claim predicate),
//! so this tool has no lock contention with a live copy run.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ntt_types::{ErrorType, MediumHash};
use tabled::{Table, Tabled};
use tokio_postgres::Client;

/// Inspects and replays failed inodes for one medium.
#[derive(Parser, Debug)]
#[command(name = "ntt-recovery", about = "Inspect and replay failed inodes for one medium")]
struct Cli {
    #[command(subcommand)]
    command: SubCommand,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    /// Prints the (status, error_type) failure histogram for a medium.
    ListFailures {
        /// The medium to inspect, 32 lowercase hex characters.
        #[arg(long)]
        medium: MediumHash,
    },

    /// Resets every `failed_retryable` inode of one error class back to
    /// `pending` so the next worker run replays it. Defaults to a dry run:
    /// pass `--execute` to actually mutate rows (spec §4.7's "operator
    /// fixes paths, runs reset-failures" recovery flow, made safe by
    /// default since a mistaken reset on the wrong error class is cheap to
    /// avoid but expensive to notice after the fact).
    ResetFailures {
        /// The medium to reset failures on, 32 lowercase hex characters.
        #[arg(long)]
        medium: MediumHash,

        /// Which error class to reset (e.g. `path_error`, `permission_error`,
        /// `unknown`). `io_error` and `hash_error` rows are never
        /// `failed_retryable` (spec §3's lifecycle always routes them to
        /// `failed_permanent`), so resetting those classes is a no-op.
        #[arg(long = "error-type")]
        error_type: ErrorType,

        /// Report what would be reset without changing anything (the default).
        #[arg(long, conflicts_with = "execute")]
        dry_run: bool,

        /// Actually perform the reset.
        #[arg(long, conflicts_with = "dry_run")]
        execute: bool,
    },
}

#[derive(Tabled)]
struct FailureRow {
    status: String,
    #[tabled(display_with = "display_error_type")]
    error_type: String,
    count: i64,
}

fn display_error_type(error_type: &str) -> String {
    if error_type.is_empty() {
        "-".to_string()
    } else {
        error_type.to_string()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_filter = std::env::var("NTT_LOG").unwrap_or_else(|_| "ntt=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_filter))
        .init();

    let database_url = std::env::var("NTT_DB_URL").context("NTT_DB_URL must be set")?;
    let client = ntt_db::connect(&database_url).await?;

    match cli.command {
        SubCommand::ListFailures { medium } => list_failures(&client, medium).await,
        SubCommand::ResetFailures {
            medium,
            error_type,
            execute,
            ..
        } => reset_failures(&client, medium, error_type, execute).await,
    }
}

async fn list_failures(client: &Client, medium: MediumHash) -> anyhow::Result<()> {
    let counts = ntt_db::list_failures(client, medium).await?;
    if counts.is_empty() {
        println!("no failed inodes recorded for medium {medium}");
        return Ok(());
    }

    let rows: Vec<FailureRow> = counts
        .into_iter()
        .map(|c| FailureRow {
            status: c.status.as_db_str().to_string(),
            error_type: c.error_type.map(|e| e.as_db_str().to_string()).unwrap_or_default(),
            count: c.count,
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}

async fn reset_failures(
    client: &Client,
    medium: MediumHash,
    error_type: ErrorType,
    execute: bool,
) -> anyhow::Result<()> {
    if !execute {
        let n = ntt_db::count_resettable(client, medium, error_type).await?;
        println!(
            "{n} inode(s) on medium {medium} with error_type={} would be reset to pending (dry run; pass --execute to apply)",
            error_type.as_db_str()
        );
        return Ok(());
    }

    let n = ntt_db::reset_failures(client, medium, error_type).await?;
    println!(
        "reset {n} inode(s) on medium {medium} with error_type={} to pending",
        error_type.as_db_str()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_error_type_renders_absent_class_as_dash() {
        assert_eq!(display_error_type(""), "-");
        assert_eq!(display_error_type("path_error"), "path_error");
    }
}
