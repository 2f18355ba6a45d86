use ntt_types::MediumHash;
use tokio_postgres::Client;

use crate::error::DiagnosticsError;

/// Error-rate threshold above which a medium is flagged `high_error_rate`
/// (spec §4.2).
pub const HIGH_ERROR_RATE_THRESHOLD: f64 = 0.10;

/// Minimum processed count before the error-rate flag is even considered,
/// so a handful of early failures on a slow-starting medium doesn't trip
/// it (spec §4.2).
pub const HIGH_ERROR_RATE_MIN_PROCESSED: i64 = 100;

/// Per-batch counters the worker loop accumulates and passes to
/// [`record_medium_summary`] once the batch's filesystem+DB work is done.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchStats {
    pub beyond_eof_detected: bool,
    pub error_count: i64,
    pub processed_count: i64,
}

/// Records the two medium-level summary flags (spec §4.2/§4.8), each in
/// its own transaction, each idempotent via a `SELECT ... FOR UPDATE`
/// read-check-then-write: the flag is only written if not already present,
/// so concurrent workers converge on "set exactly once" even though
/// several of them may observe the qualifying condition in the same
/// window.
pub async fn record_medium_summary(
    client: &mut Client,
    medium_hash: MediumHash,
    stats: BatchStats,
) -> Result<(), DiagnosticsError> {
    if stats.beyond_eof_detected {
        record_beyond_eof(client, medium_hash).await?;
    }

    if stats.processed_count >= HIGH_ERROR_RATE_MIN_PROCESSED {
        let rate = stats.error_count as f64 / stats.processed_count as f64;
        if rate > HIGH_ERROR_RATE_THRESHOLD {
            record_high_error_rate(client, medium_hash, rate, stats.processed_count).await?;
        }
    }

    Ok(())
}

async fn record_beyond_eof(client: &mut Client, medium_hash: MediumHash) -> Result<(), DiagnosticsError> {
    let tx = client.transaction().await?;
    let row = tx
        .query_one(
            "SELECT problems -> 'beyond_eof_detected' AS flag FROM medium WHERE medium_hash = $1 FOR UPDATE",
            &[&medium_hash.to_string()],
        )
        .await?;
    let flag: Option<serde_json::Value> = row.try_get("flag")?;
    let already_set = flag.and_then(|v| v.as_bool()).unwrap_or(false);

    if !already_set {
        tx.execute(
            "UPDATE medium SET problems = jsonb_set( \
                 coalesce(problems, '{}'::jsonb), '{beyond_eof_detected}', 'true'::jsonb, true) \
             WHERE medium_hash = $1",
            &[&medium_hash.to_string()],
        )
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn record_high_error_rate(
    client: &mut Client,
    medium_hash: MediumHash,
    rate: f64,
    processed_count: i64,
) -> Result<(), DiagnosticsError> {
    let tx = client.transaction().await?;
    let row = tx
        .query_one(
            "SELECT problems -> 'high_error_rate' AS flag FROM medium WHERE medium_hash = $1 FOR UPDATE",
            &[&medium_hash.to_string()],
        )
        .await?;
    let already_set = row.try_get::<_, Option<serde_json::Value>>("flag")?.is_some();

    if !already_set {
        let payload = serde_json::json!({
            "rate_percent": rate * 100.0,
            "detected_at_count": processed_count,
        });
        tx.execute(
            "UPDATE medium SET problems = jsonb_set( \
                 coalesce(problems, '{}'::jsonb), '{high_error_rate}', $2::jsonb, true) \
             WHERE medium_hash = $1",
            &[&medium_hash.to_string(), &payload],
        )
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_error_rate_threshold_matches_spec_ten_percent() {
        assert_eq!(HIGH_ERROR_RATE_THRESHOLD, 0.10);
        assert_eq!(HIGH_ERROR_RATE_MIN_PROCESSED, 100);
    }

    #[test]
    fn batch_stats_default_is_the_clean_batch_case() {
        let stats = BatchStats::default();
        assert!(!stats.beyond_eof_detected);
        assert_eq!(stats.error_count, 0);
    }
}
