use std::collections::HashMap;

use ntt_types::InodeKey;

/// Retry checkpoint at which [`diagnose_at_checkpoint`](crate::diagnose_at_checkpoint)
/// runs (spec §4.2 step 2).
pub const DEFAULT_CHECKPOINT: u32 = 10;

/// Retry count beyond which an inode is force-skipped even without a
/// terminal classification (spec §4.2 step 5).
pub const DEFAULT_MAX_RETRY: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep retrying; nothing notable happened yet.
    Continue,
    /// This failure hit the checkpoint threshold: run full diagnostics.
    Checkpoint,
    /// This failure exceeded `max_retry` with no permanent decision yet:
    /// force a skip regardless of classification.
    ForceSkip,
}

/// Per-worker, in-memory retry accounting. Scoped to the worker process and
/// cleared on exit (spec §9: no cross-process sharing of this state) — the
/// checkpoint/max-retry thresholds live on the struct rather than as bare
/// module constants so a worker can override them (env-configurable, see
/// `ntt-worker`'s `Config`) without reaching for global mutable statics.
///
/// Keyed on the full [`InodeKey`] (medium + device + inode number) rather
/// than the `(medium_hash, inode_number)` pair named in spec §4.2: a medium
/// can expose more than one partition/device, and two devices can assign
/// the same inode number, so the narrower key risks conflating unrelated
/// inodes' retry counts. The stronger key costs nothing extra since
/// `ClaimedInode` already carries it.
pub struct RetryLedger {
    counts: HashMap<InodeKey, u32>,
    checkpoint: u32,
    max_retry: u32,
}

impl Default for RetryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryLedger {
    pub fn new() -> Self {
        Self::with_thresholds(DEFAULT_CHECKPOINT, DEFAULT_MAX_RETRY)
    }

    pub fn with_thresholds(checkpoint: u32, max_retry: u32) -> Self {
        RetryLedger {
            counts: HashMap::new(),
            checkpoint,
            max_retry,
        }
    }

    /// Increments the retry count for `key` and returns the disposition
    /// implied by the new count (spec §4.2 steps 1, 3, 5).
    pub fn record_failure(&mut self, key: InodeKey) -> Disposition {
        let count = self.counts.entry(key).or_insert(0);
        *count += 1;
        if *count >= self.max_retry {
            Disposition::ForceSkip
        } else if *count == self.checkpoint {
            Disposition::Checkpoint
        } else {
            Disposition::Continue
        }
    }

    pub fn retry_count(&self, key: InodeKey) -> u32 {
        self.counts.get(&key).copied().unwrap_or(0)
    }

    /// Drops the retry count for an inode that terminated (success or a
    /// permanent skip): it will never be claimed again under this key.
    pub fn clear(&mut self, key: InodeKey) {
        self.counts.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntt_types::MediumHash;

    fn key(inode_number: i64) -> InodeKey {
        InodeKey {
            medium_hash: "11".repeat(16).parse::<MediumHash>().unwrap(),
            device: 1,
            inode_number,
        }
    }

    #[test]
    fn reaches_checkpoint_at_exactly_the_threshold() {
        let mut ledger = RetryLedger::with_thresholds(3, 10);
        let k = key(42);
        assert_eq!(ledger.record_failure(k), Disposition::Continue);
        assert_eq!(ledger.record_failure(k), Disposition::Continue);
        assert_eq!(ledger.record_failure(k), Disposition::Checkpoint);
        assert_eq!(ledger.record_failure(k), Disposition::Continue);
    }

    #[test]
    fn force_skips_at_max_retry_even_past_a_missed_checkpoint() {
        let mut ledger = RetryLedger::with_thresholds(3, 5);
        let k = key(7);
        for _ in 0..4 {
            ledger.record_failure(k);
        }
        assert_eq!(ledger.record_failure(k), Disposition::ForceSkip);
    }

    #[test]
    fn distinct_inodes_on_same_medium_have_independent_counts() {
        let mut ledger = RetryLedger::with_thresholds(2, 10);
        let a = key(1);
        let b = key(2);
        ledger.record_failure(a);
        assert_eq!(ledger.retry_count(a), 1);
        assert_eq!(ledger.retry_count(b), 0);
    }

    #[test]
    fn clear_resets_count_to_zero() {
        let mut ledger = RetryLedger::new();
        let k = key(9);
        ledger.record_failure(k);
        ledger.clear(k);
        assert_eq!(ledger.retry_count(k), 0);
    }
}
