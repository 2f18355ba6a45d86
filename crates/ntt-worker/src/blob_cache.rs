//! The worker's in-process view of which content hashes already have a
//! published blob. Seeded once per run from [`ntt_db::list_known_blob_ids`]
//! and grown in place as this worker's own batches publish new content, so
//! a second file with the same bytes later in the same run consults the
//! cache and links instead of racing another publish attempt it would
//! only lose (spec §4.5: the analyzer's blob lookup has no database
//! dependency of its own).

use std::collections::HashSet;

use ntt_analyzer::{AnalyzeError, BlobLookup};
use ntt_types::BlobId;

pub struct BlobCache(HashSet<BlobId>);

impl BlobCache {
    pub fn new(known: impl IntoIterator<Item = BlobId>) -> Self {
        BlobCache(known.into_iter().collect())
    }

    pub fn insert(&mut self, hash: BlobId) {
        self.0.insert(hash);
    }
}

impl BlobLookup for BlobCache {
    fn exists(&self, hash: BlobId) -> Result<bool, AnalyzeError> {
        Ok(self.0.contains(&hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshly_inserted_hash_is_visible_immediately() {
        let mut cache = BlobCache::new([]);
        let hash = BlobId::from_bytes([9u8; 32]);
        assert!(!cache.exists(hash).unwrap());
        cache.insert(hash);
        assert!(cache.exists(hash).unwrap());
    }

    #[test]
    fn seeded_hashes_are_present_from_construction() {
        let hash = BlobId::from_bytes([3u8; 32]);
        let cache = BlobCache::new([hash]);
        assert!(cache.exists(hash).unwrap());
    }
}
