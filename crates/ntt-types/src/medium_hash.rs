use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifies one physical medium (a disk, tape, or card) across the whole
/// archive. Computed once by the enumerator from medium-level metadata and
/// then threaded through every inode and path row as the partition key
/// (spec §3): every table that scales with inode count is list-partitioned
/// on this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MediumHash([u8; 16]);

impl MediumHash {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        MediumHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// The partition suffix used when naming `<table>_p_<suffix>`. The
    /// identifier itself is already only 32 hex characters (spec §3:
    /// truncated to 128 bits), short enough to use whole.
    pub fn partition_suffix(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MediumHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for MediumHash {
    type Err = MediumHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(MediumHashError::WrongLength(s.len()));
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| MediumHashError::NotHex)?;
        Ok(MediumHash(bytes))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MediumHashError {
    #[error("medium hash must be 32 hex characters, got {0}")]
    WrongLength(usize),
    #[error("medium hash is not valid hex")]
    NotHex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex_string() {
        let h = MediumHash::from_bytes([0x42; 16]);
        let s = h.to_string();
        assert_eq!(s.len(), 32);
        assert_eq!(MediumHash::from_str(&s).unwrap(), h);
    }

    #[test]
    fn partition_suffix_is_the_whole_hex_identifier() {
        let h = MediumHash::from_bytes([0xab; 16]);
        assert_eq!(h.partition_suffix(), "ab".repeat(16));
    }

    #[test]
    fn rejects_short_input() {
        assert!(matches!(
            MediumHash::from_str("deadbeef"),
            Err(MediumHashError::WrongLength(8))
        ));
    }
}
