//! Stable key-to-shard routing.

use crate::error::{PipelineError, Result};
use crate::types::ShardId;
use sha2::{Digest, Sha256};

/// Routes keys to shards by a content hash of the key.
///
/// The hash depends only on the key bytes, so a key maps to the same shard
/// for the lifetime of the pipeline (and across processes with the same
/// shard count).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partitioner {
    shard_count: usize,
}

impl Partitioner {
    pub fn new(shard_count: usize) -> Result<Self> {
        if shard_count == 0 {
            return Err(PipelineError::InvalidConfig(
                "shard_count must be positive".into(),
            ));
        }
        Ok(Self { shard_count })
    }

    /// Shard owning `key`.
    pub fn shard_for(&self, key: &str) -> ShardId {
        ShardId((key_hash(key) % self.shard_count as u64) as usize)
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }
}

/// First eight bytes of the SHA-256 digest of `key`.
pub fn key_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(prefix)
}
