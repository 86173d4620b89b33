use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

// ===== EIP-4844 BLOB GAS =====

// Each blob consumes a fixed amount of blob gas (2^17)
pub const GAS_PER_BLOB: u64 = 0x20000;
pub const TARGET_BLOB_GAS_PER_BLOCK: u64 = 393216;
pub const MAX_BLOB_GAS_PER_BLOCK: u64 = 786432;
pub const TARGET_BLOBS_PER_BLOCK: u64 = TARGET_BLOB_GAS_PER_BLOCK / GAS_PER_BLOB;
pub const MAX_BLOBS_PER_BLOCK: u64 = MAX_BLOB_GAS_PER_BLOCK / GAS_PER_BLOB;
pub const BLOB_GASPRICE_UPDATE_FRACTION: u64 = 3338477;
pub const MIN_BLOB_GASPRICE: u64 = 1;

// Version byte prefixed to sha256(commitment)
pub const BLOB_COMMITMENT_VERSION_KZG: u8 = 0x01;
// 4096 field elements of 32 bytes
pub const BYTES_PER_BLOB: usize = 4096 * 32;

// ===== TRANSACTION DEFAULTS =====

// Blob transactions are sent to a rotating range of probe contracts
// that store the BLOBHASH results; recipients cycle through this range
pub const DATAHASH_START_ADDRESS: u64 = 0x100;
pub const DATAHASH_ADDRESS_COUNT: u64 = 1000;

pub const GWEI: u128 = 1_000_000_000;
pub const DEFAULT_BLOB_TX_GAS_LIMIT: u64 = 100_000;
pub const DEFAULT_CHAIN_ID: u64 = 7;

// ===== ENGINE API ERROR CODES =====

pub const INVALID_PARAMS_ERROR: i64 = -32602;
pub const UNSUPPORTED_FORK_ERROR: i64 = -38005;

/// Protocol upgrades the simulator knows how to drive
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, Serialize, Deserialize,
)]
pub enum Fork {
    Paris,
    Shanghai,
    Cancun,
}

/// Timestamp-based fork schedule of the chain under test.
///
/// Every scenario owns its own copy; nothing here is process-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkConfig {
    pub genesis_timestamp: u64,
    /// Seconds between consecutive payloads built by the CL Mock
    pub block_time: u64,
    pub shanghai_timestamp: Option<u64>,
    pub cancun_timestamp: Option<u64>,
}

impl Default for ForkConfig {
    fn default() -> Self {
        Self {
            genesis_timestamp: 0,
            block_time: 1,
            shanghai_timestamp: Some(0),
            cancun_timestamp: Some(0),
        }
    }
}

impl ForkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_genesis_timestamp(mut self, timestamp: u64) -> Self {
        self.genesis_timestamp = timestamp;
        self
    }

    pub fn with_block_time(mut self, seconds: u64) -> Self {
        self.block_time = seconds;
        self
    }

    pub fn with_shanghai_timestamp(mut self, timestamp: Option<u64>) -> Self {
        self.shanghai_timestamp = timestamp;
        self
    }

    pub fn with_cancun_timestamp(mut self, timestamp: Option<u64>) -> Self {
        self.cancun_timestamp = timestamp;
        self
    }

    /// Activates Cancun at the timestamp of block `height`, relative to the
    /// genesis timestamp and block time configured so far.
    pub fn with_cancun_fork_height(mut self, height: u64) -> Self {
        self.cancun_timestamp = Some(self.timestamp_at_height(height));
        self
    }

    /// Seconds between blocks; timestamps have to increase, so never 0
    pub fn effective_block_time(&self) -> u64 {
        self.block_time.max(1)
    }

    pub fn timestamp_at_height(&self, height: u64) -> u64 {
        self.genesis_timestamp
            .saturating_add(height.saturating_mul(self.effective_block_time()))
    }

    pub fn next_timestamp(&self, parent_timestamp: u64) -> u64 {
        parent_timestamp.saturating_add(self.effective_block_time())
    }

    pub fn fork_at(&self, timestamp: u64) -> Fork {
        if self.is_cancun(timestamp) {
            Fork::Cancun
        } else if self.is_shanghai(timestamp) {
            Fork::Shanghai
        } else {
            Fork::Paris
        }
    }

    pub fn is_shanghai(&self, timestamp: u64) -> bool {
        matches!(self.shanghai_timestamp, Some(ts) if timestamp >= ts)
    }

    pub fn is_cancun(&self, timestamp: u64) -> bool {
        matches!(self.cancun_timestamp, Some(ts) if timestamp >= ts)
    }

    /// Scheduled fork timestamps strictly after genesis, ascending and
    /// deduplicated. Forks active at genesis do not contribute to a fork id.
    pub fn post_genesis_fork_timestamps(&self) -> Vec<u64> {
        let mut timestamps: Vec<u64> = [self.shanghai_timestamp, self.cancun_timestamp]
            .into_iter()
            .flatten()
            .filter(|ts| *ts > self.genesis_timestamp)
            .collect();
        timestamps.sort_unstable();
        timestamps.dedup();
        timestamps
    }
}

/// EIP-4844 fee-market parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobGasConfig {
    pub gas_per_blob: u64,
    pub target_blob_gas_per_block: u64,
    pub max_blob_gas_per_block: u64,
    pub update_fraction: u64,
    pub min_blob_gas_price: u64,
}

impl Default for BlobGasConfig {
    fn default() -> Self {
        Self {
            gas_per_blob: GAS_PER_BLOB,
            target_blob_gas_per_block: TARGET_BLOB_GAS_PER_BLOCK,
            max_blob_gas_per_block: MAX_BLOB_GAS_PER_BLOCK,
            update_fraction: BLOB_GASPRICE_UPDATE_FRACTION,
            min_blob_gas_price: MIN_BLOB_GASPRICE,
        }
    }
}

impl BlobGasConfig {
    pub fn target_blobs_per_block(&self) -> u64 {
        self.target_blob_gas_per_block / self.gas_per_blob.max(1)
    }

    pub fn max_blobs_per_block(&self) -> u64 {
        self.max_blob_gas_per_block / self.gas_per_blob.max(1)
    }

    pub fn blob_gas(&self, blobs: u64) -> u64 {
        blobs.saturating_mul(self.gas_per_blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancun_constants() {
        assert_eq!(GAS_PER_BLOB, 131072);
        assert_eq!(TARGET_BLOBS_PER_BLOCK, 3);
        assert_eq!(MAX_BLOBS_PER_BLOCK, 6);

        let config = BlobGasConfig::default();
        assert_eq!(config.target_blobs_per_block(), 3);
        assert_eq!(config.max_blobs_per_block(), 6);
        assert_eq!(config.blob_gas(5), 5 * GAS_PER_BLOB);
    }

    #[test]
    fn test_fork_at_height() {
        let forks = ForkConfig::new()
            .with_genesis_timestamp(100)
            .with_block_time(12)
            .with_cancun_fork_height(2);

        assert_eq!(forks.cancun_timestamp, Some(124));
        assert_eq!(forks.fork_at(100), Fork::Shanghai);
        assert_eq!(forks.fork_at(112), Fork::Shanghai);
        assert_eq!(forks.fork_at(124), Fork::Cancun);
        assert_eq!(forks.next_timestamp(112), 124);
    }

    #[test]
    fn test_zero_block_time_is_clamped() {
        let forks = ForkConfig::new()
            .with_genesis_timestamp(100)
            .with_block_time(0)
            .with_cancun_fork_height(3);

        let mut timestamp = forks.genesis_timestamp;
        for _ in 0..3 {
            timestamp = forks.next_timestamp(timestamp);
        }
        assert_eq!(timestamp, forks.timestamp_at_height(3));
        assert_eq!(forks.cancun_timestamp, Some(103));
    }

    #[test]
    fn test_fork_before_shanghai() {
        let forks = ForkConfig::new()
            .with_shanghai_timestamp(Some(10))
            .with_cancun_timestamp(None);
        assert_eq!(forks.fork_at(0), Fork::Paris);
        assert_eq!(forks.fork_at(10), Fork::Shanghai);
        assert_eq!(forks.fork_at(u64::MAX), Fork::Shanghai);
    }

    #[test]
    fn test_post_genesis_fork_timestamps() {
        let forks = ForkConfig::new()
            .with_genesis_timestamp(1)
            .with_shanghai_timestamp(Some(1))
            .with_cancun_timestamp(Some(2));
        assert_eq!(forks.post_genesis_fork_timestamps(), vec![2]);

        let forks = ForkConfig::new()
            .with_shanghai_timestamp(Some(0))
            .with_cancun_timestamp(Some(0));
        assert!(forks.post_genesis_fork_timestamps().is_empty());
    }
}
