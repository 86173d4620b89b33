//! EIP-2124 fork identifiers, with the timestamp-scheduled forks of EIP-6122.
//!
//! The checksum starts as the CRC32 of the genesis hash and absorbs every
//! passed fork's activation timestamp as a big-endian u64.

use alloy_primitives::{FixedBytes, B256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use crc32fast::Hasher;
use engine_common::config::ForkConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
pub struct ForkId {
    pub hash: FixedBytes<4>,
    /// Next scheduled fork, 0 when none is known
    pub next: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ForkIdError {
    #[error("remote fork id {0:?} is stale: it does not know about a fork we already passed")]
    RemoteStale(ForkId),
    #[error("remote fork id {0:?} is incompatible with our chain or we are stale")]
    LocalIncompatibleOrStale(ForkId),
}

/// The local chain's fork history, positioned at a head timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkFilter {
    forks: Vec<u64>,
    /// `sums[i]` is the checksum after absorbing the first `i` forks
    sums: Vec<FixedBytes<4>>,
    head_timestamp: u64,
}

impl ForkFilter {
    pub fn new(genesis_hash: B256, forks: &ForkConfig, head_timestamp: u64) -> Self {
        let forks = forks.post_genesis_fork_timestamps();
        let mut hasher = Hasher::new();
        hasher.update(genesis_hash.as_slice());

        let mut sums = Vec::with_capacity(forks.len() + 1);
        sums.push(FixedBytes(hasher.clone().finalize().to_be_bytes()));
        for fork in &forks {
            hasher.update(&fork.to_be_bytes());
            sums.push(FixedBytes(hasher.clone().finalize().to_be_bytes()));
        }

        Self {
            forks,
            sums,
            head_timestamp,
        }
    }

    pub fn set_head(&mut self, head_timestamp: u64) {
        self.head_timestamp = head_timestamp;
    }

    fn passed(&self) -> usize {
        self.forks
            .iter()
            .take_while(|fork| **fork <= self.head_timestamp)
            .count()
    }

    pub fn current(&self) -> ForkId {
        let passed = self.passed();
        ForkId {
            hash: self.sums[passed],
            next: self.forks.get(passed).copied().unwrap_or(0),
        }
    }

    /// Whether a peer announcing `remote` may stay connected to us
    pub fn validate(&self, remote: ForkId) -> Result<(), ForkIdError> {
        let passed = self.passed();

        if remote.hash == self.sums[passed] {
            // Same fork state: the remote must not announce a fork we have
            // already passed without activating it.
            if remote.next != 0 && self.head_timestamp >= remote.next {
                return Err(ForkIdError::LocalIncompatibleOrStale(remote));
            }
            return Ok(());
        }

        // Remote is behind us: its next fork has to be the one it is missing
        if let Some(i) = self.sums[..passed].iter().position(|sum| *sum == remote.hash) {
            if self.forks[i] != remote.next {
                return Err(ForkIdError::RemoteStale(remote));
            }
            return Ok(());
        }

        // Remote is ahead of us on our own schedule; we are still syncing
        if self.sums[passed + 1..].contains(&remote.hash) {
            return Ok(());
        }

        Err(ForkIdError::LocalIncompatibleOrStale(remote))
    }
}
