//! The simulator's own model of the client's blob pool.
//!
//! The pool mirrors what has been submitted and not yet included, and the
//! [`InclusionPlanner`] predicts which of those transactions a conforming
//! builder puts into the next block. Nothing here talks to a client.

use std::collections::{BTreeMap, HashSet};

use alloy_primitives::{Address, B256, U256};
use engine_common::blob::BlobId;
use engine_common::config::BlobGasConfig;
use log::debug;

/// A submitted transaction the simulator expects to see included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub account: usize,
    pub sender: Address,
    pub nonce: u64,
    pub hash: B256,
    pub blob_ids: Vec<BlobId>,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    /// Highest blob gas price this transaction pays, per unit of blob gas
    pub max_blob_gas_cost: u128,
    pub replaces_nonce: bool,
    /// Assigned by the pool; earlier submissions win priority-fee ties
    pub sequence: u64,
}

impl PendingTransaction {
    pub fn blob_gas(&self, config: &BlobGasConfig) -> u64 {
        config.blob_gas(self.blob_ids.len() as u64)
    }

    /// Whether the declared cost covers the given blob gas price
    pub fn affords(&self, blob_gas_price: U256) -> bool {
        U256::from(self.max_blob_gas_cost) >= blob_gas_price
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Added,
    /// The transaction previously held at that nonce
    Replaced(PendingTransaction),
    /// A transaction with an equal or higher tip already holds the nonce
    Ignored,
}

/// One transaction observed in a validated payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inclusion {
    pub account: usize,
    pub nonce: u64,
    pub block_number: u64,
    pub hash: B256,
}

#[derive(Debug, Default)]
pub struct PendingPool {
    by_account: BTreeMap<usize, BTreeMap<u64, PendingTransaction>>,
    next_sequence: u64,
    inclusions: Vec<Inclusion>,
    /// Hashes pushed out by a same-nonce replacement
    superseded: HashSet<B256>,
}

impl PendingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a submitted transaction. A same-nonce transaction supersedes
    /// the held one only with a strictly higher priority fee.
    pub fn insert(&mut self, mut tx: PendingTransaction) -> InsertOutcome {
        tx.sequence = self.next_sequence;
        self.next_sequence += 1;

        let slots = self.by_account.entry(tx.account).or_default();
        let held = slots
            .get(&tx.nonce)
            .map(|held| (held.hash, held.max_priority_fee_per_gas));
        if let Some((hash, tip)) = held {
            if tip >= tx.max_priority_fee_per_gas {
                debug!(
                    "Pool keeps {} at account {} nonce {}: tip not higher",
                    hash, tx.account, tx.nonce
                );
                return InsertOutcome::Ignored;
            }
        }

        match slots.insert(tx.nonce, tx) {
            Some(old) => {
                self.superseded.insert(old.hash);
                InsertOutcome::Replaced(old)
            }
            None => InsertOutcome::Added,
        }
    }

    pub fn get(&self, hash: &B256) -> Option<&PendingTransaction> {
        self.iter().find(|tx| tx.hash == *hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingTransaction> {
        self.by_account.values().flat_map(|slots| slots.values())
    }

    pub fn len(&self) -> usize {
        self.by_account.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_blob_count(&self) -> usize {
        self.iter().map(|tx| tx.blob_ids.len()).sum()
    }

    /// Removes every pending transaction whose hash appears in the block and
    /// records the inclusion. Hashes unknown to the pool are ignored.
    pub fn resolve(&mut self, block_number: u64, included: &[B256]) -> Vec<PendingTransaction> {
        let wanted: HashSet<&B256> = included.iter().collect();
        let mut resolved = Vec::new();
        for slots in self.by_account.values_mut() {
            slots.retain(|_, tx| {
                if wanted.contains(&tx.hash) {
                    resolved.push(tx.clone());
                    false
                } else {
                    true
                }
            });
        }
        self.by_account.retain(|_, slots| !slots.is_empty());

        // keep the block's own order
        resolved.sort_by_key(|tx| included.iter().position(|hash| *hash == tx.hash));
        for tx in &resolved {
            self.inclusions.push(Inclusion {
                account: tx.account,
                nonce: tx.nonce,
                block_number,
                hash: tx.hash,
            });
        }
        resolved
    }

    pub fn inclusions(&self) -> &[Inclusion] {
        &self.inclusions
    }

    pub fn superseded(&self) -> &HashSet<B256> {
        &self.superseded
    }

    pub fn plan_next_block(&self, blob_gas_price: U256, config: &BlobGasConfig) -> PlannedBlock {
        InclusionPlanner::new(config).next_block(self, blob_gas_price)
    }
}

/// Prediction for a single block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlannedBlock {
    pub transactions: Vec<B256>,
    pub blobs: Vec<BlobId>,
    pub blob_gas_used: u64,
}

/// Predicts the blob transactions of the next block.
///
/// Only the lowest-nonce transaction of each account is a candidate. The
/// candidate with the highest priority fee goes first, the earliest
/// submission winning ties. When an account's head does not fit in the
/// remaining blob gas, or does not pay the block's blob gas price, the whole
/// account is skipped for this block: its later nonces cannot be included
/// ahead of it.
pub struct InclusionPlanner<'a> {
    config: &'a BlobGasConfig,
}

impl<'a> InclusionPlanner<'a> {
    pub fn new(config: &'a BlobGasConfig) -> Self {
        Self { config }
    }

    pub fn next_block(&self, pool: &PendingPool, blob_gas_price: U256) -> PlannedBlock {
        let mut queues: Vec<Vec<&PendingTransaction>> = pool
            .by_account
            .values()
            .map(|slots| contiguous_from_lowest(slots).into_iter().rev().collect())
            .collect();

        let mut block = PlannedBlock::default();
        let mut remaining = self.config.max_blob_gas_per_block;
        loop {
            let best = queues
                .iter()
                .enumerate()
                .filter_map(|(i, queue)| queue.last().map(|tx| (i, *tx)))
                .max_by(|(_, a), (_, b)| {
                    a.max_priority_fee_per_gas
                        .cmp(&b.max_priority_fee_per_gas)
                        .then_with(|| b.sequence.cmp(&a.sequence))
                });
            let Some((queue, tx)) = best else {
                break;
            };

            let blob_gas = tx.blob_gas(self.config);
            if blob_gas > remaining || !tx.affords(blob_gas_price) {
                queues[queue].clear();
                continue;
            }

            remaining -= blob_gas;
            block.blob_gas_used += blob_gas;
            block.transactions.push(tx.hash);
            block.blobs.extend_from_slice(&tx.blob_ids);
            queues[queue].pop();
        }
        block
    }
}

/// The account's transactions from its lowest pending nonce up to the first
/// gap; anything after a gap cannot be included yet.
fn contiguous_from_lowest(slots: &BTreeMap<u64, PendingTransaction>) -> Vec<&PendingTransaction> {
    let mut run = Vec::new();
    let mut expected = None;
    for (nonce, tx) in slots {
        if let Some(expected) = expected {
            if *nonce != expected {
                break;
            }
        }
        expected = Some(nonce + 1);
        run.push(tx);
    }
    run
}
