//! Core invariant checkers
//!
//! Run after every validated payload:
//! - Nonce ordering: per account, nonces are included in ascending order,
//!   never out of block order, never twice
//! - Replacement: a transaction superseded at its nonce never shows up in a
//!   payload

use std::collections::{BTreeMap, HashSet};

use alloy_primitives::B256;
use anyhow::{bail, Result};

use crate::txgen::Inclusion;

/// Checks the inclusion record of a scenario (in the order payloads were
/// validated) for per-account nonce ordering
pub fn check_nonce_ordering(inclusions: &[Inclusion]) -> Result<()> {
    let mut last: BTreeMap<usize, &Inclusion> = BTreeMap::new();
    for inclusion in inclusions {
        if let Some(previous) = last.get(&inclusion.account) {
            if inclusion.nonce <= previous.nonce {
                bail!(
                    "account {} nonce {} included in block {} after nonce {} in block {}",
                    inclusion.account,
                    inclusion.nonce,
                    inclusion.block_number,
                    previous.nonce,
                    previous.block_number
                );
            }
            if inclusion.block_number < previous.block_number {
                bail!(
                    "account {} nonce {} included in block {}, before nonce {} in block {}",
                    inclusion.account,
                    inclusion.nonce,
                    inclusion.block_number,
                    previous.nonce,
                    previous.block_number
                );
            }
        }
        last.insert(inclusion.account, inclusion);
    }
    Ok(())
}

/// A payload must not carry a transaction that was replaced at its nonce
pub fn check_replacements(included: &[B256], superseded: &HashSet<B256>) -> Result<()> {
    if let Some(hash) = included.iter().find(|hash| superseded.contains(*hash)) {
        bail!("superseded transaction {} was included", hash);
    }
    Ok(())
}
