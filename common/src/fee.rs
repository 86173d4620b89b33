//! EIP-4844 blob fee market.
//!
//! Pure functions over [`BlobGasConfig`]; the CL Mock planner and the
//! payload validator both derive their expectations from these.

use alloy_primitives::U256;

use crate::config::BlobGasConfig;

/// Integer approximation of `factor * e ** (numerator / denominator)`
/// using the Taylor expansion prescribed by EIP-4844.
///
/// A zero denominator has no defined exponent; `factor` is returned as is.
pub fn fake_exponential(factor: u64, numerator: u64, denominator: u64) -> U256 {
    if denominator == 0 {
        return U256::from(factor);
    }

    let numerator = U256::from(numerator);
    let denominator = U256::from(denominator);

    let mut i = U256::from(1u64);
    let mut output = U256::ZERO;
    let mut accum = U256::from(factor).saturating_mul(denominator);
    while !accum.is_zero() {
        output = output.saturating_add(accum);
        accum = accum.saturating_mul(numerator) / denominator.saturating_mul(i);
        i += U256::from(1u64);
    }
    output / denominator
}

/// Price of one unit of blob gas for a block with the given excess
pub fn blob_gas_price(excess_blob_gas: u64, config: &BlobGasConfig) -> U256 {
    fake_exponential(
        config.min_blob_gas_price,
        excess_blob_gas,
        config.update_fraction,
    )
}

/// `max(0, parent_excess + parent_used - target)`
pub fn next_excess_blob_gas(
    parent_excess_blob_gas: u64,
    parent_blob_gas_used: u64,
    config: &BlobGasConfig,
) -> u64 {
    parent_excess_blob_gas
        .saturating_add(parent_blob_gas_used)
        .saturating_sub(config.target_blob_gas_per_block)
}

/// Smallest excess blob gas (a multiple of the per-blob gas) at which the
/// blob gas price reaches `price`.
pub fn min_excess_blob_gas_for_blob_gas_price(price: u64, config: &BlobGasConfig) -> u64 {
    let target = U256::from(price);
    let mut excess = 0u64;
    while blob_gas_price(excess, config) < target {
        excess = excess.saturating_add(config.gas_per_blob.max(1));
        if excess == u64::MAX {
            break;
        }
    }
    excess
}

/// Same as [`min_excess_blob_gas_for_blob_gas_price`], expressed in blobs
pub fn min_excess_blobs_for_blob_gas_price(price: u64, config: &BlobGasConfig) -> u64 {
    min_excess_blob_gas_for_blob_gas_price(price, config) / config.gas_per_blob.max(1)
}
