//! Engine API payload types.
//!
//! Blob-gas fields and the beacon root are `Option`s all the way through:
//! "absent" and "present with zero" are different payloads for the fork
//! presence checks, and the JSON encoding keeps that distinction (absent
//! fields are omitted, not sent as `null`).

use alloy_primitives::{b256, keccak256, Address, Bloom, Bytes, B256, B64, U256};
use alloy_rlp::{BufMut, Encodable, RlpDecodable, RlpEncodable};
use alloy_trie::root::{ordered_trie_root, ordered_trie_root_with_encoder};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
    config::{Fork, ForkConfig},
    transaction::{blob_versioned_hashes, TransactionError},
};

/// keccak256(rlp([])), the ommers hash of every post-merge header
pub const EMPTY_OMMER_ROOT_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

pub type PayloadId = B64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    #[serde(with = "crate::quantity")]
    pub index: u64,
    #[serde(with = "crate::quantity")]
    pub validator_index: u64,
    pub address: Address,
    #[serde(with = "crate::quantity")]
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayload {
    pub parent_hash: B256,
    pub fee_recipient: Address,
    pub state_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bloom,
    pub prev_randao: B256,
    #[serde(with = "crate::quantity")]
    pub block_number: u64,
    #[serde(with = "crate::quantity")]
    pub gas_limit: u64,
    #[serde(with = "crate::quantity")]
    pub gas_used: u64,
    #[serde(with = "crate::quantity")]
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub base_fee_per_gas: U256,
    pub block_hash: B256,
    pub transactions: Vec<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawals: Option<Vec<Withdrawal>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::quantity::opt"
    )]
    pub blob_gas_used: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::quantity::opt"
    )]
    pub excess_blob_gas: Option<u64>,
}

impl ExecutionPayload {
    /// Versioned hashes of all blob transactions, in inclusion order
    pub fn blob_versioned_hashes(&self) -> Result<Vec<B256>, TransactionError> {
        let mut hashes = Vec::new();
        for raw in &self.transactions {
            hashes.extend(blob_versioned_hashes(raw)?);
        }
        Ok(hashes)
    }

    pub fn transaction_hashes(&self) -> Vec<B256> {
        self.transactions.iter().map(keccak256).collect()
    }

    /// Keccak of the RLP header this payload describes. The beacon root is
    /// not part of the payload itself and must be supplied.
    pub fn compute_block_hash(&self, parent_beacon_root: Option<B256>) -> B256 {
        keccak256(self.header_rlp(parent_beacon_root))
    }

    /// Copy of the payload with `block_hash` recomputed
    pub fn resealed(mut self, parent_beacon_root: Option<B256>) -> Self {
        self.block_hash = self.compute_block_hash(parent_beacon_root);
        self
    }

    fn header_rlp(&self, parent_beacon_root: Option<B256>) -> Vec<u8> {
        let transactions_root =
            ordered_trie_root_with_encoder(&self.transactions, |tx, buf| buf.put_slice(tx));

        let mut fields = Vec::new();
        self.parent_hash.encode(&mut fields);
        EMPTY_OMMER_ROOT_HASH.encode(&mut fields);
        self.fee_recipient.encode(&mut fields);
        self.state_root.encode(&mut fields);
        transactions_root.encode(&mut fields);
        self.receipts_root.encode(&mut fields);
        self.logs_bloom.encode(&mut fields);
        // difficulty
        U256::ZERO.encode(&mut fields);
        self.block_number.encode(&mut fields);
        self.gas_limit.encode(&mut fields);
        self.gas_used.encode(&mut fields);
        self.timestamp.encode(&mut fields);
        self.extra_data.encode(&mut fields);
        self.prev_randao.encode(&mut fields);
        // nonce
        B64::ZERO.encode(&mut fields);
        self.base_fee_per_gas.encode(&mut fields);

        // Optional trailing fields: once a later one is present, the earlier
        // absent ones are encoded as their zero value to keep positions.
        let withdrawals_root = self.withdrawals.as_ref().map(|w| ordered_trie_root(w));
        let present = [
            withdrawals_root.is_some(),
            self.blob_gas_used.is_some(),
            self.excess_blob_gas.is_some(),
            parent_beacon_root.is_some(),
        ];
        let trailing = present.iter().rposition(|p| *p).map_or(0, |i| i + 1);
        if trailing > 0 {
            withdrawals_root.unwrap_or_default().encode(&mut fields);
        }
        if trailing > 1 {
            self.blob_gas_used.unwrap_or_default().encode(&mut fields);
        }
        if trailing > 2 {
            self.excess_blob_gas.unwrap_or_default().encode(&mut fields);
        }
        if trailing > 3 {
            parent_beacon_root.unwrap_or_default().encode(&mut fields);
        }

        let mut out = Vec::with_capacity(fields.len() + 9);
        alloy_rlp::Header {
            list: true,
            payload_length: fields.len(),
        }
        .encode(&mut out);
        out.extend_from_slice(&fields);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkchoiceState {
    pub head_block_hash: B256,
    pub safe_block_hash: B256,
    pub finalized_block_hash: B256,
}

impl ForkchoiceState {
    /// Head, safe and finalized all pointing at `hash`
    pub fn at(hash: B256) -> Self {
        Self {
            head_block_hash: hash,
            safe_block_hash: hash,
            finalized_block_hash: hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadAttributes {
    #[serde(with = "crate::quantity")]
    pub timestamp: u64,
    pub prev_randao: B256,
    pub suggested_fee_recipient: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawals: Option<Vec<Withdrawal>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_beacon_block_root: Option<B256>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadStatusKind {
    Valid,
    Invalid,
    Syncing,
    Accepted,
    InvalidBlockHash,
}

impl PayloadStatusKind {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid | Self::InvalidBlockHash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadStatus {
    pub status: PayloadStatusKind,
    #[serde(default)]
    pub latest_valid_hash: Option<B256>,
    #[serde(default)]
    pub validation_error: Option<String>,
}

impl PayloadStatus {
    pub fn new(status: PayloadStatusKind) -> Self {
        Self {
            status,
            latest_valid_hash: None,
            validation_error: None,
        }
    }

    pub fn with_latest_valid_hash(mut self, hash: B256) -> Self {
        self.latest_valid_hash = Some(hash);
        self
    }

    pub fn with_validation_error(mut self, error: impl Into<String>) -> Self {
        self.validation_error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkchoiceUpdatedResponse {
    pub payload_status: PayloadStatus,
    #[serde(default)]
    pub payload_id: Option<PayloadId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlobsBundle {
    pub commitments: Vec<Bytes>,
    pub proofs: Vec<Bytes>,
    pub blobs: Vec<Bytes>,
}

impl BlobsBundle {
    pub fn versioned_hashes(&self) -> Vec<B256> {
        self.commitments
            .iter()
            .map(|c| crate::blob::kzg_to_versioned_hash(c))
            .collect()
    }
}

/// `engine_getPayload` result; V1 responses carry only the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltPayload {
    pub execution_payload: ExecutionPayload,
    #[serde(default)]
    pub block_value: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blobs_bundle: Option<BlobsBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_override_builder: Option<bool>,
}

/// Engine API method version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
pub enum EngineVersion {
    V1,
    V2,
    V3,
}

impl EngineVersion {
    pub fn for_fork(fork: Fork) -> Self {
        match fork {
            Fork::Paris => Self::V1,
            Fork::Shanghai => Self::V2,
            Fork::Cancun => Self::V3,
        }
    }

    pub fn for_timestamp(forks: &ForkConfig, timestamp: u64) -> Self {
        Self::for_fork(forks.fork_at(timestamp))
    }

    pub fn number(&self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            _ => None,
        }
    }

    pub fn new_payload_method(&self) -> String {
        format!("engine_newPayloadV{}", self.number())
    }

    pub fn forkchoice_updated_method(&self) -> String {
        format!("engine_forkchoiceUpdatedV{}", self.number())
    }

    pub fn get_payload_method(&self) -> String {
        format!("engine_getPayloadV{}", self.number())
    }
}

/// Per-field override of an optional value: leave it, replace it, or drop it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldOverride<T> {
    Keep,
    Set(T),
    Remove,
}

impl<T> Default for FieldOverride<T> {
    fn default() -> Self {
        Self::Keep
    }
}

impl<T: Clone> FieldOverride<T> {
    pub fn apply(&self, current: Option<T>) -> Option<T> {
        match self {
            Self::Keep => current,
            Self::Set(value) => Some(value.clone()),
            Self::Remove => None,
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }
}

/// Field-level modifications applied to a built payload before sending it,
/// after which the block hash is recomputed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PayloadCustomizer {
    pub blob_gas_used: FieldOverride<u64>,
    pub excess_blob_gas: FieldOverride<u64>,
    pub parent_beacon_root: FieldOverride<B256>,
    pub timestamp: Option<u64>,
    pub extra_data: Option<Bytes>,
}

impl PayloadCustomizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob_gas_used(mut self, value: FieldOverride<u64>) -> Self {
        self.blob_gas_used = value;
        self
    }

    pub fn with_excess_blob_gas(mut self, value: FieldOverride<u64>) -> Self {
        self.excess_blob_gas = value;
        self
    }

    pub fn with_parent_beacon_root(mut self, value: FieldOverride<B256>) -> Self {
        self.parent_beacon_root = value;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_extra_data(mut self, extra_data: Bytes) -> Self {
        self.extra_data = Some(extra_data);
        self
    }

    pub fn is_noop(&self) -> bool {
        self.blob_gas_used.is_keep()
            && self.excess_blob_gas.is_keep()
            && self.parent_beacon_root.is_keep()
            && self.timestamp.is_none()
            && self.extra_data.is_none()
    }

    /// Applies every override and reseals the block hash over the result.
    /// Returns the new payload and the beacon root to send with it.
    pub fn apply(
        &self,
        payload: &ExecutionPayload,
        parent_beacon_root: Option<B256>,
    ) -> (ExecutionPayload, Option<B256>) {
        let mut custom = payload.clone();
        custom.blob_gas_used = self.blob_gas_used.apply(custom.blob_gas_used);
        custom.excess_blob_gas = self.excess_blob_gas.apply(custom.excess_blob_gas);
        if let Some(timestamp) = self.timestamp {
            custom.timestamp = timestamp;
        }
        if let Some(extra_data) = &self.extra_data {
            custom.extra_data = extra_data.clone();
        }
        let beacon_root = self.parent_beacon_root.apply(parent_beacon_root);
        (custom.resealed(beacon_root), beacon_root)
    }
}
