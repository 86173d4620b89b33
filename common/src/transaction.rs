//! EIP-4844 (type 3) transaction encoding.
//!
//! Two encodings exist for the same transaction:
//! - canonical: `0x03 || rlp([chain_id, ..., blob_versioned_hashes, y, r, s])`,
//!   what goes into a block and what the transaction hash is taken over;
//! - network: `0x03 || rlp([tx_payload_body, blobs, commitments, proofs])`,
//!   what `eth_sendRawTransaction` and the pooled-transaction exchange carry.
//!
//! Signing itself lives behind [`TransactionSigner`].

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use thiserror::Error;

use crate::blob::{kzg_to_versioned_hash, BlobId, Bytes48};

pub const LEGACY_TX_TYPE: u8 = 0x00;
pub const ACCESS_LIST_TX_TYPE: u8 = 0x01;
pub const DYNAMIC_FEE_TX_TYPE: u8 = 0x02;
pub const BLOB_TX_TYPE: u8 = 0x03;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("empty transaction bytes")]
    Empty,
    #[error("unsupported transaction type {0:#04x}")]
    UnsupportedType(u8),
    #[error("malformed transaction: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    #[error("{0} trailing bytes after transaction body")]
    TrailingBytes(usize),
    #[error("blob sidecar does not match transaction: {0}")]
    SidecarMismatch(String),
    #[error("signing failed: {0}")]
    Signer(String),
}

#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct AccessListItem {
    pub address: Address,
    pub storage_keys: Vec<B256>,
}

/// Unsigned blob transaction, field order as in the signing payload
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlobTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
    pub access_list: Vec<AccessListItem>,
    pub max_fee_per_blob_gas: u128,
    pub blob_versioned_hashes: Vec<B256>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub y_parity: bool,
    pub r: U256,
    pub s: U256,
}

impl BlobTransaction {
    /// Hash the sender signs: `keccak256(0x03 || rlp(unsigned fields))`
    pub fn signing_hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.length() + 1);
        buf.push(BLOB_TX_TYPE);
        self.encode(&mut buf);
        keccak256(buf)
    }

    pub fn into_signed(self, signature: Signature) -> SignedBlobTransaction {
        SignedBlobTransaction {
            chain_id: self.chain_id,
            nonce: self.nonce,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            max_fee_per_gas: self.max_fee_per_gas,
            gas_limit: self.gas_limit,
            to: self.to,
            value: self.value,
            input: self.input,
            access_list: self.access_list,
            max_fee_per_blob_gas: self.max_fee_per_blob_gas,
            blob_versioned_hashes: self.blob_versioned_hashes,
            y_parity: signature.y_parity,
            r: signature.r,
            s: signature.s,
        }
    }
}

/// Signed blob transaction body (the canonical, in-block form)
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct SignedBlobTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
    pub access_list: Vec<AccessListItem>,
    pub max_fee_per_blob_gas: u128,
    pub blob_versioned_hashes: Vec<B256>,
    pub y_parity: bool,
    pub r: U256,
    pub s: U256,
}

impl SignedBlobTransaction {
    pub fn encoded(&self) -> Bytes {
        let mut buf = Vec::with_capacity(self.length() + 1);
        buf.push(BLOB_TX_TYPE);
        self.encode(&mut buf);
        buf.into()
    }

    pub fn hash(&self) -> B256 {
        keccak256(self.encoded())
    }

    pub fn unsigned(&self) -> BlobTransaction {
        BlobTransaction {
            chain_id: self.chain_id,
            nonce: self.nonce,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            max_fee_per_gas: self.max_fee_per_gas,
            gas_limit: self.gas_limit,
            to: self.to,
            value: self.value,
            input: self.input.clone(),
            access_list: self.access_list.clone(),
            max_fee_per_blob_gas: self.max_fee_per_blob_gas,
            blob_versioned_hashes: self.blob_versioned_hashes.clone(),
        }
    }

    pub fn signature(&self) -> Signature {
        Signature {
            y_parity: self.y_parity,
            r: self.r,
            s: self.s,
        }
    }

    pub fn blob_gas(&self, gas_per_blob: u64) -> u64 {
        (self.blob_versioned_hashes.len() as u64).saturating_mul(gas_per_blob)
    }

    /// Decodes the canonical `0x03 || rlp(...)` form
    pub fn decode_canonical(raw: &[u8]) -> Result<Self, TransactionError> {
        let mut body = strip_type(raw, BLOB_TX_TYPE)?;
        let tx = Self::decode(&mut body)?;
        if !body.is_empty() {
            return Err(TransactionError::TrailingBytes(body.len()));
        }
        Ok(tx)
    }
}

/// Blobs with their commitments and proofs, in transaction order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlobSidecar {
    pub blobs: Vec<Bytes>,
    pub commitments: Vec<Bytes48>,
    pub proofs: Vec<Bytes48>,
}

impl BlobSidecar {
    /// Deterministic sidecar for synthetic blobs
    pub fn synthetic(ids: &[BlobId]) -> Self {
        Self {
            blobs: ids.iter().map(BlobId::blob).collect(),
            commitments: ids.iter().map(BlobId::commitment).collect(),
            proofs: ids.iter().map(BlobId::proof).collect(),
        }
    }

    pub fn versioned_hashes(&self) -> Vec<B256> {
        self.commitments
            .iter()
            .map(|c| kzg_to_versioned_hash(c.as_slice()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commitments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commitments.is_empty()
    }
}

/// Network form of a blob transaction
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct PooledBlobTransaction {
    pub tx: SignedBlobTransaction,
    pub blobs: Vec<Bytes>,
    pub commitments: Vec<Bytes48>,
    pub proofs: Vec<Bytes48>,
}

impl PooledBlobTransaction {
    pub fn new(tx: SignedBlobTransaction, sidecar: BlobSidecar) -> Self {
        Self {
            tx,
            blobs: sidecar.blobs,
            commitments: sidecar.commitments,
            proofs: sidecar.proofs,
        }
    }

    pub fn encoded(&self) -> Bytes {
        let mut buf = Vec::with_capacity(self.length() + 1);
        buf.push(BLOB_TX_TYPE);
        self.encode(&mut buf);
        buf.into()
    }

    pub fn decode_network(raw: &[u8]) -> Result<Self, TransactionError> {
        let mut body = strip_type(raw, BLOB_TX_TYPE)?;
        let pooled = Self::decode(&mut body)?;
        if !body.is_empty() {
            return Err(TransactionError::TrailingBytes(body.len()));
        }
        Ok(pooled)
    }

    pub fn sidecar(&self) -> BlobSidecar {
        BlobSidecar {
            blobs: self.blobs.clone(),
            commitments: self.commitments.clone(),
            proofs: self.proofs.clone(),
        }
    }

    /// The sidecar must carry one blob, commitment and proof per versioned
    /// hash, and every commitment must hash to the matching versioned hash.
    pub fn check_sidecar(&self) -> Result<(), TransactionError> {
        let expected = self.tx.blob_versioned_hashes.len();
        if self.blobs.len() != expected
            || self.commitments.len() != expected
            || self.proofs.len() != expected
        {
            return Err(TransactionError::SidecarMismatch(format!(
                "{} hashes, {} blobs, {} commitments, {} proofs",
                expected,
                self.blobs.len(),
                self.commitments.len(),
                self.proofs.len()
            )));
        }
        for (i, (commitment, hash)) in self
            .commitments
            .iter()
            .zip(&self.tx.blob_versioned_hashes)
            .enumerate()
        {
            if kzg_to_versioned_hash(commitment.as_slice()) != *hash {
                return Err(TransactionError::SidecarMismatch(format!(
                    "commitment {i} does not hash to {hash}"
                )));
            }
        }
        Ok(())
    }
}

/// A signed blob transaction ready for submission, as produced by a signer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub sender: Address,
    pub blob_ids: Vec<BlobId>,
    pub tx: SignedBlobTransaction,
    pub sidecar: BlobSidecar,
}

impl SignedTransaction {
    pub fn hash(&self) -> B256 {
        self.tx.hash()
    }

    /// Canonical encoding, as it appears in a payload
    pub fn encoded(&self) -> Bytes {
        self.tx.encoded()
    }

    /// Network encoding, as sent with `eth_sendRawTransaction`
    pub fn network_encoded(&self) -> Bytes {
        PooledBlobTransaction::new(self.tx.clone(), self.sidecar.clone()).encoded()
    }
}

/// Signs blob transactions on behalf of the scenario's accounts.
///
/// Key material and KZG proof generation are owned by the implementor;
/// [`BlobSidecar::synthetic`] is available for harnesses without a KZG setup.
pub trait TransactionSigner: Send + Sync {
    fn address(&self, account: usize) -> Address;

    fn sign(
        &self,
        account: usize,
        tx: BlobTransaction,
        blob_ids: &[BlobId],
    ) -> Result<SignedTransaction, TransactionError>;
}

/// Versioned hashes carried by a canonical transaction of any type; only
/// type 3 transactions carry blobs.
pub fn blob_versioned_hashes(raw: &[u8]) -> Result<Vec<B256>, TransactionError> {
    let first = *raw.first().ok_or(TransactionError::Empty)?;
    match first {
        // legacy transactions start with an RLP list header
        0xc0..=0xff => Ok(Vec::new()),
        LEGACY_TX_TYPE => Err(TransactionError::UnsupportedType(first)),
        ACCESS_LIST_TX_TYPE | DYNAMIC_FEE_TX_TYPE => Ok(Vec::new()),
        BLOB_TX_TYPE => Ok(SignedBlobTransaction::decode_canonical(raw)?.blob_versioned_hashes),
        other => Err(TransactionError::UnsupportedType(other)),
    }
}

fn strip_type(raw: &[u8], tx_type: u8) -> Result<&[u8], TransactionError> {
    match raw.split_first() {
        None => Err(TransactionError::Empty),
        Some((first, body)) if *first == tx_type => Ok(body),
        Some((first, _)) => Err(TransactionError::UnsupportedType(*first)),
    }
}
