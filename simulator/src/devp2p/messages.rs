//! eth/68 messages used by the probe.
//!
//! The transport hands us `(message id, rlp payload)` pairs; framing and
//! snappy compression stay below the [`super::PeerConnection`] seam.

use alloy_primitives::{Bytes, B256, U256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};

use super::forkid::ForkId;
use super::ProbeError;

pub const ETH_PROTOCOL_VERSION: u8 = 68;

pub const STATUS_MSG: u8 = 0x00;
pub const NEW_POOLED_TRANSACTION_HASHES_MSG: u8 = 0x08;
pub const GET_POOLED_TRANSACTIONS_MSG: u8 = 0x09;
pub const POOLED_TRANSACTIONS_MSG: u8 = 0x0a;

#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Status {
    pub version: u8,
    pub network_id: u64,
    pub total_difficulty: U256,
    pub block_hash: B256,
    pub genesis: B256,
    pub fork_id: ForkId,
}

/// Announcement: one type byte, size and hash per transaction
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct NewPooledTransactionHashes {
    pub types: Bytes,
    pub sizes: Vec<u64>,
    pub hashes: Vec<B256>,
}

impl NewPooledTransactionHashes {
    pub fn is_consistent(&self) -> bool {
        self.types.len() == self.hashes.len() && self.sizes.len() == self.hashes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct GetPooledTransactions {
    pub request_id: u64,
    pub hashes: Vec<B256>,
}

/// Response carrying network-encoded transactions, each as an RLP string
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct PooledTransactions {
    pub request_id: u64,
    pub transactions: Vec<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EthMessage {
    Status(Status),
    NewPooledTransactionHashes(NewPooledTransactionHashes),
    GetPooledTransactions(GetPooledTransactions),
    PooledTransactions(PooledTransactions),
    /// Anything else the peer sends; kept so the probe can skip it
    Other { id: u8, payload: Bytes },
}

impl EthMessage {
    pub fn id(&self) -> u8 {
        match self {
            Self::Status(_) => STATUS_MSG,
            Self::NewPooledTransactionHashes(_) => NEW_POOLED_TRANSACTION_HASHES_MSG,
            Self::GetPooledTransactions(_) => GET_POOLED_TRANSACTIONS_MSG,
            Self::PooledTransactions(_) => POOLED_TRANSACTIONS_MSG,
            Self::Other { id, .. } => *id,
        }
    }

    pub fn encode_payload(&self) -> Bytes {
        let mut out = Vec::new();
        match self {
            Self::Status(msg) => msg.encode(&mut out),
            Self::NewPooledTransactionHashes(msg) => msg.encode(&mut out),
            Self::GetPooledTransactions(msg) => msg.encode(&mut out),
            Self::PooledTransactions(msg) => msg.encode(&mut out),
            Self::Other { payload, .. } => return payload.clone(),
        }
        out.into()
    }

    pub fn decode(id: u8, payload: &[u8]) -> Result<Self, ProbeError> {
        let mut buf = payload;
        let message = match id {
            STATUS_MSG => Self::Status(Status::decode(&mut buf)?),
            NEW_POOLED_TRANSACTION_HASHES_MSG => {
                Self::NewPooledTransactionHashes(NewPooledTransactionHashes::decode(&mut buf)?)
            }
            GET_POOLED_TRANSACTIONS_MSG => {
                Self::GetPooledTransactions(GetPooledTransactions::decode(&mut buf)?)
            }
            POOLED_TRANSACTIONS_MSG => {
                Self::PooledTransactions(PooledTransactions::decode(&mut buf)?)
            }
            other => {
                return Ok(Self::Other {
                    id: other,
                    payload: Bytes::copy_from_slice(payload),
                })
            }
        };
        if !buf.is_empty() {
            return Err(ProbeError::Decode(format!(
                "message {id:#04x} has {} trailing bytes",
                buf.len()
            )));
        }
        Ok(message)
    }
}
