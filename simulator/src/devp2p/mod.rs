//! DevP2P probe: talks eth/68 to a client over an already established
//! session to check pooled blob transaction exchange and fork ids.

pub mod forkid;
pub mod messages;
mod probe;

pub use forkid::{ForkFilter, ForkId, ForkIdError};
pub use messages::{
    EthMessage, GetPooledTransactions, NewPooledTransactionHashes, PooledTransactions, Status,
    ETH_PROTOCOL_VERSION,
};
pub use probe::DevP2PProbe;

use std::time::Duration;

use alloy_primitives::{Bytes, B256};
use async_trait::async_trait;
use engine_common::transaction::TransactionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("handshake: {0}")]
    Handshake(String),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("malformed message: {0}")]
    Decode(String),
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
    #[error("transaction {index}: expected {expected}, got {actual}")]
    Mismatch {
        index: usize,
        expected: String,
        actual: String,
    },
    #[error("genesis mismatch: local {local}, remote {remote}")]
    GenesisMismatch { local: B256, remote: B256 },
    #[error(transparent)]
    ForkId(#[from] ForkIdError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl From<alloy_rlp::Error> for ProbeError {
    fn from(error: alloy_rlp::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

/// An eth/68 session whose RLPx and `Status` handshake already happened.
///
/// Messages are exchanged as `(id, rlp payload)`; the implementation owns
/// framing, compression and encryption.
#[async_trait]
pub trait PeerConnection: Send {
    /// `Status` the remote sent during the handshake
    fn remote_status(&self) -> &Status;

    async fn send(&mut self, id: u8, payload: Bytes) -> Result<(), ProbeError>;

    /// Next message from the remote; waits until one arrives
    async fn receive(&mut self) -> Result<(u8, Bytes), ProbeError>;
}
