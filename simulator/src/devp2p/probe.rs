use std::collections::HashSet;
use std::time::Duration;

use alloy_primitives::B256;
use engine_common::transaction::{PooledBlobTransaction, SignedTransaction, BLOB_TX_TYPE};
use log::{debug, info, warn};
use rand::Rng;

use super::{
    EthMessage, ForkFilter, GetPooledTransactions, PeerConnection, ProbeError, Status,
};

pub struct DevP2PProbe {
    conn: Box<dyn PeerConnection>,
    timeout: Duration,
}

impl DevP2PProbe {
    pub fn new(conn: Box<dyn PeerConnection>) -> Self {
        Self {
            conn,
            timeout: Duration::from_secs(12),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn remote_status(&self) -> &Status {
        self.conn.remote_status()
    }

    /// Checks the remote `Status` against our genesis and fork schedule
    pub fn check_fork_id(&self, genesis: B256, filter: &ForkFilter) -> Result<(), ProbeError> {
        let remote = self.conn.remote_status();
        if remote.genesis != genesis {
            return Err(ProbeError::GenesisMismatch {
                local: genesis,
                remote: remote.genesis,
            });
        }
        filter.validate(remote.fork_id)?;
        debug!("Remote fork id {:?} accepted", remote.fork_id);
        Ok(())
    }

    pub async fn send(&mut self, message: &EthMessage) -> Result<(), ProbeError> {
        self.conn.send(message.id(), message.encode_payload()).await
    }

    pub async fn receive(&mut self) -> Result<EthMessage, ProbeError> {
        let (id, payload) = tokio::time::timeout(self.timeout, self.conn.receive())
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))??;
        EthMessage::decode(id, &payload)
    }

    /// Reads announcements until every hash in `wanted` has been announced.
    /// Other messages are skipped.
    pub async fn wait_for_announcements(&mut self, wanted: &[B256]) -> Result<(), ProbeError> {
        let timeout = self.timeout;
        let mut missing: HashSet<B256> = wanted.iter().copied().collect();
        let wait = async {
            while !missing.is_empty() {
                let (id, payload) = self.conn.receive().await?;
                let EthMessage::NewPooledTransactionHashes(announcement) =
                    EthMessage::decode(id, &payload)?
                else {
                    debug!("Skipping message {:#04x} while waiting for announcements", id);
                    continue;
                };
                if !announcement.is_consistent() {
                    return Err(ProbeError::Decode(format!(
                        "announcement with {} types, {} sizes, {} hashes",
                        announcement.types.len(),
                        announcement.sizes.len(),
                        announcement.hashes.len()
                    )));
                }
                for (i, hash) in announcement.hashes.iter().enumerate() {
                    if missing.remove(hash) && announcement.types[i] != BLOB_TX_TYPE {
                        return Err(ProbeError::Mismatch {
                            index: i,
                            expected: format!("type {BLOB_TX_TYPE} announcement for {hash}"),
                            actual: format!("type {}", announcement.types[i]),
                        });
                    }
                }
            }
            Ok(())
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ProbeError::Timeout(timeout))?
    }

    /// Requests the given transactions by hash and checks that every body
    /// comes back with the same hash and the exact submitted network encoding.
    pub async fn request_pooled_transactions(
        &mut self,
        expected: &[SignedTransaction],
    ) -> Result<(), ProbeError> {
        let request_id: u64 = rand::thread_rng().gen();
        let hashes: Vec<B256> = expected.iter().map(SignedTransaction::hash).collect();
        info!(
            "Requesting {} pooled transaction(s), request id {}",
            hashes.len(),
            request_id
        );
        self.send(&EthMessage::GetPooledTransactions(GetPooledTransactions {
            request_id,
            hashes,
        }))
        .await?;

        let response = loop {
            match self.receive().await? {
                EthMessage::PooledTransactions(response) if response.request_id == request_id => {
                    break response
                }
                EthMessage::PooledTransactions(response) => {
                    warn!("Ignoring pooled transactions for request {}", response.request_id);
                }
                other => debug!("Skipping message {:#04x} while waiting for response", other.id()),
            }
        };

        if response.transactions.len() != expected.len() {
            return Err(ProbeError::UnexpectedMessage(format!(
                "{} transaction(s) returned for {} requested",
                response.transactions.len(),
                expected.len()
            )));
        }

        for (index, (raw, want)) in response.transactions.iter().zip(expected).enumerate() {
            let pooled = PooledBlobTransaction::decode_network(raw)?;
            pooled.check_sidecar()?;
            let hash = pooled.tx.hash();
            if hash != want.hash() {
                return Err(ProbeError::Mismatch {
                    index,
                    expected: want.hash().to_string(),
                    actual: hash.to_string(),
                });
            }
            if pooled.encoded() != want.network_encoded() {
                return Err(ProbeError::Mismatch {
                    index,
                    expected: "the submitted network encoding".into(),
                    actual: format!("{} different bytes", pooled.encoded().len()),
                });
            }
        }
        Ok(())
    }
}
