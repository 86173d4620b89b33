//! Blob transaction generator.
//!
//! Builds, signs and submits type 3 transactions for the scenario's
//! accounts, and mirrors every accepted submission into the [`PendingPool`]
//! the inclusion planner reads from.

pub mod pool;

pub use pool::{
    InclusionPlanner, Inclusion, InsertOutcome, PendingPool, PendingTransaction, PlannedBlock,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use engine_common::blob::{blob_list, BlobId};
use engine_common::config::{
    BlobGasConfig, DATAHASH_ADDRESS_COUNT, DATAHASH_START_ADDRESS, DEFAULT_BLOB_TX_GAS_LIMIT, GWEI,
};
use engine_common::rpc::RpcError;
use engine_common::transaction::{BlobTransaction, SignedTransaction, TransactionSigner};
use indexmap::IndexMap;
use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::accounts::AccountRegistry;
use crate::engine::ExecutionClient;
use crate::error::{Failure, SubmissionError};

/// Submit `count` blob transactions from one account to one client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendBlobTransactions {
    pub count: usize,
    pub blobs_per_transaction: usize,
    /// Highest price per unit of blob gas the transactions pay
    pub max_blob_gas_cost: u128,
    pub fee_cap: u128,
    pub tip_cap: u128,
    pub account: usize,
    pub client: usize,
    /// Reuse the account's outstanding nonce instead of taking a new one
    pub replace: bool,
    /// The step passes only if the client rejects a submission
    pub expect_submission_error: bool,
}

impl Default for SendBlobTransactions {
    fn default() -> Self {
        Self {
            count: 1,
            blobs_per_transaction: 1,
            max_blob_gas_cost: 1,
            fee_cap: GWEI,
            tip_cap: GWEI,
            account: 0,
            client: 0,
            replace: false,
            expect_submission_error: false,
        }
    }
}

impl SendBlobTransactions {
    pub fn new(count: usize, blobs_per_transaction: usize, max_blob_gas_cost: u128) -> Self {
        Self {
            count,
            blobs_per_transaction,
            max_blob_gas_cost,
            ..Self::default()
        }
    }

    pub fn from_account(mut self, account: usize) -> Self {
        self.account = account;
        self
    }

    pub fn to_client(mut self, client: usize) -> Self {
        self.client = client;
        self
    }

    /// Sets fee cap and tip cap together
    pub fn with_fees(mut self, fee_cap: u128, tip_cap: u128) -> Self {
        self.fee_cap = fee_cap;
        self.tip_cap = tip_cap;
        self
    }

    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }

    pub fn expecting_rejection(mut self) -> Self {
        self.expect_submission_error = true;
        self
    }
}

/// A transaction the client accepted, in submission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTransaction {
    pub account: usize,
    pub client: usize,
    pub tx: SignedTransaction,
}

pub struct TransactionGenerator {
    chain_id: u64,
    blob_gas: BlobGasConfig,
    signer: Arc<dyn TransactionSigner>,
    accounts: AccountRegistry,
    pool: Mutex<PendingPool>,
    sent: Mutex<IndexMap<B256, SentTransaction>>,
    next_blob: AtomicU64,
    next_recipient: AtomicU64,
}

impl TransactionGenerator {
    pub fn new(chain_id: u64, blob_gas: BlobGasConfig, signer: Arc<dyn TransactionSigner>) -> Self {
        Self {
            chain_id,
            blob_gas,
            accounts: AccountRegistry::new(signer.clone()),
            signer,
            pool: Mutex::new(PendingPool::new()),
            sent: Mutex::new(IndexMap::new()),
            next_blob: AtomicU64::new(0),
            next_recipient: AtomicU64::new(0),
        }
    }

    pub fn accounts(&self) -> &AccountRegistry {
        &self.accounts
    }

    /// The pending pool; do not hold the guard across an await
    pub fn pool(&self) -> MutexGuard<'_, PendingPool> {
        self.pool.lock()
    }

    /// Accepted transaction number `index`, counting from the first
    /// submission of the scenario
    pub fn sent_transaction(&self, index: usize) -> Option<SentTransaction> {
        self.sent.lock().get_index(index).map(|(_, sent)| sent.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Reserves `count` fresh blob ids; ids are never reused within a
    /// scenario, replacements included
    pub fn allocate_blobs(&self, count: usize) -> Vec<BlobId> {
        let start = self.next_blob.fetch_add(count as u64, Ordering::SeqCst);
        blob_list(start, start + count as u64)
    }

    fn next_recipient(&self) -> Address {
        let n = self.next_recipient.fetch_add(1, Ordering::Relaxed);
        let address = DATAHASH_START_ADDRESS + n % DATAHASH_ADDRESS_COUNT;
        Address::left_padding_from(&address.to_be_bytes())
    }

    /// Signs and submits the requested transactions one by one, returning
    /// their hashes. Stops at the first rejection.
    pub async fn send(
        &self,
        client: &dyn ExecutionClient,
        request: &SendBlobTransactions,
    ) -> Result<Vec<B256>, Failure> {
        let mut hashes = Vec::with_capacity(request.count);
        for _ in 0..request.count {
            hashes.push(self.send_one(client, request).await?);
        }
        info!(
            "Account {} sent {} blob transaction(s) with {} blob(s) each to client {}",
            request.account, request.count, request.blobs_per_transaction, request.client
        );
        Ok(hashes)
    }

    async fn send_one(
        &self,
        client: &dyn ExecutionClient,
        request: &SendBlobTransactions,
    ) -> Result<B256, Failure> {
        // held until the client answered: same-account submissions never race
        let mut account = self.accounts.lock(request.account).await;
        let (nonce, advance) = match (request.replace, account.last_issued()) {
            (true, Some(nonce)) => (nonce, false),
            (true, None) => {
                warn!(
                    "Account {} has nothing to replace; using a fresh nonce",
                    request.account
                );
                (account.allocate(), true)
            }
            (false, _) => (account.allocate(), true),
        };

        let blob_ids = self.allocate_blobs(request.blobs_per_transaction);
        let unsigned = BlobTransaction {
            chain_id: self.chain_id,
            nonce,
            max_priority_fee_per_gas: request.tip_cap,
            max_fee_per_gas: request.fee_cap,
            gas_limit: DEFAULT_BLOB_TX_GAS_LIMIT,
            to: self.next_recipient(),
            value: U256::ZERO,
            input: Bytes::new(),
            access_list: Vec::new(),
            max_fee_per_blob_gas: request.max_blob_gas_cost,
            blob_versioned_hashes: blob_ids.iter().map(BlobId::versioned_hash).collect(),
        };
        let signed = self
            .signer
            .sign(request.account, unsigned, &blob_ids)
            .map_err(|e| SubmissionError::Signing(e.to_string()))?;

        let hash = match client.send_raw_transaction(&signed.network_encoded()).await {
            Ok(hash) => hash,
            Err(RpcError::Rpc { code, message, .. }) => {
                debug!(
                    "Client {} rejected nonce {} of account {}: {}",
                    client.id(),
                    nonce,
                    request.account,
                    message
                );
                return Err(SubmissionError::Rejected { code, message }.into());
            }
            Err(other) => return Err(Failure::Transport(other)),
        };
        if hash != signed.hash() {
            return Err(Failure::violation(
                "eth_sendRawTransaction",
                signed.hash(),
                hash,
            ));
        }
        if advance {
            account.advance();
        }

        let outcome = self.pool.lock().insert(PendingTransaction {
            account: request.account,
            sender: signed.sender,
            nonce,
            hash,
            blob_ids: blob_ids.clone(),
            max_fee_per_gas: request.fee_cap,
            max_priority_fee_per_gas: request.tip_cap,
            max_blob_gas_cost: request.max_blob_gas_cost,
            replaces_nonce: request.replace,
            sequence: 0,
        });
        match outcome {
            InsertOutcome::Added => debug!(
                "Sent {} (account {} nonce {}, blobs {:?})",
                hash,
                request.account,
                nonce,
                blob_ids.iter().map(|id| id.0).collect::<Vec<_>>()
            ),
            InsertOutcome::Replaced(old) => {
                debug!("Sent {} replacing {} at nonce {}", hash, old.hash, nonce)
            }
            InsertOutcome::Ignored => warn!(
                "Client accepted {} at nonce {} without a higher tip; keeping the earlier transaction",
                hash, nonce
            ),
        }

        self.sent.lock().insert(
            hash,
            SentTransaction {
                account: request.account,
                client: request.client,
                tx: signed,
            },
        );
        Ok(hash)
    }

    pub fn blob_gas(&self) -> &BlobGasConfig {
        &self.blob_gas
    }
}
