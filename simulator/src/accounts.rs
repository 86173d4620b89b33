//! Account and nonce registry.
//!
//! Every account sits behind its own async mutex: a submission holds the
//! account's guard from nonce allocation until the client has answered, so
//! two submissions for the same account never race while submissions for
//! different accounts proceed independently.

use std::sync::Arc;

use alloy_primitives::Address;
use dashmap::DashMap;
use engine_common::transaction::TransactionSigner;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub index: usize,
    pub address: Address,
    /// Next nonce to hand out
    pub nonce: u64,
    /// Most recent nonce used by a successful submission
    pub last_issued: Option<u64>,
}

pub struct AccountRegistry {
    signer: Arc<dyn TransactionSigner>,
    accounts: DashMap<usize, Arc<Mutex<Account>>>,
}

impl AccountRegistry {
    pub fn new(signer: Arc<dyn TransactionSigner>) -> Self {
        Self {
            signer,
            accounts: DashMap::new(),
        }
    }

    fn entry(&self, index: usize) -> Arc<Mutex<Account>> {
        self.accounts
            .entry(index)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Account {
                    index,
                    address: self.signer.address(index),
                    nonce: 0,
                    last_issued: None,
                }))
            })
            .clone()
    }

    /// Exclusive access to one account, created on first use
    pub async fn lock(&self, index: usize) -> AccountGuard {
        AccountGuard {
            inner: self.entry(index).lock_owned().await,
        }
    }

    pub fn address(&self, index: usize) -> Address {
        self.signer.address(index)
    }

    /// Snapshot of one account; waits for any in-flight submission
    pub async fn snapshot(&self, index: usize) -> Account {
        self.entry(index).lock().await.clone()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

pub struct AccountGuard {
    inner: OwnedMutexGuard<Account>,
}

impl AccountGuard {
    pub fn index(&self) -> usize {
        self.inner.index
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    /// Current nonce; does not advance it
    pub fn allocate(&self) -> u64 {
        self.inner.nonce
    }

    /// Records a submission at the current nonce and moves past it
    pub fn advance(&mut self) {
        self.inner.last_issued = Some(self.inner.nonce);
        self.inner.nonce += 1;
    }

    pub fn last_issued(&self) -> Option<u64> {
        self.inner.last_issued
    }
}
