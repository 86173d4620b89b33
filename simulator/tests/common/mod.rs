// In-process execution client, signer and launcher for the integration tests
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use alloy_primitives::{keccak256, Address, Bloom, Bytes, B256, B64, U256};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use engine_common::blob::BlobId;
use engine_common::config::{
    BlobGasConfig, ForkConfig, DEFAULT_CHAIN_ID, INVALID_PARAMS_ERROR, UNSUPPORTED_FORK_ERROR,
};
use engine_common::fee::{blob_gas_price, next_excess_blob_gas};
use engine_common::payload::{
    BlobsBundle, BuiltPayload, EngineVersion, ExecutionPayload, ForkchoiceState,
    ForkchoiceUpdatedResponse, PayloadAttributes, PayloadId, PayloadStatus, PayloadStatusKind,
};
use engine_common::rpc::{BlockHeader, BlockTag, RpcError, TransactionReceipt};
use engine_common::transaction::{
    blob_versioned_hashes, BlobSidecar, BlobTransaction, PooledBlobTransaction,
    SignedBlobTransaction, SignedTransaction, Signature, TransactionError, TransactionSigner,
    BLOB_TX_TYPE,
};
use engine_simulator::devp2p::{
    EthMessage, ForkFilter, NewPooledTransactionHashes, PeerConnection, PooledTransactions,
    ProbeError, Status, ETH_PROTOCOL_VERSION,
};
use engine_simulator::engine::{ClientLauncher, ClientRole, ExecutionClient, LaunchOptions};
use log::debug;
use parking_lot::Mutex;

const BASE_FEE: u64 = 7;
const GAS_LIMIT: u64 = 30_000_000;
const TX_GAS: u64 = 21_000;
/// Geth's "already known" / "replacement underpriced" code
const TX_POOL_ERROR: i64 = -32000;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Misbehaviours a test can switch on for every client a launcher starts
#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    pub fail_launch: bool,
    /// `eth_blockNumber` calls refused before the client answers
    pub unready_polls: u32,
    /// Unready polls answer this JSON-RPC error instead of refusing the connection
    pub unready_error_code: Option<i64>,
    /// Skip the versioned-hash comparison in `newPayload`
    pub ignore_versioned_hashes: bool,
    /// Drop the last blob of every pooled transaction served over eth/68
    pub strip_pooled_blobs: bool,
    /// Secondary clients answer INVALID, not SYNCING, to a head they lack
    pub reject_unknown_heads: bool,
}

#[derive(Debug, Clone)]
struct PoolEntry {
    hash: B256,
    sender: Address,
    sequence: u64,
    pooled: PooledBlobTransaction,
    /// Network encoding exactly as submitted
    raw: Bytes,
}

impl PoolEntry {
    fn blob_count(&self) -> u64 {
        self.pooled.tx.blob_versioned_hashes.len() as u64
    }
}

#[derive(Default)]
struct PoolState {
    pending: BTreeMap<(Address, u64), PoolEntry>,
    /// Next nonce per sender once the included transactions are applied
    confirmed: HashMap<Address, u64>,
    sequence: u64,
}

/// Transaction pool gossiped between every client of one scenario
pub struct MockNetwork {
    forks: ForkConfig,
    blob_gas: BlobGasConfig,
    pool: Mutex<PoolState>,
}

impl MockNetwork {
    pub fn new(forks: ForkConfig) -> Self {
        Self {
            forks,
            blob_gas: BlobGasConfig::default(),
            pool: Mutex::new(PoolState::default()),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pool.lock().pending.len()
    }

    fn add(&self, pooled: PooledBlobTransaction, raw: Bytes) -> Result<B256, RpcError> {
        let sender = recover_sender(&pooled.tx);
        let nonce = pooled.tx.nonce;
        let hash = pooled.tx.hash();
        let mut pool = self.pool.lock();

        let next = pool.confirmed.get(&sender).copied().unwrap_or_default();
        if nonce < next {
            return Err(RpcError::rpc(TX_POOL_ERROR, format!("nonce too low: next nonce {next}, tx nonce {nonce}")));
        }
        if let Some(existing) = pool.pending.get(&(sender, nonce)) {
            if existing.hash == hash {
                return Err(RpcError::rpc(TX_POOL_ERROR, "already known"));
            }
            if pooled.tx.max_priority_fee_per_gas <= existing.pooled.tx.max_priority_fee_per_gas {
                return Err(RpcError::rpc(TX_POOL_ERROR, "replacement transaction underpriced"));
            }
        }

        pool.sequence += 1;
        let sequence = pool.sequence;
        pool.pending.insert(
            (sender, nonce),
            PoolEntry {
                hash,
                sender,
                sequence,
                pooled,
                raw,
            },
        );
        Ok(hash)
    }

    /// Greedy block filling: the best-paying account head first, ties by
    /// arrival; an account that does not fit or pays too little for blob gas
    /// is skipped for the rest of the block
    fn select(&self, blob_gas_price: U256) -> Vec<PoolEntry> {
        let pool = self.pool.lock();
        let mut queues: BTreeMap<Address, VecDeque<PoolEntry>> = BTreeMap::new();
        for ((sender, _), entry) in &pool.pending {
            queues.entry(*sender).or_default().push_back(entry.clone());
        }
        // nonce gaps keep the whole account out
        queues.retain(|sender, queue| {
            let next = pool.confirmed.get(sender).copied().unwrap_or_default();
            queue.front().is_some_and(|head| head.pooled.tx.nonce == next)
        });

        let max_blobs = self.blob_gas.max_blobs_per_block();
        let mut used = 0u64;
        let mut selected = Vec::new();
        loop {
            let best = queues
                .values()
                .filter_map(|queue| queue.front())
                .max_by(|a, b| {
                    a.pooled
                        .tx
                        .max_priority_fee_per_gas
                        .cmp(&b.pooled.tx.max_priority_fee_per_gas)
                        .then_with(|| b.sequence.cmp(&a.sequence))
                })
                .cloned();
            let Some(best) = best else { break };

            let affordable = U256::from(best.pooled.tx.max_fee_per_blob_gas) >= blob_gas_price;
            if !affordable || used + best.blob_count() > max_blobs {
                queues.remove(&best.sender);
                continue;
            }
            used += best.blob_count();
            if let Some(queue) = queues.get_mut(&best.sender) {
                queue.pop_front();
            }
            selected.push(best);
        }
        selected
    }

    /// Drops included transactions, and whatever they replaced, from the pool
    fn confirm(&self, transactions: &[Bytes]) {
        let mut pool = self.pool.lock();
        for raw in transactions {
            let Ok(tx) = SignedBlobTransaction::decode_canonical(raw) else {
                continue;
            };
            let sender = recover_sender(&tx);
            let next = pool.confirmed.entry(sender).or_default();
            *next = (*next).max(tx.nonce + 1);
            let next = *next;
            pool.pending
                .retain(|(owner, nonce), _| *owner != sender || *nonce >= next);
        }
    }

    fn announcement(&self) -> NewPooledTransactionHashes {
        let pool = self.pool.lock();
        let mut entries: Vec<&PoolEntry> = pool.pending.values().collect();
        entries.sort_by_key(|entry| entry.sequence);
        NewPooledTransactionHashes {
            types: vec![BLOB_TX_TYPE; entries.len()].into(),
            sizes: entries.iter().map(|entry| entry.raw.len() as u64).collect(),
            hashes: entries.iter().map(|entry| entry.hash).collect(),
        }
    }

    fn pooled_raw(&self, hash: &B256) -> Option<PooledBlobTransaction> {
        self.pool
            .lock()
            .pending
            .values()
            .find(|entry| entry.hash == *hash)
            .map(|entry| entry.pooled.clone())
    }

    fn pooled_encoding(&self, hash: &B256) -> Option<Bytes> {
        self.pool
            .lock()
            .pending
            .values()
            .find(|entry| entry.hash == *hash)
            .map(|entry| entry.raw.clone())
    }
}

/// The mock signer puts the sender address into `r`
fn recover_sender(tx: &SignedBlobTransaction) -> Address {
    Address::from_word(B256::from(tx.r.to_be_bytes::<32>()))
}

pub fn genesis_hash(forks: &ForkConfig) -> B256 {
    keccak256(format!("mock genesis at {}", forks.genesis_timestamp))
}

fn genesis_header(forks: &ForkConfig) -> BlockHeader {
    let cancun = forks.is_cancun(forks.genesis_timestamp);
    BlockHeader {
        hash: genesis_hash(forks),
        parent_hash: B256::ZERO,
        number: 0,
        timestamp: forks.genesis_timestamp,
        base_fee_per_gas: Some(U256::from(BASE_FEE)),
        blob_gas_used: cancun.then_some(0),
        excess_blob_gas: cancun.then_some(0),
        parent_beacon_block_root: cancun.then_some(B256::ZERO),
        transactions: Vec::new(),
    }
}

fn header_of(payload: &ExecutionPayload, parent_beacon_root: Option<B256>) -> BlockHeader {
    BlockHeader {
        hash: payload.block_hash,
        parent_hash: payload.parent_hash,
        number: payload.block_number,
        timestamp: payload.timestamp,
        base_fee_per_gas: Some(payload.base_fee_per_gas),
        blob_gas_used: payload.blob_gas_used,
        excess_blob_gas: payload.excess_blob_gas,
        parent_beacon_block_root: parent_beacon_root,
        transactions: payload.transaction_hashes(),
    }
}

#[derive(Clone)]
struct ChainState {
    blocks: HashMap<B256, BlockHeader>,
    genesis: B256,
    head: B256,
    receipts: HashMap<B256, TransactionReceipt>,
    built: HashMap<PayloadId, BuiltPayload>,
    next_payload_id: u64,
}

impl ChainState {
    fn new(forks: &ForkConfig) -> Self {
        let genesis = genesis_header(forks);
        let hash = genesis.hash;
        Self {
            blocks: HashMap::from([(hash, genesis)]),
            genesis: hash,
            head: hash,
            receipts: HashMap::new(),
            built: HashMap::new(),
            next_payload_id: 0,
        }
    }

    fn header(&self, hash: &B256) -> Option<BlockHeader> {
        self.blocks.get(hash).cloned()
    }

    fn by_number(&self, number: u64) -> Option<BlockHeader> {
        let mut cursor = self.blocks.get(&self.head)?;
        while cursor.number > number {
            cursor = self.blocks.get(&cursor.parent_hash)?;
        }
        (cursor.number == number).then(|| cursor.clone())
    }
}

/// Execution client answering the Engine API from memory, with a blob
/// transaction pool shared through its [`MockNetwork`]
pub struct MockExecutionClient {
    id: String,
    forks: ForkConfig,
    blob_gas: BlobGasConfig,
    network: Arc<MockNetwork>,
    options: MockOptions,
    chain: Mutex<ChainState>,
    refused_polls: AtomicU32,
    calls: Mutex<Vec<&'static str>>,
}

impl MockExecutionClient {
    fn new(
        id: String,
        network: Arc<MockNetwork>,
        chain: ChainState,
        options: MockOptions,
    ) -> Self {
        Self {
            id,
            forks: network.forks.clone(),
            blob_gas: network.blob_gas,
            network,
            options,
            chain: Mutex::new(chain),
            refused_polls: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, method: &'static str) {
        self.calls.lock().push(method);
    }

    /// How often `method` was called, by its JSON-RPC name
    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|m| **m == method).count()
    }

    pub fn head(&self) -> BlockHeader {
        let chain = self.chain.lock();
        chain
            .header(&chain.head)
            .unwrap_or_else(|| genesis_header(&self.forks))
    }

    pub fn genesis(&self) -> B256 {
        self.chain.lock().genesis
    }

    fn snapshot(&self) -> ChainState {
        let mut chain = self.chain.lock().clone();
        chain.built.clear();
        chain
    }

    fn status(&self) -> Status {
        let head = self.head();
        Status {
            version: ETH_PROTOCOL_VERSION,
            network_id: DEFAULT_CHAIN_ID,
            total_difficulty: U256::ZERO,
            block_hash: head.hash,
            genesis: self.genesis(),
            fork_id: self.fork_filter().current(),
        }
    }

    fn fork_filter(&self) -> ForkFilter {
        ForkFilter::new(self.genesis(), &self.forks, self.head().timestamp)
    }

    fn peer(&self, local: &Status) -> Result<MockPeer, ProbeError> {
        if local.version != ETH_PROTOCOL_VERSION {
            return Err(ProbeError::Handshake(format!("unsupported eth/{}", local.version)));
        }
        if local.network_id != DEFAULT_CHAIN_ID {
            return Err(ProbeError::Handshake(format!("network id {}", local.network_id)));
        }
        if local.genesis != self.genesis() {
            return Err(ProbeError::GenesisMismatch {
                local: self.genesis(),
                remote: local.genesis,
            });
        }
        self.fork_filter().validate(local.fork_id)?;

        let announcement = EthMessage::NewPooledTransactionHashes(self.network.announcement());
        Ok(MockPeer {
            remote: self.status(),
            network: self.network.clone(),
            strip_blobs: self.options.strip_pooled_blobs,
            outbox: VecDeque::from([(announcement.id(), announcement.encode_payload())]),
        })
    }

    fn build(&self, chain: &mut ChainState, parent: &BlockHeader, attributes: &PayloadAttributes) -> PayloadId {
        let cancun = self.forks.is_cancun(attributes.timestamp);
        let excess = next_excess_blob_gas(
            parent.excess_blob_gas.unwrap_or_default(),
            parent.blob_gas_used.unwrap_or_default(),
            &self.blob_gas,
        );
        let selected = if cancun {
            self.network.select(blob_gas_price(excess, &self.blob_gas))
        } else {
            Vec::new()
        };
        let blobs: u64 = selected.iter().map(PoolEntry::blob_count).sum();

        let payload = ExecutionPayload {
            parent_hash: parent.hash,
            fee_recipient: attributes.suggested_fee_recipient,
            state_root: keccak256(parent.hash),
            receipts_root: B256::ZERO,
            logs_bloom: Bloom::ZERO,
            prev_randao: attributes.prev_randao,
            block_number: parent.number + 1,
            gas_limit: GAS_LIMIT,
            gas_used: TX_GAS * selected.len() as u64,
            timestamp: attributes.timestamp,
            extra_data: Bytes::new(),
            base_fee_per_gas: U256::from(BASE_FEE),
            block_hash: B256::ZERO,
            transactions: selected.iter().map(|entry| entry.pooled.tx.encoded()).collect(),
            withdrawals: attributes.withdrawals.clone(),
            blob_gas_used: cancun.then(|| self.blob_gas.blob_gas(blobs)),
            excess_blob_gas: cancun.then_some(excess),
        }
        .resealed(attributes.parent_beacon_block_root);

        let blobs_bundle = cancun.then(|| BlobsBundle {
            commitments: selected
                .iter()
                .flat_map(|entry| entry.pooled.commitments.iter())
                .map(|c| Bytes::copy_from_slice(c.as_slice()))
                .collect(),
            proofs: selected
                .iter()
                .flat_map(|entry| entry.pooled.proofs.iter())
                .map(|p| Bytes::copy_from_slice(p.as_slice()))
                .collect(),
            blobs: selected
                .iter()
                .flat_map(|entry| entry.pooled.blobs.iter().cloned())
                .collect(),
        });

        chain.next_payload_id += 1;
        let id = B64::from(chain.next_payload_id.to_be_bytes());
        debug!(
            "{} built block {} with {} blob(s) as payload {}",
            self.id, payload.block_number, blobs, id
        );
        chain.built.insert(
            id,
            BuiltPayload {
                execution_payload: payload,
                block_value: U256::ZERO,
                blobs_bundle,
                should_override_builder: cancun.then_some(false),
            },
        );
        id
    }

    fn import(&self, chain: &mut ChainState, payload: &ExecutionPayload, beacon: Option<B256>) {
        let cancun = self.forks.is_cancun(payload.timestamp);
        let price = blob_gas_price(payload.excess_blob_gas.unwrap_or_default(), &self.blob_gas);
        for raw in &payload.transactions {
            let hash = keccak256(raw);
            let blobs = blob_versioned_hashes(raw).map(|h| h.len()).unwrap_or_default();
            chain.receipts.insert(
                hash,
                TransactionReceipt {
                    transaction_hash: hash,
                    block_hash: Some(payload.block_hash),
                    block_number: Some(payload.block_number),
                    status: Some(1),
                    blob_gas_used: cancun.then(|| self.blob_gas.blob_gas(blobs as u64)),
                    blob_gas_price: cancun.then_some(price),
                },
            );
        }
        chain.blocks.insert(payload.block_hash, header_of(payload, beacon));
        self.network.confirm(&payload.transactions);
    }
}

fn invalid(reason: impl Into<String>) -> PayloadStatus {
    PayloadStatus::new(PayloadStatusKind::Invalid).with_validation_error(reason)
}

#[async_trait]
impl ExecutionClient for MockExecutionClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn forkchoice_updated(
        &self,
        _version: EngineVersion,
        state: &ForkchoiceState,
        attributes: Option<&PayloadAttributes>,
    ) -> Result<ForkchoiceUpdatedResponse, RpcError> {
        self.record("engine_forkchoiceUpdated");
        if let Some(attributes) = attributes {
            let cancun = self.forks.is_cancun(attributes.timestamp);
            if attributes.parent_beacon_block_root.is_some() != cancun {
                return Err(RpcError::rpc(INVALID_PARAMS_ERROR, "parentBeaconBlockRoot presence"));
            }
        }

        let mut chain = self.chain.lock();
        let Some(head) = chain.header(&state.head_block_hash) else {
            let status = if self.options.reject_unknown_heads {
                PayloadStatusKind::Invalid
            } else {
                PayloadStatusKind::Syncing
            };
            return Ok(ForkchoiceUpdatedResponse {
                payload_status: PayloadStatus::new(status),
                payload_id: None,
            });
        };
        chain.head = head.hash;
        let payload_id = attributes.map(|attributes| self.build(&mut chain, &head, attributes));
        Ok(ForkchoiceUpdatedResponse {
            payload_status: PayloadStatus::new(PayloadStatusKind::Valid)
                .with_latest_valid_hash(head.hash),
            payload_id,
        })
    }

    async fn get_payload(
        &self,
        version: EngineVersion,
        payload_id: PayloadId,
    ) -> Result<BuiltPayload, RpcError> {
        self.record("engine_getPayload");
        let built = self
            .chain
            .lock()
            .built
            .get(&payload_id)
            .cloned()
            .ok_or_else(|| RpcError::rpc(-38001, "Unknown payload"))?;
        let cancun = self.forks.is_cancun(built.execution_payload.timestamp);
        if cancun != (version >= EngineVersion::V3) {
            return Err(RpcError::rpc(UNSUPPORTED_FORK_ERROR, "Unsupported fork"));
        }
        Ok(built)
    }

    async fn new_payload(
        &self,
        version: EngineVersion,
        payload: &ExecutionPayload,
        versioned_hashes: Option<&[B256]>,
        parent_beacon_root: Option<B256>,
    ) -> Result<PayloadStatus, RpcError> {
        self.record("engine_newPayload");
        let cancun = self.forks.is_cancun(payload.timestamp);
        if version >= EngineVersion::V3 {
            if payload.blob_gas_used.is_none()
                || payload.excess_blob_gas.is_none()
                || versioned_hashes.is_none()
                || parent_beacon_root.is_none()
            {
                return Err(RpcError::rpc(INVALID_PARAMS_ERROR, "missing Cancun field"));
            }
            if !cancun {
                return Err(RpcError::rpc(UNSUPPORTED_FORK_ERROR, "Unsupported fork"));
            }
        } else {
            if cancun {
                return Err(RpcError::rpc(UNSUPPORTED_FORK_ERROR, "Unsupported fork"));
            }
            if payload.blob_gas_used.is_some() || payload.excess_blob_gas.is_some() {
                return Err(RpcError::rpc(INVALID_PARAMS_ERROR, "unexpected Cancun field"));
            }
        }

        if payload.compute_block_hash(parent_beacon_root) != payload.block_hash {
            return Ok(PayloadStatus::new(PayloadStatusKind::InvalidBlockHash));
        }

        let carried = match payload.blob_versioned_hashes() {
            Ok(hashes) => hashes,
            Err(e) => return Ok(invalid(e.to_string())),
        };
        if let Some(expected) = versioned_hashes {
            if !self.options.ignore_versioned_hashes && carried != expected {
                return Ok(invalid("versioned hashes do not match the blob transactions"));
            }
        }
        if cancun && payload.blob_gas_used != Some(self.blob_gas.blob_gas(carried.len() as u64)) {
            return Ok(invalid("blobGasUsed does not match the blob transactions"));
        }

        let mut chain = self.chain.lock();
        if chain.blocks.contains_key(&payload.block_hash) {
            return Ok(PayloadStatus::new(PayloadStatusKind::Valid)
                .with_latest_valid_hash(payload.block_hash));
        }
        let Some(parent) = chain.header(&payload.parent_hash) else {
            return Ok(PayloadStatus::new(PayloadStatusKind::Syncing));
        };
        if cancun {
            let excess = next_excess_blob_gas(
                parent.excess_blob_gas.unwrap_or_default(),
                parent.blob_gas_used.unwrap_or_default(),
                &self.blob_gas,
            );
            if payload.excess_blob_gas != Some(excess) {
                return Ok(invalid(format!("excessBlobGas should be {excess}"))
                    .with_latest_valid_hash(parent.hash));
            }
        }

        self.import(&mut chain, payload, parent_beacon_root);
        Ok(PayloadStatus::new(PayloadStatusKind::Valid).with_latest_valid_hash(payload.block_hash))
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, RpcError> {
        self.record("eth_sendRawTransaction");
        let pooled = PooledBlobTransaction::decode_network(raw)
            .map_err(|e| RpcError::rpc(INVALID_PARAMS_ERROR, e.to_string()))?;
        pooled
            .check_sidecar()
            .map_err(|e| RpcError::rpc(TX_POOL_ERROR, e.to_string()))?;
        if pooled.tx.chain_id != DEFAULT_CHAIN_ID {
            return Err(RpcError::rpc(TX_POOL_ERROR, "invalid chain id"));
        }
        self.network.add(pooled, raw.clone())
    }

    async fn block_by_number(&self, tag: BlockTag) -> Result<Option<BlockHeader>, RpcError> {
        self.record("eth_getBlockByNumber");
        let chain = self.chain.lock();
        Ok(match tag {
            BlockTag::Earliest => chain.header(&chain.genesis),
            BlockTag::Latest | BlockTag::Pending => chain.header(&chain.head),
            BlockTag::Number(number) => chain.by_number(number),
        })
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>, RpcError> {
        self.record("eth_getTransactionReceipt");
        Ok(self.chain.lock().receipts.get(&hash).cloned())
    }

    async fn chain_id(&self) -> Result<u64, RpcError> {
        Ok(DEFAULT_CHAIN_ID)
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        self.record("eth_blockNumber");
        if self.refused_polls.fetch_add(1, Ordering::SeqCst) < self.options.unready_polls {
            return Err(match self.options.unready_error_code {
                Some(code) => RpcError::rpc(code, "method not available yet"),
                None => RpcError::Connection("connection refused".to_string()),
            });
        }
        Ok(self.head().number)
    }
}

/// eth/68 session with a mock client. Announces the whole pool on connect
/// and answers `GetPooledTransactions` from it.
pub struct MockPeer {
    remote: Status,
    network: Arc<MockNetwork>,
    strip_blobs: bool,
    outbox: VecDeque<(u8, Bytes)>,
}

#[async_trait]
impl PeerConnection for MockPeer {
    fn remote_status(&self) -> &Status {
        &self.remote
    }

    async fn send(&mut self, id: u8, payload: Bytes) -> Result<(), ProbeError> {
        let EthMessage::GetPooledTransactions(request) = EthMessage::decode(id, &payload)? else {
            debug!("Mock peer ignores message {:#04x}", id);
            return Ok(());
        };
        let transactions = request
            .hashes
            .iter()
            .filter_map(|hash| {
                if self.strip_blobs {
                    self.network.pooled_raw(hash).map(|mut pooled| {
                        pooled.blobs.pop();
                        pooled.encoded()
                    })
                } else {
                    self.network.pooled_encoding(hash)
                }
            })
            .collect();
        let reply = EthMessage::PooledTransactions(PooledTransactions {
            request_id: request.request_id,
            transactions,
        });
        self.outbox.push_back((reply.id(), reply.encode_payload()));
        Ok(())
    }

    async fn receive(&mut self) -> Result<(u8, Bytes), ProbeError> {
        self.outbox
            .pop_front()
            .ok_or_else(|| ProbeError::Transport("peer disconnected".to_string()))
    }
}

#[derive(Default)]
struct LauncherState {
    network: Option<Arc<MockNetwork>>,
    primary: Option<Arc<MockExecutionClient>>,
    clients: Vec<Arc<MockExecutionClient>>,
}

/// Starts mock clients. Launching a primary opens a new network; every
/// other client joins the latest one.
#[derive(Default)]
pub struct MockLauncher {
    options: MockOptions,
    launched: AtomicUsize,
    state: Mutex<LauncherState>,
    stopped: Mutex<Vec<String>>,
}

impl MockLauncher {
    pub fn new(options: MockOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn client(&self, index: usize) -> Option<Arc<MockExecutionClient>> {
        self.state.lock().clients.get(index).cloned()
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }

    fn find(&self, id: &str) -> Option<Arc<MockExecutionClient>> {
        self.state
            .lock()
            .clients
            .iter()
            .find(|client| client.id == id)
            .cloned()
    }
}

#[async_trait]
impl ClientLauncher for MockLauncher {
    async fn launch(&self, options: &LaunchOptions) -> anyhow::Result<Arc<dyn ExecutionClient>> {
        if self.options.fail_launch {
            bail!("image not found");
        }
        let n = self.launched.fetch_add(1, Ordering::SeqCst);
        let id = format!("mock-{n}");

        let mut state = self.state.lock();
        let client = if options.role == ClientRole::Primary {
            let network = Arc::new(MockNetwork::new(options.forks.clone()));
            let chain = ChainState::new(&options.forks);
            let options = MockOptions {
                reject_unknown_heads: false,
                ..self.options.clone()
            };
            let client = Arc::new(MockExecutionClient::new(id, network.clone(), chain, options));
            state.network = Some(network);
            state.primary = Some(client.clone());
            client
        } else {
            let network = state
                .network
                .clone()
                .ok_or_else(|| anyhow!("no primary to join"))?;
            // a bootnode-connected client has synced the primary's chain
            let chain = match (&state.primary, options.skip_bootnode) {
                (Some(primary), false) => primary.snapshot(),
                _ => ChainState::new(&options.forks),
            };
            Arc::new(MockExecutionClient::new(id, network, chain, self.options.clone()))
        };
        state.clients.push(client.clone());
        Ok(client)
    }

    async fn connect_peer(
        &self,
        client: &dyn ExecutionClient,
        local: &Status,
    ) -> Result<Box<dyn PeerConnection>, ProbeError> {
        let target = self
            .find(client.id())
            .ok_or_else(|| ProbeError::Transport(format!("{} is not running", client.id())))?;
        Ok(Box::new(target.peer(local)?))
    }

    async fn stop(&self, client: &dyn ExecutionClient) -> anyhow::Result<()> {
        self.stopped.lock().push(client.id().to_string());
        Ok(())
    }
}

/// Signer without key material: the sender address goes into `r`
pub struct MockSigner;

impl TransactionSigner for MockSigner {
    fn address(&self, account: usize) -> Address {
        Address::left_padding_from(&(0x1000 + account as u64).to_be_bytes())
    }

    fn sign(
        &self,
        account: usize,
        tx: BlobTransaction,
        blob_ids: &[BlobId],
    ) -> Result<SignedTransaction, TransactionError> {
        let sender = self.address(account);
        let signature = Signature {
            y_parity: false,
            r: U256::from_be_slice(sender.into_word().as_slice()),
            s: U256::from(1),
        };
        Ok(SignedTransaction {
            sender,
            blob_ids: blob_ids.to_vec(),
            tx: tx.into_signed(signature),
            sidecar: BlobSidecar::synthetic(blob_ids),
        })
    }
}
