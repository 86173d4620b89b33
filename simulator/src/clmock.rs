//! Consensus-layer mock.
//!
//! Drives block production on the attached clients: ask the primary to
//! build on the head, fetch the payload, broadcast it, promote it. All
//! building for one scenario happens under `build_lock`, so a forkchoice
//! update is never issued while a previous build is still in flight.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{keccak256, Address, B256, U256};
use engine_common::blob::VersionedHashes;
use engine_common::config::{BlobGasConfig, ForkConfig};
use engine_common::fee::{blob_gas_price, next_excess_blob_gas};
use engine_common::payload::{
    BlobsBundle, EngineVersion, ExecutionPayload, ForkchoiceState, PayloadAttributes,
    PayloadCustomizer, PayloadStatusKind,
};
use engine_common::rpc::{BlockHeader, BlockTag};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::engine::{ClientHandle, ClientRole, ExecutionClient};
use crate::error::Failure;
use crate::orchestrator::Clock;
use crate::validator::{ExpectedOutcome, PayloadValidator, ShapeExpectation};

/// Chain position the next payload builds on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    pub hash: B256,
    pub number: u64,
    pub timestamp: u64,
    pub blob_gas_used: Option<u64>,
    pub excess_blob_gas: Option<u64>,
}

impl From<&BlockHeader> for Head {
    fn from(header: &BlockHeader) -> Self {
        Self {
            hash: header.hash,
            number: header.number,
            timestamp: header.timestamp,
            blob_gas_used: header.blob_gas_used,
            excess_blob_gas: header.excess_blob_gas,
        }
    }
}

impl From<&ExecutionPayload> for Head {
    fn from(payload: &ExecutionPayload) -> Self {
        Self {
            hash: payload.block_hash,
            number: payload.block_number,
            timestamp: payload.timestamp,
            blob_gas_used: payload.blob_gas_used,
            excess_blob_gas: payload.excess_blob_gas,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClMockPhase {
    Uninitialized,
    Ready,
    Building,
    /// A build failed; the reason is kept for every later request
    Faulted(String),
}

/// Per-build customization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    pub customizer: PayloadCustomizer,
    /// Replaces the versioned-hash list sent with the payload
    pub versioned_hashes: Option<VersionedHashes>,
    /// Replaces the `newPayload` version chosen by the payload's fork
    pub new_payload_version: Option<EngineVersion>,
    pub expectation: Option<ExpectedOutcome>,
    pub get_payload_delay: Option<Duration>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_customizer(mut self, customizer: PayloadCustomizer) -> Self {
        self.customizer = customizer;
        self
    }

    pub fn with_versioned_hashes(mut self, hashes: VersionedHashes) -> Self {
        self.versioned_hashes = Some(hashes);
        self
    }

    pub fn with_new_payload_version(mut self, version: EngineVersion) -> Self {
        self.new_payload_version = Some(version);
        self
    }

    pub fn with_expectation(mut self, expectation: ExpectedOutcome) -> Self {
        self.expectation = Some(expectation);
        self
    }

    pub fn with_get_payload_delay(mut self, delay: Duration) -> Self {
        self.get_payload_delay = Some(delay);
        self
    }

    /// Whether the primary receives something other than what it built
    pub fn is_customized(&self) -> bool {
        !self.customizer.is_noop()
            || self.versioned_hashes.is_some()
            || self.new_payload_version.is_some()
    }
}

/// A payload the mock obtained from the primary, canonical form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedPayload {
    pub payload: ExecutionPayload,
    pub parent_beacon_root: Option<B256>,
    /// Hashes sent with the canonical payload; `None` before Cancun
    pub versioned_hashes: Option<Vec<B256>>,
    pub blobs_bundle: Option<BlobsBundle>,
    pub version: EngineVersion,
    /// False when the step expected the primary to refuse it
    pub promoted: bool,
}

pub struct ClMock {
    forks: ForkConfig,
    blob_gas: BlobGasConfig,
    validator: PayloadValidator,
    clock: Arc<dyn Clock>,
    fee_recipient: Address,
    get_payload_delay: Duration,
    clients: RwLock<Vec<ClientHandle>>,
    phase: RwLock<ClMockPhase>,
    genesis: RwLock<Option<Head>>,
    head: RwLock<Option<Head>>,
    history: RwLock<Vec<ProducedPayload>>,
    build_lock: Mutex<()>,
}

impl ClMock {
    pub fn new(forks: ForkConfig, blob_gas: BlobGasConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            validator: PayloadValidator::new(forks.clone(), blob_gas),
            forks,
            blob_gas,
            clock,
            fee_recipient: Address::ZERO,
            get_payload_delay: Duration::ZERO,
            clients: RwLock::new(Vec::new()),
            phase: RwLock::new(ClMockPhase::Uninitialized),
            genesis: RwLock::new(None),
            head: RwLock::new(None),
            history: RwLock::new(Vec::new()),
            build_lock: Mutex::new(()),
        }
    }

    pub fn with_fee_recipient(mut self, fee_recipient: Address) -> Self {
        self.fee_recipient = fee_recipient;
        self
    }

    /// Delay between requesting a build and fetching the payload, unless a
    /// step overrides it
    pub fn with_get_payload_delay(mut self, delay: Duration) -> Self {
        self.get_payload_delay = delay;
        self
    }

    pub fn forks(&self) -> &ForkConfig {
        &self.forks
    }

    pub fn blob_gas(&self) -> &BlobGasConfig {
        &self.blob_gas
    }

    /// Attaches a client and returns its index. The first client attached
    /// has to be the primary.
    pub fn add_client(
        &self,
        client: Arc<dyn ExecutionClient>,
        role: ClientRole,
    ) -> Result<usize, Failure> {
        let mut clients = self.clients.write();
        if clients.is_empty() != (role == ClientRole::Primary) {
            return Err(Failure::sequencing(format!(
                "client {} cannot attach as {role}: the first client, and only it, is the primary",
                clients.len()
            )));
        }
        let index = clients.len();
        info!("Attaching client {} ({}) as {}", index, client.id(), role);
        clients.push(ClientHandle {
            index,
            role,
            client,
        });
        Ok(index)
    }

    pub fn client(&self, index: usize) -> Result<ClientHandle, Failure> {
        self.clients
            .read()
            .get(index)
            .cloned()
            .ok_or_else(|| Failure::sequencing(format!("unknown client {index}")))
    }

    pub fn clients(&self) -> Vec<ClientHandle> {
        self.clients.read().clone()
    }

    fn primary(&self) -> Result<ClientHandle, Failure> {
        self.client(0)
    }

    /// Reads genesis and the current head from the primary
    pub async fn initialize(&self) -> Result<(), Failure> {
        let _building = self.build_lock.lock().await;
        let primary = self.primary()?;
        let genesis = primary
            .client
            .block_by_number(BlockTag::Earliest)
            .await
            .map_err(Failure::from_rpc)?
            .ok_or_else(|| Failure::violation("eth_getBlockByNumber", "genesis block", "null"))?;
        let latest = primary
            .client
            .block_by_number(BlockTag::Latest)
            .await
            .map_err(Failure::from_rpc)?
            .ok_or_else(|| Failure::violation("eth_getBlockByNumber", "latest block", "null"))?;

        info!(
            "CL mock ready: genesis {} head {} at {}",
            genesis.hash, latest.hash, latest.number
        );
        *self.genesis.write() = Some(Head::from(&genesis));
        *self.head.write() = Some(Head::from(&latest));
        *self.phase.write() = ClMockPhase::Ready;
        Ok(())
    }

    pub fn phase(&self) -> ClMockPhase {
        self.phase.read().clone()
    }

    pub fn head(&self) -> Option<Head> {
        *self.head.read()
    }

    pub fn genesis(&self) -> Option<Head> {
        *self.genesis.read()
    }

    pub fn latest_payload(&self) -> Option<ProducedPayload> {
        self.history.read().last().cloned()
    }

    pub fn payload_at(&self, number: u64) -> Option<ProducedPayload> {
        self.history
            .read()
            .iter()
            .rev()
            .find(|p| p.payload.block_number == number)
            .cloned()
    }

    pub fn produced_count(&self) -> usize {
        self.history.read().len()
    }

    /// Excess blob gas of the block built on the current head
    pub fn next_excess_blob_gas(&self) -> u64 {
        let head = self.head();
        next_excess_blob_gas(
            head.and_then(|h| h.excess_blob_gas).unwrap_or_default(),
            head.and_then(|h| h.blob_gas_used).unwrap_or_default(),
            &self.blob_gas,
        )
    }

    pub fn next_blob_gas_price(&self) -> U256 {
        blob_gas_price(self.next_excess_blob_gas(), &self.blob_gas)
    }

    /// Builds one payload on the current head, broadcasts and promotes it
    pub async fn produce_payload(&self, options: &BuildOptions) -> Result<ProducedPayload, Failure> {
        let _building = self.build_lock.lock().await;
        match self.phase() {
            ClMockPhase::Ready => {}
            ClMockPhase::Uninitialized => {
                return Err(Failure::sequencing("CL mock is not initialized"))
            }
            ClMockPhase::Faulted(reason) => {
                return Err(Failure::sequencing(format!(
                    "CL mock faulted earlier: {reason}"
                )))
            }
            ClMockPhase::Building => {
                return Err(Failure::sequencing("CL mock is already building"))
            }
        }
        *self.phase.write() = ClMockPhase::Building;

        match self.build(options).await {
            Ok(produced) => {
                if produced.promoted {
                    *self.head.write() = Some(Head::from(&produced.payload));
                }
                self.history.write().push(produced.clone());
                *self.phase.write() = ClMockPhase::Ready;
                Ok(produced)
            }
            Err(failure) => {
                error!("CL mock faulted: {}", failure);
                *self.phase.write() = ClMockPhase::Faulted(failure.to_string());
                Err(failure)
            }
        }
    }

    fn attributes(&self, head: &Head) -> PayloadAttributes {
        let timestamp = self.forks.next_timestamp(head.timestamp);
        PayloadAttributes {
            timestamp,
            prev_randao: keccak256((head.number + 1).to_be_bytes()),
            suggested_fee_recipient: self.fee_recipient,
            withdrawals: self.forks.is_shanghai(timestamp).then(Vec::new),
            parent_beacon_block_root: self
                .forks
                .is_cancun(timestamp)
                .then(|| keccak256(head.hash)),
        }
    }

    async fn build(&self, options: &BuildOptions) -> Result<ProducedPayload, Failure> {
        let head = self
            .head()
            .ok_or_else(|| Failure::sequencing("no chain head known"))?;
        let primary = self.primary()?;
        let attributes = self.attributes(&head);
        let version = EngineVersion::for_timestamp(&self.forks, attributes.timestamp);
        let cancun = self.forks.is_cancun(attributes.timestamp);

        debug!(
            "Building block {} at {} ({}) on {}",
            head.number + 1,
            attributes.timestamp,
            version,
            head.hash
        );
        let response = primary
            .client
            .forkchoice_updated(version, &ForkchoiceState::at(head.hash), Some(&attributes))
            .await
            .map_err(Failure::from_rpc)?;
        if response.payload_status.status != PayloadStatusKind::Valid {
            return Err(Failure::violation(
                "forkchoiceUpdated with attributes",
                PayloadStatusKind::Valid,
                response.payload_status.status,
            ));
        }
        let payload_id = response.payload_id.ok_or_else(|| {
            Failure::violation("forkchoiceUpdated with attributes", "a payload id", "none")
        })?;

        let delay = options.get_payload_delay.unwrap_or(self.get_payload_delay);
        if !delay.is_zero() {
            self.clock.sleep(delay).await;
        }

        let built = primary
            .client
            .get_payload(version, payload_id)
            .await
            .map_err(Failure::from_rpc)?;
        let excess = cancun.then(|| self.next_excess_blob_gas());
        self.validator.check_shape(
            &built,
            &ShapeExpectation {
                parent_hash: head.hash,
                block_number: head.number + 1,
                timestamp: attributes.timestamp,
                excess_blob_gas: excess,
            },
        )?;

        let payload = built.execution_payload;
        let beacon_root = attributes.parent_beacon_block_root;
        let versioned_hashes = if cancun {
            Some(payload.blob_versioned_hashes()?)
        } else {
            None
        };

        let mut promoted = true;
        if options.is_customized() {
            self.send_customized(&primary, &payload, beacon_root, &versioned_hashes, version, options)
                .await?;
        } else if let Some(expected) = options
            .expectation
            .as_ref()
            .filter(|e| !e.accepts(PayloadStatusKind::Valid))
        {
            let response = primary
                .client
                .new_payload(version, &payload, versioned_hashes.as_deref(), beacon_root)
                .await;
            self.validator
                .classify("newPayload", response, expected)?;
            info!(
                "Payload {} answered {} as expected; not promoting it",
                payload.block_number, expected
            );
            promoted = false;
        }

        if promoted {
            self.broadcast(&payload, beacon_root, versioned_hashes.as_deref(), version)
                .await?;
            self.promote(&head, &payload, version).await?;
        }

        Ok(ProducedPayload {
            payload,
            parent_beacon_root: beacon_root,
            versioned_hashes,
            blobs_bundle: built.blobs_bundle,
            version,
            promoted,
        })
    }

    async fn send_customized(
        &self,
        primary: &ClientHandle,
        payload: &ExecutionPayload,
        beacon_root: Option<B256>,
        versioned_hashes: &Option<Vec<B256>>,
        version: EngineVersion,
        options: &BuildOptions,
    ) -> Result<(), Failure> {
        let (custom, custom_root) = options.customizer.apply(payload, beacon_root);
        let hashes = match &options.versioned_hashes {
            Some(explicit) => explicit.hashes(),
            None => versioned_hashes.clone(),
        };
        let send_version = options.new_payload_version.unwrap_or(version);
        let expected = options
            .expectation
            .clone()
            .unwrap_or_else(ExpectedOutcome::invalid);

        debug!(
            "Sending customized payload {} ({}) to {}, expecting {}",
            custom.block_hash,
            send_version,
            primary.client.id(),
            expected
        );
        let response = primary
            .client
            .new_payload(send_version, &custom, hashes.as_deref(), custom_root)
            .await;
        self.validator
            .classify("newPayload (customized)", response, &expected)?;
        if expected.expects_valid() {
            warn!(
                "Customized payload {} was expected to be valid",
                custom.block_hash
            );
        }
        Ok(())
    }

    async fn broadcast(
        &self,
        payload: &ExecutionPayload,
        beacon_root: Option<B256>,
        versioned_hashes: Option<&[B256]>,
        version: EngineVersion,
    ) -> Result<(), Failure> {
        for handle in self.clients() {
            if !handle.role.receives_payloads() {
                continue;
            }
            let status = handle
                .client
                .new_payload(version, payload, versioned_hashes, beacon_root)
                .await
                .map_err(Failure::from_rpc)?;
            let acceptable = match handle.role {
                ClientRole::Primary => status.status == PayloadStatusKind::Valid,
                _ => !status.status.is_invalid(),
            };
            if !acceptable {
                return Err(Failure::violation(
                    format!("newPayload on client {}", handle.index),
                    "VALID",
                    status.status,
                ));
            }
        }
        Ok(())
    }

    async fn promote(
        &self,
        previous: &Head,
        payload: &ExecutionPayload,
        version: EngineVersion,
    ) -> Result<(), Failure> {
        let state = ForkchoiceState {
            head_block_hash: payload.block_hash,
            safe_block_hash: previous.hash,
            finalized_block_hash: previous.hash,
        };
        for handle in self.clients() {
            if !handle.role.receives_forkchoice() {
                continue;
            }
            let response = handle
                .client
                .forkchoice_updated(version, &state, None)
                .await
                .map_err(Failure::from_rpc)?;
            let status = response.payload_status.status;
            let acceptable = match handle.role {
                ClientRole::Primary => status == PayloadStatusKind::Valid,
                _ => matches!(
                    status,
                    PayloadStatusKind::Valid | PayloadStatusKind::Syncing | PayloadStatusKind::Accepted
                ),
            };
            if !acceptable {
                return Err(Failure::violation(
                    format!("forkchoiceUpdated on client {}", handle.index),
                    "VALID",
                    status,
                ));
            }
        }
        info!(
            "Promoted block {} ({}) to head",
            payload.block_number, payload.block_hash
        );
        Ok(())
    }
}
