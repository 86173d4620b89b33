//! Test steps.
//!
//! Every step kind is a variant of [`Step`] and runs through
//! [`Step::execute`] against the scenario's shared [`ScenarioContext`].

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use engine_common::blob::{BlobId, VersionedHashes};
use engine_common::payload::{EngineVersion, PayloadCustomizer};
use engine_common::transaction::SignedTransaction;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::context::ScenarioContext;
use crate::clmock::{BuildOptions, ProducedPayload};
use crate::devp2p::DevP2PProbe;
use crate::engine::{ClientRole, LaunchOptions};
use crate::error::{Failure, MemberFailure};
use crate::invariants;
use crate::txgen::SendBlobTransactions;
use crate::validator::{ExpectedOutcome, PayloadExpectation};
use crate::waiters::wait_for_client_ready;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    NewPayloads(NewPayloads),
    SendBlobTransactions(SendBlobTransactions),
    LaunchClients(LaunchClients),
    SendModifiedLatestPayload(SendModifiedLatestPayload),
    DevP2PRequestPooledTransactionHash(DevP2PRequestPooledTransactionHash),
    DevP2PCheckForkId(DevP2PCheckForkId),
    /// Members run concurrently; the group fails with every member failure
    ParallelSteps(Vec<Step>),
}

impl Step {
    /// One-line description for logs and reports
    pub fn summary(&self) -> String {
        match self {
            Self::NewPayloads(step) => format!(
                "NewPayloads: {} payload(s), {} blob(s) each",
                step.payload_count, step.expected_included_blob_count
            ),
            Self::SendBlobTransactions(step) => format!(
                "SendBlobTransactions: {} tx(s) x {} blob(s) from account {} to client {}{}",
                step.count,
                step.blobs_per_transaction,
                step.account,
                step.client,
                if step.replace { " (replace)" } else { "" }
            ),
            Self::LaunchClients(step) => {
                format!("LaunchClients: {} client(s) as {}", step.count, step.role)
            }
            Self::SendModifiedLatestPayload(step) => format!(
                "SendModifiedLatestPayload: client {}, expecting {}",
                step.client, step.expected
            ),
            Self::DevP2PRequestPooledTransactionHash(step) => format!(
                "DevP2PRequestPooledTransactionHash: client {}, transactions {:?}",
                step.client, step.transaction_indexes
            ),
            Self::DevP2PCheckForkId(step) => format!("DevP2PCheckForkId: client {}", step.client),
            Self::ParallelSteps(steps) => format!("ParallelSteps: {} step(s)", steps.len()),
        }
    }

    pub fn execute<'a>(&'a self, ctx: &'a Arc<ScenarioContext>) -> BoxFuture<'a, Result<(), Failure>> {
        async move {
            match self {
                Self::NewPayloads(step) => step.execute(ctx).await,
                Self::SendBlobTransactions(step) => send_blob_transactions(step, ctx).await,
                Self::LaunchClients(step) => step.execute(ctx).await,
                Self::SendModifiedLatestPayload(step) => step.execute(ctx).await,
                Self::DevP2PRequestPooledTransactionHash(step) => step.execute(ctx).await,
                Self::DevP2PCheckForkId(step) => step.execute(ctx).await,
                Self::ParallelSteps(steps) => execute_parallel(steps, ctx).await,
            }
        }
        .boxed()
    }
}

async fn execute_parallel(steps: &[Step], ctx: &Arc<ScenarioContext>) -> Result<(), Failure> {
    let tasks = steps.iter().cloned().map(|step| {
        let ctx = ctx.clone();
        tokio::spawn(async move { step.execute(&ctx).await })
    });
    let results = join_all(tasks).await;

    let mut failures = Vec::new();
    for ((index, result), step) in results.into_iter().enumerate().zip(steps) {
        let failure = match result {
            Ok(Ok(())) => continue,
            Ok(Err(failure)) => failure,
            Err(join) => Failure::sequencing(format!("parallel member did not complete: {join}")),
        };
        failures.push(MemberFailure {
            index,
            step: step.summary(),
            failure,
        });
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Failure::Parallel(failures))
    }
}

async fn send_blob_transactions(
    step: &SendBlobTransactions,
    ctx: &ScenarioContext,
) -> Result<(), Failure> {
    let target = ctx.clmock.client(step.client)?;
    match ctx.txgen.send(target.client.as_ref(), step).await {
        Ok(_) if step.expect_submission_error => Err(Failure::violation(
            "eth_sendRawTransaction",
            "a rejected submission",
            format!("{} accepted transaction(s)", step.count),
        )),
        Ok(_) => Ok(()),
        Err(Failure::Submission(error)) if step.expect_submission_error => {
            info!("Submission rejected as expected: {}", error);
            Ok(())
        }
        Err(failure) => Err(failure),
    }
}

/// Produce `payload_count` payloads through the CL mock and check each one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPayloads {
    pub payload_count: usize,
    pub expected_included_blob_count: usize,
    /// Exact blobs every payload has to carry, in order
    pub expected_blobs: Option<Vec<BlobId>>,
    /// Check the blobs against the inclusion planner's prediction
    pub expect_planned: bool,
    pub get_payload_delay: Option<Duration>,
    pub customizer: PayloadCustomizer,
    pub versioned_hashes: Option<VersionedHashes>,
    pub version: Option<EngineVersion>,
    pub expected_outcome: Option<ExpectedOutcome>,
}

impl Default for NewPayloads {
    fn default() -> Self {
        Self {
            payload_count: 1,
            expected_included_blob_count: 0,
            expected_blobs: None,
            expect_planned: false,
            get_payload_delay: None,
            customizer: PayloadCustomizer::default(),
            versioned_hashes: None,
            version: None,
            expected_outcome: None,
        }
    }
}

impl NewPayloads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(mut self, payload_count: usize) -> Self {
        self.payload_count = payload_count;
        self
    }

    pub fn blobs(mut self, expected_included_blob_count: usize) -> Self {
        self.expected_included_blob_count = expected_included_blob_count;
        self
    }

    pub fn expected_blobs(mut self, blobs: Vec<BlobId>) -> Self {
        self.expected_blobs = Some(blobs);
        self
    }

    pub fn planned(mut self) -> Self {
        self.expect_planned = true;
        self
    }

    pub fn get_payload_delay(mut self, delay: Duration) -> Self {
        self.get_payload_delay = Some(delay);
        self
    }

    pub fn customizer(mut self, customizer: PayloadCustomizer) -> Self {
        self.customizer = customizer;
        self
    }

    pub fn versioned_hashes(mut self, hashes: VersionedHashes) -> Self {
        self.versioned_hashes = Some(hashes);
        self
    }

    pub fn version(mut self, version: EngineVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn expecting(mut self, outcome: ExpectedOutcome) -> Self {
        self.expected_outcome = Some(outcome);
        self
    }

    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            customizer: self.customizer.clone(),
            versioned_hashes: self.versioned_hashes.clone(),
            new_payload_version: self.version,
            expectation: self.expected_outcome.clone(),
            get_payload_delay: self.get_payload_delay,
        }
    }

    async fn execute(&self, ctx: &ScenarioContext) -> Result<(), Failure> {
        let options = self.build_options();
        for i in 0..self.payload_count {
            let planned = self.expect_planned.then(|| {
                let price = ctx.clmock.next_blob_gas_price();
                ctx.txgen.pool().plan_next_block(price, &ctx.blob_gas)
            });

            let produced = ctx.clmock.produce_payload(&options).await?;
            let number = produced.payload.block_number;
            if !produced.promoted {
                debug!("Payload {} was not promoted; skipping content checks", number);
                continue;
            }

            let expectation = PayloadExpectation {
                blob_count: Some(self.expected_included_blob_count),
                blobs: self
                    .expected_blobs
                    .clone()
                    .or_else(|| planned.map(|block| block.blobs)),
            };
            ctx.validator.check(
                &produced.payload,
                produced.blobs_bundle.as_ref(),
                &expectation,
            )?;
            self.resolve_included(ctx, &produced).await?;
            info!(
                "Payload {}/{} (block {}) carries {} blob(s)",
                i + 1,
                self.payload_count,
                number,
                self.expected_included_blob_count
            );
        }
        Ok(())
    }

    /// Moves included transactions out of the pending pool, checks the
    /// ordering invariants and the receipts the primary reports for them
    async fn resolve_included(
        &self,
        ctx: &ScenarioContext,
        produced: &ProducedPayload,
    ) -> Result<(), Failure> {
        let hashes = produced.payload.transaction_hashes();
        let resolved = {
            let mut pool = ctx.txgen.pool();
            invariants::check_replacements(&hashes, pool.superseded())
                .map_err(|e| Failure::Invariant(e.to_string()))?;
            let resolved = pool.resolve(produced.payload.block_number, &hashes);
            invariants::check_nonce_ordering(pool.inclusions())
                .map_err(|e| Failure::Invariant(e.to_string()))?;
            resolved
        };

        if !ctx.forks.is_cancun(produced.payload.timestamp) {
            return Ok(());
        }
        let primary = ctx.clmock.client(0)?;
        for tx in resolved {
            let receipt = primary
                .client
                .transaction_receipt(tx.hash)
                .await
                .map_err(Failure::from_rpc)?
                .ok_or_else(|| {
                    Failure::violation("eth_getTransactionReceipt", format!("receipt for {}", tx.hash), "null")
                })?;
            let expected = tx.blob_gas(&ctx.blob_gas);
            if receipt.blob_gas_used != Some(expected) {
                return Err(Failure::violation(
                    "eth_getTransactionReceipt",
                    format!("blobGasUsed {expected} for {}", tx.hash),
                    format!("blobGasUsed {:?}", receipt.blob_gas_used),
                ));
            }
            if receipt.block_hash.is_some_and(|hash| hash != produced.payload.block_hash) {
                return Err(Failure::violation(
                    "eth_getTransactionReceipt",
                    format!("block {}", produced.payload.block_hash),
                    format!("block {:?}", receipt.block_hash),
                ));
            }
        }
        Ok(())
    }
}

/// Start new clients and attach them to the CL mock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchClients {
    pub count: usize,
    /// `Detached` keeps the CL mock from sending anything to the clients
    pub role: ClientRole,
    pub skip_bootnode: bool,
}

impl Default for LaunchClients {
    fn default() -> Self {
        Self {
            count: 1,
            role: ClientRole::Mirrored,
            skip_bootnode: false,
        }
    }
}

impl LaunchClients {
    pub fn new(role: ClientRole) -> Self {
        Self {
            role,
            ..Self::default()
        }
    }

    pub fn skip_bootnode(mut self) -> Self {
        self.skip_bootnode = true;
        self
    }

    async fn execute(&self, ctx: &ScenarioContext) -> Result<(), Failure> {
        let options =
            LaunchOptions::new(self.role, ctx.forks.clone()).with_skip_bootnode(self.skip_bootnode);
        for _ in 0..self.count {
            let client = ctx
                .launcher
                .launch(&options)
                .await
                .map_err(|e| Failure::Launcher(format!("{e:#}")))?;
            ctx.track_launched(client.clone());
            wait_for_client_ready(client.as_ref(), ctx.clock.as_ref(), &ctx.readiness)
                .await
                .map_err(Failure::from_rpc)?;
            ctx.clmock.add_client(client, self.role)?;
        }
        Ok(())
    }
}

/// Send the latest produced payload, modified, straight to one client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendModifiedLatestPayload {
    pub client: usize,
    pub versioned_hashes: Option<VersionedHashes>,
    pub customizer: PayloadCustomizer,
    pub version: Option<EngineVersion>,
    pub expected: ExpectedOutcome,
}

impl SendModifiedLatestPayload {
    pub fn new(client: usize, expected: ExpectedOutcome) -> Self {
        Self {
            client,
            versioned_hashes: None,
            customizer: PayloadCustomizer::default(),
            version: None,
            expected,
        }
    }

    pub fn versioned_hashes(mut self, hashes: VersionedHashes) -> Self {
        self.versioned_hashes = Some(hashes);
        self
    }

    pub fn customizer(mut self, customizer: PayloadCustomizer) -> Self {
        self.customizer = customizer;
        self
    }

    async fn execute(&self, ctx: &ScenarioContext) -> Result<(), Failure> {
        let latest = ctx
            .clmock
            .latest_payload()
            .ok_or_else(|| Failure::sequencing("no payload has been produced yet"))?;
        let target = ctx.clmock.client(self.client)?;

        let (payload, beacon_root) = self
            .customizer
            .apply(&latest.payload, latest.parent_beacon_root);
        let hashes = match &self.versioned_hashes {
            Some(explicit) => explicit.hashes(),
            None => latest.versioned_hashes.clone(),
        };
        let version = self.version.unwrap_or(latest.version);
        let response = target
            .client
            .new_payload(version, &payload, hashes.as_deref(), beacon_root)
            .await;
        ctx.validator.classify(
            &format!("{} on client {}", version.new_payload_method(), self.client),
            response,
            &self.expected,
        )
    }
}

/// Ask a client for pooled transactions over eth/68
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevP2PRequestPooledTransactionHash {
    pub client: usize,
    /// Positions in the scenario's submission order
    pub transaction_indexes: Vec<usize>,
    pub wait_for_new_pooled_tx: bool,
}

impl DevP2PRequestPooledTransactionHash {
    async fn execute(&self, ctx: &ScenarioContext) -> Result<(), Failure> {
        let target = ctx.clmock.client(self.client)?;
        let transactions: Vec<SignedTransaction> = self
            .transaction_indexes
            .iter()
            .map(|index| {
                ctx.txgen
                    .sent_transaction(*index)
                    .map(|sent| sent.tx)
                    .ok_or_else(|| Failure::sequencing(format!("no transaction {index} was sent")))
            })
            .collect::<Result<_, _>>()?;

        let (local, _) = ctx.local_status()?;
        let connection = ctx
            .launcher
            .connect_peer(target.client.as_ref(), &local)
            .await?;
        let mut probe = DevP2PProbe::new(connection);

        if self.wait_for_new_pooled_tx {
            let hashes: Vec<B256> = transactions.iter().map(SignedTransaction::hash).collect();
            probe.wait_for_announcements(&hashes).await?;
        }
        probe.request_pooled_transactions(&transactions).await?;
        info!(
            "Client {} served {} pooled transaction(s) intact",
            self.client,
            transactions.len()
        );
        Ok(())
    }
}

/// Peer with a client and require compatible fork ids both ways
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevP2PCheckForkId {
    pub client: usize,
}

impl DevP2PCheckForkId {
    async fn execute(&self, ctx: &ScenarioContext) -> Result<(), Failure> {
        let target = ctx.clmock.client(self.client)?;
        let (local, filter) = ctx.local_status()?;
        let genesis = local.genesis;
        debug!("Peering with client {} as {:?}", self.client, local.fork_id);
        let connection = ctx
            .launcher
            .connect_peer(target.client.as_ref(), &local)
            .await?;
        DevP2PProbe::new(connection).check_fork_id(genesis, &filter)?;
        info!("Client {} accepted fork id {:?}", self.client, local.fork_id);
        Ok(())
    }
}
