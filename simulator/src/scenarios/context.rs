//! ScenarioContext - per-scenario state shared by every step

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use anyhow::{bail, Result};
use engine_common::config::{BlobGasConfig, ForkConfig, DEFAULT_CHAIN_ID};
use engine_common::transaction::TransactionSigner;
use log::{info, warn};
use parking_lot::Mutex;

use crate::clmock::ClMock;
use crate::devp2p::{ForkFilter, Status, ETH_PROTOCOL_VERSION};
use crate::engine::{ClientLauncher, ExecutionClient};
use crate::error::Failure;
use crate::orchestrator::{Clock, SystemClock};
use crate::txgen::TransactionGenerator;
use crate::validator::PayloadValidator;
use crate::waiters::ReadinessPolicy;

/// Everything one scenario owns. Created at test start, dropped at test end,
/// never shared between scenarios.
pub struct ScenarioContext {
    pub name: String,
    pub forks: ForkConfig,
    pub blob_gas: BlobGasConfig,
    pub chain_id: u64,
    pub clmock: ClMock,
    pub txgen: TransactionGenerator,
    pub validator: PayloadValidator,
    pub launcher: Arc<dyn ClientLauncher>,
    pub clock: Arc<dyn Clock>,
    pub readiness: ReadinessPolicy,
    /// Every client started for this scenario, stopped at teardown
    launched: Mutex<Vec<Arc<dyn ExecutionClient>>>,
}

impl ScenarioContext {
    pub fn builder(name: impl Into<String>) -> ScenarioContextBuilder {
        ScenarioContextBuilder::new(name)
    }

    pub fn track_launched(&self, client: Arc<dyn ExecutionClient>) {
        self.launched.lock().push(client);
    }

    pub fn launched_count(&self) -> usize {
        self.launched.lock().len()
    }

    /// Our eth/68 `Status`: genesis and head from the CL mock, fork id at
    /// the head's timestamp
    pub fn local_status(&self) -> Result<(Status, ForkFilter), Failure> {
        let genesis = self
            .clmock
            .genesis()
            .ok_or_else(|| Failure::sequencing("CL mock has no genesis yet"))?;
        let head = self.clmock.head().unwrap_or(genesis);
        let filter = ForkFilter::new(genesis.hash, &self.forks, head.timestamp);
        let status = Status {
            version: ETH_PROTOCOL_VERSION,
            network_id: self.chain_id,
            total_difficulty: U256::ZERO,
            block_hash: head.hash,
            genesis: genesis.hash,
            fork_id: filter.current(),
        };
        Ok((status, filter))
    }

    /// Stops every launched client. Errors are logged, never returned:
    /// teardown has to reach every client.
    pub async fn teardown(&self) {
        let launched: Vec<_> = self.launched.lock().drain(..).collect();
        for client in launched {
            match self.launcher.stop(client.as_ref()).await {
                Ok(()) => info!("[{}] stopped {}", self.name, client.id()),
                Err(e) => warn!("[{}] failed to stop {}: {:#}", self.name, client.id(), e),
            }
        }
    }
}

/// Builder for [`ScenarioContext`]
///
/// # Example
///
/// ```rust,ignore
/// let ctx = ScenarioContext::builder("Blob Transactions On Block 1")
///     .with_forks(ForkConfig::default().with_cancun_fork_height(1))
///     .with_signer(signer)
///     .with_launcher(launcher)
///     .with_clock(Arc::new(PausedClock::new()))
///     .build()?;
/// ```
pub struct ScenarioContextBuilder {
    name: String,
    forks: ForkConfig,
    blob_gas: BlobGasConfig,
    chain_id: u64,
    signer: Option<Arc<dyn TransactionSigner>>,
    launcher: Option<Arc<dyn ClientLauncher>>,
    clock: Option<Arc<dyn Clock>>,
    get_payload_delay: Duration,
    readiness: ReadinessPolicy,
}

impl ScenarioContextBuilder {
    /// Defaults: Shanghai and Cancun at genesis, Cancun blob gas parameters,
    /// the default chain id and real time
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            forks: ForkConfig::default(),
            blob_gas: BlobGasConfig::default(),
            chain_id: DEFAULT_CHAIN_ID,
            signer: None,
            launcher: None,
            clock: None,
            get_payload_delay: Duration::ZERO,
            readiness: ReadinessPolicy::default(),
        }
    }

    pub fn with_forks(mut self, forks: ForkConfig) -> Self {
        self.forks = forks;
        self
    }

    pub fn with_blob_gas(mut self, blob_gas: BlobGasConfig) -> Self {
        self.blob_gas = blob_gas;
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn TransactionSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ClientLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// If not set, uses `SystemClock`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_get_payload_delay(mut self, delay: Duration) -> Self {
        self.get_payload_delay = delay;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn build(self) -> Result<ScenarioContext> {
        let Some(signer) = self.signer else {
            bail!("scenario '{}' has no transaction signer", self.name);
        };
        let Some(launcher) = self.launcher else {
            bail!("scenario '{}' has no client launcher", self.name);
        };
        if let Some(cancun) = self.forks.cancun_timestamp {
            if !self.forks.is_shanghai(cancun) {
                bail!(
                    "scenario '{}' activates Cancun at {} before Shanghai ({:?})",
                    self.name,
                    cancun,
                    self.forks.shanghai_timestamp
                );
            }
        }
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        Ok(ScenarioContext {
            clmock: ClMock::new(self.forks.clone(), self.blob_gas, clock.clone())
                .with_get_payload_delay(self.get_payload_delay),
            txgen: TransactionGenerator::new(self.chain_id, self.blob_gas, signer),
            validator: PayloadValidator::new(self.forks.clone(), self.blob_gas),
            name: self.name,
            forks: self.forks,
            blob_gas: self.blob_gas,
            chain_id: self.chain_id,
            launcher,
            clock,
            readiness: self.readiness,
            launched: Mutex::new(Vec::new()),
        })
    }
}
