//! Scenario runner.
//!
//! Gives every test its own primary client and [`ScenarioContext`], runs the
//! tests concurrently within the configured number of client slots, and
//! turns each outcome into a [`TestResult`]. A primary that cannot be
//! launched or never becomes reachable aborts the whole run.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use engine_common::transaction::TransactionSigner;
use futures::future::join_all;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::engine::{ClientLauncher, ClientRole, ExecutionClient, LaunchOptions};
use crate::error::RunError;
use crate::orchestrator::Clock;
use crate::scenarios::{CancunTest, ScenarioContext, ScenarioExecutor};
use crate::waiters::{wait_for_client_ready, ReadinessPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Tests running at once; each one holds at least one client process
    pub client_slots: usize,
    /// Default wait between starting a build and fetching the payload
    pub get_payload_delay: Duration,
    pub readiness: ReadinessPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            client_slots: 4,
            get_payload_delay: Duration::ZERO,
            readiness: ReadinessPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub description: String,
    /// Failing step and the expected-vs-actual text
    pub failure: Option<String>,
}

impl TestResult {
    fn passed(test: &CancunTest) -> Self {
        Self {
            name: test.name.clone(),
            passed: true,
            description: test.about.clone(),
            failure: None,
        }
    }

    fn failed(name: String, description: String, failure: String) -> Self {
        Self {
            name,
            passed: false,
            description,
            failure: Some(failure),
        }
    }
}

pub struct TestRunner {
    config: RunnerConfig,
    launcher: Arc<dyn ClientLauncher>,
    signer: Arc<dyn TransactionSigner>,
    clock: Arc<dyn Clock>,
}

impl TestRunner {
    pub fn new(
        config: RunnerConfig,
        launcher: Arc<dyn ClientLauncher>,
        signer: Arc<dyn TransactionSigner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            launcher,
            signer,
            clock,
        }
    }

    /// Runs every test and returns the results in input order
    ///
    /// # Errors
    ///
    /// [`RunError::Setup`] as soon as any test could not get a reachable
    /// primary client; the other results are discarded.
    pub async fn run_all(self: &Arc<Self>, tests: Vec<CancunTest>) -> Result<Vec<TestResult>, RunError> {
        let slots = Arc::new(Semaphore::new(self.config.client_slots.max(1)));
        let meta: Vec<(String, String)> = tests
            .iter()
            .map(|test| (test.name.clone(), test.about.clone()))
            .collect();

        let tasks = tests.into_iter().map(|test| {
            let runner = self.clone();
            let slots = slots.clone();
            tokio::spawn(async move {
                let _permit = slots
                    .acquire_owned()
                    .await
                    .map_err(|_| RunError::Setup("client slots closed".to_string()))?;
                runner.run_one(test).await
            })
        });

        let mut results = Vec::with_capacity(meta.len());
        for ((name, about), joined) in meta.into_iter().zip(join_all(tasks).await) {
            match joined {
                Ok(result) => results.push(result?),
                Err(e) => {
                    error!("Test '{}' aborted: {}", name, e);
                    results.push(TestResult::failed(name, about, format!("aborted: {e}")));
                }
            }
        }

        let passed = results.iter().filter(|r| r.passed).count();
        info!("{}/{} test(s) passed", passed, results.len());
        Ok(results)
    }

    /// Runs a single test on a fresh primary. Secondary clients and the
    /// primary are stopped afterwards whatever the outcome.
    pub async fn run_one(&self, test: CancunTest) -> Result<TestResult, RunError> {
        info!("=== {} ===", test.name);
        let options = LaunchOptions::new(ClientRole::Primary, test.forks.clone());
        let primary = self
            .launcher
            .launch(&options)
            .await
            .map_err(|e| RunError::Setup(format!("{}: cannot launch primary: {e:#}", test.name)))?;

        let chain_id = match self.reach(primary.as_ref()).await {
            Ok(chain_id) => chain_id,
            Err(e) => return Err(self.abandon(primary.as_ref(), &test, e).await),
        };

        let built = ScenarioContext::builder(test.name.clone())
            .with_forks(test.forks.clone())
            .with_chain_id(chain_id)
            .with_signer(self.signer.clone())
            .with_launcher(self.launcher.clone())
            .with_clock(self.clock.clone())
            .with_get_payload_delay(self.config.get_payload_delay)
            .with_readiness(self.config.readiness)
            .build();
        let ctx = match built {
            Ok(ctx) => Arc::new(ctx),
            Err(e) => return Err(self.abandon(primary.as_ref(), &test, e).await),
        };
        ctx.track_launched(primary.clone());

        let outcome = self.execute(&ctx, primary, &test).await;
        ctx.teardown().await;

        Ok(match outcome {
            Ok(()) => {
                info!("PASS {}", test.name);
                TestResult::passed(&test)
            }
            Err(e) => {
                error!("FAIL {}: {:#}", test.name, e);
                TestResult::failed(test.name, test.about, format!("{e:#}"))
            }
        })
    }

    /// Stops a primary the scenario never took ownership of
    async fn abandon(
        &self,
        primary: &dyn ExecutionClient,
        test: &CancunTest,
        cause: anyhow::Error,
    ) -> RunError {
        if let Err(stop) = self.launcher.stop(primary).await {
            warn!("Failed to stop {}: {:#}", primary.id(), stop);
        }
        RunError::Setup(format!("{}: {cause:#}", test.name))
    }

        /// Readiness and chain id of a freshly launched primary
    async fn reach(&self, primary: &dyn ExecutionClient) -> anyhow::Result<u64> {
        wait_for_client_ready(primary, self.clock.as_ref(), &self.config.readiness)
            .await
            .with_context(|| format!("primary {} never became reachable", primary.id()))?;
        primary
            .chain_id()
            .await
            .with_context(|| format!("eth_chainId on {}", primary.id()))
    }

    async fn execute(
        &self,
        ctx: &Arc<ScenarioContext>,
        primary: Arc<dyn ExecutionClient>,
        test: &CancunTest,
    ) -> anyhow::Result<()> {
        ctx.clmock.add_client(primary, ClientRole::Primary)?;
        ctx.clmock.initialize().await?;
        let mut executor = ScenarioExecutor::new();
        executor.execute(ctx, &test.steps).await?;
        Ok(())
    }
}

/// Plain-text summary of a run: one line per test, failure text wrapped
/// under the failing test
pub fn render_results(results: &[TestResult]) -> String {
    let mut out = String::new();
    for result in results {
        let _ = writeln!(
            out,
            "[{}] {}",
            if result.passed { "PASS" } else { "FAIL" },
            result.name
        );
        if let Some(failure) = &result.failure {
            for line in textwrap::wrap(failure, 76) {
                let _ = writeln!(out, "    {line}");
            }
        }
    }
    let passed = results.iter().filter(|r| r.passed).count();
    let _ = writeln!(out, "{passed}/{} passed", results.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_wraps_failures() {
        let results = vec![
            TestResult {
                name: "Replace Blob Transactions".to_string(),
                passed: true,
                description: String::new(),
                failure: None,
            },
            TestResult::failed(
                "Parallel Blob Transactions".to_string(),
                String::new(),
                "Failed at step 2 (NewPayloads: 1 payload(s), 6 blob(s) each): payload content: \
                 expected blob #0 at position 0, got blob #6"
                    .to_string(),
            ),
        ];
        let text = render_results(&results);
        assert!(text.starts_with("[PASS] Replace Blob Transactions\n"));
        assert!(text.contains("[FAIL] Parallel Blob Transactions\n    Failed at step 2"));
        assert!(text.lines().all(|line| line.len() <= 80));
        assert!(text.ends_with("1/2 passed\n"));
    }

    #[test]
    fn test_config_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.client_slots, 4);
        assert!(config.get_payload_delay.is_zero());
    }
}
