//! Scenario execution engine
//!
//! Runs a list of [`Step`]s in order against one [`ScenarioContext`],
//! stopping at the first failure.
//!
//! # Example
//!
//! ```rust,ignore
//! use engine_simulator::scenarios::{NewPayloads, ScenarioExecutor, Step};
//! use engine_simulator::txgen::SendBlobTransactions;
//!
//! let steps = vec![
//!     Step::SendBlobTransactions(SendBlobTransactions::new(3, 1, 1)),
//!     Step::NewPayloads(NewPayloads::new().blobs(3).expected_blobs(blob_list(0, 3))),
//! ];
//!
//! let mut executor = ScenarioExecutor::new();
//! let report = executor.execute(&ctx, &steps).await?;
//!
//! assert!(report.success);
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use super::context::ScenarioContext;
use super::step::Step;

/// Scenario executor that runs a scenario's steps
pub struct ScenarioExecutor {
    /// Execution log
    log: Vec<String>,

    /// Current step number (1-indexed)
    current_step: usize,
}

impl ScenarioExecutor {
    pub fn new() -> Self {
        Self {
            log: Vec::new(),
            current_step: 0,
        }
    }

    /// Execute every step of a scenario
    ///
    /// # Errors
    ///
    /// Returns the first failing step's [`Failure`](crate::error::Failure),
    /// wrapped with the step number and summary. Later steps are not run.
    pub async fn execute(
        &mut self,
        ctx: &Arc<ScenarioContext>,
        steps: &[Step],
    ) -> Result<ExecutionReport> {
        self.log.clear();
        self.current_step = 0;

        self.log(format!("Starting scenario: {}", ctx.name));
        for (idx, step) in steps.iter().enumerate() {
            self.current_step = idx + 1;
            let summary = step.summary();
            self.log(format!("--- Step {}: {} ---", self.current_step, summary));
            info!("[{}] step {}: {}", ctx.name, self.current_step, summary);

            step.execute(ctx)
                .await
                .with_context(|| format!("Failed at step {} ({})", self.current_step, summary))?;

            if let Some(head) = ctx.clmock.head() {
                self.log(format!("  ok, head {} at block {}", head.hash, head.number));
            }
        }

        self.log("=== Scenario completed successfully ===".to_string());
        info!("[{}] completed {} step(s)", ctx.name, self.current_step);

        Ok(ExecutionReport {
            scenario_name: ctx.name.clone(),
            steps_executed: self.current_step,
            success: true,
            log: self.log.clone(),
        })
    }

    fn log(&mut self, message: String) {
        self.log.push(message);
    }

    /// Execution log of the last run, complete up to the failing step
    pub fn get_log(&self) -> &[String] {
        &self.log
    }

    /// Step number that was running when the last run stopped
    pub fn current_step(&self) -> usize {
        self.current_step
    }
}

impl Default for ScenarioExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution report
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub scenario_name: String,
    pub steps_executed: usize,
    pub success: bool,
    pub log: Vec<String>,
}

impl ExecutionReport {
    /// Renders the report as plain text
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Scenario: {}\n", self.scenario_name));
        out.push_str(&format!("Steps: {}\n", self.steps_executed));
        out.push_str(&format!(
            "Status: {}\n",
            if self.success { "SUCCESS" } else { "FAILED" }
        ));
        out.push_str("Execution Log:\n");
        for entry in &self.log {
            out.push_str(entry);
            out.push('\n');
        }
        out
    }
}
