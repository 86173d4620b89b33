//! Readiness waiters.
//!
//! A freshly launched client usually refuses connections for a while. These
//! helpers poll it with bounded exponential backoff. Only transport errors
//! are retried: a JSON-RPC error answer comes from a client that is up but
//! broken, and is returned at once.

use std::time::Duration;

use engine_common::rpc::RpcError;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::engine::ExecutionClient;
use crate::orchestrator::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            max_attempts: 8,
        }
    }
}

/// Polls `eth_blockNumber` until the client answers; returns its head number
pub async fn wait_for_client_ready(
    client: &dyn ExecutionClient,
    clock: &dyn Clock,
    policy: &ReadinessPolicy,
) -> Result<u64, RpcError> {
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        match client.block_number().await {
            Ok(number) => {
                debug!("{} ready at block {} (attempt {})", client.id(), number, attempt);
                return Ok(number);
            }
            Err(e) if e.is_transport() && attempt < policy.max_attempts => {
                debug!(
                    "{} not ready (attempt {}/{}): {}; retrying in {:?}",
                    client.id(),
                    attempt,
                    policy.max_attempts,
                    e,
                    backoff
                );
                clock.sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
