//! Payload validator.
//!
//! Checks what a client built against what the simulator computed on its
//! own, and classifies the client's answer to a `newPayload` call against a
//! step's expected outcome.

use alloy_primitives::B256;
use engine_common::blob::BlobId;
use engine_common::config::{BlobGasConfig, ForkConfig};
use engine_common::payload::{BuiltPayload, ExecutionPayload, PayloadStatus, PayloadStatusKind};
use engine_common::rpc::RpcError;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Failure;

/// What a step expects a client to answer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    /// `None` accepts any status, as long as no error code is expected
    pub status: Option<PayloadStatusKind>,
    /// When set, the call has to fail with exactly this JSON-RPC code
    pub error_code: Option<i64>,
    pub description: String,
}

impl ExpectedOutcome {
    pub fn valid() -> Self {
        Self::status(PayloadStatusKind::Valid)
    }

    pub fn invalid() -> Self {
        Self::status(PayloadStatusKind::Invalid)
    }

    pub fn syncing() -> Self {
        Self::status(PayloadStatusKind::Syncing)
    }

    pub fn status(status: PayloadStatusKind) -> Self {
        Self {
            status: Some(status),
            error_code: None,
            description: String::new(),
        }
    }

    pub fn error(code: i64) -> Self {
        Self {
            status: None,
            error_code: Some(code),
            description: String::new(),
        }
    }

    pub fn invalid_params() -> Self {
        Self::error(engine_common::config::INVALID_PARAMS_ERROR)
    }

    pub fn unsupported_fork() -> Self {
        Self::error(engine_common::config::UNSUPPORTED_FORK_ERROR)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether `status` satisfies this expectation.
    ///
    /// `INVALID_BLOCK_HASH` counts as invalid, and `SYNCING` and `ACCEPTED`
    /// are interchangeable: both mean the client could not validate yet.
    pub fn accepts(&self, status: PayloadStatusKind) -> bool {
        if self.error_code.is_some() {
            return false;
        }
        match self.status {
            None => true,
            Some(PayloadStatusKind::Invalid | PayloadStatusKind::InvalidBlockHash) => {
                status.is_invalid()
            }
            Some(PayloadStatusKind::Syncing | PayloadStatusKind::Accepted) => matches!(
                status,
                PayloadStatusKind::Syncing | PayloadStatusKind::Accepted
            ),
            Some(PayloadStatusKind::Valid) => status == PayloadStatusKind::Valid,
        }
    }

    pub fn expects_valid(&self) -> bool {
        self.error_code.is_none() && self.status == Some(PayloadStatusKind::Valid)
    }
}

impl std::fmt::Display for ExpectedOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.error_code, self.status) {
            (Some(code), _) => write!(f, "error {code}")?,
            (None, Some(status)) => write!(f, "status {status}")?,
            (None, None) => write!(f, "any status")?,
        }
        if !self.description.is_empty() {
            write!(f, " ({})", self.description)?;
        }
        Ok(())
    }
}

/// Blob content a built payload has to carry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PayloadExpectation {
    pub blob_count: Option<usize>,
    /// Exact blobs, in inclusion order
    pub blobs: Option<Vec<BlobId>>,
}

/// Where a freshly built payload has to sit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeExpectation {
    pub parent_hash: B256,
    pub block_number: u64,
    pub timestamp: u64,
    /// Excess blob gas derived from the parent; `None` before Cancun
    pub excess_blob_gas: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PayloadValidator {
    forks: ForkConfig,
    blob_gas: BlobGasConfig,
}

impl PayloadValidator {
    pub fn new(forks: ForkConfig, blob_gas: BlobGasConfig) -> Self {
        Self { forks, blob_gas }
    }

    /// Fork-dependent field presence of a `getPayload` result, and its
    /// position on the chain
    pub fn check_shape(
        &self,
        built: &BuiltPayload,
        expected: &ShapeExpectation,
    ) -> Result<(), Failure> {
        const STEP: &str = "getPayload";
        let payload = &built.execution_payload;

        if payload.parent_hash != expected.parent_hash {
            return Err(Failure::violation(
                STEP,
                format!("parent {}", expected.parent_hash),
                format!("parent {}", payload.parent_hash),
            ));
        }
        if payload.block_number != expected.block_number {
            return Err(Failure::violation(
                STEP,
                format!("block {}", expected.block_number),
                format!("block {}", payload.block_number),
            ));
        }
        if payload.timestamp != expected.timestamp {
            return Err(Failure::violation(
                STEP,
                format!("timestamp {}", expected.timestamp),
                format!("timestamp {}", payload.timestamp),
            ));
        }

        let shanghai = self.forks.is_shanghai(payload.timestamp);
        if shanghai != payload.withdrawals.is_some() {
            return Err(Failure::violation(
                STEP,
                presence("withdrawals", shanghai),
                presence("withdrawals", payload.withdrawals.is_some()),
            ));
        }

        let cancun = self.forks.is_cancun(payload.timestamp);
        for (field, present) in [
            ("blobGasUsed", payload.blob_gas_used.is_some()),
            ("excessBlobGas", payload.excess_blob_gas.is_some()),
            ("blobsBundle", built.blobs_bundle.is_some()),
        ] {
            if present != cancun {
                return Err(Failure::violation(
                    STEP,
                    presence(field, cancun),
                    presence(field, present),
                ));
            }
        }

        if let Some(excess) = expected.excess_blob_gas {
            if payload.excess_blob_gas != Some(excess) {
                return Err(Failure::violation(
                    STEP,
                    format!("excessBlobGas {excess}"),
                    format!("excessBlobGas {:?}", payload.excess_blob_gas),
                ));
            }
        }
        Ok(())
    }

    /// Blob count, blob identity and order, and bundle consistency of a
    /// built payload
    pub fn check(
        &self,
        payload: &ExecutionPayload,
        bundle: Option<&engine_common::payload::BlobsBundle>,
        expectation: &PayloadExpectation,
    ) -> Result<(), Failure> {
        const STEP: &str = "payload content";
        let hashes = payload.blob_versioned_hashes()?;

        if let Some(count) = expectation.blob_count {
            if hashes.len() != count {
                return Err(Failure::violation(
                    STEP,
                    format!("{count} blob(s)"),
                    format!("{} blob(s)", hashes.len()),
                ));
            }
        }

        if let Some(blobs) = &expectation.blobs {
            let expected: Vec<B256> = blobs.iter().map(BlobId::versioned_hash).collect();
            if let Some(index) = first_difference(&expected, &hashes) {
                return Err(Failure::violation(
                    STEP,
                    format!(
                        "{} at position {index} of {:?}",
                        blobs
                            .get(index)
                            .map_or_else(|| "nothing".to_string(), ToString::to_string),
                        blobs.iter().map(|id| id.0).collect::<Vec<_>>()
                    ),
                    hashes
                        .get(index)
                        .map_or_else(|| "nothing".to_string(), ToString::to_string),
                ));
            }
        }

        if self.forks.is_cancun(payload.timestamp) {
            let bundle_hashes = bundle.map(|b| b.versioned_hashes()).unwrap_or_default();
            if bundle_hashes != hashes {
                return Err(Failure::violation(
                    STEP,
                    format!("blobs bundle matching {} included blob(s)", hashes.len()),
                    format!("bundle with {} commitment(s)", bundle_hashes.len()),
                ));
            }
            if let Some(bundle) = bundle {
                if bundle.blobs.len() != bundle.commitments.len()
                    || bundle.proofs.len() != bundle.commitments.len()
                {
                    return Err(Failure::violation(
                        STEP,
                        "one blob and proof per commitment",
                        format!(
                            "{} blob(s), {} proof(s), {} commitment(s)",
                            bundle.blobs.len(),
                            bundle.proofs.len(),
                            bundle.commitments.len()
                        ),
                    ));
                }
            }

            let used = self.blob_gas.blob_gas(hashes.len() as u64);
            if payload.blob_gas_used != Some(used) {
                return Err(Failure::violation(
                    STEP,
                    format!("blobGasUsed {used}"),
                    format!("blobGasUsed {:?}", payload.blob_gas_used),
                ));
            }
        }

        debug!(
            "Payload {} carries {} blob(s) as expected",
            payload.block_number,
            hashes.len()
        );
        Ok(())
    }

    /// Matches a `newPayload` answer against the expected outcome.
    ///
    /// An expected error code never matches a status and vice versa, so an
    /// invalid-params answer to a payload that should be `INVALID` (or the
    /// other way around) is a protocol violation.
    pub fn classify(
        &self,
        step: &str,
        response: Result<PayloadStatus, RpcError>,
        expected: &ExpectedOutcome,
    ) -> Result<(), Failure> {
        match (response, expected.error_code) {
            (Ok(status), Some(_)) => Err(Failure::violation(
                step,
                expected,
                describe_status(&status),
            )),
            (Ok(status), None) if expected.accepts(status.status) => Ok(()),
            (Ok(status), None) => Err(Failure::violation(
                step,
                expected,
                describe_status(&status),
            )),
            (Err(RpcError::Rpc { code, .. }), Some(wanted)) if code == wanted => Ok(()),
            (Err(RpcError::Rpc { code, message, .. }), Some(_)) => Err(Failure::violation(
                step,
                expected,
                format!("error {code}: {message}"),
            )),
            (Err(error), None) => Err(Failure::from_rpc(error)),
            (Err(error), Some(_)) => Err(Failure::Transport(error)),
        }
    }
}

fn presence(field: &str, present: bool) -> String {
    if present {
        format!("{field} present")
    } else {
        format!("{field} absent")
    }
}

fn describe_status(status: &PayloadStatus) -> String {
    match &status.validation_error {
        Some(error) => format!("status {} ({error})", status.status),
        None => format!("status {}", status.status),
    }
}

fn first_difference(expected: &[B256], actual: &[B256]) -> Option<usize> {
    if let Some(index) = expected.iter().zip(actual).position(|(a, b)| a != b) {
        return Some(index);
    }
    (expected.len() != actual.len()).then(|| expected.len().min(actual.len()))
}
