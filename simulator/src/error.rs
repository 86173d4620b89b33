use std::fmt;

use engine_common::rpc::RpcError;
use engine_common::transaction::TransactionError;
use thiserror::Error;

use crate::devp2p::ProbeError;

/// A transaction the client-under-test (or the signer) refused
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmissionError {
    #[error("client rejected transaction (code {code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("could not sign transaction: {0}")]
    Signing(String),
}

/// Why a step, and therefore its scenario, failed
#[derive(Debug, Error)]
pub enum Failure {
    /// The client answered, but not what the step expected
    #[error("{step}: expected {expected}, got {actual}")]
    ProtocolViolation {
        step: String,
        expected: String,
        actual: String,
    },
    /// JSON-RPC error on a path where none was expected
    #[error("unexpected JSON-RPC error {code}: {message}")]
    UnexpectedError { code: i64, message: String },
    #[error("transport failure: {0}")]
    Transport(RpcError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    /// The test definition asked for something impossible
    #[error("sequencing error: {0}")]
    Sequencing(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("client launcher: {0}")]
    Launcher(String),
    #[error("devp2p probe: {0}")]
    Probe(#[from] ProbeError),
    #[error("{}", ParallelFailures(.0))]
    Parallel(Vec<MemberFailure>),
}

/// One failed member of a parallel group
#[derive(Debug)]
pub struct MemberFailure {
    pub index: usize,
    /// The member step's one-line summary
    pub step: String,
    pub failure: Failure,
}

impl Failure {
    pub fn violation(
        step: impl Into<String>,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) -> Self {
        Self::ProtocolViolation {
            step: step.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn sequencing(message: impl Into<String>) -> Self {
        Self::Sequencing(message.into())
    }

    /// Maps an RPC error on a path that expected success
    pub fn from_rpc(error: RpcError) -> Self {
        match error {
            RpcError::Rpc { code, message, .. } => Self::UnexpectedError { code, message },
            other => Self::Transport(other),
        }
    }
}

impl From<TransactionError> for Failure {
    fn from(error: TransactionError) -> Self {
        Self::violation("decode transaction", "a well-formed transaction", error)
    }
}

struct ParallelFailures<'a>(&'a [MemberFailure]);

impl fmt::Display for ParallelFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} parallel step(s) failed", self.0.len())?;
        for member in self.0 {
            write!(f, "; member {} ({}): {}", member.index, member.step, member.failure)?;
        }
        Ok(())
    }
}

/// Aborts the whole run rather than a single scenario
#[derive(Debug, Error)]
pub enum RunError {
    #[error("setup failed: {0}")]
    Setup(String),
}
