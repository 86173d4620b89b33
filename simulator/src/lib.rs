//! # Engine API conformance simulator
//!
//! Drives an execution client through the Cancun Engine API the way a
//! consensus client would, feeds it blob transactions, and checks every
//! payload it builds and every answer it gives.
//!
//! ## Architecture Overview
//!
//! - **CL mock** ([`clmock`]): forkchoiceUpdated → getPayload → newPayload →
//!   forkchoiceUpdated on the primary, mirrored to the other clients
//! - **Transaction generator** ([`txgen`]): signed type 3 transactions, the
//!   simulator's own pending pool and the inclusion planner
//! - **Payload validator** ([`validator`]): payload shape and content, and
//!   classification of `newPayload` answers
//! - **Step sequencer** ([`scenarios`]): steps, the executor and the Cancun
//!   test table
//! - **DevP2P probe** ([`devp2p`]): fork id and pooled-transaction checks
//!   over eth/68
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engine_simulator::prelude::*;
//!
//! let runner = Arc::new(TestRunner::new(
//!     RunnerConfig::default(),
//!     launcher,
//!     signer,
//!     Arc::new(SystemClock),
//! ));
//! let results = runner.run_all(cancun::tests()).await?;
//! println!("{}", render_results(&results));
//! ```

#![warn(clippy::all)]

pub mod accounts;
pub mod clmock;
pub mod devp2p;
pub mod engine;
pub mod error;
pub mod invariants;
/// Time control shared by the CL mock, the waiters and the runner
pub mod orchestrator;
pub mod runner;
pub mod scenarios;
pub mod txgen;
pub mod validator;
pub mod waiters;

/// Convenient re-exports for common usage
pub mod prelude {
    pub use std::sync::Arc;

    pub use engine_common::blob::{blob_list, BlobId, HashCorruption, VersionedHashes};
    pub use engine_common::config::{BlobGasConfig, ForkConfig};
    pub use engine_common::payload::{EngineVersion, FieldOverride, PayloadCustomizer};

    pub use crate::clmock::{BuildOptions, ClMock, ClMockPhase};
    pub use crate::engine::{ClientLauncher, ClientRole, ExecutionClient, LaunchOptions};
    pub use crate::error::{Failure, RunError, SubmissionError};
    pub use crate::orchestrator::{Clock, PausedClock, SystemClock};
    pub use crate::runner::{render_results, RunnerConfig, TestResult, TestRunner};
    pub use crate::scenarios::{cancun, CancunTest, NewPayloads, ScenarioContext, Step};
    pub use crate::txgen::SendBlobTransactions;
    pub use crate::validator::ExpectedOutcome;
}

pub use orchestrator::{Clock, PausedClock, SystemClock};

/// Simulator version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
