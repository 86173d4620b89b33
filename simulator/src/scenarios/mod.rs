//! Scenario steps, their executor and the Cancun test table
//!
//! A scenario is an ordered list of [`Step`]s run against one
//! [`ScenarioContext`]:
//!
//! ```rust,ignore
//! let steps = vec![
//!     Step::SendBlobTransactions(SendBlobTransactions::new(3, 1, 1)),
//!     Step::NewPayloads(NewPayloads::new().blobs(3).expected_blobs(blob_list(0, 3))),
//! ];
//! ```

pub mod cancun;
pub mod context;
pub mod executor;
pub mod step;

pub use cancun::CancunTest;
pub use context::{ScenarioContext, ScenarioContextBuilder};
pub use executor::{ExecutionReport, ScenarioExecutor};
pub use step::{
    DevP2PCheckForkId, DevP2PRequestPooledTransactionHash, LaunchClients, NewPayloads,
    SendModifiedLatestPayload, Step,
};
