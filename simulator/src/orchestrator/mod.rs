// Time control shared by the CL mock, the waiters and the scenario runner.

/// Clock abstractions for deterministic time control in tests
pub mod clock;

pub use clock::{Clock, PausedClock, SystemClock};
