// Clock abstraction for the CL mock's get-payload delay and the readiness
// waiters, so tests can run with tokio time paused.

use std::future::Future;
use std::pin::Pin;
use tokio::time::{self, Duration, Instant};

/// Time source used wherever the simulator waits.
///
/// ```rust,ignore
/// use engine_simulator::orchestrator::clock::{Clock, PausedClock};
///
/// #[tokio::test(start_paused = true)]
/// async fn test_get_payload_delay() {
///     let clock = Arc::new(PausedClock::new());
///     let start = clock.now();
///     clock.sleep(Duration::from_secs(2)).await;
///     assert_eq!(clock.now() - start, Duration::from_secs(2));
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Current instant (simulated when tokio time is paused)
    fn now(&self) -> Instant;

    /// Waits for `d`. Under paused time this completes as soon as the
    /// runtime auto-advances past the deadline.
    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real wall-clock time, used when driving actual clients
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

/// Clock for tests running under `#[tokio::test(start_paused = true)]`.
///
/// It does not pause time itself: the test attribute does, and pausing twice
/// panics.
pub struct PausedClock;

impl PausedClock {
    pub fn new() -> Self {
        Self
    }

    /// Moves tokio's clock forward, waking every sleep that expires
    pub async fn advance(&self, d: Duration) {
        time::advance(d).await
    }
}

impl Clock for PausedClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

impl Default for PausedClock {
    fn default() -> Self {
        Self::new()
    }
}
