// src/util/poll.rs
//! Bounded poll-with-timeout used for every sleep-paced wait in the BLE path

use std::future::Future;
use std::time::Duration;

/// Attempt count and spacing of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollBudget {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    pub fn total(&self) -> Duration {
        self.interval * self.attempts
    }
}

/// Service discovery wait after connecting: 50 x 100ms
pub const SERVICE_RESOLUTION: PollBudget = PollBudget::new(50, Duration::from_millis(100));

/// Poll `check` until it reports true, sleeping `budget.interval` between
/// checks, at most `budget.attempts` sleeps. Returns whether the condition
/// was met. A check that errors counts as not-yet-ready.
pub async fn poll_until<F, Fut, E>(budget: PollBudget, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let mut attempts = 0;
    loop {
        if matches!(check().await, Ok(true)) {
            return true;
        }
        if attempts >= budget.attempts {
            return false;
        }
        tokio::time::sleep(budget.interval).await;
        attempts += 1;
    }
}
