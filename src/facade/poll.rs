//! Polling of asynchronous facade jobs with linear backoff.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use super::FacadeError;

/// Outcome of one poll of a remote job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobStatus<T> {
    /// The job finished successfully.
    Done(T),
    /// The job finished unsuccessfully.
    Failed {
        /// Exit or HTTP code reported for the job.
        code: i64,
        /// Message reported for the job.
        message: String,
    },
    /// The job is still running.
    Pending,
}

/// Retry budget and backoff for [`poll_until`].
///
/// The delay after the `n`th pending answer is `5 + 7 * (n - 1)` units,
/// capped at `max_delay`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Maximum number of polls; values below one are treated as one.
    pub retries: u32,
    /// Length of one backoff unit.
    pub unit: Duration,
    /// Upper bound on a single sleep.
    pub max_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            unit: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl PollPolicy {
    /// Returns this policy with a different retry budget.
    #[must_use]
    pub const fn with_retries(self, retries: u32) -> Self {
        Self { retries, ..self }
    }

    /// Sleep that follows the `attempt`th pending answer (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let units = attempt.saturating_sub(1).saturating_mul(7).saturating_add(5);
        self.unit.saturating_mul(units).min(self.max_delay)
    }
}

/// Polls a job until it finishes or the retry budget runs out.
///
/// `Done` returns immediately. `Failed` returns
/// [`FacadeError::Remote`] without sleeping or cleaning up. Errors from
/// `poll` propagate unchanged. After the final pending answer `cleanup` runs
/// once and [`FacadeError::Timeout`] is returned.
///
/// # Errors
///
/// See above.
pub async fn poll_until<T, P, PF, C, CF>(
    label: &str,
    policy: PollPolicy,
    mut poll: P,
    cleanup: C,
) -> Result<T, FacadeError>
where
    P: FnMut() -> PF,
    PF: Future<Output = Result<JobStatus<T>, FacadeError>>,
    C: FnOnce() -> CF,
    CF: Future<Output = ()>,
{
    let attempts = policy.retries.max(1);
    for attempt in 1..=attempts {
        match poll().await? {
            JobStatus::Done(value) => {
                debug!(job = label, attempt, "job finished");
                return Ok(value);
            }
            JobStatus::Failed { code, message } => {
                return Err(FacadeError::Remote { code, message });
            }
            JobStatus::Pending if attempt < attempts => {
                let delay = policy.delay(attempt);
                debug!(job = label, attempt, ?delay, "job pending");
                sleep(delay).await;
            }
            JobStatus::Pending => {}
        }
    }

    warn!(job = label, attempts, "job still pending; cleaning up");
    cleanup().await;
    Err(FacadeError::Timeout {
        label: label.to_owned(),
        attempts,
    })
}
