//! Re-running an async operation on a growing pause schedule.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Pause schedule between attempts of a failing operation.
///
/// The pause after the n-th failure is `base * factor^(n-1)`, capped at
/// `cap`, plus a random extra of up to `jitter` times that pause.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Total attempts, the first included. Zero runs once.
    pub attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    pub factor: f64,
    /// Upper bound of the random extra, as a fraction of the pause.
    pub jitter: f64,
}

impl Backoff {
    /// Pause before retrying after `failures` failed attempts.
    pub fn pause_after(&self, failures: u32) -> Duration {
        let steps = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = (self.base.as_secs_f64() * self.factor.max(1.0).powi(steps))
            .min(self.cap.as_secs_f64());
        let pause = Duration::from_secs_f64(secs);

        if self.jitter > 0.0 {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
            pause + pause.mul_f64(extra)
        } else {
            pause
        }
    }
}

/// Run `operation` until it succeeds or `backoff.attempts` is used up.
///
/// `what` names the operation in logs. The error of the final attempt is
/// returned.
pub async fn retry_with_backoff<T, E, F, Fut>(
    backoff: &Backoff,
    what: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = backoff.attempts.max(1);
    let mut failures = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if failures > 0 {
                    debug!(what, failures, "Succeeded on retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        failures += 1;
        warn!(what, attempt = failures, attempts, error = %err, "Attempt failed");
        if failures >= attempts {
            return Err(err);
        }

        let pause = backoff.pause_after(failures);
        debug!(what, ?pause, "Pausing before next attempt");
        sleep(pause).await;
    }
}
