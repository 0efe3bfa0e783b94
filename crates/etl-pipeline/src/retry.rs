//! Retry policy for calls against external systems.
//!
//! Every failure is logged and retried after an exponentially growing delay
//! (`start * factor^n`, capped at `border`). There is no attempt limit and
//! no jitter: an outage stalls the pipeline instead of failing it.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use etl_types::BackoffSettings;

/// Exponential retry timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    start: Duration,
    factor: f64,
    border: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_settings(&BackoffSettings::default())
    }
}

impl BackoffPolicy {
    pub fn new(start: Duration, factor: f64, border: Duration) -> Self {
        Self {
            start,
            factor,
            border,
        }
    }

    pub fn from_settings(settings: &BackoffSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.start_ms),
            settings.factor,
            Duration::from_millis(settings.border_ms),
        )
    }

    /// Fresh delay schedule starting at `start`.
    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.start)
            .with_multiplier(self.factor)
            .with_randomization_factor(0.0)
            .with_max_interval(self.border)
            .with_max_elapsed_time(None)
            .build()
    }

    /// The delays this policy sleeps between attempts, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let mut schedule = self.schedule();
        let border = self.border;
        std::iter::repeat_with(move || schedule.next_backoff().unwrap_or(border))
    }

    /// Run `op` until it succeeds.
    pub async fn retry<T, E, F, Fut>(&self, operation: &str, mut op: F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut schedule = self.schedule();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match op().await {
                Ok(value) => {
                    if attempts > 1 {
                        info!(operation, attempts, "Recovered after retry");
                    }
                    return value;
                }
                Err(e) => {
                    let delay = schedule.next_backoff().unwrap_or(self.border);
                    warn!(
                        operation,
                        attempt = attempts,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Run `op` until it succeeds, re-establishing the underlying
    /// connection with `reconnect` after every failure.
    ///
    /// A failed reconnect is itself retried on the same schedule before
    /// `op` is attempted again.
    pub async fn retry_reconnect<T, E, F, Fut, R, RFut>(
        &self,
        operation: &str,
        mut op: F,
        mut reconnect: R,
    ) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut() -> RFut,
        RFut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let mut schedule = self.schedule();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let error = match op().await {
                Ok(value) => {
                    if attempts > 1 {
                        info!(operation, attempts, "Recovered after reconnect");
                    }
                    return value;
                }
                Err(e) => e,
            };

            let mut delay = schedule.next_backoff().unwrap_or(self.border);
            warn!(
                operation,
                attempt = attempts,
                error = %error,
                retry_in_ms = delay.as_millis() as u64,
                "Operation failed, reconnecting"
            );

            loop {
                tokio::time::sleep(delay).await;
                match reconnect().await {
                    Ok(()) => break,
                    Err(e) => {
                        delay = schedule.next_backoff().unwrap_or(self.border);
                        warn!(
                            operation,
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "Reconnect failed, retrying"
                        );
                    }
                }
            }
        }
    }
}
