use crate::error::Error;
use log::{info, warn};
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Wait schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base + (n - 1) * increment` after attempt `n`.
    Linear { base: Duration, increment: Duration },
    /// `unit * 2^n` after attempt `n`.
    Exponential { unit: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    call_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff,
            call_timeout: None,
        }
    }

    /// Bounds each remote call; a timeout counts as one retryable failure.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the given (1-based) attempt failed. Saturates at
    /// `Duration::MAX` instead of overflowing.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Linear { base, increment } => increment
                .checked_mul(attempt.saturating_sub(1))
                .and_then(|step| base.checked_add(step)),
            Backoff::Exponential { unit } => unit.checked_mul(2u32.saturating_pow(attempt)),
        };
        delay.unwrap_or(Duration::MAX)
    }
}

/// Progress of one retry loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub last_error: Option<String>,
    pub retryable: bool,
}

/// Classified result of a single call.
enum Outcome<T> {
    Success(Vec<T>),
    Retryable(Error),
    Fatal(Error),
}

impl<T> Outcome<T> {
    fn classify(result: Result<Vec<T>, Error>) -> Self {
        match result {
            Ok(rows) => Outcome::Success(rows),
            Err(err) if err.is_retryable() => Outcome::Retryable(err),
            Err(err) => Outcome::Fatal(err),
        }
    }
}

/// Rows gathered by a retry loop plus the units that never succeeded.
#[derive(Debug)]
pub struct FetchReport<T, U = String> {
    pub rows: Vec<T>,
    pub failed: Vec<U>,
    pub retryable: bool,
    pub rows_input: usize,
    pub attempts: u32,
    pub backoffs: Vec<Duration>,
    pub last_error: Option<String>,
    pub elapsed: Duration,
}

impl<T, U> FetchReport<T, U> {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(policy: RetryPolicy) -> Self {
        RetryingFetcher { policy }
    }

    /// Retries a single remote call. Exhaustion is a terminal error.
    pub async fn fetch_with_retry<T, F, Fut>(
        &self,
        unit: &str,
        mut operation: F,
    ) -> Result<FetchReport<T, String>, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<T>, Error>>,
    {
        let report = self
            .fetch_units(vec![unit.to_string()], |_| operation())
            .await?;

        if !report.is_complete() {
            return Err(Error::RetriesExhausted {
                unit: unit.to_string(),
                attempts: report.attempts,
                last_error: report.last_error.unwrap_or_default(),
            });
        }

        Ok(report)
    }

    /// Runs `operation` once per unit and retries only the units that failed
    /// retryably, waiting the policy's backoff between attempts.
    /// # Arguments
    /// * `units` - The units of work, e.g. metadata ids.
    /// * `operation` - Fetches the rows of one unit.
    /// # Returns
    /// A Result containing a `FetchReport` whose `failed` lists the units still
    /// failing after the last attempt, or the first fatal Error.
    pub async fn fetch_units<U, T, F, Fut>(
        &self,
        units: Vec<U>,
        mut operation: F,
    ) -> Result<FetchReport<T, U>, Error>
    where
        U: Clone + Display,
        F: FnMut(U) -> Fut,
        Fut: Future<Output = Result<Vec<T>, Error>>,
    {
        let started = Instant::now();
        let rows_input = units.len();
        let mut state = RetryState::default();
        let mut rows = Vec::new();
        let mut backoffs = Vec::new();
        let mut pending = units;

        loop {
            state.attempt += 1;
            state.retryable = false;
            let mut failed = Vec::new();

            for unit in pending {
                match Outcome::classify(self.call(operation(unit.clone())).await) {
                    Outcome::Success(fetched) => rows.extend(fetched),
                    Outcome::Retryable(err) => {
                        warn!(
                            "{} failed retryably on attempt {}/{}: {}",
                            unit, state.attempt, self.policy.max_attempts(), err
                        );
                        state.retryable = true;
                        state.last_error = Some(err.to_string());
                        failed.push(unit);
                    }
                    Outcome::Fatal(err) => {
                        warn!(
                            "{} failed fatally on attempt {}/{}: {}",
                            unit, state.attempt, self.policy.max_attempts(), err
                        );
                        return Err(err);
                    }
                }
            }

            if failed.is_empty() || state.attempt >= self.policy.max_attempts() {
                return Ok(FetchReport {
                    rows,
                    retryable: !failed.is_empty(),
                    failed,
                    rows_input,
                    attempts: state.attempt,
                    backoffs,
                    last_error: state.last_error,
                    elapsed: started.elapsed(),
                });
            }

            let delay = self.policy.delay(state.attempt);
            info!(
                "Waiting {}s before retrying {} unit(s), attempt {}/{}",
                delay.as_secs_f64(),
                failed.len(),
                state.attempt + 1,
                self.policy.max_attempts()
            );
            tokio::time::sleep(delay).await;
            backoffs.push(delay);
            pending = failed;
        }
    }

    async fn call<T, Fut>(&self, fut: Fut) -> Result<Vec<T>, Error>
    where
        Fut: Future<Output = Result<Vec<T>, Error>>,
    {
        match self.policy.call_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or(Err(Error::Timeout {
                    seconds: limit.as_secs(),
                })),
            None => fut.await,
        }
    }
}
