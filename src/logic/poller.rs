use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::model::{describe_status, Operation, OperationOutcome};
use crate::transport::OperationFetcher;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("Too many errors: {errors} failed status checks, last: {last_error}")]
    TooManyErrors { errors: u32, last_error: String },
    #[error("Too many attempts: operation still running after {attempts} status checks")]
    TooManyAttempts { attempts: u32 },
    #[error("Operation failed: {}", describe_status(.error))]
    OperationFailed { error: Value },
    #[error("Polling was cancelled")]
    Cancelled,
}

impl PollError {
    /// One of the error or attempt budgets ran out
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(
            self,
            PollError::TooManyErrors { .. } | PollError::TooManyAttempts { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PollError::Cancelled)
    }
}

/// What the backoff exponent falls back to once it passes `max_exponent`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExponentReset {
    #[default]
    ToOne,
    /// round(attempts / 10): delays grow slower over long polls
    ScaledByAttempts,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Most status fetches one poll may issue
    pub max_attempts: u32,
    pub max_transient_errors: u32,
    pub max_exponent: u32,
    /// Delay unit, scaled by `2^exponent`
    pub base_delay: Duration,
    pub exponent_reset: ExponentReset,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            max_transient_errors: 3,
            max_exponent: 5,
            base_delay: Duration::from_secs(1),
            exponent_reset: ExponentReset::ToOne,
        }
    }
}

impl PollConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Long App Engine provisioning: 30 checks, slow-growing delays
    pub fn app_engine() -> Self {
        Self::new(30).with_exponent_reset(ExponentReset::ScaledByAttempts)
    }

    pub fn memorystore() -> Self {
        Self::new(15)
    }

    pub fn with_exponent_reset(mut self, exponent_reset: ExponentReset) -> Self {
        self.exponent_reset = exponent_reset;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

/// Counters of one polling session, never shared between polls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSession {
    pub attempts: u32,
    pub transient_errors: u32,
    pub backoff_exponent: u32,
}

impl PollSession {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            transient_errors: 0,
            backoff_exponent: 1,
        }
    }

    /// Advance the exponent and get the delay before the next round
    pub fn next_delay(&mut self, config: &PollConfig) -> Duration {
        self.backoff_exponent += 1;
        if self.backoff_exponent > config.max_exponent {
            self.backoff_exponent = match config.exponent_reset {
                ExponentReset::ToOne => 1,
                ExponentReset::ScaledByAttempts => (self.attempts + 5) / 10,
            };
        }

        config
            .base_delay
            .saturating_mul(2u32.saturating_pow(self.backoff_exponent))
    }
}

impl Default for PollSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for long running operations with capped exponential backoff
#[derive(Debug, Clone, Default)]
pub struct OperationPoller {
    config: PollConfig,
}

impl OperationPoller {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll `operation` until it finishes, resolving with its `response`.
    ///
    /// Failed fetches are retried until `max_transient_errors` is reached.
    /// `fetch_operation` is called at most `max_attempts` times. Cancelling
    /// `cancel` stops the poll before the next fetch.
    pub async fn await_completion<F>(
        &self,
        fetcher: &F,
        operation: Operation,
        cancel: &CancellationToken,
    ) -> Result<Value, PollError>
    where
        F: OperationFetcher + ?Sized,
    {
        let mut session = PollSession::new();
        let mut current = operation;
        let mut last_error = String::new();

        loop {
            if !current.done {
                session.attempts += 1;
                debug!("Check operation status of {} (attempt {})", current.name, session.attempts);

                let fetched = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PollError::Cancelled),
                    result = fetcher.fetch_operation(&current.name) => result,
                };

                match fetched {
                    Ok(next) => current = next,
                    Err(e) => {
                        session.transient_errors += 1;
                        warn!(
                            "Status check {} of {} failed ({} errors so far): {}",
                            session.attempts, current.name, session.transient_errors, e
                        );
                        last_error = e.to_string();
                    }
                }
            }

            if session.transient_errors >= self.config.max_transient_errors {
                return Err(PollError::TooManyErrors {
                    errors: session.transient_errors,
                    last_error,
                });
            }

            if let Some(outcome) = current.outcome() {
                info!("Operation {} finished", current.name);
                return match outcome {
                    OperationOutcome::Succeeded(response) => Ok(response),
                    OperationOutcome::Failed(error) => Err(PollError::OperationFailed { error }),
                };
            }

            if session.attempts >= self.config.max_attempts {
                return Err(PollError::TooManyAttempts {
                    attempts: session.attempts,
                });
            }

            let delay = session.next_delay(&self.config);
            info!(
                "Status is {}. Trying again in {} seconds.",
                current.status_detail().unwrap_or("pending"),
                delay.as_secs_f64()
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
