// src/core/scanner/retry.rs

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::errors::ScanError;

/// How long to wait before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `attempt × unit`, where `attempt` counts from 1.
    Linear(Duration),
    Fixed(Duration),
}

/// A bounded retry policy scoped to one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, unit: Duration) -> Self {
        Self { max_attempts, backoff: Backoff::Linear(unit) }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, backoff: Backoff::Fixed(delay) }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear(unit) => unit * attempt,
            Backoff::Fixed(delay) => delay,
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. Cancellation is checked before every attempt and
    /// interrupts the backoff sleep.
    pub async fn run<T, F, Fut>(
        &self,
        stage: &'static str,
        subject: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ScanError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ScanError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(stage, target = %subject, attempt, error = %e, ?delay, "Attempt failed, retrying.");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ScanError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
