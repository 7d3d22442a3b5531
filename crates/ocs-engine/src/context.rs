//! Per-call deadline
//!
//! Every charging and admin call carries a [`CallContext`]. Lock waits,
//! store calls and rating lookups are bounded by its deadline and fail with
//! `AppError::Timeout` once it passes.

use ocs_core::error::AppError;
use ocs_core::AppResult;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    deadline: Instant,
}

impl CallContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Fails when the deadline has already passed
    pub fn check(&self, what: &str) -> AppResult<()> {
        if self.is_expired() {
            warn!("Deadline exceeded before {}", what);
            return Err(AppError::Timeout(what.to_string()));
        }
        Ok(())
    }

    /// Runs `fut` bounded by the deadline
    pub async fn run<T, F>(&self, what: &str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout_at(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Deadline exceeded during {}", what);
                Err(AppError::Timeout(what.to_string()))
            }
        }
    }
}
