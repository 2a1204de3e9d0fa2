//! Time and cancellation budgets for long-running collaborator calls.
//!
//! Registration and network training are iterative; both check an
//! [`ExecutionBudget`] once per iteration and stop cooperatively when the
//! deadline has passed or the shared [`CancellationToken`] was triggered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Reason a budget check failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetExceeded {
    /// The call exceeded its wall-clock timeout.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The call was cancelled through its token.
    #[error("Cancelled")]
    Cancelled,
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a new, untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every budget holding this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wall-clock deadline plus cancellation token for one collaborator call.
#[derive(Debug, Clone)]
pub struct ExecutionBudget {
    started: Instant,
    timeout: Option<Duration>,
    token: CancellationToken,
}

impl Default for ExecutionBudget {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl ExecutionBudget {
    /// Budget without timeout and with a fresh token.
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            timeout: None,
            token: CancellationToken::new(),
        }
    }

    /// Budget starting now with an optional timeout and a shared token.
    pub fn new(timeout: Option<Duration>, token: CancellationToken) -> Self {
        Self {
            started: Instant::now(),
            timeout,
            token,
        }
    }

    /// Set the timeout, measured from the creation of the budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Time elapsed since the budget was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// A fresh budget with the same timeout and token, starting now.
    pub fn restarted(&self) -> Self {
        Self::new(self.timeout, self.token.clone())
    }

    /// Fail if the budget is exhausted.
    pub fn check(&self) -> Result<(), BudgetExceeded> {
        if self.token.is_cancelled() {
            return Err(BudgetExceeded::Cancelled);
        }
        if let Some(timeout) = self.timeout {
            if self.started.elapsed() > timeout {
                return Err(BudgetExceeded::Timeout(timeout));
            }
        }
        Ok(())
    }
}
