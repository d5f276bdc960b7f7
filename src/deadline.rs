//! Deadline-bound operation context
//!
//! Every network operation against MySQL or ProxySQL takes an [`OpContext`].
//! The context carries an absolute deadline and a shared cancellation flag,
//! plus an optional per-node timeout. A node that overruns its timeout fails
//! alone with `Error::NodeTimeout`; only the deadline or a cancel aborts a
//! whole scan.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct OpContext {
    deadline: Instant,
    budget: Duration,
    node_timeout: Option<Duration>,
    cancelled: Arc<AtomicBool>,
}

impl OpContext {
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline,
            budget: deadline.saturating_duration_since(Instant::now()),
            node_timeout: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Bound every [`OpContext::run_on`] call to `timeout`
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    /// Same budget, node timeout and cancellation, with the deadline restarted
    /// from now. Each phase of a pass gets its own.
    pub fn renewed(&self) -> Self {
        Self {
            deadline: Instant::now() + self.budget,
            budget: self.budget,
            node_timeout: self.node_timeout,
            cancelled: self.cancelled.clone(),
        }
    }

    /// Cancel this context and every clone of it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Fail fast when the context is already cancelled or expired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::OperationCancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// Run `fut` bounded by the deadline.
    ///
    /// Nothing is polled when the context is cancelled or expired up front.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        match tokio::time::timeout_at(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded),
        }
    }

    /// Run one call against `host`.
    ///
    /// When the node timeout fires before the deadline the failure is
    /// `Error::NodeTimeout`, which callers treat as node-local.
    pub async fn run_on<T, F>(&self, host: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        let Some(limit) = self.node_timeout else {
            return self.run(fut).await;
        };
        let node_deadline = Instant::now() + limit;
        if node_deadline >= self.deadline {
            return self.run(fut).await;
        }
        match tokio::time::timeout_at(node_deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::NodeTimeout {
                host: host.to_string(),
                after: limit,
            }),
        }
    }
}

/// Context-level failures abort a whole scan; anything else is node-local.
pub(crate) fn is_context_error(e: &Error) -> bool {
    matches!(e, Error::DeadlineExceeded | Error::OperationCancelled)
}
