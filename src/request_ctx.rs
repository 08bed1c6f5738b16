use std::{future::Future, time::Duration};

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a store call was abandoned.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Cancelled {
    #[error("request was cancelled by the caller")]
    Token,
    #[error("request deadline elapsed")]
    DeadlineElapsed,
}

/// The caller's cancellation token and deadline, threaded through every store
/// call issued on behalf of one request.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that is never cancelled and never times out.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Sets the deadline to `timeout` from now, keeping the earlier one if
    /// a deadline is already set.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(self.deadline.map_or(deadline, |current| current.min(deadline)));
        self
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drives `fut` to completion unless the context is cancelled or its
    /// deadline passes first, in which case `fut` is dropped.
    ///
    /// # Errors
    /// Will return [`Err`] when the context was cancelled or timed out before
    /// `fut` completed.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Cancelled::Token),
            () = deadline => Err(Cancelled::DeadlineElapsed),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = RequestContext::background();
        assert_eq!(ctx.run(async { 42 }).await, Ok(42));
    }

    #[tokio::test]
    async fn test_run_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = RequestContext::with_cancellation(token);
        assert_eq!(ctx.run(async { 42 }).await, Err(Cancelled::Token));
    }

    #[tokio::test]
    async fn test_run_cancelled_while_pending() {
        let token = CancellationToken::new();
        let ctx = RequestContext::with_cancellation(token.child_token());

        let handle = tokio::spawn(async move { ctx.run(std::future::pending::<()>()).await });
        token.cancel();

        assert_eq!(handle.await.unwrap(), Err(Cancelled::Token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_elapsed() {
        let ctx = RequestContext::background().with_timeout(Duration::from_millis(50));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert_eq!(result, Err(Cancelled::DeadlineElapsed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_keeps_earliest_deadline() {
        let ctx = RequestContext::background()
            .with_timeout(Duration::from_millis(10))
            .with_timeout(Duration::from_secs(10));
        assert!(ctx.deadline().unwrap() <= Instant::now() + Duration::from_millis(10));
    }
}
