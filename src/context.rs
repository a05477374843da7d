use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ClientError;

/// Cancellation and deadline carried through every network-facing call.
///
/// Cloning a context shares its cancellation signal. [`Context::child`]
/// derives a context that is canceled with its parent but can also be
/// canceled on its own.
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never canceled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Wraps an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Returns a child context sharing this context's deadline.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Returns a child context that expires after `timeout`.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns a child context that expires at `deadline`.
    ///
    /// An earlier deadline inherited from `self` is kept.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancels this context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token observed by this context.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the context error if the context is already done.
    pub fn check(&self) -> Result<(), ClientError> {
        if self.token.is_cancelled() {
            return Err(ClientError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ClientError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Waits for `duration`, returning early with the context error when the
    /// context is canceled or its deadline passes first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ClientError> {
        self.run(tokio::time::sleep(duration)).await
    }

    /// Drives `future` to completion unless the context finishes first.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, ClientError> {
        self.check()?;
        let expiry = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(ClientError::Canceled),
            () = expiry => Err(ClientError::DeadlineExceeded),
            output = future => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Context;
    use crate::ClientError;

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_cancellation() {
        let ctx = Context::background();
        ctx.sleep(Duration::from_secs(5)).await.expect("sleep completes");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_sleep() {
        let ctx = Context::background();
        let canceler = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceler.cancel();
        });

        let started = tokio::time::Instant::now();
        let error = ctx
            .sleep(Duration::from_secs(10))
            .await
            .expect_err("sleep is canceled");
        assert!(matches!(error, ClientError::Canceled));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_sleep() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let error = ctx
            .sleep(Duration::from_secs(10))
            .await
            .expect_err("deadline fires");
        assert!(matches!(error, ClientError::DeadlineExceeded));
        assert!(matches!(ctx.check(), Err(ClientError::DeadlineExceeded)));
    }

    #[test]
    fn child_is_canceled_with_parent() {
        let parent = Context::background();
        let child = parent.child();
        parent.cancel();
        assert!(matches!(child.check(), Err(ClientError::Canceled)));
    }

    #[tokio::test(start_paused = true)]
    async fn nested_deadline_keeps_the_earlier_one() {
        let outer = Context::background().with_timeout(Duration::from_secs(1));
        let inner = outer.with_timeout(Duration::from_secs(60));
        assert_eq!(inner.deadline(), outer.deadline());
    }
}
