//! Bounded polling of long-running backend operations

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// State of an operation as reported by one check
#[derive(Clone, Debug, PartialEq)]
pub enum PollState<T> {
    /// Still running
    Pending,
    /// Finished successfully
    Done(T),
    /// Reached a terminal failure state
    Failed(String),
}

/// Call `check` every `interval` until it reports a terminal state
///
/// Returns [`Error::TimedOut`] when `timeout` elapses first,
/// [`Error::OperationFailed`] on a terminal failure and [`Error::Cancelled`]
/// when `cancel` fires during a wait. Errors from `check` propagate as-is.
pub async fn poll_until<T, F, Fut>(
    mut check: F,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollState<T>>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match check().await? {
            PollState::Done(value) => {
                debug!(attempt, "Operation finished");
                return Ok(value);
            }
            PollState::Failed(reason) => return Err(Error::OperationFailed(reason)),
            PollState::Pending => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::TimedOut(timeout));
        }
        let wait = interval.min(deadline - now);
        debug!(attempt, wait_ms = wait.as_millis() as u64, "Operation pending");

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    type Check = std::future::Ready<Result<PollState<&'static str>>>;

    fn pending_then_done(pending: u32, calls: &Cell<u32>) -> impl FnMut() -> Check + '_ {
        move || {
            calls.set(calls.get() + 1);
            let state = if calls.get() > pending {
                PollState::Done("ok")
            } else {
                PollState::Pending
            };
            std::future::ready(Ok(state))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_on_sixth_check_after_five_pending() {
        let calls = Cell::new(0);
        let started = Instant::now();

        let value = poll_until(
            pending_then_done(5, &calls),
            Duration::from_secs(1),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(calls.get(), 6);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_never_done() {
        let calls = Cell::new(0);
        let err = poll_until(
            pending_then_done(u32::MAX, &calls),
            Duration::from_secs(1),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::TimedOut(d) if d == Duration::from_secs(10)));
        assert_eq!(calls.get(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_stops_polling() {
        let calls = Cell::new(0);
        let err = poll_until(
            || {
                calls.set(calls.get() + 1);
                std::future::ready(Ok(PollState::<()>::Failed("quota exceeded".into())))
            },
            Duration::from_secs(1),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::OperationFailed(ref r) if r == "quota exceeded"));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn check_errors_propagate() {
        let err = poll_until(
            || std::future::ready(Err::<PollState<()>, _>(Error::transient("502"))),
            Duration::from_secs(1),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_the_wait() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Cell::new(0);

        let err = poll_until(
            pending_then_done(u32::MAX, &calls),
            Duration::from_secs(1),
            Duration::from_secs(10),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(calls.get(), 1);
    }
}
