//! Out-of-band interruption of a running retry loop.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep_until, Instant, Sleep};
use tokio_util::sync::CancellationToken;

/// Why the loop was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupt {
    /// The total time budget ran out.
    Timeout,
    /// The caller's token was cancelled.
    Cancelled,
}

/// Timer and cancellation signal owned by a single retry invocation.
///
/// The timer lives inside the invocation's future, so dropping the future on
/// any terminal path disarms it. There is no callback that can outlive the loop.
#[derive(Debug)]
pub(crate) struct Watchdog {
    deadline: Option<Instant>,
    timer: Option<Pin<Box<Sleep>>>,
    cancel: Option<CancellationToken>,
}

impl Watchdog {
    /// Arm a watchdog for a loop that started at `start`.
    ///
    /// With neither a budget nor a token, [`fired`](Self::fired) never resolves.
    pub(crate) fn arm(
        start: Instant,
        budget: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Self {
        let deadline = budget.map(|budget| deadline(start, budget));
        let timer = deadline.map(|at| Box::pin(sleep_until(at)));
        Self {
            deadline,
            timer,
            cancel,
        }
    }

    /// Resolves once the budget elapses or the token is cancelled.
    ///
    /// Safe to call repeatedly; an expired timer stays expired.
    pub(crate) async fn fired(&mut self) -> Interrupt {
        let Self { timer, cancel, .. } = self;
        let timer = async move {
            match timer.as_mut() {
                Some(timer) => timer.as_mut().await,
                None => pending().await,
            }
        };
        let cancelled = async move {
            match cancel {
                Some(token) => token.cancelled().await,
                None => pending().await,
            }
        };

        tokio::select! {
            biased;
            () = cancelled => Interrupt::Cancelled,
            () = timer => Interrupt::Timeout,
        }
    }

    /// Non-blocking check for an interrupt that is already due.
    ///
    /// Reads the clock rather than the timer, which only reports expiry once
    /// the runtime has processed it.
    pub(crate) fn poll_now(&self) -> Option<Interrupt> {
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Some(Interrupt::Cancelled);
        }
        if self.deadline.is_some_and(|at| Instant::now() >= at) {
            return Some(Interrupt::Timeout);
        }
        None
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        self.timer.is_some()
    }
}

fn deadline(start: Instant, budget: Duration) -> Instant {
    start
        .checked_add(budget)
        // Far enough away to never fire in practice.
        .unwrap_or_else(|| start + Duration::from_secs(86_400 * 365 * 30))
}
