//! The retry loop.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::backoff::{Backoff, JitterRange};
use super::error::{ConfigError, RetryError, StopReason};
use super::option::{
    AttemptContext, BackoffDelay, CustomPredicate, ErrorTag, JitterDelay, MaxAttempts,
    MaxTotalTime, NonRetriableErrors, RetriableErrors, RetryDecision, RetryOption,
};
use super::watchdog::{Interrupt, Watchdog};

/// Information about a failed attempt, passed to hooks.
#[derive(Debug, Clone)]
pub struct RetryEvent<'a, E> {
    /// Which attempt just failed (1-indexed).
    pub attempt: u32,
    /// The error from the failed attempt.
    pub error: &'a E,
    /// Delay before the next attempt, or `None` if the loop is stopping.
    pub next_delay: Option<Duration>,
    /// Total elapsed time since the first attempt.
    pub elapsed: Duration,
}

/// An ordered list of [`RetryOption`]s and the loop that applies them.
///
/// A policy holds no per-invocation state. Cloning is cheap and a single
/// policy can run any number of operations concurrently.
///
/// Options are evaluated in the order they were added. The first option to
/// veto an attempt decides the error returned, so register classifiers
/// before budget guards if a non-retriable error should win over an exhausted
/// budget.
///
/// # Examples
///
/// ```rust
/// use undertow::{Backoff, RetryPolicy};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let counter = AtomicU32::new(0);
/// let calls = &counter;
///
/// let policy = RetryPolicy::new()
///     .max_attempts(5)
///     .backoff(Backoff::linear(Duration::from_millis(1)));
///
/// let value = policy
///     .run(move || async move {
///         if calls.fetch_add(1, Ordering::SeqCst) < 2 {
///             Err("transient")
///         } else {
///             Ok(3)
///         }
///     })
///     .await;
///
/// assert_eq!(value, Ok(3));
/// assert_eq!(counter.load(Ordering::SeqCst), 3);
/// # });
/// ```
pub struct RetryPolicy<E> {
    options: Vec<Arc<dyn RetryOption<E>>>,
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("options", &self.options)
            .finish()
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            options: self.options.clone(),
        }
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryPolicy<E> {
    /// Create an empty policy.
    ///
    /// An empty policy retries forever with no delay; add at least one budget.
    pub fn new() -> Self {
        Self {
            options: Vec::new(),
        }
    }

    /// Append an option.
    pub fn with_option<O>(mut self, option: O) -> Self
    where
        O: RetryOption<E> + 'static,
    {
        self.options.push(Arc::new(option));
        self
    }

    /// Stop after the operation has been invoked `n` times.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero. Use [`try_max_attempts`](Self::try_max_attempts)
    /// for limits that come from user input.
    pub fn max_attempts(self, n: u32) -> Self {
        match self.try_max_attempts(n) {
            Ok(policy) => policy,
            Err(e) => panic!("{}", e),
        }
    }

    /// Stop after the operation has been invoked `n` times.
    ///
    /// Fails with [`ConfigError::ZeroMaxAttempts`] when `n` is zero.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use undertow::{ConfigError, RetryPolicy};
    ///
    /// let err = RetryPolicy::<String>::new().try_max_attempts(0).unwrap_err();
    /// assert_eq!(err, ConfigError::ZeroMaxAttempts);
    /// ```
    pub fn try_max_attempts(self, n: u32) -> Result<Self, ConfigError> {
        Ok(self.with_option(MaxAttempts::new(n)?))
    }

    /// Stop once `total` has elapsed since the first attempt started.
    ///
    /// The budget is enforced by a watchdog as well as by the check after each
    /// failure, so a hung attempt or a long sleep is cut short.
    ///
    /// # Panics
    ///
    /// Panics if `total` is zero. Use
    /// [`try_max_total_time`](Self::try_max_total_time) for budgets that come
    /// from user input.
    pub fn max_total_time(self, total: Duration) -> Self {
        match self.try_max_total_time(total) {
            Ok(policy) => policy,
            Err(e) => panic!("{}", e),
        }
    }

    /// Stop once `total` has elapsed since the first attempt started.
    ///
    /// Fails with [`ConfigError::ZeroTimeout`] when `total` is zero.
    pub fn try_max_total_time(self, total: Duration) -> Result<Self, ConfigError> {
        Ok(self.with_option(MaxTotalTime::new(total)?))
    }

    /// Compute delays with the given backoff.
    pub fn backoff(self, backoff: Backoff) -> Self {
        self.with_option(BackoffDelay::new(backoff))
    }

    /// Compute delays with the given backoff, never exceeding `max_delay`.
    pub fn backoff_capped(self, backoff: Backoff, max_delay: Duration) -> Self {
        self.with_option(BackoffDelay::new(backoff).with_max_delay(max_delay))
    }

    /// Add a random offset to every delay.
    pub fn jitter(self, range: JitterRange) -> Self {
        self.with_option(JitterDelay(range))
    }

    /// Retry using a custom predicate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use undertow::{RetryDecision, RetryError, RetryPolicy};
    ///
    /// # tokio_test::block_on(async {
    /// let policy = RetryPolicy::new()
    ///     .can_retry(|e: &u16| {
    ///         if *e >= 500 {
    ///             RetryDecision::retry()
    ///         } else {
    ///             RetryDecision::stop_with("client error")
    ///         }
    ///     })
    ///     .max_attempts(3);
    ///
    /// let result = policy.run(|| async { Err::<(), u16>(404) }).await;
    /// assert!(matches!(
    ///     result,
    ///     Err(RetryError::NonRetriable { attempts: 1, cause: 404, .. })
    /// ));
    /// # });
    /// ```
    pub fn can_retry<F>(self, predicate: F) -> Self
    where
        F: Fn(&E) -> RetryDecision + Send + Sync + 'static,
    {
        self.with_option(CustomPredicate::new(predicate))
    }

    /// Options in evaluation order.
    pub fn options(&self) -> impl Iterator<Item = &dyn RetryOption<E>> {
        self.options.iter().map(|o| o.as_ref())
    }

    /// Number of options.
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Whether the policy has no options.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// The tightest time budget of any option, if one is set.
    pub fn deadline(&self) -> Option<Duration> {
        self.options.iter().filter_map(|o| o.deadline()).min()
    }

    /// Run every option's check in order, stopping at the first veto.
    fn evaluate(&self, ctx: &AttemptContext<'_, E>) -> Result<(), StopReason> {
        self.options.iter().try_for_each(|o| o.check(ctx))
    }

    /// Fold delay contributions over the previous delay.
    fn next_delay(&self, previous: Duration, ctx: &AttemptContext<'_, E>) -> Duration {
        self.options
            .iter()
            .fold(previous, |running, o| o.contribute_delay(running, ctx))
    }
}

impl<E> RetryPolicy<E>
where
    E: ErrorTag + 'static,
{
    /// Retry only errors whose tag is in `tags`.
    pub fn retryable_errors(self, tags: impl IntoIterator<Item = E::Tag>) -> Self {
        self.with_option(RetriableErrors::new(tags))
    }

    /// Never retry errors whose tag is in `tags`.
    pub fn non_retryable_errors(self, tags: impl IntoIterator<Item = E::Tag>) -> Self {
        self.with_option(NonRetriableErrors::new(tags))
    }
}

impl<E> RetryPolicy<E> {
    /// Run `operation` until it succeeds or the policy stops it.
    ///
    /// Each attempt calls `operation` afresh; a future is never polled again
    /// after it has failed.
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute(operation, None, |_: &RetryEvent<'_, E>| {})
            .await
    }

    /// Like [`run`](Self::run), but stops with [`RetryError::Cancelled`] once
    /// `token` is cancelled.
    ///
    /// An attempt in flight at the time of cancellation is dropped and its
    /// result is never observed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use undertow::RetryPolicy;
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # tokio_test::block_on(async {
    /// let token = CancellationToken::new();
    /// token.cancel();
    ///
    /// let policy = RetryPolicy::<&str>::new().max_attempts(3);
    /// let result = policy
    ///     .run_with_cancel(|| async { Ok::<_, &str>(1) }, &token)
    ///     .await;
    ///
    /// assert!(result.unwrap_err().is_cancelled());
    /// # });
    /// ```
    pub async fn run_with_cancel<T, F, Fut>(
        &self,
        operation: F,
        token: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute(operation, Some(token.clone()), |_: &RetryEvent<'_, E>| {})
            .await
    }

    /// Like [`run`](Self::run), with a hook called after every failed attempt.
    ///
    /// The hook runs synchronously before the loop sleeps (or stops), and
    /// should not block; use it for logging or metrics.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use undertow::{Backoff, RetryEvent, RetryPolicy};
    /// use std::time::Duration;
    ///
    /// # tokio_test::block_on(async {
    /// let mut seen = Vec::new();
    /// let policy = RetryPolicy::new()
    ///     .max_attempts(3)
    ///     .backoff(Backoff::constant(Duration::from_millis(1)));
    ///
    /// let _ = policy
    ///     .run_with_hooks(
    ///         || async { Err::<(), _>("down") },
    ///         |event: &RetryEvent<'_, &str>| seen.push((event.attempt, event.next_delay)),
    ///     )
    ///     .await;
    ///
    /// assert_eq!(
    ///     seen,
    ///     vec![
    ///         (1, Some(Duration::from_millis(1))),
    ///         (2, Some(Duration::from_millis(1))),
    ///         (3, None),
    ///     ]
    /// );
    /// # });
    /// ```
    pub async fn run_with_hooks<T, F, Fut, H>(
        &self,
        operation: F,
        on_retry: H,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        H: FnMut(&RetryEvent<'_, E>),
    {
        self.execute(operation, None, on_retry).await
    }

    async fn execute<T, F, Fut, H>(
        &self,
        mut operation: F,
        cancel: Option<CancellationToken>,
        mut on_retry: H,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        H: FnMut(&RetryEvent<'_, E>),
    {
        let start = Instant::now();
        let mut watchdog = Watchdog::arm(start, self.deadline(), cancel);
        let mut attempt = 0u32;
        let mut delay = Duration::ZERO;
        let mut last_error: Option<E> = None;

        loop {
            if let Some(interrupt) = watchdog.poll_now() {
                return Err(interrupted(interrupt, start.elapsed(), attempt, last_error));
            }
            attempt = attempt.saturating_add(1);

            // The operation is only invoked once its branch is first polled,
            // after the watchdog, so an interrupt that is already due never
            // starts an attempt.
            let started = AtomicBool::new(false);
            let result = tokio::select! {
                biased;
                interrupt = watchdog.fired() => {
                    if !started.load(Ordering::Relaxed) {
                        attempt -= 1;
                    }
                    return Err(interrupted(interrupt, start.elapsed(), attempt, last_error));
                }
                result = async {
                    started.store(true, Ordering::Relaxed);
                    operation().await
                } => result,
            };

            let error = match result {
                Ok(value) => {
                    #[cfg(feature = "tracing")]
                    if attempt > 1 {
                        tracing::debug!(attempts = attempt, "retry succeeded");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let elapsed = start.elapsed();
            let verdict = {
                let ctx = AttemptContext {
                    attempt,
                    elapsed,
                    error: &error,
                };
                self.evaluate(&ctx).map(|()| self.next_delay(delay, &ctx))
            };

            match verdict {
                Ok(next) => {
                    on_retry(&RetryEvent {
                        attempt,
                        error: &error,
                        next_delay: Some(next),
                        elapsed,
                    });
                    delay = next;
                }
                Err(reason) => {
                    on_retry(&RetryEvent {
                        attempt,
                        error: &error,
                        next_delay: None,
                        elapsed,
                    });
                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempts = attempt, %reason, "retry stopped");
                    return Err(reason.into_error(attempt, elapsed, error));
                }
            }

            #[cfg(feature = "tracing")]
            tracing::trace!(attempt, delay_ms = millis(delay), "retrying after failure");

            last_error = Some(error);

            tokio::select! {
                biased;
                interrupt = watchdog.fired() => {
                    return Err(interrupted(interrupt, start.elapsed(), attempt, last_error));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn interrupted<E>(
    interrupt: Interrupt,
    elapsed: Duration,
    attempts: u32,
    cause: Option<E>,
) -> RetryError<E> {
    match interrupt {
        Interrupt::Timeout => {
            #[cfg(feature = "tracing")]
            tracing::debug!(attempts, elapsed_ms = millis(elapsed), "retry timed out");
            RetryError::MaxTimeoutExceeded {
                elapsed,
                attempts,
                cause,
            }
        }
        Interrupt::Cancelled => {
            #[cfg(feature = "tracing")]
            tracing::debug!(attempts, "retry cancelled");
            RetryError::Cancelled { attempts, cause }
        }
    }
}

#[cfg(feature = "tracing")]
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Run `operation` under `policy`.
///
/// Shorthand for [`RetryPolicy::run`].
pub async fn retry<T, E, F, Fut>(
    operation: F,
    policy: &RetryPolicy<E>,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    policy.run(operation).await
}
