//! Retry options: the units a [`RetryPolicy`](super::RetryPolicy) is built from.
//!
//! An option can veto another attempt, contribute to the next delay, or both.
//! Options are stateless. Everything that changes between attempts (attempt
//! count, elapsed time, the error) arrives through [`AttemptContext`], so one
//! policy can drive any number of concurrent retry loops.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroU32;
use std::time::Duration;

use super::backoff::{Backoff, JitterRange};
use super::error::{ConfigError, StopReason};

/// What an option sees after a failed attempt.
#[derive(Debug)]
pub struct AttemptContext<'a, E> {
    /// Number of invocations so far, including the one that just failed.
    pub attempt: u32,
    /// Time since the loop started.
    pub elapsed: Duration,
    /// The error from the failed attempt.
    pub error: &'a E,
}

/// A single retry policy component.
///
/// Both capabilities are optional; the defaults allow retrying and leave the
/// delay untouched.
///
/// After every failed attempt the engine calls [`check`](Self::check) on each
/// option in registration order and stops at the first `Err`. If no option
/// vetoes, it folds [`contribute_delay`](Self::contribute_delay) over the
/// options in the same order, starting from the previous round's delay.
///
/// # Examples
///
/// ```rust
/// use undertow::{AttemptContext, RetryOption, RetryPolicy, StopReason};
///
/// #[derive(Debug)]
/// struct NoRetryOnEmpty;
///
/// impl RetryOption<String> for NoRetryOnEmpty {
///     fn check(&self, ctx: &AttemptContext<'_, String>) -> Result<(), StopReason> {
///         if ctx.error.is_empty() {
///             Err(StopReason::non_retriable())
///         } else {
///             Ok(())
///         }
///     }
/// }
///
/// let policy = RetryPolicy::<String>::new()
///     .with_option(NoRetryOnEmpty)
///     .max_attempts(3);
/// assert_eq!(policy.len(), 2);
/// ```
pub trait RetryOption<E>: fmt::Debug + Send + Sync {
    /// Decide whether another attempt is allowed.
    fn check(&self, _ctx: &AttemptContext<'_, E>) -> Result<(), StopReason> {
        Ok(())
    }

    /// Transform the running delay total.
    fn contribute_delay(&self, running: Duration, _ctx: &AttemptContext<'_, E>) -> Duration {
        running
    }

    /// Total time budget to arm as a watchdog, measured from loop start.
    fn deadline(&self) -> Option<Duration> {
        None
    }
}

/// Structural classification of an error.
///
/// Allow and deny lists compare tags, so the error type decides what counts
/// as "the same kind" of failure.
///
/// # Examples
///
/// ```rust
/// use undertow::ErrorTag;
///
/// #[derive(Debug)]
/// enum FetchError {
///     Timeout,
///     Status(u16),
/// }
///
/// #[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// enum FetchKind {
///     Timeout,
///     ClientError,
///     ServerError,
/// }
///
/// impl ErrorTag for FetchError {
///     type Tag = FetchKind;
///
///     fn tag(&self) -> FetchKind {
///         match self {
///             FetchError::Timeout => FetchKind::Timeout,
///             FetchError::Status(s) if *s < 500 => FetchKind::ClientError,
///             FetchError::Status(_) => FetchKind::ServerError,
///         }
///     }
/// }
///
/// assert_eq!(FetchError::Status(503).tag(), FetchKind::ServerError);
/// ```
pub trait ErrorTag {
    /// The classification key.
    type Tag: Eq + Hash + fmt::Debug + Send + Sync;

    /// Classify this error.
    fn tag(&self) -> Self::Tag;
}

/// Stop once the operation has been invoked `n` times.
///
/// The limit is never zero; [`MaxAttempts::new`] rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxAttempts(NonZeroU32);

impl MaxAttempts {
    /// Create an attempt limit.
    ///
    /// Fails with [`ConfigError::ZeroMaxAttempts`] when `n` is zero.
    pub fn new(n: u32) -> Result<Self, ConfigError> {
        NonZeroU32::new(n)
            .map(Self)
            .ok_or(ConfigError::ZeroMaxAttempts)
    }

    /// The attempt limit.
    pub fn limit(&self) -> u32 {
        self.0.get()
    }
}

impl<E> RetryOption<E> for MaxAttempts {
    fn check(&self, ctx: &AttemptContext<'_, E>) -> Result<(), StopReason> {
        if ctx.attempt >= self.limit() {
            Err(StopReason::MaxAttemptsExceeded)
        } else {
            Ok(())
        }
    }
}

/// Stop once the total elapsed time reaches the budget.
///
/// Besides the check after each failure, the budget is armed as a watchdog
/// that pre-empts an in-flight attempt or sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxTotalTime(Duration);

impl MaxTotalTime {
    /// Create a total time budget.
    ///
    /// Fails with [`ConfigError::ZeroTimeout`] when `total` is zero.
    pub fn new(total: Duration) -> Result<Self, ConfigError> {
        if total.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(Self(total))
    }

    /// The time budget.
    pub fn budget(&self) -> Duration {
        self.0
    }
}

impl<E> RetryOption<E> for MaxTotalTime {
    fn check(&self, ctx: &AttemptContext<'_, E>) -> Result<(), StopReason> {
        if ctx.elapsed >= self.0 {
            Err(StopReason::MaxTimeoutExceeded)
        } else {
            Ok(())
        }
    }

    fn deadline(&self) -> Option<Duration> {
        Some(self.0)
    }
}

/// Retry only errors whose tag is in the allow set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetriableErrors<T: Eq + Hash> {
    allow: HashSet<T>,
}

impl<T: Eq + Hash> RetriableErrors<T> {
    /// Create from any collection of tags.
    pub fn new(allow: impl IntoIterator<Item = T>) -> Self {
        Self {
            allow: allow.into_iter().collect(),
        }
    }
}

impl<E> RetryOption<E> for RetriableErrors<E::Tag>
where
    E: ErrorTag,
{
    fn check(&self, ctx: &AttemptContext<'_, E>) -> Result<(), StopReason> {
        let tag = ctx.error.tag();
        if self.allow.contains(&tag) {
            Ok(())
        } else {
            Err(StopReason::NonRetriable {
                message: Some(format!("{:?} is not a retriable error", tag)),
            })
        }
    }
}

/// Never retry errors whose tag is in the deny set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonRetriableErrors<T: Eq + Hash> {
    deny: HashSet<T>,
}

impl<T: Eq + Hash> NonRetriableErrors<T> {
    /// Create from any collection of tags.
    pub fn new(deny: impl IntoIterator<Item = T>) -> Self {
        Self {
            deny: deny.into_iter().collect(),
        }
    }
}

impl<E> RetryOption<E> for NonRetriableErrors<E::Tag>
where
    E: ErrorTag,
{
    fn check(&self, ctx: &AttemptContext<'_, E>) -> Result<(), StopReason> {
        let tag = ctx.error.tag();
        if self.deny.contains(&tag) {
            Err(StopReason::NonRetriable {
                message: Some(format!("{:?} is a non-retriable error", tag)),
            })
        } else {
            Ok(())
        }
    }
}

/// Verdict of a [`CustomPredicate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether another attempt is allowed.
    pub retry: bool,
    /// Explanation carried into [`RetryError::NonRetriable`](super::RetryError::NonRetriable).
    pub message: Option<String>,
}

impl RetryDecision {
    /// Allow another attempt.
    pub fn retry() -> Self {
        Self {
            retry: true,
            message: None,
        }
    }

    /// Refuse another attempt.
    pub fn stop() -> Self {
        Self {
            retry: false,
            message: None,
        }
    }

    /// Refuse another attempt with an explanation.
    pub fn stop_with(message: impl Into<String>) -> Self {
        Self {
            retry: false,
            message: Some(message.into()),
        }
    }
}

impl From<bool> for RetryDecision {
    fn from(retry: bool) -> Self {
        Self {
            retry,
            message: None,
        }
    }
}

/// Delegate the retry decision to a caller-supplied function.
pub struct CustomPredicate<F> {
    predicate: F,
}

impl<F> CustomPredicate<F> {
    /// Wrap a predicate.
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> fmt::Debug for CustomPredicate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomPredicate").finish_non_exhaustive()
    }
}

impl<E, F> RetryOption<E> for CustomPredicate<F>
where
    F: Fn(&E) -> RetryDecision + Send + Sync,
{
    fn check(&self, ctx: &AttemptContext<'_, E>) -> Result<(), StopReason> {
        let decision = (self.predicate)(ctx.error);
        if decision.retry {
            Ok(())
        } else {
            Err(StopReason::NonRetriable {
                message: decision.message,
            })
        }
    }
}

/// Replace the running delay with the backoff delay for the current attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffDelay {
    backoff: Backoff,
    max_delay: Option<Duration>,
}

impl BackoffDelay {
    /// Create an uncapped backoff contributor.
    pub fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            max_delay: None,
        }
    }

    /// Cap the delay this contributor produces.
    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self
    }
}

impl<E> RetryOption<E> for BackoffDelay {
    fn contribute_delay(&self, _running: Duration, ctx: &AttemptContext<'_, E>) -> Duration {
        let delay = self.backoff.delay_for_attempt(ctx.attempt);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// Add a random offset to the running delay.
///
/// Register it after [`BackoffDelay`], which replaces the running total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterDelay(pub JitterRange);

impl<E> RetryOption<E> for JitterDelay {
    fn contribute_delay(&self, running: Duration, _ctx: &AttemptContext<'_, E>) -> Duration {
        self.0.apply(running)
    }
}

#[cfg(test)]
mod option_tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl ErrorTag for TestError {
        type Tag = TestError;

        fn tag(&self) -> TestError {
            self.clone()
        }
    }

    fn ctx(attempt: u32, elapsed_ms: u64, error: &TestError) -> AttemptContext<'_, TestError> {
        AttemptContext {
            attempt,
            elapsed: Duration::from_millis(elapsed_ms),
            error,
        }
    }

    #[test]
    fn max_attempts_vetoes_at_limit() {
        let option = MaxAttempts::new(3).unwrap();
        let err = TestError::Transient;

        assert!(RetryOption::check(&option, &ctx(1, 0, &err)).is_ok());
        assert!(RetryOption::check(&option, &ctx(2, 0, &err)).is_ok());
        assert_eq!(
            RetryOption::check(&option, &ctx(3, 0, &err)),
            Err(StopReason::MaxAttemptsExceeded)
        );
    }

    #[test]
    fn max_total_time_vetoes_at_budget_and_arms_deadline() {
        let option = MaxTotalTime::new(Duration::from_millis(50)).unwrap();
        let err = TestError::Transient;

        assert!(RetryOption::check(&option, &ctx(1, 49, &err)).is_ok());
        assert_eq!(
            RetryOption::check(&option, &ctx(2, 50, &err)),
            Err(StopReason::MaxTimeoutExceeded)
        );
        assert_eq!(
            RetryOption::<TestError>::deadline(&option),
            Some(Duration::from_millis(50))
        );
    }

    #[test]
    fn zero_limits_are_rejected_at_construction() {
        assert_eq!(MaxAttempts::new(0), Err(ConfigError::ZeroMaxAttempts));
        assert_eq!(
            MaxTotalTime::new(Duration::ZERO),
            Err(ConfigError::ZeroTimeout)
        );
        assert_eq!(MaxAttempts::new(1).map(|m| m.limit()), Ok(1));
        assert_eq!(
            MaxTotalTime::new(Duration::from_nanos(1)).map(|m| m.budget()),
            Ok(Duration::from_nanos(1))
        );
    }

    #[test]
    fn retriable_errors_rejects_unlisted_tags() {
        let option = RetriableErrors::new([TestError::Transient]);

        assert!(option.check(&ctx(1, 0, &TestError::Transient)).is_ok());
        assert!(matches!(
            option.check(&ctx(1, 0, &TestError::Permanent)),
            Err(StopReason::NonRetriable { message: Some(_) })
        ));
    }

    #[test]
    fn non_retriable_errors_rejects_listed_tags() {
        let option = NonRetriableErrors::new([TestError::Permanent]);

        assert!(option.check(&ctx(1, 0, &TestError::Transient)).is_ok());
        assert!(matches!(
            option.check(&ctx(1, 0, &TestError::Permanent)),
            Err(StopReason::NonRetriable { .. })
        ));
    }

    #[test]
    fn custom_predicate_carries_message() {
        let option = CustomPredicate::new(|e: &TestError| match e {
            TestError::Transient => RetryDecision::retry(),
            TestError::Permanent => RetryDecision::stop_with("permanent failure"),
        });

        assert!(option.check(&ctx(1, 0, &TestError::Transient)).is_ok());
        assert_eq!(
            option.check(&ctx(1, 0, &TestError::Permanent)),
            Err(StopReason::NonRetriable {
                message: Some("permanent failure".to_string())
            })
        );
    }

    #[test]
    fn retry_decision_from_bool() {
        assert_eq!(RetryDecision::from(true), RetryDecision::retry());
        assert_eq!(RetryDecision::from(false), RetryDecision::stop());
    }

    #[test]
    fn backoff_delay_replaces_running_total() {
        let option = BackoffDelay::new(Backoff::linear(Duration::from_millis(10)));
        let err = TestError::Transient;

        let delay =
            RetryOption::contribute_delay(&option, Duration::from_secs(9), &ctx(2, 0, &err));
        assert_eq!(delay, Duration::from_millis(20));
    }

    #[test]
    fn backoff_delay_respects_cap() {
        let option = BackoffDelay::new(Backoff::linear(Duration::from_millis(100)))
            .with_max_delay(Duration::from_millis(250));
        let err = TestError::Transient;

        let delay = RetryOption::contribute_delay(&option, Duration::ZERO, &ctx(5, 0, &err));
        assert_eq!(delay, Duration::from_millis(250));
    }

    #[test]
    fn jitter_delay_adds_to_running_total() {
        let option = JitterDelay(JitterRange::from_millis(100, 250).unwrap());
        let err = TestError::Transient;
        let running = Duration::from_millis(20);

        for _ in 0..1_000 {
            let delay = RetryOption::contribute_delay(&option, running, &ctx(1, 0, &err));
            assert!(delay >= Duration::from_millis(120));
            assert!(delay < Duration::from_millis(270));
        }
    }

    #[test]
    fn default_capabilities_are_noops() {
        #[derive(Debug)]
        struct Inert;
        impl RetryOption<TestError> for Inert {}

        let err = TestError::Permanent;
        let c = ctx(9, 9_000, &err);
        assert!(Inert.check(&c).is_ok());
        assert_eq!(
            Inert.contribute_delay(Duration::from_millis(7), &c),
            Duration::from_millis(7)
        );
        assert_eq!(Inert.deadline(), None);
    }
}
