//! Delay computation: backoff strategies and jitter.

use std::time::Duration;

use rand::Rng;

use super::error::ConfigError;

/// The backoff strategy used to compute the delay before the next attempt.
///
/// A `Backoff` is pure data. [`Backoff::delay_for_attempt`] maps a 1-indexed
/// attempt number to a delay and has no side effects, so the same value can be
/// shared between any number of concurrent retry loops.
///
/// # Examples
///
/// ```rust
/// use undertow::Backoff;
/// use std::time::Duration;
///
/// let backoff = Backoff::linear(Duration::from_millis(100));
///
/// assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
/// assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(200));
/// assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(300));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum Backoff {
    /// Fixed delay between attempts.
    Constant {
        /// Delay applied after every failed attempt.
        #[cfg_attr(
            feature = "serde",
            serde(rename = "delay_ms", with = "crate::retry::config::millis")
        )]
        delay: Duration,
    },
    /// Delay grows by a fixed increment: `delay + (attempt - 1) * increment`.
    ///
    /// When `increment` is `None` it defaults to `delay`, giving
    /// `attempt * delay`.
    Linear {
        /// Delay after the first failed attempt.
        #[cfg_attr(
            feature = "serde",
            serde(rename = "delay_ms", with = "crate::retry::config::millis")
        )]
        delay: Duration,
        /// Amount added for every further attempt.
        #[cfg_attr(
            feature = "serde",
            serde(
                rename = "increment_ms",
                default,
                with = "crate::retry::config::millis_opt",
                skip_serializing_if = "Option::is_none"
            )
        )]
        increment: Option<Duration>,
    },
    /// Static exponentiation: `base ^ exponent` milliseconds.
    ///
    /// The exponent is fixed at construction and does not depend on the
    /// attempt number, so every attempt waits the same amount. Callers that
    /// want delays that grow per attempt should use [`Backoff::Linear`] or
    /// [`Backoff::Fibonacci`].
    Exponential {
        /// Base, in milliseconds.
        base: u64,
        /// Fixed exponent.
        exponent: u32,
    },
    /// Delay follows the Fibonacci sequence: `base * fib(attempt)`.
    Fibonacci {
        /// Base delay multiplied by the Fibonacci number.
        #[cfg_attr(
            feature = "serde",
            serde(rename = "base_ms", with = "crate::retry::config::millis")
        )]
        base: Duration,
    },
}

impl Backoff {
    /// Create a constant backoff.
    pub fn constant(delay: Duration) -> Self {
        Self::Constant { delay }
    }

    /// Create a linear backoff where the increment equals the initial delay.
    ///
    /// Produces `delay, 2 * delay, 3 * delay, ...`.
    pub fn linear(delay: Duration) -> Self {
        Self::Linear {
            delay,
            increment: None,
        }
    }

    /// Create a linear backoff with an explicit increment.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use undertow::Backoff;
    /// use std::time::Duration;
    ///
    /// let backoff = Backoff::linear_with_increment(
    ///     Duration::from_millis(100),
    ///     Duration::from_millis(50),
    /// );
    ///
    /// assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
    /// assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(150));
    /// assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(200));
    /// ```
    pub fn linear_with_increment(delay: Duration, increment: Duration) -> Self {
        Self::Linear {
            delay,
            increment: Some(increment),
        }
    }

    /// Create an exponential backoff of `base ^ exponent` milliseconds.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use undertow::Backoff;
    /// use std::time::Duration;
    ///
    /// let backoff = Backoff::exponential(2, 5);
    ///
    /// // The exponent is static: every attempt waits 32ms.
    /// assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(32));
    /// assert_eq!(backoff.delay_for_attempt(7), Duration::from_millis(32));
    /// ```
    pub fn exponential(base: u64, exponent: u32) -> Self {
        Self::Exponential { base, exponent }
    }

    /// Create a Fibonacci backoff.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use undertow::Backoff;
    /// use std::time::Duration;
    ///
    /// let backoff = Backoff::fibonacci(Duration::from_millis(100));
    ///
    /// // 100ms, 100ms, 200ms, 300ms, 500ms
    /// assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
    /// assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(100));
    /// assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(200));
    /// assert_eq!(backoff.delay_for_attempt(5), Duration::from_millis(500));
    /// ```
    pub fn fibonacci(base: Duration) -> Self {
        Self::Fibonacci { base }
    }

    /// Calculate the delay after the given attempt (1-indexed).
    ///
    /// Attempt `0` is treated as attempt `1`. All arithmetic saturates.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Linear { delay, increment } => {
                let step = increment.unwrap_or(*delay);
                delay.saturating_add(step.saturating_mul(attempt - 1))
            }
            Backoff::Exponential { base, exponent } => {
                Duration::from_millis(base.saturating_pow(*exponent))
            }
            Backoff::Fibonacci { base } => base.saturating_mul(fibonacci(attempt)),
        }
    }

    /// An iterator over successive delays, starting at attempt 1.
    ///
    /// The schedule carries its own attempt counter, which advances once per
    /// call to `next` and never goes backwards.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use undertow::Backoff;
    /// use std::time::Duration;
    ///
    /// let delays: Vec<_> = Backoff::linear(Duration::from_millis(10))
    ///     .schedule()
    ///     .take(3)
    ///     .collect();
    ///
    /// assert_eq!(
    ///     delays,
    ///     vec![
    ///         Duration::from_millis(10),
    ///         Duration::from_millis(20),
    ///         Duration::from_millis(30),
    ///     ]
    /// );
    /// ```
    pub fn schedule(&self) -> BackoffSchedule<'_> {
        BackoffSchedule {
            backoff: self,
            attempt: 0,
        }
    }
}

/// Iterator produced by [`Backoff::schedule`].
#[derive(Debug, Clone)]
pub struct BackoffSchedule<'a> {
    backoff: &'a Backoff,
    attempt: u32,
}

impl BackoffSchedule<'_> {
    /// Number of delays produced so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Iterator for BackoffSchedule<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        Some(self.backoff.delay_for_attempt(self.attempt))
    }
}

/// A uniformly distributed random offset in `[min, max)` added on top of a delay.
///
/// Jitter spreads out retries from independent callers so they do not hit a
/// recovering service in lockstep. It reduces the chance of collisions but does
/// not coordinate callers.
///
/// # Examples
///
/// ```rust
/// use undertow::JitterRange;
/// use std::time::Duration;
///
/// let jitter = JitterRange::new(Duration::from_millis(100), Duration::from_millis(250)).unwrap();
/// let delay = jitter.apply(Duration::from_millis(1000));
///
/// assert!(delay >= Duration::from_millis(1100));
/// assert!(delay < Duration::from_millis(1250));
///
/// // An empty range is rejected at construction.
/// assert!(JitterRange::new(Duration::from_millis(5), Duration::from_millis(5)).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "crate::retry::config::RawJitter"))]
pub struct JitterRange {
    #[cfg_attr(
        feature = "serde",
        serde(
            rename = "min_jitter_ms",
            serialize_with = "crate::retry::config::millis::serialize"
        )
    )]
    min: Duration,
    #[cfg_attr(
        feature = "serde",
        serde(
            rename = "max_jitter_ms",
            serialize_with = "crate::retry::config::millis::serialize"
        )
    )]
    max: Duration,
}

impl JitterRange {
    /// Create a jitter range.
    ///
    /// Fails with [`ConfigError::InvalidJitter`] unless `max > min`.
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if max <= min {
            return Err(ConfigError::InvalidJitter { min, max });
        }
        Ok(Self { min, max })
    }

    /// Create a jitter range from millisecond bounds.
    pub fn from_millis(min_jitter_ms: u64, max_jitter_ms: u64) -> Result<Self, ConfigError> {
        Self::new(
            Duration::from_millis(min_jitter_ms),
            Duration::from_millis(max_jitter_ms),
        )
    }

    /// Lower bound (inclusive).
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Upper bound (exclusive).
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Add a random offset to `delay` using the thread-local generator.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with(delay, &mut rand::rng())
    }

    /// Add a random offset to `delay` drawn from the supplied generator.
    pub fn apply_with<R: Rng + ?Sized>(&self, delay: Duration, rng: &mut R) -> Duration {
        delay.saturating_add(self.offset_with(rng))
    }

    fn offset_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let lo = as_nanos_u64(self.min);
        let hi = as_nanos_u64(self.max);
        if hi <= lo {
            // Both bounds beyond u64 nanoseconds; the range collapses.
            return self.min;
        }
        Duration::from_nanos(rng.random_range(lo..hi))
    }
}

fn as_nanos_u64(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Calculate the nth Fibonacci number.
fn fibonacci(n: u32) -> u32 {
    if n == 0 {
        return 0;
    }
    let mut a = 0u32;
    let mut b = 1u32;
    for _ in 1..n {
        let temp = a.saturating_add(b);
        a = b;
        b = temp;
    }
    b
}
