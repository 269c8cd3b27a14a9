//! Declarative retry configuration.

use std::time::Duration;

use super::backoff::{Backoff, JitterRange};
use super::engine::RetryPolicy;
use super::error::ConfigError;

/// Plain-data description of a retry policy.
///
/// Covers the budget and delay settings that can be expressed as data. Error
/// classifiers are typed and are added to the resulting [`RetryPolicy`] with
/// [`RetryPolicy::retryable_errors`], [`RetryPolicy::non_retryable_errors`] or
/// [`RetryPolicy::can_retry`].
///
/// With the `serde` feature the config can be deserialized; durations are
/// written in milliseconds:
///
/// ```json
/// {
///   "max_attempts": 5,
///   "maximum_timeout_ms": 2000,
///   "backoff": { "kind": "linear", "delay_ms": 100 },
///   "jitter": { "min_jitter_ms": 0, "max_jitter_ms": 50 }
/// }
/// ```
///
/// # Examples
///
/// ```rust
/// use undertow::{Backoff, RetryConfig};
/// use std::time::Duration;
///
/// let policy = RetryConfig::new(Backoff::linear(Duration::from_millis(10)))
///     .with_max_attempts(5)
///     .with_maximum_timeout(Duration::from_secs(2))
///     .into_policy::<std::io::Error>()
///     .unwrap();
///
/// assert_eq!(policy.deadline(), Some(Duration::from_secs(2)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryConfig {
    /// Maximum number of invocations. Must be greater than zero.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub max_attempts: Option<u32>,
    /// Total time budget. Must be greater than zero.
    #[cfg_attr(
        feature = "serde",
        serde(
            rename = "maximum_timeout_ms",
            default,
            with = "millis_opt",
            skip_serializing_if = "Option::is_none"
        )
    )]
    pub maximum_timeout: Option<Duration>,
    /// Delay strategy.
    pub backoff: Backoff,
    /// Optional jitter on top of the backoff delay.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub jitter: Option<JitterRange>,
}

impl RetryConfig {
    /// Create a config with only a backoff strategy.
    pub fn new(backoff: Backoff) -> Self {
        Self {
            max_attempts: None,
            maximum_timeout: None,
            backoff,
            jitter: None,
        }
    }

    /// Set the attempt limit.
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    /// Set the total time budget.
    pub fn with_maximum_timeout(mut self, timeout: Duration) -> Self {
        self.maximum_timeout = Some(timeout);
        self
    }

    /// Set the jitter range.
    pub fn with_jitter(mut self, jitter: JitterRange) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Check the config for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == Some(0) {
            return Err(ConfigError::ZeroMaxAttempts);
        }
        if self.maximum_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Build a policy.
    ///
    /// Options are registered in this order: attempt limit, time budget,
    /// backoff, jitter. Classifiers added to the returned policy come after
    /// them; use [`RetryPolicy::apply_config`] on a policy that already holds
    /// classifiers to put the classifiers first.
    pub fn into_policy<E>(self) -> Result<RetryPolicy<E>, ConfigError> {
        RetryPolicy::new().apply_config(self)
    }
}

impl<E> RetryPolicy<E> {
    /// Append the options described by `config` to this policy.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use undertow::{Backoff, RetryConfig, RetryDecision, RetryPolicy};
    /// use std::time::Duration;
    ///
    /// let config = RetryConfig::new(Backoff::constant(Duration::from_millis(5)))
    ///     .with_max_attempts(3);
    ///
    /// let policy = RetryPolicy::new()
    ///     .can_retry(|e: &String| RetryDecision::from(!e.contains("fatal")))
    ///     .apply_config(config)
    ///     .unwrap();
    ///
    /// assert_eq!(policy.len(), 3);
    /// ```
    pub fn apply_config(self, config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut policy = self;
        if let Some(n) = config.max_attempts {
            policy = policy.try_max_attempts(n)?;
        }
        if let Some(total) = config.maximum_timeout {
            policy = policy.try_max_total_time(total)?;
        }
        policy = policy.backoff(config.backoff);
        if let Some(jitter) = config.jitter {
            policy = policy.jitter(jitter);
        }
        Ok(policy)
    }
}

/// Serde helpers for durations written as integer milliseconds.
#[cfg(feature = "serde")]
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(feature = "serde")]
pub(crate) mod millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

/// Unvalidated jitter bounds as they appear in serialized config.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
pub(crate) struct RawJitter {
    min_jitter_ms: u64,
    max_jitter_ms: u64,
}

#[cfg(feature = "serde")]
impl TryFrom<RawJitter> for JitterRange {
    type Error = ConfigError;

    fn try_from(raw: RawJitter) -> Result<Self, Self::Error> {
        JitterRange::from_millis(raw.min_jitter_ms, raw.max_jitter_ms)
    }
}
