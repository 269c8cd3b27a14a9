//! Error types for retry operations.

use std::fmt;
use std::time::Duration;

/// Terminal failure of a retry loop.
///
/// Every variant records how many times the operation was invoked and, where
/// one exists, the operation error that triggered the stop.
///
/// # Examples
///
/// ```rust
/// use undertow::{RetryError, RetryPolicy};
///
/// # tokio_test::block_on(async {
/// let policy = RetryPolicy::new().max_attempts(2);
///
/// let result = policy.run(|| async { Err::<(), _>("always fails") }).await;
///
/// match result {
///     Err(RetryError::MaxAttemptsExceeded { attempts, cause }) => {
///         assert_eq!(attempts, 2);
///         assert_eq!(cause, "always fails");
///     }
///     other => panic!("unexpected outcome: {:?}", other),
/// }
/// # });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The attempt limit was reached.
    MaxAttemptsExceeded {
        /// Total number of invocations.
        attempts: u32,
        /// Error from the final attempt.
        cause: E,
    },
    /// The total time budget was exceeded, either at a check point after a
    /// failed attempt or because the watchdog fired.
    MaxTimeoutExceeded {
        /// Time elapsed since the loop started.
        elapsed: Duration,
        /// Total number of invocations, including an abandoned in-flight one.
        attempts: u32,
        /// Error from the last completed attempt, if any attempt completed.
        cause: Option<E>,
    },
    /// An error classifier decided the error must not be retried.
    NonRetriable {
        /// Total number of invocations.
        attempts: u32,
        /// Explanation supplied by the classifier, if any.
        message: Option<String>,
        /// The error that was rejected.
        cause: E,
    },
    /// The loop was cancelled from outside.
    Cancelled {
        /// Total number of invocations, including an abandoned in-flight one.
        attempts: u32,
        /// Error from the last completed attempt, if any attempt completed.
        cause: Option<E>,
    },
}

impl<E> RetryError<E> {
    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::MaxAttemptsExceeded { attempts, .. }
            | Self::MaxTimeoutExceeded { attempts, .. }
            | Self::NonRetriable { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Get a reference to the triggering error, if there is one.
    pub fn cause(&self) -> Option<&E> {
        match self {
            Self::MaxAttemptsExceeded { cause, .. } | Self::NonRetriable { cause, .. } => {
                Some(cause)
            }
            Self::MaxTimeoutExceeded { cause, .. } | Self::Cancelled { cause, .. } => {
                cause.as_ref()
            }
        }
    }

    /// Extract the triggering error, discarding metadata.
    pub fn into_cause(self) -> Option<E> {
        match self {
            Self::MaxAttemptsExceeded { cause, .. } | Self::NonRetriable { cause, .. } => {
                Some(cause)
            }
            Self::MaxTimeoutExceeded { cause, .. } | Self::Cancelled { cause, .. } => cause,
        }
    }

    /// Returns true if the attempt limit was reached.
    pub fn is_max_attempts(&self) -> bool {
        matches!(self, Self::MaxAttemptsExceeded { .. })
    }

    /// Returns true if the time budget was exceeded.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::MaxTimeoutExceeded { .. })
    }

    /// Returns true if a classifier rejected the error.
    pub fn is_non_retriable(&self) -> bool {
        matches!(self, Self::NonRetriable { .. })
    }

    /// Returns true if the loop was cancelled externally.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Map the cause to a different error type.
    pub fn map_cause<F, E2>(self, f: F) -> RetryError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::MaxAttemptsExceeded { attempts, cause } => RetryError::MaxAttemptsExceeded {
                attempts,
                cause: f(cause),
            },
            Self::MaxTimeoutExceeded {
                elapsed,
                attempts,
                cause,
            } => RetryError::MaxTimeoutExceeded {
                elapsed,
                attempts,
                cause: cause.map(f),
            },
            Self::NonRetriable {
                attempts,
                message,
                cause,
            } => RetryError::NonRetriable {
                attempts,
                message,
                cause: f(cause),
            },
            Self::Cancelled { attempts, cause } => RetryError::Cancelled {
                attempts,
                cause: cause.map(f),
            },
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxAttemptsExceeded { attempts, cause } => {
                write!(f, "retry exhausted after {} attempts: {}", attempts, cause)
            }
            Self::MaxTimeoutExceeded {
                elapsed, attempts, ..
            } => {
                write!(
                    f,
                    "retry timed out after {:?} ({} attempts)",
                    elapsed, attempts
                )?;
                if let Some(cause) = self.cause() {
                    write!(f, ": {}", cause)?;
                }
                Ok(())
            }
            Self::NonRetriable {
                attempts,
                message,
                cause,
            } => {
                write!(f, "non-retriable error on attempt {}", attempts)?;
                if let Some(message) = message {
                    write!(f, " ({})", message)?;
                }
                write!(f, ": {}", cause)
            }
            Self::Cancelled { attempts, .. } => {
                write!(f, "retry cancelled after {} attempts", attempts)?;
                if let Some(cause) = self.cause() {
                    write!(f, ": {}", cause)?;
                }
                Ok(())
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Why a retry option vetoed another attempt.
///
/// Options return a `StopReason`; the engine attaches the attempt count,
/// elapsed time and triggering error to turn it into a [`RetryError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The attempt limit was reached.
    MaxAttemptsExceeded,
    /// The time budget was exceeded.
    MaxTimeoutExceeded,
    /// The error must not be retried.
    NonRetriable {
        /// Optional explanation.
        message: Option<String>,
    },
}

impl StopReason {
    /// A non-retriable stop with no message.
    pub fn non_retriable() -> Self {
        Self::NonRetriable { message: None }
    }

    pub(crate) fn into_error<E>(self, attempts: u32, elapsed: Duration, cause: E) -> RetryError<E> {
        match self {
            Self::MaxAttemptsExceeded => RetryError::MaxAttemptsExceeded { attempts, cause },
            Self::MaxTimeoutExceeded => RetryError::MaxTimeoutExceeded {
                elapsed,
                attempts,
                cause: Some(cause),
            },
            Self::NonRetriable { message } => RetryError::NonRetriable {
                attempts,
                message,
                cause,
            },
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxAttemptsExceeded => write!(f, "max attempts exceeded"),
            Self::MaxTimeoutExceeded => write!(f, "max timeout exceeded"),
            Self::NonRetriable { message: Some(m) } => write!(f, "non-retriable: {}", m),
            Self::NonRetriable { message: None } => write!(f, "non-retriable"),
        }
    }
}

/// A retry configuration with contradictory or out-of-range parameters.
///
/// Returned at construction time; an invalid configuration never reaches the
/// retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Jitter range is empty (`max <= min`).
    InvalidJitter {
        /// Configured lower bound.
        min: Duration,
        /// Configured upper bound.
        max: Duration,
    },
    /// `max_attempts` was zero.
    ZeroMaxAttempts,
    /// `maximum_timeout` was zero.
    ZeroTimeout,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJitter { min, max } => write!(
                f,
                "invalid jitter range: max ({:?}) must be greater than min ({:?})",
                max, min
            ),
            Self::ZeroMaxAttempts => write!(f, "max_attempts must be greater than zero"),
            Self::ZeroTimeout => write!(f, "maximum timeout must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}
