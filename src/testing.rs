//! Testing utilities for code that retries.
//!
//! Scripted operations that fail a set number of times, a call counter that
//! can be shared with an operation closure, and assertion macros for retry
//! outcomes.
//!
//! Time-dependent tests are best run on tokio's paused clock
//! (`#[tokio::test(start_paused = true)]`), where sleeps and the watchdog
//! advance virtual time instantly and deterministically.
//!
//! # Examples
//!
//! ```rust
//! use undertow::testing::FlakyOperation;
//! use undertow::{assert_stopped, RetryPolicy};
//!
//! # tokio_test::block_on(async {
//! let op = FlakyOperation::always_failing("unavailable");
//! let policy = RetryPolicy::<&str>::new().max_attempts(4);
//!
//! let result: Result<(), _> = policy.run(|| op.call()).await;
//! assert_stopped!(result, MaxAttemptsExceeded);
//! assert_eq!(op.calls(), 4);
//! # });
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Shared counter of operation invocations.
///
/// # Example
///
/// ```rust
/// use undertow::testing::CallCounter;
///
/// let counter = CallCounter::new();
/// let handle = counter.clone();
///
/// assert_eq!(handle.tick(), 1);
/// assert_eq!(handle.tick(), 2);
/// assert_eq!(counter.count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<AtomicU32>,
}

impl CallCounter {
    /// Create a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call and return the new total.
    pub fn tick(&self) -> u32 {
        self.calls.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Calls recorded so far.
    pub fn count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// An operation that fails a fixed number of times, then succeeds.
///
/// Cloning shares the call count, so a clone can be moved into the operation
/// closure while the original is kept for assertions.
#[derive(Debug, Clone)]
pub struct FlakyOperation<T, E> {
    failures: u32,
    error: E,
    value: Option<T>,
    counter: CallCounter,
}

impl<T, E> FlakyOperation<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Fail `failures` times with `error`, then return `value`.
    pub fn new(failures: u32, error: E, value: T) -> Self {
        Self {
            failures,
            error,
            value: Some(value),
            counter: CallCounter::new(),
        }
    }

    /// Number of calls so far.
    pub fn calls(&self) -> u32 {
        self.counter.count()
    }

    /// Invoke the operation once.
    pub fn call(&self) -> impl Future<Output = Result<T, E>> + Send + 'static
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let n = self.counter.tick();
        let outcome = match &self.value {
            Some(value) if n > self.failures => Ok(value.clone()),
            _ => Err(self.error.clone()),
        };
        async move { outcome }
    }
}

impl<T, E> FlakyOperation<T, E>
where
    E: Clone,
{
    /// Fail on every call.
    pub fn always_failing(error: E) -> Self {
        Self {
            failures: u32::MAX,
            error,
            value: None,
            counter: CallCounter::new(),
        }
    }
}

/// Assert that a retry result is the given [`RetryError`](crate::RetryError) variant.
///
/// # Example
///
/// ```rust
/// use undertow::{assert_stopped, RetryError};
///
/// let result: Result<(), RetryError<&str>> = Err(RetryError::MaxAttemptsExceeded {
///     attempts: 3,
///     cause: "down",
/// });
/// assert_stopped!(result, MaxAttemptsExceeded);
/// ```
#[macro_export]
macro_rules! assert_stopped {
    ($result:expr, $variant:ident) => {
        match $result {
            Err($crate::RetryError::$variant { .. }) => {}
            other => {
                panic!(
                    "Expected Err(RetryError::{}), got {:?}",
                    stringify!($variant),
                    other
                );
            }
        }
    };
}

/// Assert that a retry result succeeded with the expected value.
///
/// # Example
///
/// ```rust
/// use undertow::{assert_succeeded, RetryError};
///
/// let result: Result<i32, RetryError<&str>> = Ok(3);
/// assert_succeeded!(result, 3);
/// ```
#[macro_export]
macro_rules! assert_succeeded {
    ($result:expr, $expected:expr) => {
        match $result {
            Ok(value) => assert_eq!(value, $expected),
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
}

#[cfg(feature = "proptest")]
use proptest::prelude::*;

#[cfg(feature = "proptest")]
impl Arbitrary for crate::Backoff {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        use std::time::Duration;

        let millis = || (0u64..60_000).prop_map(Duration::from_millis);
        prop_oneof![
            millis().prop_map(crate::Backoff::constant),
            millis().prop_map(crate::Backoff::linear),
            (millis(), millis()).prop_map(|(d, i)| crate::Backoff::linear_with_increment(d, i)),
            (0u64..16, 0u32..8).prop_map(|(b, e)| crate::Backoff::exponential(b, e)),
            millis().prop_map(crate::Backoff::fibonacci),
        ]
        .boxed()
    }
}
