//! # Undertow
//!
//! Retry orchestration for async operations.
//!
//! An operation is retried until it succeeds, exhausts its budget, or fails
//! with an error that must not be retried. The policy deciding this is an
//! ordered list of small, independent options:
//! - **Budgets**: attempt limits and total-time limits
//! - **Classifiers**: allow lists, deny lists and custom predicates
//! - **Delays**: backoff strategies and jitter
//!
//! A total-time budget is enforced by a watchdog that races the running
//! attempt, so an operation that hangs is abandoned when the budget runs out.
//!
//! ## Quick Example
//!
//! ```rust
//! use undertow::{Backoff, ErrorTag, RetryError, RetryPolicy};
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone, PartialEq, Eq, Hash)]
//! enum ApiError {
//!     Unavailable,
//!     Unauthorized,
//! }
//!
//! impl ErrorTag for ApiError {
//!     type Tag = ApiError;
//!
//!     fn tag(&self) -> ApiError {
//!         self.clone()
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::<ApiError>::new()
//!     .non_retryable_errors([ApiError::Unauthorized])
//!     .max_attempts(5)
//!     .max_total_time(Duration::from_secs(2))
//!     .backoff(Backoff::linear(Duration::from_millis(1)));
//!
//! let result = policy.run(|| async { Err::<(), _>(ApiError::Unauthorized) }).await;
//!
//! match result {
//!     Err(RetryError::NonRetriable { attempts, cause, .. }) => {
//!         assert_eq!(attempts, 1);
//!         assert_eq!(cause, ApiError::Unauthorized);
//!     }
//!     other => panic!("unexpected outcome: {:?}", other),
//! }
//! # });
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod invoke;
pub mod retry;
pub mod testing;

// Re-exports
pub use retry::{
    retry, AttemptContext, Backoff, BackoffDelay, BackoffSchedule, ConfigError, CustomPredicate,
    ErrorTag, JitterDelay, JitterRange, MaxAttempts, MaxTotalTime, NonRetriableErrors,
    RetriableErrors, RetryConfig, RetryDecision, RetryError, RetryEvent, RetryOption, RetryPolicy,
    StopReason,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::retry::{
        Backoff, ErrorTag, JitterRange, RetryConfig, RetryDecision, RetryError, RetryOption,
        RetryPolicy,
    };
}
