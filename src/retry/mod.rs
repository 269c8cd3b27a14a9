//! Retry orchestration for async operations.
//!
//! A [`RetryPolicy`] is an ordered list of [`RetryOption`]s. After each failed
//! attempt the loop asks every option, in order, whether another attempt is
//! allowed; the first refusal ends the loop. If nobody refuses, the options
//! fold the next delay, the loop sleeps, and the operation runs again.
//!
//! - **Stateless options**: attempt count and elapsed time are passed in, so a
//!   policy can be shared across concurrent loops
//! - **Ordered**: registration order is evaluation order and decides which
//!   stop reason wins
//! - **Pre-emptive timeouts**: a time budget is enforced by a watchdog that
//!   cuts short a hung attempt or a sleep
//!
//! # Quick Start
//!
//! ```rust
//! use undertow::{Backoff, RetryPolicy};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::new()
//!     .max_attempts(3)
//!     .max_total_time(Duration::from_secs(1))
//!     .backoff(Backoff::linear(Duration::from_millis(10)));
//!
//! let result = policy.run(|| async { Ok::<_, String>(42) }).await;
//! assert_eq!(result, Ok(42));
//! # });
//! ```
//!
//! # Backoff Strategies
//!
//! - **Constant**: Fixed delay between attempts
//! - **Linear**: Delay grows by a fixed increment (100ms, 200ms, 300ms, ...)
//! - **Exponential**: `base ^ exponent` with a static exponent
//! - **Fibonacci**: Delay follows the Fibonacci sequence
//!
//! # Jitter
//!
//! A [`JitterRange`] adds a uniformly distributed offset in `[min, max)` to
//! every delay, so independent callers drift apart instead of retrying in
//! lockstep.
//!
//! ```rust
//! use undertow::{Backoff, JitterRange, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::<String>::new()
//!     .max_attempts(5)
//!     .backoff(Backoff::linear(Duration::from_millis(100)))
//!     .jitter(JitterRange::from_millis(0, 50).unwrap());
//! # assert_eq!(policy.len(), 3);
//! ```
//!
//! # Error Types
//!
//! - [`RetryError`]: terminal outcome of a loop, carrying the triggering error
//! - [`StopReason`]: the veto returned by an option
//! - [`ConfigError`]: rejected configuration, reported at construction

mod backoff;
pub(crate) mod config;
mod engine;
mod error;
mod option;
mod watchdog;

pub use backoff::{Backoff, BackoffSchedule, JitterRange};
pub use config::RetryConfig;
pub use engine::{retry, RetryEvent, RetryPolicy};
pub use error::{ConfigError, RetryError, StopReason};
pub use option::{
    AttemptContext, BackoffDelay, CustomPredicate, ErrorTag, JitterDelay, MaxAttempts,
    MaxTotalTime, NonRetriableErrors, RetriableErrors, RetryDecision, RetryOption,
};
