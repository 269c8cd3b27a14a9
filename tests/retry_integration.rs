//! Integration tests for retrying realistic async operations through the
//! public API.
//!
//! These tests run on tokio's paused clock, so every sleep and timeout below
//! completes instantly while elapsed time is still measured exactly.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use undertow::invoke::bind;
use undertow::testing::CallCounter;
use undertow::{
    assert_stopped, assert_succeeded, AttemptContext, Backoff, ErrorTag, RetryDecision,
    RetryError, RetryOption, RetryPolicy, StopReason,
};

// ============================================================================
// A fake remote service
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum ServiceError {
    Unavailable,
    RateLimited { retry_after: Duration },
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ServiceErrorKind {
    Unavailable,
    RateLimited,
    NotFound,
}

impl ErrorTag for ServiceError {
    type Tag = ServiceErrorKind;

    fn tag(&self) -> ServiceErrorKind {
        match self {
            ServiceError::Unavailable => ServiceErrorKind::Unavailable,
            ServiceError::RateLimited { .. } => ServiceErrorKind::RateLimited,
            ServiceError::NotFound(_) => ServiceErrorKind::NotFound,
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Unavailable => write!(f, "service unavailable"),
            ServiceError::RateLimited { retry_after } => {
                write!(f, "rate limited, retry after {:?}", retry_after)
            }
            ServiceError::NotFound(key) => write!(f, "{} not found", key),
        }
    }
}

impl std::error::Error for ServiceError {}

/// Replies from a queue of scripted responses, then succeeds.
#[derive(Debug, Clone)]
struct FakeService {
    responses: Arc<Mutex<VecDeque<ServiceError>>>,
    calls: CallCounter,
}

impl FakeService {
    fn new(responses: impl IntoIterator<Item = ServiceError>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into_iter().collect())),
            calls: CallCounter::new(),
        }
    }

    async fn get(&self, key: String) -> Result<String, ServiceError> {
        self.calls.tick();
        match self.responses.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(format!("value-of-{}", key)),
        }
    }
}

/// Honors a server-provided retry-after hint as a minimum delay.
#[derive(Debug)]
struct RespectRetryAfter;

impl RetryOption<ServiceError> for RespectRetryAfter {
    fn contribute_delay(
        &self,
        running: Duration,
        ctx: &AttemptContext<'_, ServiceError>,
    ) -> Duration {
        match ctx.error {
            ServiceError::RateLimited { retry_after } => running.max(*retry_after),
            _ => running,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn bound_operation_recovers_from_transient_failures() {
    let service = FakeService::new([ServiceError::Unavailable, ServiceError::Unavailable]);
    let policy = RetryPolicy::<ServiceError>::new()
        .non_retryable_errors([ServiceErrorKind::NotFound])
        .max_attempts(5)
        .backoff(Backoff::linear(Duration::from_millis(10)));

    let op = bind(
        |key: String| {
            let service = service.clone();
            async move { service.get(key).await }
        },
        "user-1".to_string(),
    );

    let result = policy.run(op).await;

    assert_succeeded!(result, "value-of-user-1".to_string());
    assert_eq!(service.calls.count(), 3);
}

#[tokio::test(start_paused = true)]
async fn not_found_is_never_retried() {
    let service = FakeService::new([ServiceError::NotFound("user-9".to_string())]);
    let policy = RetryPolicy::<ServiceError>::new()
        .non_retryable_errors([ServiceErrorKind::NotFound])
        .max_attempts(5);

    let result = policy.run(|| service.get("user-9".to_string())).await;

    match result {
        Err(RetryError::NonRetriable {
            attempts, cause, ..
        }) => {
            assert_eq!(attempts, 1);
            assert_eq!(cause, ServiceError::NotFound("user-9".to_string()));
        }
        other => panic!("Expected NonRetriable, got {:?}", other),
    }
    assert_eq!(service.calls.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn custom_option_stretches_delay_for_rate_limits() {
    let service = FakeService::new([ServiceError::RateLimited {
        retry_after: Duration::from_millis(500),
    }]);
    let policy = RetryPolicy::new()
        .max_attempts(3)
        .backoff(Backoff::constant(Duration::from_millis(10)))
        .with_option(RespectRetryAfter);
    let start = Instant::now();

    let result = policy.run(|| service.get("k".to_string())).await;

    assert_eq!(result, Ok("value-of-k".to_string()));
    assert!(start.elapsed() >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_reports_final_error_as_source() {
    use std::error::Error as _;

    let service = FakeService::new(std::iter::repeat_n(ServiceError::Unavailable, 10));
    let policy = RetryPolicy::new()
        .max_attempts(4)
        .backoff(Backoff::exponential(2, 3));
    let start = Instant::now();

    let err = policy
        .run(|| service.get("k".to_string()))
        .await
        .unwrap_err();

    assert!(err.is_max_attempts());
    assert_eq!(
        err.source().map(|e| e.to_string()),
        Some("service unavailable".to_string())
    );
    assert_eq!(
        err.to_string(),
        "retry exhausted after 4 attempts: service unavailable"
    );
    // Three sleeps of 2^3 = 8ms each.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(24));
    assert!(elapsed < Duration::from_millis(30));
}

#[tokio::test(start_paused = true)]
async fn classifier_registered_first_beats_exhausted_budget() {
    let service = FakeService::new([
        ServiceError::Unavailable,
        ServiceError::NotFound("gone".to_string()),
    ]);
    let policy = RetryPolicy::new()
        .can_retry(|e: &ServiceError| match e {
            ServiceError::NotFound(key) => RetryDecision::stop_with(format!("{} is gone", key)),
            _ => RetryDecision::retry(),
        })
        .max_attempts(2);

    let result = policy.run(|| service.get("k".to_string())).await;

    match result {
        Err(RetryError::NonRetriable {
            attempts, message, ..
        }) => {
            assert_eq!(attempts, 2);
            assert_eq!(message.as_deref(), Some("gone is gone"));
        }
        other => panic!("Expected NonRetriable, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn total_time_budget_cuts_slow_attempts_short() {
    let calls = CallCounter::new();
    let policy = RetryPolicy::<ServiceError>::new()
        .max_attempts(100)
        .max_total_time(Duration::from_millis(250));
    let start = Instant::now();

    // Every attempt takes 100ms and fails.
    let result = policy
        .run(|| {
            calls.tick();
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err::<(), _>(ServiceError::Unavailable)
            }
        })
        .await;

    assert_stopped!(result, MaxTimeoutExceeded);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < Duration::from_millis(300));
    // Attempts started at 0ms, 100ms and 200ms; the third was abandoned.
    assert_eq!(calls.count(), 3);
}

#[tokio::test(start_paused = true)]
async fn option_can_stop_on_elapsed_time_alone() {
    #[derive(Debug)]
    struct GiveUpAfter(Duration);

    impl<E> RetryOption<E> for GiveUpAfter {
        fn check(&self, ctx: &AttemptContext<'_, E>) -> Result<(), StopReason> {
            if ctx.elapsed >= self.0 {
                Err(StopReason::MaxTimeoutExceeded)
            } else {
                Ok(())
            }
        }
    }

    let service = FakeService::new(std::iter::repeat_n(ServiceError::Unavailable, 100));
    let policy = RetryPolicy::new()
        .with_option(GiveUpAfter(Duration::from_millis(30)))
        .backoff(Backoff::constant(Duration::from_millis(10)));

    let err = policy
        .run(|| service.get("k".to_string()))
        .await
        .unwrap_err();

    // No watchdog is armed, so the stop comes from the check after a failure.
    assert!(policy.deadline().is_none());
    assert!(err.is_timeout());
    assert_eq!(err.attempts(), 4);
    assert_eq!(err.cause(), Some(&ServiceError::Unavailable));
}
