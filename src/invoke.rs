//! Adapters from "async function plus arguments" to the zero-argument
//! operations a [`RetryPolicy`](crate::RetryPolicy) runs.
//!
//! The retry loop calls its operation once per attempt, so the operation must
//! be able to produce a fresh future every time. These helpers capture the
//! arguments once and hand a clone to every attempt.
//!
//! # Example
//!
//! ```rust
//! use undertow::invoke::bind;
//! use undertow::RetryPolicy;
//!
//! async fn fetch(host: String, port: u16) -> Result<String, String> {
//!     Ok(format!("{}:{}", host, port))
//! }
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::new().max_attempts(3);
//! let op = bind(|(host, port)| fetch(host, port), ("localhost".to_string(), 8080));
//!
//! assert_eq!(policy.run(op).await, Ok("localhost:8080".to_string()));
//! # });
//! ```

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

/// A type-erased operation, for storing heterogeneous operations together.
pub type BoxedOperation<'a, T, E> = Box<dyn FnMut() -> BoxFuture<'a, Result<T, E>> + Send + 'a>;

/// Bind `args` to `operation`, cloning them for every attempt.
pub fn bind<A, F, Fut, T, E>(mut operation: F, args: A) -> impl FnMut() -> Fut
where
    A: Clone,
    F: FnMut(A) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    move || operation(args.clone())
}

/// Erase the type of an operation.
///
/// # Example
///
/// ```rust
/// use undertow::invoke::{boxed, BoxedOperation};
/// use undertow::RetryPolicy;
///
/// # tokio_test::block_on(async {
/// let ops: Vec<BoxedOperation<'static, u32, String>> = vec![
///     boxed(|| async { Ok(1) }),
///     boxed(|| async { Err("down".to_string()) }),
/// ];
///
/// let policy = RetryPolicy::new().max_attempts(2);
/// let mut results = Vec::new();
/// for op in ops {
///     results.push(policy.run(op).await.is_ok());
/// }
/// assert_eq!(results, vec![true, false]);
/// # });
/// ```
pub fn boxed<'a, F, Fut, T, E>(mut operation: F) -> BoxedOperation<'a, T, E>
where
    F: FnMut() -> Fut + Send + 'a,
    Fut: Future<Output = Result<T, E>> + Send + 'a,
{
    Box::new(move || operation().boxed())
}
