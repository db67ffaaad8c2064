//! Retry logic with configurable backoff
//!
//! This module wraps an arbitrary async operation with bounded attempts,
//! a pluggable backoff curve, optional jitter and a per-attempt timeout.
//! It knows nothing about what the operation does.
//!
//! Three outcomes are kept apart:
//! - **retry**: the result or error predicate asked for another attempt
//! - **fail fast**: the predicate declined, or attempts ran out (`None`)
//! - **fault**: the operation panicked; a caller-supplied resolver turns
//!   the [`Fault`] into a fallback value
//!
//! # Example
//!
//! ```no_run
//! use sdk_relay::config::RetryPolicy;
//! use sdk_relay::retry::RetryExecutor;
//!
//! # async fn example() {
//! let executor = RetryExecutor::<String, std::io::Error>::new(RetryPolicy::default())
//!     .retry_on_error(|e| e.kind() == std::io::ErrorKind::TimedOut);
//!
//! let body = executor
//!     .execute(|_attempt| async { Ok::<_, std::io::Error>("payload".to_string()) })
//!     .await;
//! assert_eq!(body.as_deref(), Some("payload"));
//! # }
//! ```

use crate::config::{IntervalFunction, RetryPolicy};
use crate::error::Error;
use futures::FutureExt;
use rand::Rng;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, connection reset) should return `true`.
/// Permanent failures (bad URL, unwritable cache, corrupt data) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Transport(_) => true,
            Error::Config { .. }
            | Error::Serialization(_)
            | Error::InvalidUrl(_)
            | Error::Cache(_)
            | Error::Dispatcher(_)
            | Error::Other(_) => false,
        }
    }
}

impl IntervalFunction {
    /// Interval to wait after `attempt` (1-based) has failed
    ///
    /// Built-in curves are pure functions of `initial` and `attempt`;
    /// `last` is part of the signature so custom curves can build on it.
    /// Overflow saturates at [`Duration::MAX`]; clamping to the policy's
    /// `max_interval` happens in the executor.
    pub fn next_interval(self, initial: Duration, attempt: u32, _last: Duration) -> Duration {
        let attempt = attempt.max(1);
        let factor = match self {
            IntervalFunction::Fixed => Some(1),
            IntervalFunction::Exponential => 1u32.checked_shl(attempt - 1),
            IntervalFunction::Linear => Some(attempt),
            IntervalFunction::Fibonacci => fibonacci(attempt),
        };
        factor
            .and_then(|f| initial.checked_mul(f))
            .unwrap_or(Duration::MAX)
    }
}

/// n-th Fibonacci number with fib(1) = fib(2) = 1, None on overflow
fn fibonacci(n: u32) -> Option<u32> {
    let (mut prev, mut current) = (0u32, 1u32);
    for _ in 1..n {
        let next = prev.checked_add(current)?;
        prev = current;
        current = next;
    }
    Some(current)
}

/// A panic raised by the wrapped operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Attempt (1-based) during which the operation panicked
    pub attempt: u32,
    /// Panic message, when the payload was a string
    pub message: String,
}

impl Fault {
    fn from_panic(attempt: u32, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "operation panicked".to_string()
        };
        Self { attempt, message }
    }
}

type IntervalFn = Box<dyn Fn(Duration, u32, Duration) -> Duration + Send + Sync>;
type ResultPredicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type ErrorPredicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
type FaultResolver<T> = Box<dyn Fn(&Fault) -> Option<T> + Send + Sync>;
type DelayObserver = Box<dyn Fn(u32, Duration) + Send + Sync>;

/// Executes an async operation with bounded, backed-off retries
///
/// By default neither results nor errors are retried; configure the
/// predicates with [`retry_on_result`](Self::retry_on_result) and
/// [`retry_on_error`](Self::retry_on_error).
pub struct RetryExecutor<T, E> {
    policy: RetryPolicy,
    interval_fn: IntervalFn,
    retry_on_result: ResultPredicate<T>,
    retry_on_error: ErrorPredicate<E>,
    fault_resolver: Option<FaultResolver<T>>,
    on_delay: Option<DelayObserver>,
    /// Parent of the token handed to each running `execute`; replaced on cancel
    cancel_token: Mutex<CancellationToken>,
}

impl<T: 'static, E: 'static> RetryExecutor<T, E> {
    /// Create an executor for the given policy
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        let function = policy.interval_function;
        Self {
            policy,
            interval_fn: Box::new(move |initial, attempt, last| {
                function.next_interval(initial, attempt, last)
            }),
            retry_on_result: Box::new(|_| false),
            retry_on_error: Box::new(|_| false),
            fault_resolver: None,
            on_delay: None,
            cancel_token: Mutex::new(CancellationToken::new()),
        }
    }

    /// The policy this executor was built with
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retry while `predicate` returns true for the produced value
    #[must_use]
    pub fn retry_on_result(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.retry_on_result = Box::new(predicate);
        self
    }

    /// Retry while `predicate` returns true for the raised error
    #[must_use]
    pub fn retry_on_error(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retry_on_error = Box::new(predicate);
        self
    }

    /// Retry errors classified as transient by [`IsRetryable`]
    #[must_use]
    pub fn retry_on_retryable(self) -> Self
    where
        E: IsRetryable,
    {
        self.retry_on_error(|e: &E| e.is_retryable())
    }

    /// Compute a fallback value when the operation panics
    #[must_use]
    pub fn resolve_fault(
        mut self,
        resolver: impl Fn(&Fault) -> Option<T> + Send + Sync + 'static,
    ) -> Self {
        self.fault_resolver = Some(Box::new(resolver));
        self
    }

    /// Observe every realized delay as `(attempt, delay)`
    #[must_use]
    pub fn on_delay(mut self, observer: impl Fn(u32, Duration) + Send + Sync + 'static) -> Self {
        self.on_delay = Some(Box::new(observer));
        self
    }

    /// Replace the policy's built-in curve with `f(initial, attempt, last) -> next`
    #[must_use]
    pub fn with_interval_fn(
        mut self,
        f: impl Fn(Duration, u32, Duration) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.interval_fn = Box::new(f);
        self
    }

    /// Cancel every `execute` currently running on this executor
    ///
    /// A pending attempt or delay is abandoned and `execute` returns `None`.
    /// Calls to `execute` made afterwards are unaffected.
    pub fn cancel(&self) {
        let mut token = self
            .cancel_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Delay before the attempt following `attempt`, after clamping and jitter
    fn next_delay(&self, attempt: u32, last_interval: Duration) -> (Duration, Duration) {
        let interval = (self.interval_fn)(self.policy.initial_interval, attempt, last_interval)
            .min(self.policy.max_interval);
        let delay = if self.policy.use_jitter {
            add_jitter(interval).min(self.policy.max_interval)
        } else {
            interval
        };
        (interval, delay)
    }

    /// Run `operation` until it yields an accepted result or the policy gives up
    ///
    /// The operation receives the 1-based attempt number. Returns:
    /// - `Some(value)` once the result predicate accepts a value
    /// - `None` when an error is not retryable, attempts are exhausted or
    ///   [`cancel`](Self::cancel) was called
    /// - the fault resolver's value when the operation panics
    ///
    /// Intermediate errors never escape; each attempt gets a fresh
    /// `execution_timeout` budget and a timeout counts as an attempt.
    pub async fn execute<F, Fut>(&self, mut operation: F) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let token = self
            .cancel_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .child_token();
        let mut attempt = 0u32;
        let mut last_interval = Duration::ZERO;

        loop {
            attempt += 1;

            let guarded = AssertUnwindSafe(operation(attempt)).catch_unwind();
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(attempt, "Retry execution cancelled during attempt");
                    return None;
                }
                outcome = tokio::time::timeout(self.policy.execution_timeout, guarded) => outcome,
            };

            match outcome {
                Ok(Ok(Ok(value))) => {
                    if !(self.retry_on_result)(&value) {
                        if attempt > 1 {
                            tracing::info!(attempts = attempt, "Operation succeeded after retry");
                        }
                        return Some(value);
                    }
                    tracing::debug!(attempt, "Result requested another attempt");
                }
                Ok(Ok(Err(e))) => {
                    if !(self.retry_on_error)(&e) {
                        tracing::error!(error = %e, attempt, "Operation failed with non-retryable error");
                        return None;
                    }
                    tracing::warn!(error = %e, attempt, "Operation failed, retrying");
                }
                Ok(Err(payload)) => {
                    let fault = Fault::from_panic(attempt, payload);
                    tracing::error!(
                        attempt,
                        message = %fault.message,
                        "Operation panicked, resolving fallback"
                    );
                    return self.fault_resolver.as_ref().and_then(|resolve| resolve(&fault));
                }
                Err(_) => {
                    tracing::warn!(
                        attempt,
                        timeout_ms = self.policy.execution_timeout.as_millis(),
                        "Attempt timed out"
                    );
                }
            }

            if let Some(max_attempts) = self.policy.max_attempts
                && attempt >= max_attempts
            {
                tracing::error!(attempts = attempt, "Operation failed after all retry attempts exhausted");
                return None;
            }

            let (interval, delay) = self.next_delay(attempt, last_interval);
            last_interval = interval;

            tracing::debug!(
                attempt,
                interval_ms = interval.as_millis(),
                delay_ms = delay.as_millis(),
                "Waiting before next attempt"
            );
            if let Some(observer) = &self.on_delay {
                observer(attempt, delay);
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(attempt, "Retry execution cancelled during backoff");
                    return None;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Retry `operation` on [`IsRetryable`] errors, returning the last error when exhausted
///
/// A thin convenience over the policy for callers that want the final error
/// instead of an absent result. Timeouts and panics are not intercepted.
///
/// # Example
///
/// ```no_run
/// use sdk_relay::config::RetryPolicy;
/// use sdk_relay::error::Error;
/// use sdk_relay::retry::with_retry;
///
/// # async fn example() -> Result<(), Error> {
/// let policy = RetryPolicy::default();
/// let value = with_retry(&policy, || async { Ok::<_, Error>(42) }).await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut last_interval = Duration::ZERO;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && policy.max_attempts.is_none_or(|max| attempt < max) => {
                let interval = policy
                    .interval_function
                    .next_interval(policy.initial_interval, attempt, last_interval)
                    .min(policy.max_interval);
                last_interval = interval;
                let delay = if policy.use_jitter {
                    add_jitter(interval).min(policy.max_interval)
                } else {
                    interval
                };

                tracing::warn!(
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::error!(error = %e, attempts = attempt, "Operation failed");
                return Err(e);
            }
        }
    }
}

/// Randomize a delay within ±50%
///
/// With `delta = 0.5 × interval` (in milliseconds) the result is drawn
/// uniformly from `[interval − delta, interval + delta + 1)`.
fn add_jitter(interval: Duration) -> Duration {
    let millis = interval.as_millis().min(u128::from(u64::MAX / 2)) as f64;
    let delta = 0.5 * millis;
    let low = millis - delta;
    let high = millis + delta + 1.0;
    let drawn: f64 = rand::thread_rng().gen_range(low..high);
    Duration::from_millis(drawn.floor() as u64)
}
