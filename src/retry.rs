//! Retry policies for transient recognition API failures.
//!
//! A [`RetryPolicy`] pairs a [`RetryStrategy`] (how long to wait, how many
//! times) with a [`RetryPredicate`] (which failures are worth another try).
//! Its [`decide`](RetryPolicy::decide) function is pure and knows nothing
//! about the async runtime; the client sleeps between attempts on the same
//! future, so dropping that future also stops any pending retries.

use crate::Error;
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Delay between attempts of the default policy.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retries after the initial attempt in the default policy (3 attempts total).
pub const DEFAULT_MAX_RETRIES: usize = 2;

/// Correlation values supplied by the caller for one logical call.
///
/// The same context is handed to the retry predicate and recorded on the
/// tracing events of every physical attempt, so attempts that belong to one
/// call can be grouped together.
///
/// ```
/// use carmen_cloud::RetryContext;
///
/// let context = RetryContext::new()
///     .with("trace-id", "4bf92f35")
///     .with("camera", "gate-3");
///
/// assert_eq!(context.get("camera"), Some("gate-3"));
/// assert_eq!(context.to_string(), "camera=gate-3,trace-id=4bf92f35");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryContext {
    values: BTreeMap<String, String>,
}

impl RetryContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, returning the context for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Adds or replaces a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Iterates over the values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for RetryContext
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl fmt::Display for RetryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Defines how long to wait between attempts and how many retries to make.
///
/// # Examples
///
/// ```
/// use carmen_cloud::RetryStrategy;
/// use std::time::Duration;
///
/// // Exponential backoff: 100ms, 200ms, 400ms...
/// let exponential = RetryStrategy::ExponentialBackoff {
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(30),
///     max_retries: 5,
///     jitter: true,
/// };
///
/// // Fixed delay: 1s, 1s, 1s
/// let fixed = RetryStrategy::Fixed {
///     delay: Duration::from_secs(1),
///     max_retries: 3,
/// };
/// ```
#[derive(Debug, Clone, Default)]
pub enum RetryStrategy {
    /// Do not retry failed requests.
    #[default]
    None,

    /// Retry with exponentially increasing delays.
    ///
    /// Each retry waits for `initial_delay * 2^(attempt - 1)` (capped at
    /// `max_delay`). Optional jitter scales the delay into the 50%-100% range.
    ExponentialBackoff {
        /// The initial delay before the first retry.
        initial_delay: Duration,
        /// The maximum delay between retries.
        max_delay: Duration,
        /// The maximum number of retry attempts.
        max_retries: usize,
        /// Whether to add random jitter to delays.
        jitter: bool,
    },

    /// Retry with the same delay before every attempt.
    Fixed {
        /// The delay between retry attempts.
        delay: Duration,
        /// The maximum number of retry attempts.
        max_retries: usize,
    },

    /// Custom retry logic.
    ///
    /// Takes the retry number (1 = first retry) and returns the delay before
    /// it, or `None` to stop.
    Custom {
        /// Function that determines retry delay.
        delay_fn: fn(attempt: usize) -> Option<Duration>,
    },
}

impl RetryStrategy {
    /// Returns the delay before the given retry, or `None` if retries are exhausted.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The retry number (1-indexed, so 1 = first retry)
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        match self {
            RetryStrategy::None => None,
            RetryStrategy::ExponentialBackoff {
                initial_delay,
                max_delay,
                max_retries,
                jitter,
            } => {
                if attempt > *max_retries {
                    return None;
                }

                let multiplier = 2u64.saturating_pow(attempt.saturating_sub(1) as u32);
                let base_delay =
                    initial_delay.saturating_mul(multiplier.try_into().unwrap_or(u32::MAX));
                let delay = base_delay.min(*max_delay);

                if *jitter {
                    let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
                    Some(delay.mul_f64(jitter_factor))
                } else {
                    Some(delay)
                }
            }
            RetryStrategy::Fixed { delay, max_retries } => {
                if attempt > *max_retries {
                    None
                } else {
                    Some(*delay)
                }
            }
            RetryStrategy::Custom { delay_fn } => delay_fn(attempt),
        }
    }

    /// Returns the maximum number of retries, if bounded.
    pub fn max_retries(&self) -> Option<usize> {
        match self {
            RetryStrategy::None => Some(0),
            RetryStrategy::ExponentialBackoff { max_retries, .. } => Some(*max_retries),
            RetryStrategy::Fixed { max_retries, .. } => Some(*max_retries),
            RetryStrategy::Custom { .. } => None,
        }
    }
}

/// Decides whether a failed attempt should be retried.
///
/// # Examples
///
/// ```
/// use carmen_cloud::{Error, RetryPredicate};
///
/// struct RetryOnBadGateway;
///
/// impl RetryPredicate for RetryOnBadGateway {
///     fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
///         error.status_code() == 502
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// Returns `true` if the request should be retried after `error`.
    ///
    /// `attempt` is the 1-indexed number of the attempt that just failed.
    fn should_retry(&self, error: &Error, attempt: usize) -> bool;

    /// Like [`should_retry`](Self::should_retry), but also sees the caller's
    /// [`RetryContext`] when one was supplied.
    fn should_retry_with_context(
        &self,
        error: &Error,
        attempt: usize,
        _context: Option<&RetryContext>,
    ) -> bool {
        self.should_retry(error, attempt)
    }
}

/// Retry every error that [`Error::is_retryable`] accepts.
///
/// That is connectivity failures, timeouts, 429 and 5xx responses. This is
/// the predicate of the default policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnRetryable;

impl RetryPredicate for RetryOnRetryable {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        error.is_retryable()
    }
}

/// Retry only on 5xx server errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryOn5xx;

impl RetryPredicate for RetryOn5xx {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        matches!(error, Error::Api { status, .. } if status.is_server_error())
    }
}

/// Retry only on 429 Too Many Requests.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnRateLimit;

impl RetryPredicate for RetryOnRateLimit {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        matches!(error, Error::Api { status, .. } if status.as_u16() == 429)
    }
}

/// Retry only on timeout errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTimeout;

impl RetryPredicate for RetryOnTimeout {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        matches!(error, Error::Timeout)
    }
}

/// Retry only on network/connection errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnConnectionError;

impl RetryPredicate for RetryOnConnectionError {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        matches!(error, Error::Network(_))
    }
}

/// Combine multiple retry predicates with OR logic.
///
/// ```
/// use carmen_cloud::retry::{OrPredicate, RetryOn5xx, RetryOnTimeout};
///
/// let predicate = OrPredicate::new(vec![
///     Box::new(RetryOn5xx),
///     Box::new(RetryOnTimeout),
/// ]);
/// ```
pub struct OrPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl OrPredicate {
    /// Creates a new `OrPredicate` from a list of predicates.
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for OrPredicate {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.should_retry_with_context(error, attempt, None)
    }

    fn should_retry_with_context(
        &self,
        error: &Error,
        attempt: usize,
        context: Option<&RetryContext>,
    ) -> bool {
        self.predicates
            .iter()
            .any(|p| p.should_retry_with_context(error, attempt, context))
    }
}

/// Combine multiple retry predicates with AND logic.
pub struct AndPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl AndPredicate {
    /// Creates a new `AndPredicate` from a list of predicates.
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for AndPredicate {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.should_retry_with_context(error, attempt, None)
    }

    fn should_retry_with_context(
        &self,
        error: &Error,
        attempt: usize,
        context: Option<&RetryContext>,
    ) -> bool {
        self.predicates
            .iter()
            .all(|p| p.should_retry_with_context(error, attempt, context))
    }
}

/// A predicate backed by a closure; see [`predicate_fn`].
pub struct FnPredicate<F>(F);

impl<F> RetryPredicate for FnPredicate<F>
where
    F: Fn(&Error, usize, Option<&RetryContext>) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        (self.0)(error, attempt, None)
    }

    fn should_retry_with_context(
        &self,
        error: &Error,
        attempt: usize,
        context: Option<&RetryContext>,
    ) -> bool {
        (self.0)(error, attempt, context)
    }
}

/// Lifts a closure into a [`RetryPredicate`].
///
/// ```
/// use carmen_cloud::retry::predicate_fn;
///
/// let only_503 = predicate_fn(|error, _attempt, _context| error.status_code() == 503);
/// ```
pub fn predicate_fn<F>(f: F) -> FnPredicate<F>
where
    F: Fn(&Error, usize, Option<&RetryContext>) -> bool + Send + Sync,
{
    FnPredicate(f)
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Dispatch again after waiting this long.
    RetryAfter(Duration),
    /// Surface the failure to the caller.
    GiveUp,
}

/// A retry strategy paired with the predicate that filters retryable failures.
///
/// The default policy makes at most 3 attempts, 1 second apart, and only
/// retries connectivity failures, timeouts, 429 and 5xx responses.
///
/// ```
/// use carmen_cloud::{RetryDecision, RetryPolicy};
/// use carmen_cloud::Error;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
///
/// assert_eq!(
///     policy.decide(1, &Error::Timeout, None),
///     RetryDecision::RetryAfter(Duration::from_secs(1)),
/// );
/// assert_eq!(policy.decide(3, &Error::Timeout, None), RetryDecision::GiveUp);
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    strategy: RetryStrategy,
    predicate: Arc<dyn RetryPredicate>,
}

impl RetryPolicy {
    /// Creates a policy with the given strategy and the default predicate.
    pub fn new(strategy: RetryStrategy) -> Self {
        Self {
            strategy,
            predicate: Arc::new(RetryOnRetryable),
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(RetryStrategy::None)
    }

    /// Replaces the predicate.
    pub fn with_predicate(mut self, predicate: impl RetryPredicate + 'static) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Replaces the strategy.
    pub fn with_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> &RetryStrategy {
        &self.strategy
    }

    /// Upper bound on physical attempts per logical call, if bounded.
    pub fn max_attempts(&self) -> Option<usize> {
        self.strategy.max_retries().map(|retries| retries + 1)
    }

    /// Decides what happens after attempt number `attempt` failed with `error`.
    pub fn decide(
        &self,
        attempt: usize,
        error: &Error,
        context: Option<&RetryContext>,
    ) -> RetryDecision {
        if !self
            .predicate
            .should_retry_with_context(error, attempt, context)
        {
            return RetryDecision::GiveUp;
        }

        match self.strategy.delay_for_attempt(attempt) {
            Some(delay) => RetryDecision::RetryAfter(delay),
            None => RetryDecision::GiveUp,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryStrategy::Fixed {
            delay: DEFAULT_RETRY_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}
