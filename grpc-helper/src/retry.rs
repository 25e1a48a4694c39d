//! Retry with exponential backoff around a whole operation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::HelperError;

type BailFn = Arc<dyn Fn(&HelperError, u32) -> bool + Send + Sync>;
type OnRetryFn = Arc<dyn Fn(&HelperError, u32) + Send + Sync>;

/// How often and how patiently an operation is retried.
///
/// The delay before retrying after attempt `n` is
/// `min(min_delay * factor^(n - 1), max_delay)`, scaled by a random factor
/// in `[1, 2)` when `jitter` is on.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Defaults to 10.
    pub retries: u32,
    /// Defaults to 2.
    pub factor: f64,
    /// Defaults to 1 second.
    pub min_delay: Duration,
    /// Unbounded by default.
    pub max_delay: Duration,
    /// Defaults to true.
    pub jitter: bool,
    bail: Option<BailFn>,
    on_retry: Option<OnRetryFn>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            factor: 2.0,
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(u64::MAX),
            jitter: true,
            bail: None,
            on_retry: None,
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retries", &self.retries)
            .field("factor", &self.factor)
            .field("min_delay", &self.min_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("bail", &self.bail.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryPolicy {
    pub fn retries(self, retries: u32) -> Self {
        Self { retries, ..self }
    }

    pub fn factor(self, factor: f64) -> Self {
        Self { factor, ..self }
    }

    pub fn min_delay(self, min_delay: Duration) -> Self {
        Self { min_delay, ..self }
    }

    pub fn max_delay(self, max_delay: Duration) -> Self {
        Self { max_delay, ..self }
    }

    pub fn jitter(self, jitter: bool) -> Self {
        Self { jitter, ..self }
    }

    /// Stop retrying as soon as `bail(error, attempt)` returns true.
    pub fn bail<F>(self, bail: F) -> Self
    where
        F: Fn(&HelperError, u32) -> bool + Send + Sync + 'static,
    {
        Self {
            bail: Some(Arc::new(bail)),
            ..self
        }
    }

    /// Called with the error of every attempt that is about to be retried.
    pub fn on_retry<F>(self, on_retry: F) -> Self
    where
        F: Fn(&HelperError, u32) + Send + Sync + 'static,
    {
        Self {
            on_retry: Some(Arc::new(on_retry)),
            ..self
        }
    }

    /// The pause before the attempt following `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.min_delay.as_secs_f64() * self.factor.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());

        let scaled = if self.jitter {
            capped * rand::thread_rng().gen_range(1.0..2.0)
        } else {
            capped
        };

        Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX)
    }
}

/// Run `operation` until it succeeds, the policy bails, or retries run out.
///
/// Attempts are numbered from 1 and each one is a fresh call to `operation`.
/// The error of the last attempt is returned.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, HelperError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, HelperError>>,
{
    let mut attempt = 1;

    loop {
        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if let Some(bail) = &policy.bail {
            if bail(&err, attempt) {
                tracing::debug!("bailing out after attempt {}: {}", attempt, err);
                return Err(err);
            }
        }

        if attempt > policy.retries {
            tracing::warn!("giving up after {} attempts: {}", attempt, err);
            return Err(err);
        }

        if let Some(on_retry) = &policy.on_retry {
            on_retry(&err, attempt);
        }

        let delay = policy.delay_for(attempt);
        tracing::debug!("attempt {} failed: {}, retrying in {:?}", attempt, err, delay);
        tokio::time::sleep(delay).await;

        attempt += 1;
    }
}
