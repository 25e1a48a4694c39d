//! The circuit-breaker boundary every unary call goes through.
//!
//! The state machine itself (rolling windows, half-open timing) is left to
//! the [`CircuitBreaker`] implementation plugged in through a [`BreakerFactory`].
//! [`ManualBreaker`] is the default: it only opens when told to, and closes
//! again once its health check passes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tonic::Status;

use crate::HelperError;

/// A probe the breaker may run to decide whether its backend recovered.
pub type HealthCheck = Arc<dyn Fn() -> BoxFuture<'static, Result<(), HelperError>> + Send + Sync>;

/// Guards the calls made to one backend address.
pub trait CircuitBreaker: Send + Sync {
    fn name(&self) -> &str;

    /// An open breaker refuses calls without reaching the network.
    fn is_open(&self) -> bool;

    fn on_success(&self);

    fn on_failure(&self, status: &Status);
}

/// Creates one breaker per client.
pub trait BreakerFactory: Send + Sync + 'static {
    fn create(&self, name: String, health_check: Option<HealthCheck>) -> Arc<dyn CircuitBreaker>;
}

impl<F> BreakerFactory for F
where
    F: Fn(String, Option<HealthCheck>) -> Arc<dyn CircuitBreaker> + Send + Sync + 'static,
{
    fn create(&self, name: String, health_check: Option<HealthCheck>) -> Arc<dyn CircuitBreaker> {
        (self)(name, health_check)
    }
}

/// Run `call` through `breaker` and report its outcome.
pub async fn exec_through<T, Fut>(breaker: &dyn CircuitBreaker, call: Fut) -> Result<T, HelperError>
where
    Fut: Future<Output = Result<T, Status>>,
{
    if breaker.is_open() {
        tracing::debug!("breaker {} is open", breaker.name());
        return Err(HelperError::BreakerOpen(breaker.name().to_string()));
    }

    match call.await {
        Ok(response) => {
            breaker.on_success();
            Ok(response)
        }
        Err(status) => {
            breaker.on_failure(&status);
            Err(HelperError::Status(status))
        }
    }
}

/// How often a tripped [`ManualBreaker`] runs its health check.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(5000);

struct BreakerState {
    name: String,
    open: AtomicBool,
}

impl BreakerState {
    fn close(&self) {
        tracing::debug!("resetting breaker {}", self.name);
        self.open.store(false, Ordering::Release);
    }
}

/// A breaker that never opens on its own.
///
/// Once tripped, a breaker holding a [`HealthCheck`] runs it every check
/// interval and closes again as soon as it passes. Without a check it stays
/// open until [`reset`](Self::reset).
pub struct ManualBreaker {
    state: Arc<BreakerState>,
    health_check: Option<HealthCheck>,
    check_interval: Duration,
    checker: Mutex<Option<JoinHandle<()>>>,
}

impl ManualBreaker {
    pub fn new(name: impl Into<String>, health_check: Option<HealthCheck>) -> Self {
        Self {
            state: Arc::new(BreakerState {
                name: name.into(),
                open: AtomicBool::new(false),
            }),
            health_check,
            check_interval: DEFAULT_CHECK_INTERVAL,
            checker: Mutex::new(None),
        }
    }

    /// Set how often a tripped breaker runs its health check.
    pub fn check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub fn trip(&self) {
        tracing::debug!("tripping breaker {}", self.state.name);
        self.state.open.store(true, Ordering::Release);

        if let Some(check) = &self.health_check {
            self.start_checking(Arc::clone(check));
        }
    }

    pub fn reset(&self) {
        if let Some(checker) = self.checker.lock().take() {
            checker.abort();
        }
        self.state.close();
    }

    /// Run the health check, if any, and reset the breaker when it passes.
    pub async fn probe(&self) -> Result<(), HelperError> {
        if let Some(check) = &self.health_check {
            (check)().await?;
        }
        self.reset();
        Ok(())
    }

    fn start_checking(&self, check: HealthCheck) {
        let mut checker = self.checker.lock();
        if checker.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                "no runtime to run the health check of {}, it stays open until reset",
                self.state.name
            );
            return;
        };

        let state = Arc::clone(&self.state);
        let period = self.check_interval;
        *checker = Some(runtime.spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                match (check)().await {
                    Ok(()) => {
                        state.close();
                        break;
                    }
                    Err(err) => tracing::debug!("{} is still unhealthy: {}", state.name, err),
                }
            }
        }));
    }
}

impl Drop for ManualBreaker {
    fn drop(&mut self) {
        if let Some(checker) = self.checker.get_mut().take() {
            checker.abort();
        }
    }
}

impl CircuitBreaker for ManualBreaker {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire)
    }

    fn on_success(&self) {}

    fn on_failure(&self, status: &Status) {
        tracing::debug!("call through {} failed: {}", self.state.name, status);
    }
}

/// Builds [`ManualBreaker`]s.
#[derive(Debug, Clone, Copy)]
pub struct ManualBreakerFactory {
    check_interval: Duration,
}

impl ManualBreakerFactory {
    pub fn new(check_interval: Duration) -> Self {
        Self { check_interval }
    }
}

impl Default for ManualBreakerFactory {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_INTERVAL)
    }
}

impl BreakerFactory for ManualBreakerFactory {
    fn create(&self, name: String, health_check: Option<HealthCheck>) -> Arc<dyn CircuitBreaker> {
        Arc::new(ManualBreaker::new(name, health_check).check_interval(self.check_interval))
    }
}
