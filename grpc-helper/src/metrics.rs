//! Outcome reporting for every call a [`Client`](crate::Client) sends.
//!
//! Observers see calls that reached the transport. Calls refused by an open
//! breaker are not observed.

use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, Registry};

use crate::Address;

/// Name of the histogram kept by [`PrometheusObserver`].
pub const RESPONSE_DURATION_METRIC: &str = "grpc_response_duration_seconds";

/// One finished call.
#[derive(Debug, Clone)]
pub struct CallRecord<'a> {
    pub package: &'a str,
    pub service: &'a str,
    /// The backend the call was sent to.
    pub peer: &'a Address,
    /// The request path, `/package.Service/Method`.
    pub method: &'a str,
    pub code: tonic::Code,
    /// Until the reply, or the response headers for server streams.
    pub elapsed: Duration,
}

impl CallRecord<'_> {
    pub fn is_success(&self) -> bool {
        self.code == tonic::Code::Ok
    }

    /// `success` or `fail`.
    pub fn state(&self) -> &'static str {
        if self.is_success() {
            "success"
        } else {
            "fail"
        }
    }
}

/// Told about the outcome of every call, after it finished.
pub trait CallObserver: Send + Sync {
    fn observe(&self, call: &CallRecord<'_>);
}

impl<F> CallObserver for F
where
    F: Fn(&CallRecord<'_>) + Send + Sync,
{
    fn observe(&self, call: &CallRecord<'_>) {
        (self)(call)
    }
}

/// Records call durations in a histogram labelled by `pkg`, `svc`, `peer`,
/// `method` and `state`.
#[derive(Clone)]
pub struct PrometheusObserver {
    histogram: HistogramVec,
}

impl PrometheusObserver {
    pub fn new() -> Result<Self, prometheus::Error> {
        let histogram = HistogramVec::new(
            HistogramOpts::new(
                RESPONSE_DURATION_METRIC,
                "Histogram of grpc response in seconds",
            ),
            &["pkg", "svc", "peer", "method", "state"],
        )?;

        Ok(Self { histogram })
    }

    /// Create an observer whose histogram is exported through `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let observer = Self::new()?;
        registry.register(Box::new(observer.histogram.clone()))?;
        Ok(observer)
    }

    pub fn histogram(&self) -> &HistogramVec {
        &self.histogram
    }
}

impl CallObserver for PrometheusObserver {
    fn observe(&self, call: &CallRecord<'_>) {
        self.histogram
            .with_label_values(&[
                call.package,
                call.service,
                call.peer.as_str(),
                call.method,
                call.state(),
            ])
            .observe(call.elapsed.as_secs_f64());
    }
}
