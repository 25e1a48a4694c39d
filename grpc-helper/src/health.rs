//! Probes backends with the standard `grpc.health.v1.Health/Check` call.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tonic::transport::Channel;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

use crate::{Address, HealthCheck, HelperError};

/// Default time a single probe may take.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Whether clients get a health probe, and how long it may take.
#[derive(Debug, Clone, Copy)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
        }
    }
}

impl HealthCheckConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

/// Checks whether one backend reports `SERVING` for a service.
#[derive(Clone)]
pub struct HealthProbe {
    service_name: String,
    address: Address,
    client: HealthClient<Channel>,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(
        service_name: impl Into<String>,
        address: Address,
        channel: Channel,
        timeout: Duration,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            address,
            client: HealthClient::new(channel),
            timeout,
        }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.address))]
    pub async fn check(&self) -> Result<(), HelperError> {
        let mut request = tonic::Request::new(HealthCheckRequest {
            service: self.service_name.clone(),
        });
        request.set_timeout(self.timeout);

        let mut client = self.client.clone();
        let response = match tokio::time::timeout(self.timeout, client.check(request)).await {
            Ok(Ok(response)) => response.into_inner(),
            Ok(Err(status)) => {
                tracing::debug!("health check call failed: {}", status);
                return Err(HelperError::HealthCheckFailure(format!(
                    "{}: {}",
                    self.address,
                    status.message()
                )));
            }
            Err(_) => {
                tracing::debug!("health check timed out after {:?}", self.timeout);
                return Err(HelperError::HealthCheckFailure(format!(
                    "{}: timed out after {:?}",
                    self.address, self.timeout
                )));
            }
        };

        match response.status() {
            ServingStatus::Serving => {
                tracing::debug!("serving");
                Ok(())
            }
            status => {
                tracing::debug!("not serving: {}", status.as_str_name());
                Err(HelperError::HealthCheckFailure(format!(
                    "{}: {}",
                    self.address,
                    status.as_str_name()
                )))
            }
        }
    }

    pub fn into_health_check(self) -> HealthCheck {
        let probe = Arc::new(self);
        Arc::new(move || {
            let probe = Arc::clone(&probe);
            async move { probe.check().await }.boxed()
        })
    }
}
