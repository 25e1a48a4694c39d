//! One gRPC client per backend address, and the factory that builds them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::time::Instant;
use tonic::client::Grpc;
use tonic::codec::{ProstCodec, Streaming};
use tonic::metadata::MetadataMap;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Response, Status};

use crate::{
    exec_through, Address, BreakerFactory, CallObserver, CallRecord, CircuitBreaker,
    HealthCheckConfig, HealthProbe, HelperError, ManualBreakerFactory, Method, MethodKind,
    ServiceDefinition,
};

/// Rewrites the metadata of every outgoing request.
pub type Interceptor = Arc<dyn Fn(Request<()>) -> Result<Request<()>, Status> + Send + Sync>;

/// An interceptor setting the `grpc-timeout` of requests that carry none.
pub fn deadline_interceptor(timeout: Duration) -> Interceptor {
    Arc::new(move |mut request: Request<()>| {
        if !request.metadata().contains_key("grpc-timeout") {
            request.set_timeout(timeout);
        }
        Ok(request)
    })
}

/// A reply together with everything the server sent alongside it.
#[derive(Debug)]
pub struct FullResponse<M> {
    pub message: M,
    pub metadata: MetadataMap,
    pub status: tonic::Code,
    /// The backend that answered.
    pub peer: Address,
}

/// A gRPC client bound to one backend address.
pub struct Client {
    address: Address,
    connected: AtomicBool,
    breaker: Arc<dyn CircuitBreaker>,
    channel: Channel,
    grpc: Grpc<Channel>,
    interceptors: Arc<[Interceptor]>,
    observers: Arc<[Arc<dyn CallObserver>]>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.address)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("breaker", &self.breaker.name())
            .finish()
    }
}

impl Client {
    pub fn new(
        address: Address,
        channel: Channel,
        breaker: Arc<dyn CircuitBreaker>,
        interceptors: Arc<[Interceptor]>,
    ) -> Self {
        Self {
            address,
            connected: AtomicBool::new(true),
            breaker,
            grpc: Grpc::new(channel.clone()),
            channel,
            interceptors,
            observers: Vec::new().into(),
        }
    }

    /// Report the outcome of every call to `observers`.
    pub fn with_observers(self, observers: Arc<[Arc<dyn CallObserver>]>) -> Self {
        Self { observers, ..self }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn breaker(&self) -> &Arc<dyn CircuitBreaker> {
        &self.breaker
    }

    /// The underlying channel, for use with generated tonic clients.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connected and not behind an open breaker.
    pub fn is_available(&self) -> bool {
        self.is_connected() && !self.breaker.is_open()
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Make a unary call through the breaker.
    pub async fn unary<Req, Resp>(
        &self,
        method: &Method,
        request: Request<Req>,
    ) -> Result<Response<Resp>, HelperError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        method.expect_kind(MethodKind::Unary)?;
        exec_through(self.breaker.as_ref(), self.call_unary(method, request)).await
    }

    /// Like [`unary`](Self::unary), keeping the reply metadata and the peer.
    pub async fn unary_full<Req, Resp>(
        &self,
        method: &Method,
        request: Request<Req>,
    ) -> Result<FullResponse<Resp>, HelperError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let (metadata, message, _) = self.unary(method, request).await?.into_parts();

        Ok(FullResponse {
            message,
            metadata,
            status: tonic::Code::Ok,
            peer: self.address.clone(),
        })
    }

    /// A unary call that bypasses the breaker.
    pub async fn raw_unary<Req, Resp>(
        &self,
        method: &Method,
        request: Request<Req>,
    ) -> Result<Response<Resp>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        method
            .expect_kind(MethodKind::Unary)
            .map_err(|err| Status::unimplemented(err.to_string()))?;
        self.call_unary(method, request).await
    }

    pub async fn client_streaming<S, Req, Resp>(
        &self,
        method: &Method,
        request: Request<S>,
    ) -> Result<Response<Resp>, HelperError>
    where
        S: Stream<Item = Req> + Send + 'static,
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        method.expect_kind(MethodKind::ClientStreaming)?;
        let request = self.intercept(request)?;

        let call = async {
            let mut grpc = self.ready().await?;
            grpc.client_streaming(request, method.path().clone(), ProstCodec::default())
                .await
        };
        Ok(self.observed(method, call).await?)
    }

    pub async fn server_streaming<Req, Resp>(
        &self,
        method: &Method,
        request: Request<Req>,
    ) -> Result<Response<Streaming<Resp>>, HelperError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        method.expect_kind(MethodKind::ServerStreaming)?;
        let request = self.intercept(request)?;

        let call = async {
            let mut grpc = self.ready().await?;
            grpc.server_streaming(request, method.path().clone(), ProstCodec::default())
                .await
        };
        Ok(self.observed(method, call).await?)
    }

    /// A bidirectional streaming call.
    pub async fn streaming<S, Req, Resp>(
        &self,
        method: &Method,
        request: Request<S>,
    ) -> Result<Response<Streaming<Resp>>, HelperError>
    where
        S: Stream<Item = Req> + Send + 'static,
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        method.expect_kind(MethodKind::Bidirectional)?;
        let request = self.intercept(request)?;

        let call = async {
            let mut grpc = self.ready().await?;
            grpc.streaming(request, method.path().clone(), ProstCodec::default())
                .await
        };
        Ok(self.observed(method, call).await?)
    }

    async fn call_unary<Req, Resp>(
        &self,
        method: &Method,
        request: Request<Req>,
    ) -> Result<Response<Resp>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let request = self.intercept(request)?;

        let call = async {
            let mut grpc = self.ready().await?;
            grpc.unary(request, method.path().clone(), ProstCodec::default())
                .await
        };
        self.observed(method, call).await
    }

    async fn observed<T, Fut>(&self, method: &Method, call: Fut) -> Result<T, Status>
    where
        Fut: Future<Output = Result<T, Status>>,
    {
        if self.observers.is_empty() {
            return call.await;
        }

        let started = Instant::now();
        let result = call.await;
        let record = CallRecord {
            package: method.package(),
            service: method.service(),
            peer: &self.address,
            method: method.path().as_str(),
            code: match &result {
                Ok(_) => tonic::Code::Ok,
                Err(status) => status.code(),
            },
            elapsed: started.elapsed(),
        };

        for observer in self.observers.iter() {
            observer.observe(&record);
        }
        result
    }

    async fn ready(&self) -> Result<Grpc<Channel>, Status> {
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|err| Status::unknown(format!("Service was not ready: {err}")))?;
        Ok(grpc)
    }

    fn intercept<T>(&self, request: Request<T>) -> Result<Request<T>, Status> {
        let (metadata, extensions, message) = request.into_parts();
        let mut bare = Request::from_parts(metadata, extensions, ());

        for interceptor in self.interceptors.iter() {
            bare = interceptor(bare)?;
        }

        let (metadata, extensions, ()) = bare.into_parts();
        Ok(Request::from_parts(metadata, extensions, message))
    }
}

/// Builds and tears down the [`Client`] of each address a balancer learns about.
pub trait ClientFactory: Send + Sync + 'static {
    fn create_client(&self, address: &Address) -> Result<Client, HelperError>;

    /// Called once a client has been removed from the live set.
    fn close_client(&self, _client: &Client) {}
}

/// Settings shared by every client a [`GrpcClientFactory`] builds.
pub struct GrpcClientFactoryConfig {
    pub service_definition: ServiceDefinition,
    pub tls_config: Option<ClientTlsConfig>,
    pub timeout: Option<Duration>,
    /// Defaults to `timeout` if not set.
    pub connect_timeout: Option<Duration>,
    pub interceptors: Vec<Interceptor>,
    pub health_check: HealthCheckConfig,
    pub breaker_factory: Arc<dyn BreakerFactory>,
    pub observers: Vec<Arc<dyn CallObserver>>,
}

impl GrpcClientFactoryConfig {
    pub fn new(service_definition: ServiceDefinition) -> Self {
        Self {
            service_definition,
            tls_config: None,
            timeout: None,
            connect_timeout: None,
            interceptors: Vec::new(),
            health_check: HealthCheckConfig::default(),
            breaker_factory: Arc::new(ManualBreakerFactory::default()),
            observers: Vec::new(),
        }
    }
}

/// Builds lazily connected tonic clients, each behind its own breaker.
pub struct GrpcClientFactory {
    service_name: String,
    tls_config: Option<ClientTlsConfig>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    interceptors: Arc<[Interceptor]>,
    health_check: HealthCheckConfig,
    breaker_factory: Arc<dyn BreakerFactory>,
    observers: Arc<[Arc<dyn CallObserver>]>,
}

impl GrpcClientFactory {
    pub fn new(config: GrpcClientFactoryConfig) -> Self {
        Self {
            service_name: config.service_definition.full_name(),
            tls_config: config.tls_config,
            timeout: config.timeout,
            connect_timeout: config.connect_timeout.or(config.timeout),
            interceptors: config.interceptors.into(),
            health_check: config.health_check,
            breaker_factory: config.breaker_factory,
            observers: config.observers.into(),
        }
    }

    fn endpoint(&self, address: &Address) -> Result<Endpoint, HelperError> {
        let scheme = if self.tls_config.is_some() { "https" } else { "http" };
        let mut endpoint = Endpoint::from_shared(format!("{scheme}://{address}"))?;

        if let Some(timeout) = self.timeout {
            endpoint = endpoint.timeout(timeout);
        }
        if let Some(connect_timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(connect_timeout);
        }
        if let Some(tls_config) = &self.tls_config {
            endpoint = endpoint.tls_config(tls_config.clone())?;
        }

        Ok(endpoint)
    }
}

impl ClientFactory for GrpcClientFactory {
    fn create_client(&self, address: &Address) -> Result<Client, HelperError> {
        let channel = self.endpoint(address)?.connect_lazy();

        let health_check = self.health_check.enabled.then(|| {
            HealthProbe::new(
                self.service_name.clone(),
                address.clone(),
                channel.clone(),
                self.health_check.timeout,
            )
            .into_health_check()
        });
        let breaker = self
            .breaker_factory
            .create(format!("{}-{}-brake", self.service_name, address), health_check);

        tracing::debug!("created client for {}", address);

        Ok(Client::new(
            address.clone(),
            channel,
            breaker,
            Arc::clone(&self.interceptors),
        )
        .with_observers(Arc::clone(&self.observers)))
    }

    fn close_client(&self, client: &Client) {
        tracing::debug!("closed client for {}", client.address());
    }
}
