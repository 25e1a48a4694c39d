//! Provides [`GrpcHelper`] and its builder: discovery, balancing, breakers and
//! retries behind calls made by method name.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::broadcast;
use tonic::codec::Streaming;
use tonic::metadata::MetadataMap;
use tonic::transport::ClientTlsConfig;
use tonic::{Request, Status};

use crate::{
    deadline_interceptor, retry, BalancerEvent, BreakerFactory, CallObserver, Client, Discovery,
    DiscoveryBackends, FullResponse, GrpcClientFactory, GrpcClientFactoryConfig,
    HealthCheckConfig, HelperError, Interceptor, KeyValueStore, LookupService,
    ManualBreakerFactory, Method, MethodKind, MethodTable, RetryPolicy, RoundRobinBalancer,
    ServiceDefinition, Target,
};

/// Per-call deadline used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Enumerates the resolution strategies [`GrpcHelperBuilder`] supports.
pub enum ResolutionStrategy {
    /// Build the helper without waiting for a first set of addresses.
    Lazy,
    /// Wait for the first set of addresses before the helper is returned.
    Eager { timeout: Duration },
}

/// Load balanced gRPC calls to every backend behind a service discovery target.
///
/// ```rust,no_run
/// # async fn run() -> Result<(), grpc_helper::HelperError> {
/// use grpc_helper::{GrpcHelper, ServiceDefinition};
/// use shared_proto::pb::{HelloReply, HelloRequest};
///
/// let definition = ServiceDefinition::new("helloworld", "Greeter")?.unary("SayHello")?;
/// let helper = GrpcHelper::builder("dns://_grpc._tcp.greeter", definition)
///     .build()
///     .await?;
///
/// helper.wait_for_ready().await;
/// let reply: HelloReply = helper
///     .call("SayHello", HelloRequest { name: "world".into() })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct GrpcHelper {
    balancer: RoundRobinBalancer<Discovery, GrpcClientFactory>,
    methods: MethodTable,
    retry: Option<RetryPolicy>,
}

impl GrpcHelper {
    /// Start configuring a helper for the service behind `target`, e.g.
    /// `static://localhost:50051`, `dns://_grpc._tcp.greeter` or
    /// `etcdv3://greeter?127.0.0.1:2379`.
    pub fn builder<T: Into<String>>(
        target: T,
        service_definition: ServiceDefinition,
    ) -> GrpcHelperBuilder {
        GrpcHelperBuilder::new(target, service_definition)
    }

    pub async fn wait_for_ready(&self) {
        self.balancer.wait_for_ready().await
    }

    /// Pick the next available client.
    pub fn get_client(&self) -> Result<Arc<Client>, HelperError> {
        self.balancer.get()
    }

    pub fn up(&self, address: &str) -> impl FnOnce() + Send + 'static {
        self.balancer.up(address)
    }

    pub fn down(&self, address: &str) {
        self.balancer.down(address)
    }

    pub fn addresses(&self) -> Vec<crate::Address> {
        self.balancer.addresses()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BalancerEvent> {
        self.balancer.subscribe()
    }

    pub async fn close(&self) {
        self.balancer.close().await
    }

    pub fn method(&self, name: &str) -> Result<&Arc<Method>, HelperError> {
        self.methods.get(name)
    }

    pub fn methods(&self) -> &[String] {
        self.methods.names()
    }

    /// Call a unary method.
    pub async fn call<Req, Resp>(&self, method: &str, message: Req) -> Result<Resp, HelperError>
    where
        Req: prost::Message + Clone + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        self.call_with_metadata(method, message, MetadataMap::new())
            .await
    }

    pub async fn call_with_metadata<Req, Resp>(
        &self,
        method: &str,
        message: Req,
        metadata: MetadataMap,
    ) -> Result<Resp, HelperError>
    where
        Req: prost::Message + Clone + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        Ok(self.call_full(method, message, metadata).await?.message)
    }

    /// Call a unary method, keeping the reply metadata and the backend that answered.
    ///
    /// Every attempt picks a client of its own, so a retry after a failure
    /// usually lands on another backend.
    #[tracing::instrument(level = "debug", skip(self, message, metadata))]
    pub async fn call_full<Req, Resp>(
        &self,
        method: &str,
        message: Req,
        metadata: MetadataMap,
    ) -> Result<FullResponse<Resp>, HelperError>
    where
        Req: prost::Message + Clone + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let method = self.methods.get(method)?;
        method.expect_kind(MethodKind::Unary)?;

        let attempt = |_: u32| {
            let message = message.clone();
            let metadata = metadata.clone();
            async move {
                let client = self.balancer.get()?;
                client.unary_full(method, request(message, metadata)).await
            }
        };

        match &self.retry {
            Some(policy) => retry(policy, attempt).await,
            None => attempt(1).await,
        }
    }

    /// Stream requests to one backend and receive a single reply.
    pub async fn client_streaming<S, Req, Resp>(
        &self,
        method: &str,
        messages: S,
    ) -> Result<Resp, HelperError>
    where
        S: Stream<Item = Req> + Send + 'static,
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let method = self.methods.get(method)?;
        let client = self.balancer.get()?;

        Ok(client
            .client_streaming(method, Request::new(messages))
            .await?
            .into_inner())
    }

    pub async fn server_streaming<Req, Resp>(
        &self,
        method: &str,
        message: Req,
    ) -> Result<Streaming<Resp>, HelperError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let method = self.methods.get(method)?;
        let client = self.balancer.get()?;

        Ok(client
            .server_streaming(method, Request::new(message))
            .await?
            .into_inner())
    }

    pub async fn bidi_streaming<S, Req, Resp>(
        &self,
        method: &str,
        messages: S,
    ) -> Result<Streaming<Resp>, HelperError>
    where
        S: Stream<Item = Req> + Send + 'static,
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let method = self.methods.get(method)?;
        let client = self.balancer.get()?;

        Ok(client
            .streaming(method, Request::new(messages))
            .await?
            .into_inner())
    }
}

fn request<T>(message: T, metadata: MetadataMap) -> Request<T> {
    let mut request = Request::new(message);
    *request.metadata_mut() = metadata;
    request
}

/// Builder to configure and create a [`GrpcHelper`].
pub struct GrpcHelperBuilder {
    target: String,
    service_definition: ServiceDefinition,
    lookup_service: Option<Arc<dyn LookupService + Send + Sync>>,
    key_value_store: Option<Arc<dyn KeyValueStore + Send + Sync>>,
    probe_interval: Option<Duration>,
    timeout: Duration,
    connect_timeout: Option<Duration>,
    tls_config: Option<ClientTlsConfig>,
    interceptors: Vec<Interceptor>,
    health_check: HealthCheckConfig,
    breaker_factory: Arc<dyn BreakerFactory>,
    observers: Vec<Arc<dyn CallObserver>>,
    retry: Option<RetryPolicy>,
    resolution_strategy: ResolutionStrategy,
}

impl GrpcHelperBuilder {
    pub fn new<T: Into<String>>(target: T, service_definition: ServiceDefinition) -> Self {
        Self {
            target: target.into(),
            service_definition,
            lookup_service: None,
            key_value_store: None,
            probe_interval: None,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: None,
            tls_config: None,
            interceptors: Vec::new(),
            health_check: HealthCheckConfig::default(),
            breaker_factory: Arc::new(ManualBreakerFactory::default()),
            observers: Vec::new(),
            retry: None,
            resolution_strategy: ResolutionStrategy::Lazy,
        }
    }

    /// Set a custom [`LookupService`] for `dns://` targets.
    ///
    /// Defaults to SRV queries against the system's name servers.
    pub fn lookup_service<L: LookupService + Send + Sync + 'static>(self, lookup_service: L) -> Self {
        Self {
            lookup_service: Some(Arc::new(lookup_service)),
            ..self
        }
    }

    /// Set the [`KeyValueStore`] followed by `etcdv3://` targets.
    pub fn key_value_store<S: KeyValueStore + Send + Sync + 'static>(self, store: S) -> Self {
        Self {
            key_value_store: Some(Arc::new(store)),
            ..self
        }
    }

    /// Set how often `dns://` targets are polled when they carry no `intervalMs`.
    /// Default interval is 5 seconds.
    pub fn dns_probe_interval(self, interval: Duration) -> Self {
        Self {
            probe_interval: Some(interval),
            ..self
        }
    }

    /// Set the deadline of every call. Defaults to 5 seconds.
    pub fn timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Set a connection timeout that will be applied to every new `Endpoint`.
    ///
    /// Defaults to the overall request `timeout` if not set.
    pub fn connect_timeout(self, connection_timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(connection_timeout),
            ..self
        }
    }

    /// Connect to every backend over tls.
    ///
    /// Backends are dialed by address, so set the expected server name with
    /// [`ClientTlsConfig::domain_name`] when it differs from the host.
    pub fn with_tls(self, tls_config: ClientTlsConfig) -> Self {
        Self {
            tls_config: Some(tls_config),
            ..self
        }
    }

    /// Add an interceptor run over the metadata of every request, after the
    /// one setting the deadline.
    pub fn interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(Request<()>) -> Result<Request<()>, Status> + Send + Sync + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn health_check(self, health_check: HealthCheckConfig) -> Self {
        Self {
            health_check,
            ..self
        }
    }

    /// Replace the default [`ManualBreakerFactory`].
    pub fn breaker_factory<B: BreakerFactory>(self, breaker_factory: B) -> Self {
        Self {
            breaker_factory: Arc::new(breaker_factory),
            ..self
        }
    }

    /// Report the outcome of every call, e.g. to a [`PrometheusObserver`](crate::PrometheusObserver).
    pub fn observer<O: CallObserver + 'static>(mut self, observer: O) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Retry failed unary calls. Off by default.
    pub fn retry(self, policy: RetryPolicy) -> Self {
        Self {
            retry: Some(policy),
            ..self
        }
    }

    /// Set the [`ResolutionStrategy`].
    ///
    /// Default set to [`ResolutionStrategy::Lazy`].
    ///
    /// If [`ResolutionStrategy::Eager`] is set, [`build`](Self::build) waits for
    /// the first set of addresses and fails with [`HelperError::Timeout`] if
    /// it does not arrive in time.
    pub fn resolution_strategy(self, resolution_strategy: ResolutionStrategy) -> Self {
        Self {
            resolution_strategy,
            ..self
        }
    }

    /// Construct a [`GrpcHelper`] and start following its target.
    pub async fn build(self) -> Result<GrpcHelper, HelperError> {
        let target = Target::parse(&self.target)?;
        let methods = MethodTable::new(&self.service_definition)?;

        let discovery = Discovery::for_target(
            &target,
            DiscoveryBackends {
                lookup_service: self.lookup_service,
                key_value_store: self.key_value_store,
                dns_probe_interval: self.probe_interval,
            },
        )
        .await?;

        let mut interceptors = vec![deadline_interceptor(self.timeout)];
        interceptors.extend(self.interceptors);

        let factory = GrpcClientFactory::new(GrpcClientFactoryConfig {
            service_definition: self.service_definition,
            tls_config: self.tls_config,
            timeout: Some(self.timeout),
            connect_timeout: self.connect_timeout,
            interceptors,
            health_check: self.health_check,
            breaker_factory: self.breaker_factory,
            observers: self.observers,
        });

        let balancer = RoundRobinBalancer::new(discovery, factory);
        balancer.start(target.body())?;

        if let ResolutionStrategy::Eager { timeout } = self.resolution_strategy {
            tokio::time::timeout(timeout, balancer.wait_for_ready())
                .await
                .map_err(|_| HelperError::Timeout(timeout))?;
        }

        Ok(GrpcHelper {
            balancer,
            methods,
            retry: self.retry,
        })
    }
}

const _: () = {
    const fn assert_is_send<T: Send>() {}
    assert_is_send::<GrpcHelperBuilder>();
    assert_is_send::<GrpcHelper>();
};
