//! Resolvers turn the body of a target uri into a [`Watcher`].

use std::sync::Arc;
use std::time::Duration;

use crate::{
    Address, DnsResolver, HelperError, KeyValueStore, LookupService, PeriodicWatcher,
    StaticWatcher, StreamingWatcher, Target, Update, Watcher,
};

/// Builds the [`Watcher`] for the scheme-specific body of a target uri.
pub trait Resolver: Send + Sync + 'static {
    type Watcher: Watcher + 'static;

    fn resolve(&self, body: &str) -> Result<Self::Watcher, HelperError>;
}

/// Resolves `static://host:port,host:port`.
///
/// Entries are trimmed and empty entries skipped, so an empty body resolves
/// to a watcher reporting no addresses.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticResolver;

impl Resolver for StaticResolver {
    type Watcher = StaticWatcher;

    fn resolve(&self, body: &str) -> Result<StaticWatcher, HelperError> {
        let addrs = body
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(Address::from);

        Ok(StaticWatcher::new(addrs))
    }
}

/// Resolves `etcdv3://prefix?endpoint,endpoint` (or `prefix?endpoints=...`)
/// into a [`StreamingWatcher`] following the keys under `/prefix`.
pub struct EtcdV3Resolver {
    store: Option<Arc<dyn KeyValueStore + Send + Sync>>,
}

impl EtcdV3Resolver {
    /// Follow keys in an already configured store. Endpoints in the target are ignored.
    pub fn with_store(store: Arc<dyn KeyValueStore + Send + Sync>) -> Self {
        Self { store: Some(store) }
    }

    /// Connect to the endpoints named in the target. Requires the `etcd` feature.
    pub fn from_endpoints() -> Self {
        Self { store: None }
    }

    fn parse(body: &str) -> Result<(String, Vec<String>), HelperError> {
        let (prefix, query) = crate::target::split_query(body);
        let prefix = prefix.trim_matches('/');

        if prefix.is_empty() {
            return Err(HelperError::InvalidTarget("missing key prefix".to_string()));
        }

        let endpoints = query
            .into_iter()
            .filter(|(key, _)| key.is_empty() || *key == "endpoints")
            .flat_map(|(_, value)| value.split(','))
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(str::to_string)
            .collect();

        Ok((format!("/{prefix}"), endpoints))
    }

    fn store(
        &self,
        endpoints: Vec<String>,
    ) -> Result<Arc<dyn KeyValueStore + Send + Sync>, HelperError> {
        if let Some(store) = &self.store {
            return Ok(Arc::clone(store));
        }

        if endpoints.is_empty() {
            return Err(HelperError::InvalidTarget("missing etcd endpoints".to_string()));
        }

        #[cfg(feature = "etcd")]
        {
            Ok(Arc::new(crate::EtcdStore::new(endpoints)))
        }

        #[cfg(not(feature = "etcd"))]
        {
            Err(HelperError::ResolverNotImplemented("etcdv3".to_string()))
        }
    }
}

impl Resolver for EtcdV3Resolver {
    type Watcher = StreamingWatcher;

    fn resolve(&self, body: &str) -> Result<StreamingWatcher, HelperError> {
        let (prefix, endpoints) = Self::parse(body)?;
        tracing::debug!("parse target into prefix {}, endpoints {:?}", prefix, endpoints);

        Ok(StreamingWatcher::new(self.store(endpoints)?, prefix))
    }
}

/// The discovery mechanisms selectable through a target uri scheme.
pub enum Discovery {
    Static(StaticResolver),
    Dns(DnsResolver),
    EtcdV3(EtcdV3Resolver),
}

/// Backends a [`Discovery`] may need, depending on the scheme.
#[derive(Default)]
pub struct DiscoveryBackends {
    pub lookup_service: Option<Arc<dyn LookupService + Send + Sync>>,
    pub key_value_store: Option<Arc<dyn KeyValueStore + Send + Sync>>,
    pub dns_probe_interval: Option<Duration>,
}

impl Discovery {
    /// Pick the resolver for the scheme of `target`.
    ///
    /// The `dns` scheme falls back to [`SrvLookup`](crate::SrvLookup) with the
    /// system configuration when no lookup service is supplied.
    pub async fn for_target(
        target: &Target,
        backends: DiscoveryBackends,
    ) -> Result<Self, HelperError> {
        tracing::debug!("service discovery use {}", target.scheme());

        // Schemes are case insensitive; errors name the one the caller wrote.
        match target.scheme().to_ascii_lowercase().as_str() {
            "static" => Ok(Discovery::Static(StaticResolver)),
            "dns" => {
                let lookup = match backends.lookup_service {
                    Some(lookup) => lookup,
                    None => Arc::new(crate::SrvLookup::from_system_config().await.map_err(
                        |source| HelperError::LookupFailure {
                            name: target.body().to_string(),
                            source,
                        },
                    )?),
                };
                let mut resolver = DnsResolver::from_shared(lookup);
                if let Some(interval) = backends.dns_probe_interval {
                    resolver = resolver.default_interval(interval);
                }
                Ok(Discovery::Dns(resolver))
            }
            "etcdv3" => Ok(Discovery::EtcdV3(match backends.key_value_store {
                Some(store) => EtcdV3Resolver::with_store(store),
                None => EtcdV3Resolver::from_endpoints(),
            })),
            _ => Err(HelperError::ResolverNotImplemented(
                target.scheme().to_string(),
            )),
        }
    }
}

impl Resolver for Discovery {
    type Watcher = DiscoveryWatcher;

    fn resolve(&self, body: &str) -> Result<DiscoveryWatcher, HelperError> {
        Ok(match self {
            Discovery::Static(resolver) => DiscoveryWatcher::Static(resolver.resolve(body)?),
            Discovery::Dns(resolver) => DiscoveryWatcher::Periodic(resolver.resolve(body)?),
            Discovery::EtcdV3(resolver) => DiscoveryWatcher::Streaming(resolver.resolve(body)?),
        })
    }
}

/// The watcher built by a [`Discovery`].
pub enum DiscoveryWatcher {
    Static(StaticWatcher),
    Periodic(PeriodicWatcher),
    Streaming(StreamingWatcher),
}

#[async_trait::async_trait]
impl Watcher for DiscoveryWatcher {
    async fn next(&mut self) -> Result<Vec<Update>, HelperError> {
        match self {
            DiscoveryWatcher::Static(watcher) => watcher.next().await,
            DiscoveryWatcher::Periodic(watcher) => watcher.next().await,
            DiscoveryWatcher::Streaming(watcher) => watcher.next().await,
        }
    }

    async fn close(&mut self) {
        match self {
            DiscoveryWatcher::Static(watcher) => watcher.close().await,
            DiscoveryWatcher::Periodic(watcher) => watcher.close().await,
            DiscoveryWatcher::Streaming(watcher) => watcher.close().await,
        }
    }
}
