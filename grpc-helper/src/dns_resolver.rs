//! Implements [`LookupService`] for dns SRV records, and the `dns://` resolver on top of it.

use crate::{Address, HelperError, LookupService, PeriodicWatcher, Resolver, DEFAULT_POLL_INTERVAL};
use anyhow::Context;
use hickory_resolver::{system_conf, Name, TokioAsyncResolver};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Implements [`LookupService`] by querying the SRV records of a name, e.g.
/// `_grpc._tcp.greeter`, and turning each record into `target:port`.
pub struct SrvLookup {
    /// The hickory resolver which contacts the dns service directly such
    /// that we bypass os-specific dns caching.
    dns: TokioAsyncResolver,
}

impl SrvLookup {
    /// Construct a new [`SrvLookup`] from env and system configuration, e.g `resolv.conf`.
    pub async fn from_system_config() -> Result<Self, anyhow::Error> {
        let (config, mut opts) = system_conf::read_system_conf()
            .context("failed to read dns services from system configuration")?;

        // We do not want any caching on our side.
        opts.cache_size = 0;

        let dns = TokioAsyncResolver::tokio(config, opts);

        Ok(Self { dns })
    }
}

#[async_trait::async_trait]
impl LookupService for SrvLookup {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn lookup(&self, name: &str) -> Result<HashSet<Address>, anyhow::Error> {
        let records = self
            .dns
            .srv_lookup(name)
            .await
            .with_context(|| format!("srv lookup of '{name}' failed"))?;

        Ok(records
            .iter()
            .map(|srv| {
                let target = srv.target().to_utf8();
                let addr = Address::new(format!(
                    "{}:{}",
                    target.trim_end_matches('.'),
                    srv.port()
                ));
                tracing::debug!("result: {}", addr);
                addr
            })
            .collect())
    }
}

/// Resolves `dns://` targets of the form `_grpc._tcp.service[?intervalMs=5000]`
/// into a [`PeriodicWatcher`].
pub struct DnsResolver {
    lookup: Arc<dyn LookupService + Send + Sync>,
    default_interval: Duration,
}

impl DnsResolver {
    pub fn new<L>(lookup: L) -> Self
    where
        L: LookupService + Send + Sync + 'static,
    {
        Self::from_shared(Arc::new(lookup))
    }

    pub fn from_shared(lookup: Arc<dyn LookupService + Send + Sync>) -> Self {
        Self {
            lookup,
            default_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Poll interval used when the target does not carry `intervalMs`.
    pub fn default_interval(self, interval: Duration) -> Self {
        Self {
            default_interval: interval,
            ..self
        }
    }

    fn parse(&self, body: &str) -> Result<(String, Duration), HelperError> {
        let (name, query) = crate::target::split_query(body);

        if name.is_empty() {
            return Err(HelperError::InvalidTarget("missing dns name".to_string()));
        }
        Name::from_ascii(name)
            .map_err(|err| HelperError::InvalidTarget(format!("invalid dns name '{name}': {err}")))?;

        let mut interval = self.default_interval;
        for (key, value) in query {
            if key == "intervalMs" {
                let millis = value
                    .parse::<u64>()
                    .ok()
                    .filter(|millis| *millis > 0)
                    .ok_or_else(|| {
                        HelperError::InvalidTarget(format!("invalid intervalMs '{value}'"))
                    })?;
                interval = Duration::from_millis(millis);
            }
        }

        Ok((name.to_string(), interval))
    }
}

impl Resolver for DnsResolver {
    type Watcher = PeriodicWatcher;

    fn resolve(&self, body: &str) -> Result<PeriodicWatcher, HelperError> {
        let (name, interval) = self.parse(body)?;
        tracing::debug!("parse target into basename {}, interval {:?}", name, interval);

        Ok(PeriodicWatcher::new(Arc::clone(&self.lookup), name, interval))
    }
}
