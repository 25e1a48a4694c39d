//! Implements [`KeyValueStore`] for etcd v3.

use anyhow::Context;
use etcd_client::{Client, EventType, GetOptions, WatchOptions};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::OnceCell;

use crate::{KeyValue, KeyValueStore, Listing, StoreEvent, OP_DELETE, OP_PUT};

/// An etcd v3 cluster. The connection is opened on first use.
pub struct EtcdStore {
    endpoints: Vec<String>,
    client: OnceCell<Client>,
}

impl EtcdStore {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<Client, anyhow::Error> {
        let client = self
            .client
            .get_or_try_init(|| Client::connect(self.endpoints.clone(), None))
            .await
            .with_context(|| format!("failed to connect to etcd at {:?}", self.endpoints))?;

        Ok(client.clone())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for EtcdStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn list(&self, prefix: &str) -> Result<Listing, anyhow::Error> {
        let mut client = self.client().await?;
        let response = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .context("etcd get failed")?;

        let revision = response
            .header()
            .map(|header| header.revision())
            .unwrap_or_default();
        let entries = response
            .kvs()
            .iter()
            .map(|kv| KeyValue {
                key: String::from_utf8_lossy(kv.key()).into_owned(),
                value: kv.value().to_vec(),
            })
            .collect();

        Ok(Listing { entries, revision })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn watch(
        &self,
        prefix: &str,
        after_revision: i64,
    ) -> Result<BoxStream<'static, Result<StoreEvent, anyhow::Error>>, anyhow::Error> {
        let mut client = self.client().await?;
        let options = WatchOptions::new()
            .with_prefix()
            .with_start_revision(after_revision + 1);
        let (watcher, stream) = client
            .watch(prefix, Some(options))
            .await
            .context("etcd watch failed")?;

        let events = stream.flat_map(move |response| {
            // The watch is cancelled once its handle is dropped, so the stream owns it.
            let _watcher = &watcher;

            let events: Vec<Result<StoreEvent, anyhow::Error>> = match response {
                Ok(response) => response
                    .events()
                    .iter()
                    .map(|event| {
                        let (key, value) = event
                            .kv()
                            .map(|kv| {
                                (
                                    String::from_utf8_lossy(kv.key()).into_owned(),
                                    kv.value().to_vec(),
                                )
                            })
                            .unwrap_or_default();
                        let op = match event.event_type() {
                            EventType::Put => OP_PUT,
                            EventType::Delete => OP_DELETE,
                        };
                        Ok(StoreEvent { op, key, value })
                    })
                    .collect(),
                Err(err) => vec![Err(anyhow::Error::from(err).context("etcd watch stream failed"))],
            };

            futures::stream::iter(events)
        });

        Ok(events.boxed())
    }
}
