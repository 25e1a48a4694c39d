//! Discovery backends driven by the tests instead of dns or etcd.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use grpc_helper::{
    Address, KeyValue, KeyValueStore, Listing, LookupService, Registration, StoreEvent,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Default)]
struct LookupState {
    addrs: HashSet<Address>,
    failing: bool,
    calls: usize,
}

/// A [`LookupService`] answering with whatever the test set last.
#[derive(Clone, Default)]
pub struct FakeLookup {
    state: Arc<Mutex<LookupState>>,
}

impl FakeLookup {
    pub fn new<I, A>(addrs: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Address>,
    {
        let lookup = Self::default();
        lookup.set(addrs);
        lookup
    }

    pub fn set<I, A>(&self, addrs: I)
    where
        I: IntoIterator<Item = A>,
        A: Into<Address>,
    {
        self.state.lock().addrs = addrs.into_iter().map(Into::into).collect();
    }

    /// Make every lookup fail until called again with `false`.
    pub fn fail(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    pub fn calls(&self) -> usize {
        self.state.lock().calls
    }
}

#[async_trait::async_trait]
impl LookupService for FakeLookup {
    async fn lookup(&self, name: &str) -> Result<HashSet<Address>, anyhow::Error> {
        let mut state = self.state.lock();
        state.calls += 1;

        if state.failing {
            anyhow::bail!("no answer for {name}");
        }
        Ok(state.addrs.clone())
    }
}

type Feed = mpsc::UnboundedSender<Result<StoreEvent, anyhow::Error>>;

#[derive(Default)]
struct StoreState {
    entries: BTreeMap<String, Vec<u8>>,
    revision: i64,
    history: Vec<(i64, StoreEvent)>,
    watchers: Vec<(String, Feed)>,
    broken: bool,
}

impl StoreState {
    fn record(&mut self, event: StoreEvent) {
        self.revision += 1;
        self.history.push((self.revision, event.clone()));
        self.watchers.retain(|(prefix, feed)| {
            !event.key.starts_with(prefix.as_str()) || feed.send(Ok(event.clone())).is_ok()
        });
    }
}

/// An in-memory [`KeyValueStore`] with an etcd-like revision counter.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Register `addr` under `prefix`, the way a backend announces itself.
    pub fn register(&self, prefix: &str, addr: &str) {
        self.put(&format!("{prefix}/{addr}"), Registration::new(addr).to_json());
    }

    pub fn deregister(&self, prefix: &str, addr: &str) {
        self.delete(&format!("{prefix}/{addr}"));
    }

    pub fn put(&self, key: &str, value: Vec<u8>) {
        let mut state = self.state.lock();
        state.entries.insert(key.to_string(), value.clone());
        state.record(StoreEvent::put(key, value));
    }

    pub fn delete(&self, key: &str) {
        let mut state = self.state.lock();
        if state.entries.remove(key).is_some() {
            state.record(StoreEvent::delete(key));
        }
    }

    /// Publish an arbitrary event without touching the entries.
    pub fn inject(&self, event: StoreEvent) {
        self.state.lock().record(event);
    }

    /// Break every open change feed, and refuse new ones.
    pub fn break_feeds(&self) {
        let mut state = self.state.lock();
        state.broken = true;
        for (_, feed) in state.watchers.drain(..) {
            let _ = feed.send(Err(anyhow::anyhow!("connection reset")));
        }
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn list(&self, prefix: &str) -> Result<Listing, anyhow::Error> {
        let state = self.state.lock();
        let entries = state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();

        Ok(Listing {
            entries,
            revision: state.revision,
        })
    }

    async fn watch(
        &self,
        prefix: &str,
        after_revision: i64,
    ) -> Result<BoxStream<'static, Result<StoreEvent, anyhow::Error>>, anyhow::Error> {
        let (feed, events) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        if state.broken {
            anyhow::bail!("connection reset");
        }

        for (revision, event) in &state.history {
            if *revision > after_revision && event.key.starts_with(prefix) {
                let _ = feed.send(Ok(event.clone()));
            }
        }
        state.watchers.push((prefix.to_string(), feed));

        Ok(UnboundedReceiverStream::new(events).boxed())
    }
}
