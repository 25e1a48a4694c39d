use futures::StreamExt;
use tokio::task::JoinHandle;

use super::{mailbox, Batch, Mailbox, Outbox, Watcher};
use crate::{
    address_from_key, address_from_value, HelperError, KeyValueStore, StoreEvent, Update, OP_DELETE,
    OP_PUT,
};

/// Follows a key prefix in a [`KeyValueStore`].
///
/// Everything registered at start-up is reported as one batch, after that
/// every change event is reported on its own as soon as it arrives.
pub struct StreamingWatcher {
    mailbox: Mailbox,
    task: Option<JoinHandle<()>>,
}

impl StreamingWatcher {
    /// Start following `prefix`. Must be called from within a tokio runtime.
    pub fn new<S>(store: S, prefix: impl Into<String>) -> Self
    where
        S: KeyValueStore + Send + Sync + 'static,
    {
        let (outbox, mailbox) = mailbox();
        let task = tokio::spawn(follow(store, prefix.into(), outbox));

        Self {
            mailbox,
            task: Some(task),
        }
    }
}

#[async_trait::async_trait]
impl Watcher for StreamingWatcher {
    async fn next(&mut self) -> Result<Vec<Update>, HelperError> {
        tracing::debug!("wait for updates");
        self.mailbox.recv().await
    }

    async fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for StreamingWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[tracing::instrument(level = "debug", skip(store, outbox))]
async fn follow<S: KeyValueStore>(store: S, prefix: String, outbox: Outbox) {
    let listing = match store.list(&prefix).await {
        Ok(listing) => listing,
        Err(source) => {
            tracing::warn!("initial listing failed: {:#}", source);
            outbox.send(Err(HelperError::LookupFailure {
                name: prefix,
                source,
            }));
            return;
        }
    };

    let mut initial = Vec::with_capacity(listing.entries.len());
    for entry in &listing.entries {
        match address_from_value(&entry.key, &entry.value) {
            Ok(addr) => initial.push(Update::add(addr)),
            Err(err) => {
                tracing::warn!("skipping entry: {}", err);
                if !outbox.send(Err(err)) {
                    return;
                }
            }
        }
    }
    if !outbox.send(Ok(initial)) {
        return;
    }

    let mut events = match store.watch(&prefix, listing.revision).await {
        Ok(events) => events,
        Err(source) => {
            tracing::warn!("subscribing to changes failed: {:#}", source);
            outbox.send(Err(HelperError::LookupFailure {
                name: prefix,
                source,
            }));
            return;
        }
    };

    while let Some(event) = events.next().await {
        let batch = match event {
            Ok(event) => translate(event),
            Err(source) => {
                tracing::warn!("change feed failed: {:#}", source);
                outbox.send(Err(HelperError::LookupFailure {
                    name: prefix,
                    source,
                }));
                return;
            }
        };

        if !outbox.send(batch) {
            return;
        }
    }

    tracing::debug!("change feed ended");
}

fn translate(event: StoreEvent) -> Batch {
    match event.op {
        OP_PUT => {
            let addr = address_from_value(&event.key, &event.value)?;
            tracing::debug!("put {}", addr);
            Ok(vec![Update::add(addr)])
        }
        OP_DELETE => {
            let addr = address_from_key(&event.key)?;
            tracing::debug!("delete {}", addr);
            Ok(vec![Update::del(addr)])
        }
        op => Err(HelperError::UnrecognizedUpdateOp(op)),
    }
}
