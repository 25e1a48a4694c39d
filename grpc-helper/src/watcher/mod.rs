//! Watchers turn a discovery backend into an ordered stream of [`Update`] batches.
//!
//! Every watcher starts producing as soon as it is constructed. Batches are
//! queued in a single-producer single-consumer mailbox until the consumer,
//! usually a [`RoundRobinBalancer`](crate::RoundRobinBalancer), asks for the
//! next one.

mod periodic;
mod static_watcher;
mod streaming;

pub use periodic::*;
pub use static_watcher::*;
pub use streaming::*;

use tokio::sync::mpsc;

use crate::{HelperError, Update};

/// A stateful producer of membership changes for one resolved target.
#[async_trait::async_trait]
pub trait Watcher: Send {
    /// Wait for the next batch of updates.
    ///
    /// Watcher-level failures, e.g. a failed lookup, are delivered in order
    /// with the batches. Once the watcher has stopped and every queued batch
    /// has been delivered, [`HelperError::WatcherClosed`] is returned.
    async fn next(&mut self) -> Result<Vec<Update>, HelperError>;

    /// Stop any background polling or streaming. Calling it twice is fine.
    async fn close(&mut self);
}

pub(crate) type Batch = Result<Vec<Update>, HelperError>;

pub(crate) fn mailbox() -> (Outbox, Mailbox) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Outbox(sender), Mailbox(receiver))
}

/// Producer half, owned by a watcher's background task.
pub(crate) struct Outbox(mpsc::UnboundedSender<Batch>);

impl Outbox {
    /// Queue a batch. Returns `false` once the consumer is gone.
    pub(crate) fn send(&self, batch: Batch) -> bool {
        self.0.send(batch).is_ok()
    }
}

/// Consumer half, owned by the watcher itself.
pub(crate) struct Mailbox(mpsc::UnboundedReceiver<Batch>);

impl Mailbox {
    pub(crate) async fn recv(&mut self) -> Batch {
        self.0.recv().await.unwrap_or(Err(HelperError::WatcherClosed))
    }
}
