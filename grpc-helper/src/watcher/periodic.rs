use std::collections::HashSet;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{mailbox, Mailbox, Outbox, Watcher};
use crate::{diff, Address, HelperError, LookupService, Update};

/// Default time between two lookups.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Polls a [`LookupService`] on a fixed interval and reports what changed
/// since the last successful lookup.
///
/// A failed lookup is reported as [`HelperError::LookupFailure`] and leaves
/// the last known set of addresses untouched, so a transient failure never
/// removes backends.
pub struct PeriodicWatcher {
    mailbox: Mailbox,
    task: Option<JoinHandle<()>>,
}

impl PeriodicWatcher {
    /// Start polling `name`. The first lookup runs right away.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<L>(lookup: L, name: impl Into<String>, interval: Duration) -> Self
    where
        L: LookupService + Send + Sync + 'static,
    {
        let (outbox, mailbox) = mailbox();
        let interval = interval.max(Duration::from_millis(1));
        let task = tokio::spawn(poll(lookup, name.into(), interval, outbox));

        Self {
            mailbox,
            task: Some(task),
        }
    }
}

#[async_trait::async_trait]
impl Watcher for PeriodicWatcher {
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

impl Drop for PeriodicWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Last successful lookup result. Replaced as a whole, never edited in place.
#[derive(Default)]
struct Snapshot {
    generation: u64,
    addrs: HashSet<Address>,
}

#[tracing::instrument(level = "debug", skip(lookup, outbox))]
async fn poll<L: LookupService>(lookup: L, name: String, interval: Duration, outbox: Outbox) {
    let mut snapshot = Snapshot::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let delivered = match lookup.lookup(&name).await {
            Ok(addrs) => {
                let updates = diff(&snapshot.addrs, &addrs);
                snapshot = Snapshot {
                    generation: snapshot.generation + 1,
                    addrs,
                };
                tracing::debug!(
                    generation = snapshot.generation,
                    changes = updates.len(),
                    "lookup succeeded"
                );

                updates.is_empty() || outbox.send(Ok(updates))
            }
            Err(source) => {
                tracing::warn!("lookup failed, keeping previous addresses: {:#}", source);
                outbox.send(Err(HelperError::LookupFailure {
                    name: name.clone(),
                    source,
                }))
            }
        };

        if !delivered {
            tracing::debug!("watcher dropped, stop polling");
            break;
        }
    }
}
