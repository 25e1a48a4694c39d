use super::{mailbox, Mailbox, Outbox, Watcher};
use crate::{Address, HelperError, Update};

/// Reports a fixed list of addresses once and then stays silent.
pub struct StaticWatcher {
    // Kept so that `next` waits forever instead of reporting a closed watcher.
    _outbox: Outbox,
    mailbox: Mailbox,
}

impl StaticWatcher {
    pub fn new<I>(addrs: I) -> Self
    where
        I: IntoIterator<Item = Address>,
    {
        let (outbox, mailbox) = mailbox();
        outbox.send(Ok(addrs.into_iter().map(Update::add).collect()));

        Self {
            _outbox: outbox,
            mailbox,
        }
    }
}

#[async_trait::async_trait]
impl Watcher for StaticWatcher {
    async fn next(&mut self) -> Result<Vec<Update>, HelperError> {
        self.mailbox.recv().await
    }

    async fn close(&mut self) {}
}
