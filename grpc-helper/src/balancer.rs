//! Round-robin selection over the clients of a live address set.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing_futures::Instrument;

use crate::{Address, Client, ClientFactory, HelperError, Resolver, Update, UpdateOp, Watcher};

// How many events a slow subscriber may fall behind before it starts missing them.
const EVENT_CAPACITY: usize = 64;

/// What a balancer reports to its subscribers.
#[derive(Debug, Clone)]
pub enum BalancerEvent {
    /// A batch was applied; the addresses of the new live set.
    Changed(Vec<Address>),
    /// The watcher or the client factory failed. The balancer keeps going.
    Error(Arc<HelperError>),
}

struct Shared<F> {
    factory: F,
    clients: ArcSwap<Vec<Arc<Client>>>,
    cursor: AtomicUsize,
    ready: watch::Sender<bool>,
    events: broadcast::Sender<BalancerEvent>,
}

impl<F: ClientFactory> Shared<F> {
    fn publish(&self, event: BalancerEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn apply(&self, batch: Vec<Update>) {
        let mut clients: Vec<Arc<Client>> = self.clients.load().iter().cloned().collect();

        for update in batch {
            match update.op {
                UpdateOp::Add => {
                    if clients.iter().any(|client| *client.address() == update.addr) {
                        tracing::debug!("{} is already known", update.addr);
                        continue;
                    }
                    match self.factory.create_client(&update.addr) {
                        Ok(client) => {
                            tracing::debug!("adding {}", update.addr);
                            clients.push(Arc::new(client));
                        }
                        Err(err) => {
                            tracing::warn!("failed to create client for {}: {}", update.addr, err);
                            self.publish(BalancerEvent::Error(Arc::new(err)));
                        }
                    }
                }
                UpdateOp::Del => {
                    if let Some(index) = clients
                        .iter()
                        .position(|client| *client.address() == update.addr)
                    {
                        tracing::debug!("removing {}", update.addr);
                        let client = clients.remove(index);
                        self.factory.close_client(&client);
                    }
                }
            }
        }

        let addresses = clients.iter().map(|client| client.address().clone()).collect();
        self.clients.store(Arc::new(clients));
        self.publish(BalancerEvent::Changed(addresses));
        self.ready.send_if_modified(|ready| !std::mem::replace(ready, true));
    }
}

/// Hands out clients round-robin from the live set maintained by a [`Watcher`].
///
/// ```rust,no_run
/// # async fn run() -> Result<(), grpc_helper::HelperError> {
/// use grpc_helper::{
///     GrpcClientFactory, GrpcClientFactoryConfig, RoundRobinBalancer, ServiceDefinition,
///     StaticResolver,
/// };
///
/// let definition = ServiceDefinition::new("helloworld", "Greeter")?.unary("SayHello")?;
/// let factory = GrpcClientFactory::new(GrpcClientFactoryConfig::new(definition));
///
/// let balancer = RoundRobinBalancer::new(StaticResolver, factory);
/// balancer.start("localhost:50051,localhost:50052")?;
/// balancer.wait_for_ready().await;
///
/// let client = balancer.get()?;
/// # Ok(())
/// # }
/// ```
pub struct RoundRobinBalancer<R, F> {
    resolver: R,
    shared: Arc<Shared<F>>,
    task: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl<R: Resolver, F: ClientFactory> RoundRobinBalancer<R, F> {
    pub fn new(resolver: R, factory: F) -> Self {
        let (ready, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            resolver,
            shared: Arc::new(Shared {
                factory,
                clients: ArcSwap::from_pointee(Vec::new()),
                cursor: AtomicUsize::new(0),
                ready,
                events,
            }),
            task: Mutex::new(None),
        }
    }

    /// Resolve `target` and start following its updates in the background.
    pub fn start(&self, target: &str) -> Result<(), HelperError> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Err(HelperError::AlreadyStarted);
        }

        let watcher = self.resolver.resolve(target)?;
        let (shutdown, stop) = oneshot::channel();
        let span = tracing::debug_span!("balancer", target = %target);
        let handle = tokio::spawn(run(Arc::clone(&self.shared), watcher, stop).instrument(span));

        *task = Some((shutdown, handle));
        Ok(())
    }

    /// Wait until the first batch of updates has been applied.
    pub async fn wait_for_ready(&self) {
        let mut ready = self.shared.ready.subscribe();
        // The sender lives in `self`, so this only fails if it was dropped.
        let _ = ready.wait_for(|ready| *ready).await;
    }

    pub fn is_ready(&self) -> bool {
        *self.shared.ready.borrow()
    }

    /// Pick the next available client.
    pub fn get(&self) -> Result<Arc<Client>, HelperError> {
        let clients = self.shared.clients.load();
        let available: Vec<&Arc<Client>> = clients
            .iter()
            .filter(|client| client.is_available())
            .collect();

        if available.is_empty() {
            return Err(HelperError::NoClientAvailable);
        }

        let cursor = self.shared.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::clone(available[cursor % available.len()]))
    }

    /// Mark the clients of `address` as connected. The returned closure marks them down again.
    pub fn up(&self, address: &str) -> impl FnOnce() + Send + 'static {
        self.set_connected(address, true);

        let shared = Arc::clone(&self.shared);
        let address = address.to_string();
        move || set_connected(&shared, &address, false)
    }

    /// Mark the clients of `address` as disconnected, taking them out of rotation.
    pub fn down(&self, address: &str) {
        self.set_connected(address, false);
    }

    fn set_connected(&self, address: &str, connected: bool) {
        set_connected(&self.shared, address, connected);
    }

    /// Addresses of the current live set.
    pub fn addresses(&self) -> Vec<Address> {
        self.shared
            .clients
            .load()
            .iter()
            .map(|client| client.address().clone())
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BalancerEvent> {
        self.shared.events.subscribe()
    }

    /// Stop following updates and close the watcher.
    ///
    /// Clients already handed out keep working.
    pub async fn close(&self) {
        let task = self.task.lock().take();
        if let Some((shutdown, handle)) = task {
            let _ = shutdown.send(());
            if let Err(err) = handle.await {
                tracing::warn!("balancer task failed: {}", err);
            }
        }
    }
}

impl<R, F> Drop for RoundRobinBalancer<R, F> {
    fn drop(&mut self) {
        if let Some((shutdown, _)) = self.task.get_mut().take() {
            let _ = shutdown.send(());
        }
    }
}

fn set_connected<F>(shared: &Shared<F>, address: &str, connected: bool) {
    for client in shared.clients.load().iter() {
        if client.address().as_str() == address {
            client.set_connected(connected);
        }
    }
}

async fn run<F, W>(shared: Arc<Shared<F>>, mut watcher: W, mut stop: oneshot::Receiver<()>)
where
    F: ClientFactory,
    W: Watcher,
{
    loop {
        tokio::select! {
            _ = &mut stop => {
                tracing::debug!("balancer closed");
                break;
            }
            next = watcher.next() => match next {
                Ok(batch) => shared.apply(batch),
                Err(HelperError::WatcherClosed) => {
                    tracing::debug!("watcher closed");
                    break;
                }
                Err(err) => {
                    tracing::warn!("watcher error: {}", err);
                    shared.publish(BalancerEvent::Error(Arc::new(err)));
                }
            },
        }
    }

    watcher.close().await;
}
