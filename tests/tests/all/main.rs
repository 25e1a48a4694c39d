mod health;
mod helper;

use std::time::Duration;

use grpc_helper::{Address, BalancerEvent, HelperError};
use tokio::sync::broadcast::{self, error::RecvError};

/// Wait for the next event matching `accept`, failing the test after 5 seconds.
pub async fn wait_for_event<F>(events: &mut broadcast::Receiver<BalancerEvent>, mut accept: F) -> BalancerEvent
where
    F: FnMut(&BalancerEvent) -> bool,
{
    let next = async {
        loop {
            match events.recv().await {
                Ok(event) if accept(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("balancer events closed"),
            }
        }
    };

    tokio::time::timeout(Duration::from_secs(5), next)
        .await
        .expect("timed out waiting for a balancer event")
}

/// Wait until the live set has exactly `len` addresses.
pub async fn wait_for_addresses(
    events: &mut broadcast::Receiver<BalancerEvent>,
    len: usize,
) -> Vec<Address> {
    match wait_for_event(events, |event| {
        matches!(event, BalancerEvent::Changed(addresses) if addresses.len() == len)
    })
    .await
    {
        BalancerEvent::Changed(addresses) => addresses,
        BalancerEvent::Error(err) => panic!("unexpected error: {err}"),
    }
}

/// Wait for the next error event.
pub async fn wait_for_error(events: &mut broadcast::Receiver<BalancerEvent>) -> std::sync::Arc<HelperError> {
    match wait_for_event(events, |event| matches!(event, BalancerEvent::Error(_))).await {
        BalancerEvent::Error(err) => err,
        BalancerEvent::Changed(addresses) => panic!("unexpected change: {addresses:?}"),
    }
}
