//! Defines the interface that [`PeriodicWatcher`](crate::PeriodicWatcher) requires in order
//! to resolve all the addresses behind a name.

use std::collections::HashSet;

use crate::Address;

/// Interface that provides functionality to
/// acquire the set of backend addresses registered under a name.
#[async_trait::async_trait]
pub trait LookupService {
    /// Return the unique [`Address`]es currently registered under `name`.
    /// If nothing is registered an empty HashSet is returned.
    async fn lookup(&self, name: &str) -> Result<HashSet<Address>, anyhow::Error>;
}

#[async_trait::async_trait]
impl<T> LookupService for std::sync::Arc<T>
where
    T: LookupService + Send + Sync + ?Sized,
{
    async fn lookup(&self, name: &str) -> Result<HashSet<Address>, anyhow::Error> {
        (**self).lookup(name).await
    }
}
