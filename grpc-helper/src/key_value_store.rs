//! Defines the interface that [`StreamingWatcher`](crate::StreamingWatcher) requires
//! from a distributed key-value store, along with the record format of a
//! registered backend.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{Address, HelperError};

/// Operation code of a put event, as used by etcd v3.
pub const OP_PUT: i32 = 0;
/// Operation code of a delete event, as used by etcd v3.
pub const OP_DELETE: i32 = 1;

/// One key and its raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

/// Every entry below a prefix, and the store revision it was read at.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub entries: Vec<KeyValue>,
    pub revision: i64,
}

/// One change event from a watch. `op` is the raw operation code of the
/// store, see [`OP_PUT`] and [`OP_DELETE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub op: i32,
    pub key: String,
    pub value: Vec<u8>,
}

impl StoreEvent {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            op: OP_PUT,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            op: OP_DELETE,
            key: key.into(),
            value: Vec::new(),
        }
    }
}

/// A store that can list keys under a prefix and stream later changes.
#[async_trait::async_trait]
pub trait KeyValueStore {
    async fn list(&self, prefix: &str) -> Result<Listing, anyhow::Error>;

    /// Stream every change under `prefix` that happened after `after_revision`.
    async fn watch(
        &self,
        prefix: &str,
        after_revision: i64,
    ) -> Result<BoxStream<'static, Result<StoreEvent, anyhow::Error>>, anyhow::Error>;
}

#[async_trait::async_trait]
impl<T> KeyValueStore for std::sync::Arc<T>
where
    T: KeyValueStore + Send + Sync + ?Sized,
{
    async fn list(&self, prefix: &str) -> Result<Listing, anyhow::Error> {
        (**self).list(prefix).await
    }

    async fn watch(
        &self,
        prefix: &str,
        after_revision: i64,
    ) -> Result<BoxStream<'static, Result<StoreEvent, anyhow::Error>>, anyhow::Error> {
        (**self).watch(prefix, after_revision).await
    }
}

/// The value a backend registers under `<prefix>/<host:port>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub addr: String,
}

impl Registration {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn to_json(&self) -> Vec<u8> {
        // Serializing a struct with a single string field cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Decode the address a put event registers.
pub fn address_from_value(key: &str, value: &[u8]) -> Result<Address, HelperError> {
    serde_json::from_slice::<Registration>(value)
        .map(|registration| Address::new(registration.addr))
        .map_err(|err| HelperError::InvalidRecord {
            key: key.to_string(),
            reason: err.to_string(),
        })
}

/// The address a deleted key was registered for: its last path segment.
pub fn address_from_key(key: &str) -> Result<Address, HelperError> {
    match key.rsplit('/').next() {
        Some(segment) if !segment.is_empty() => Ok(Address::from(segment)),
        _ => Err(HelperError::InvalidRecord {
            key: key.to_string(),
            reason: "key has no address segment".to_string(),
        }),
    }
}
