//! Error type shared by every layer of the helper.

use std::time::Duration;

use crate::MethodKind;

/// Everything that can go wrong between parsing a target and receiving a reply.
#[derive(Debug, thiserror::Error)]
pub enum HelperError {
    /// The service discovery uri could not be parsed.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// The service discovery uri uses a scheme nobody resolves.
    #[error("resolver not implemented: {0}")]
    ResolverNotImplemented(String),

    /// A lookup against the discovery backend failed. Transient.
    #[error("lookup failed for '{name}': {source}")]
    LookupFailure {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Every known client is either disconnected or behind an open breaker.
    #[error("no client available")]
    NoClientAvailable,

    /// The call was refused by an open circuit breaker.
    #[error("circuit breaker '{0}' is open")]
    BreakerOpen(String),

    /// A health probe saw a non-serving status, failed or timed out.
    #[error("health check fail: {0}")]
    HealthCheckFailure(String),

    /// A change feed produced an operation code this crate does not understand.
    #[error("unknown update op, {0}")]
    UnrecognizedUpdateOp(i32),

    /// A change feed entry could not be turned into an address.
    #[error("invalid record at '{key}': {reason}")]
    InvalidRecord { key: String, reason: String },

    /// The watcher stopped producing updates.
    #[error("watcher closed")]
    WatcherClosed,

    /// `start` was called on a balancer that is already running.
    #[error("balancer already started")]
    AlreadyStarted,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// No method with this name is part of the service definition.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// The method exists but has a different streaming shape.
    #[error("method '{method}' is {actual:?}, not {expected:?}")]
    MethodKindMismatch {
        method: String,
        expected: MethodKind,
        actual: MethodKind,
    },

    #[error("invalid service definition: {0}")]
    InvalidServiceDefinition(String),

    /// The endpoint for an address could not be built.
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),

    /// The remote call failed. Passed through unchanged.
    #[error(transparent)]
    Status(#[from] tonic::Status),
}

impl HelperError {
    /// The gRPC status carried by this error, if it came from a remote call.
    pub fn status(&self) -> Option<&tonic::Status> {
        match self {
            HelperError::Status(status) => Some(status),
            _ => None,
        }
    }
}
