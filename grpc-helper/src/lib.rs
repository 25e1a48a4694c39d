//! `grpc-helper` balances gRPC calls over every backend behind a service
//! discovery target, on top of tonic.
//!
//! A target uri names how backends are found:
//!
//! - `static://host:port,host:port` a fixed list.
//! - `dns://_grpc._tcp.service?intervalMs=5000` SRV records, polled.
//! - `etcdv3://service?127.0.0.1:2379` keys under `/service` in etcd v3, followed.
//!
//! # Simple example
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> Result<(), grpc_helper::HelperError> {
//!     use grpc_helper::{GrpcHelper, ServiceDefinition};
//!     use shared_proto::pb::{HelloReply, HelloRequest};
//!
//!     let definition = ServiceDefinition::new("helloworld", "Greeter")?.unary("SayHello")?;
//!     let helper = GrpcHelper::builder("static://localhost:50051,localhost:50052", definition)
//!         .build()
//!         .await?;
//!
//!     helper.wait_for_ready().await;
//!     let reply: HelloReply = helper
//!         .call("SayHello", HelloRequest { name: "world".into() })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! [`GrpcHelper`] also allows plugging in a different implementation of [`LookupService`].
//!
//! ```rust
//! use grpc_helper::{Address, LookupService};
//! use std::collections::HashSet;
//!
//! // This does nothing
//! struct DummyLookupService;
//!
//! #[async_trait::async_trait]
//! impl LookupService for DummyLookupService {
//!     async fn lookup(&self, _name: &str) -> Result<HashSet<Address>, anyhow::Error> {
//!         Ok(HashSet::new())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     use grpc_helper::{GrpcHelper, ServiceDefinition};
//!
//!     let definition = ServiceDefinition::new("helloworld", "Greeter").unwrap();
//!     let helper = GrpcHelper::builder("dns://_grpc._tcp.greeter", definition)
//!         .lookup_service(DummyLookupService)
//!         .dns_probe_interval(std::time::Duration::from_secs(3))
//!         .build()
//!         .await
//!         .expect("failed to construct GrpcHelper");
//!
//!     helper.close().await;
//! }
//! ```
//!
//! Failed unary calls can be retried with exponential backoff, each attempt on
//! the next available backend.
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() {
//!     use grpc_helper::{GrpcHelper, HelperError, ResolutionStrategy, RetryPolicy, ServiceDefinition};
//!     use std::time::Duration;
//!
//!     let definition = ServiceDefinition::new("helloworld", "Greeter").unwrap();
//!     let helper = GrpcHelper::builder("dns://_grpc._tcp.greeter", definition)
//!         .timeout(Duration::from_secs(10))
//!         .retry(
//!             RetryPolicy::default()
//!                 .retries(3)
//!                 .bail(|err, _| matches!(err, HelperError::UnknownMethod(_))),
//!         )
//!         .resolution_strategy(ResolutionStrategy::Eager {
//!             timeout: Duration::from_secs(20),
//!         })
//!         .build()
//!         .await
//!         .expect("failed to construct GrpcHelper");
//! }
//! ```
//!
//! # Internals
//! A [`Resolver`] turns the body of the target into a [`Watcher`], which
//! reports membership changes as ordered batches of [`Update`]s. A
//! [`RoundRobinBalancer`] applies them to its set of [`Client`]s from a
//! background task and hands out the available ones in turn.

mod address;
mod balancer;
mod breaker;
mod client;
mod dns_resolver;
mod error;
#[cfg(feature = "etcd")]
mod etcd;
mod health;
mod helper;
mod key_value_store;
mod lookup_service;
mod metrics;
mod resolver;
mod retry;
mod service_definition;
mod target;
mod watcher;

pub use address::*;
pub use balancer::*;
pub use breaker::*;
pub use client::*;
pub use dns_resolver::*;
pub use error::*;
#[cfg(feature = "etcd")]
pub use etcd::*;
pub use health::*;
pub use helper::*;
pub use key_value_store::*;
pub use lookup_service::*;
pub use metrics::*;
pub use resolver::*;
pub use retry::*;
pub use service_definition::*;
pub use target::Target;
pub use watcher::*;
