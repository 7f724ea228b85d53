//! Broker Cluster API Client
//!
//! The broker is a plain Kubernetes API server shared by every member
//! cluster of the cluster set. Each member pushes its aggregated artifacts
//! (ServiceImports and exported EndpointSlices) to the broker under the
//! artifact's original namespace, and pulls the other members' artifacts
//! back out. Namespace partitioning on the broker is what keeps two
//! identically named services in different namespaces from colliding.
//!
//! ServiceImport writes go through a conditional replace keyed on
//! resourceVersion, so independently reconciling clusters merging their
//! contributions never clobber each other; a lost race surfaces as
//! [`BrokerError::Conflict`] and the caller re-reads and retries.

mod broker_trait;
mod client;
mod error;
#[cfg(feature = "test-util")]
mod mock;

pub use broker_trait::BrokerClientTrait;
pub use client::KubeBrokerClient;
pub use error::BrokerError;
#[cfg(feature = "test-util")]
pub use mock::MockBrokerClient;
