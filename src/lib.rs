//! Multi-cluster workload scheduling core.
//!
//! Mirrors a Kubernetes scheduler-framework design one level up: instead of
//! binding pods to nodes within one cluster, this crate binds federated
//! workloads ("bindings") to member clusters, dividing replicas across
//! however many clusters the filter/score pipeline leaves standing.

pub mod config;
pub mod cycle_state;
pub mod error;
pub mod event;
pub mod health;
pub mod metrics;
pub mod models;
pub mod plugins;
pub mod queue;
pub mod replica;
pub mod resource_model;
pub mod store;
pub mod worker;
