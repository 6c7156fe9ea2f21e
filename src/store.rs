//! External-collaborator ports. Nothing in this crate implements these
//! against a concrete backend — the object store, event bus, estimator
//! service, and metrics backend are all out of scope, same as the informer
//! infrastructure the queue's event stream assumes.

use async_trait::async_trait;

use crate::error::SchedulerError;
use crate::models::{Binding, BindingStatus, Cluster};

#[async_trait]
pub trait BindingStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Binding>, SchedulerError>;
    async fn update_spec(&self, binding: &Binding) -> Result<(), SchedulerError>;
    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: BindingStatus,
    ) -> Result<(), SchedulerError>;
}

#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Cluster>, SchedulerError>;
    async fn list(&self) -> Result<Vec<Cluster>, SchedulerError>;
}

#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, component: &str, reason: &str, message: &str);
}

/// Notified whenever a cluster is added, updated, or removed, so an external
/// scheduler-estimator service can refresh its per-cluster capacity cache.
/// Mirrors `schedulerEstimatorWorker.Add(...)` in the event handler this is
/// grounded on.
#[async_trait]
pub trait EstimatorNotifier: Send + Sync {
    async fn notify(&self, cluster_name: &str);
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn count_scheduler_binding(&self, event: &str);
}
