//! Tracks per-cluster workload health reported back on a binding's
//! aggregated status, and evicts clusters whose workload has stayed
//! unhealthy past the toleration window.
//!
//! Generalizes `original_source/pkg/controllers/health/health_controller.go`'s
//! `SyncBinding`/`evictBinding`/`cleanupExpiredCluster`. The controller-runtime
//! reconcile loop and its `ResourceBinding` predicate aren't reproduced here —
//! only the per-binding health bookkeeping `reconcile` performs is in scope.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::models::{Binding, ClusterHealth, EvictedCluster, GracefulEvictionTask};
use crate::store::{ClusterStore, EventRecorder};

const PRODUCER: &str = "health-controller";
const REASON_WORKLOAD_UNHEALTHY: &str = "WorkloadUnhealthy";
const EVENT_REASON_CLUSTER_EVICTION: &str = "ClusterEviction";

/// How long a cluster has been observed unhealthy for a given binding. Keyed
/// by `Binding::key()` rather than a resource identity, since this crate's
/// `Binding` carries no separate target-resource key to construct one from.
type UnhealthySince = HashMap<String, chrono::DateTime<Utc>>;

pub struct HealthController {
    unhealthy_since: HashMap<String, UnhealthySince>,
    unhealthy_toleration: Duration,
    graceful_eviction: bool,
}

impl HealthController {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            unhealthy_since: HashMap::new(),
            unhealthy_toleration: Duration::from_secs(config.unhealthy_toleration_secs),
            graceful_eviction: config.graceful_eviction,
        }
    }

    /// Drops bookkeeping for a deleted binding.
    pub fn on_binding_deleted(&mut self, binding: &Binding) {
        self.unhealthy_since.remove(&binding.key());
    }

    /// Reconciles one binding's aggregated status: records newly-unhealthy
    /// clusters, evicts clusters that have stayed unhealthy past the
    /// toleration window, and clears eviction records whose cluster grace
    /// period has expired. Returns how long until this binding should be
    /// reconciled again, if any cluster is still within a toleration or
    /// eviction-expiry window.
    pub async fn reconcile(
        &mut self,
        binding: &mut Binding,
        cluster_store: &dyn ClusterStore,
        event_recorder: &dyn EventRecorder,
    ) -> Result<Option<Duration>, SchedulerError> {
        if binding.is_deleted() {
            self.on_binding_deleted(binding);
            return Ok(None);
        }

        let key = binding.key();
        let mut unhealthy = self.unhealthy_since.remove(&key).unwrap_or_default();
        let mut need_evict = Vec::new();
        let mut all_clusters = HashSet::new();
        let mut need_second_detection = false;

        for item in &binding.status.aggregated_status {
            all_clusters.insert(item.cluster_name.clone());
            match item.health {
                ClusterHealth::Unknown => continue,
                ClusterHealth::Unhealthy => match unhealthy.entry(item.cluster_name.clone()) {
                    Entry::Vacant(entry) => {
                        entry.insert(Utc::now());
                        need_second_detection = true;
                    }
                    Entry::Occupied(entry) => {
                        let since = *entry.get();
                        let tolerated = chrono::Duration::from_std(self.unhealthy_toleration)
                            .unwrap_or(chrono::Duration::zero());
                        if Utc::now() > since + tolerated && !cluster_already_evicted(binding, &item.cluster_name) {
                            need_evict.push(item.cluster_name.clone());
                        }
                    }
                },
                ClusterHealth::Healthy => {
                    unhealthy.remove(&item.cluster_name);
                }
            }
        }

        self.evict_binding(binding, &need_evict);
        if !self.graceful_eviction {
            for cluster in &need_evict {
                event_recorder
                    .record(
                        PRODUCER,
                        EVENT_REASON_CLUSTER_EVICTION,
                        &format!("evicted cluster {cluster} from binding {} ({REASON_WORKLOAD_UNHEALTHY})", binding.key()),
                    )
                    .await;
            }
        }
        let (mut duration, _changed) = self.cleanup_expired_clusters(binding, cluster_store).await?;

        unhealthy.retain(|cluster, _| all_clusters.contains(cluster));
        self.unhealthy_since.insert(key, unhealthy);

        if need_second_detection {
            duration = Some(duration.map_or(self.unhealthy_toleration, |d| d.max(self.unhealthy_toleration)));
        }
        Ok(duration)
    }

    fn evict_binding(&self, binding: &mut Binding, clusters: &[String]) {
        for cluster in clusters {
            if self.graceful_eviction {
                binding.spec.graceful_eviction_tasks.push(GracefulEvictionTask {
                    cluster_name: cluster.clone(),
                    producer: PRODUCER.to_string(),
                    reason: REASON_WORKLOAD_UNHEALTHY.to_string(),
                    created_at: Utc::now(),
                });
            } else {
                binding.spec.clusters.retain(|target| &target.name != cluster);
            }
            binding.spec.evicted_clusters.push(EvictedCluster {
                cluster_name: cluster.clone(),
                created_at: Utc::now(),
            });
        }
    }

    /// Drops eviction records whose cluster grace period has expired, and
    /// reports the shortest remaining grace period among those that haven't.
    async fn cleanup_expired_clusters(
        &self,
        binding: &mut Binding,
        cluster_store: &dyn ClusterStore,
    ) -> Result<(Option<Duration>, bool), SchedulerError> {
        let original_len = binding.spec.evicted_clusters.len();
        let mut kept = Vec::with_capacity(original_len);
        let mut min_remaining: Option<Duration> = None;

        for evicted in &binding.spec.evicted_clusters {
            let Some(cluster) = cluster_store.get(&evicted.cluster_name).await? else {
                continue;
            };
            if cluster.cluster_evicted_seconds == 0 {
                kept.push(evicted.clone());
                continue;
            }
            let timeout = chrono::Duration::seconds(cluster.cluster_evicted_seconds as i64);
            let expires_at = evicted.created_at + timeout;
            let now = Utc::now();
            if now > expires_at {
                continue;
            }
            let remaining = (expires_at - now).to_std().unwrap_or(Duration::ZERO);
            min_remaining = Some(min_remaining.map_or(remaining, |d| d.min(remaining)));
            kept.push(evicted.clone());
        }

        let changed = kept.len() != original_len;
        binding.spec.evicted_clusters = kept;
        Ok((min_remaining, changed))
    }
}

fn cluster_already_evicted(binding: &Binding, cluster_name: &str) -> bool {
    binding
        .spec
        .evicted_clusters
        .iter()
        .any(|e| e.cluster_name == cluster_name)
        || binding
            .spec
            .graceful_eviction_tasks
            .iter()
            .any(|t| t.cluster_name == cluster_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AggregatedStatusItem, BindingSpec, BindingStatus, Cluster, ResourceSummary};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct FakeClusterStore {
        clusters: Mutex<HashMap<String, Cluster>>,
    }

    #[async_trait]
    impl ClusterStore for FakeClusterStore {
        async fn get(&self, name: &str) -> Result<Option<Cluster>, SchedulerError> {
            Ok(self.clusters.lock().unwrap().get(name).cloned())
        }
        async fn list(&self) -> Result<Vec<Cluster>, SchedulerError> {
            Ok(self.clusters.lock().unwrap().values().cloned().collect())
        }
    }

    #[derive(Default)]
    struct FakeEventRecorder {
        recorded: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventRecorder for FakeEventRecorder {
        async fn record(&self, _component: &str, reason: &str, message: &str) {
            self.recorded.lock().unwrap().push(format!("{reason}: {message}"));
        }
    }

    fn cluster(name: &str, cluster_evicted_seconds: u64) -> Cluster {
        Cluster {
            name: name.to_string(),
            labels: BTreeMap::new(),
            region: None,
            zone: None,
            provider: None,
            taints: vec![],
            api_enablements: vec![],
            resource_summary: ResourceSummary::default(),
            resource_model: vec![],
            cluster_evicted_seconds,
        }
    }

    fn binding_with_health(items: Vec<(&str, ClusterHealth)>) -> Binding {
        Binding {
            namespace: "default".to_string(),
            name: "b1".to_string(),
            scheduler_name: "default-scheduler".to_string(),
            labels: BTreeMap::new(),
            deletion_timestamp: None,
            spec: BindingSpec::default(),
            status: BindingStatus {
                scheduler_observed_affinity_name: String::new(),
                aggregated_status: items
                    .into_iter()
                    .map(|(name, health)| AggregatedStatusItem {
                        cluster_name: name.to_string(),
                        health,
                        applied: true,
                    })
                    .collect(),
            },
        }
    }

    fn config(unhealthy_toleration_secs: u64, graceful: bool) -> SchedulerConfig {
        SchedulerConfig {
            scheduler_name: "default-scheduler".to_string(),
            binding_initial_backoff_secs: 1,
            binding_max_backoff_secs: 10,
            binding_max_in_unschedulable_secs: 300,
            unhealthy_toleration_secs,
            enable_scheduler_estimator: false,
            graceful_eviction: graceful,
        }
    }

    #[tokio::test]
    async fn first_unhealthy_observation_requests_second_detection_without_evicting() {
        let mut controller = HealthController::new(&config(30, false));
        let store = FakeClusterStore { clusters: Mutex::new(HashMap::new()) };
        let recorder = FakeEventRecorder::default();
        let mut binding = binding_with_health(vec![("c1", ClusterHealth::Unhealthy)]);

        let retry = controller.reconcile(&mut binding, &store, &recorder).await.unwrap();

        assert_eq!(retry, Some(Duration::from_secs(30)));
        assert!(binding.spec.evicted_clusters.is_empty());
        assert!(recorder.recorded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn healthy_report_clears_unhealthy_tracking() {
        let mut controller = HealthController::new(&config(30, false));
        let store = FakeClusterStore { clusters: Mutex::new(HashMap::new()) };
        let recorder = FakeEventRecorder::default();
        let mut binding = binding_with_health(vec![("c1", ClusterHealth::Unhealthy)]);
        controller.reconcile(&mut binding, &store, &recorder).await.unwrap();

        binding.status.aggregated_status[0].health = ClusterHealth::Healthy;
        controller.reconcile(&mut binding, &store, &recorder).await.unwrap();

        assert!(controller.unhealthy_since.get(&binding.key()).unwrap().is_empty());
    }

    /// Scenario: a binding targeting {c1, c2} whose c1 workload is reported
    /// unhealthy at t=0 and again past the toleration window ends up with
    /// c1 evicted exactly once and a ClusterEviction event recorded.
    #[tokio::test]
    async fn health_driven_eviction_evicts_once_and_emits_an_event() {
        let mut controller = HealthController::new(&config(0, false));
        let store = FakeClusterStore {
            clusters: Mutex::new(HashMap::from([("c1".to_string(), cluster("c1", 0))])),
        };
        let recorder = FakeEventRecorder::default();
        let mut binding = binding_with_health(vec![("c1", ClusterHealth::Unhealthy), ("c2", ClusterHealth::Healthy)]);
        binding.spec.clusters = vec![
            crate::models::TargetCluster { name: "c1".to_string(), replicas: 2 },
            crate::models::TargetCluster { name: "c2".to_string(), replicas: 2 },
        ];

        controller.reconcile(&mut binding, &store, &recorder).await.unwrap();
        controller.reconcile(&mut binding, &store, &recorder).await.unwrap();
        controller.reconcile(&mut binding, &store, &recorder).await.unwrap();

        assert_eq!(binding.spec.evicted_clusters.len(), 1);
        assert_eq!(binding.spec.evicted_clusters[0].cluster_name, "c1");
        assert_eq!(binding.spec.clusters.len(), 1);
        assert_eq!(binding.spec.clusters[0].name, "c2");
        assert_eq!(recorder.recorded.lock().unwrap().len(), 1);
        assert!(recorder.recorded.lock().unwrap()[0].starts_with("ClusterEviction:"));
    }

    #[tokio::test]
    async fn graceful_eviction_adds_task_instead_of_removing_cluster() {
        let mut controller = HealthController::new(&config(0, true));
        let store = FakeClusterStore {
            clusters: Mutex::new(HashMap::from([("c1".to_string(), cluster("c1", 0))])),
        };
        let recorder = FakeEventRecorder::default();
        let mut binding = binding_with_health(vec![("c1", ClusterHealth::Unhealthy)]);
        binding.spec.clusters = vec![crate::models::TargetCluster { name: "c1".to_string(), replicas: 2 }];

        controller.reconcile(&mut binding, &store, &recorder).await.unwrap();
        controller.reconcile(&mut binding, &store, &recorder).await.unwrap();

        assert_eq!(binding.spec.clusters.len(), 1);
        assert_eq!(binding.spec.graceful_eviction_tasks.len(), 1);
    }

    #[tokio::test]
    async fn expired_eviction_grace_period_is_dropped() {
        let mut controller = HealthController::new(&config(30, false));
        let store = FakeClusterStore {
            clusters: Mutex::new(HashMap::from([("c1".to_string(), cluster("c1", 60))])),
        };
        let recorder = FakeEventRecorder::default();
        let mut binding = binding_with_health(vec![]);
        binding.spec.evicted_clusters = vec![EvictedCluster {
            cluster_name: "c1".to_string(),
            created_at: Utc::now() - chrono::Duration::seconds(120),
        }];

        let retry = controller.reconcile(&mut binding, &store, &recorder).await.unwrap();

        assert!(binding.spec.evicted_clusters.is_empty());
        assert_eq!(retry, None);
    }

    #[tokio::test]
    async fn unexpired_eviction_reports_remaining_grace_period() {
        let mut controller = HealthController::new(&config(30, false));
        let store = FakeClusterStore {
            clusters: Mutex::new(HashMap::from([("c1".to_string(), cluster("c1", 60))])),
        };
        let recorder = FakeEventRecorder::default();
        let mut binding = binding_with_health(vec![]);
        binding.spec.evicted_clusters = vec![EvictedCluster {
            cluster_name: "c1".to_string(),
            created_at: Utc::now() - chrono::Duration::seconds(10),
        }];

        let retry = controller.reconcile(&mut binding, &store, &recorder).await.unwrap();

        assert!(binding.spec.evicted_clusters.len() == 1);
        let retry = retry.expect("should request a follow-up");
        assert!(retry.as_secs() <= 50 && retry.as_secs() >= 40);
    }

    #[tokio::test]
    async fn deleted_binding_clears_tracking_without_touching_evicted_clusters() {
        let mut controller = HealthController::new(&config(30, false));
        let store = FakeClusterStore { clusters: Mutex::new(HashMap::new()) };
        let recorder = FakeEventRecorder::default();
        let mut binding = binding_with_health(vec![("c1", ClusterHealth::Unhealthy)]);
        controller.reconcile(&mut binding, &store, &recorder).await.unwrap();
        binding.deletion_timestamp = Some(Utc::now());

        let retry = controller.reconcile(&mut binding, &store, &recorder).await.unwrap();

        assert_eq!(retry, None);
        assert!(controller.unhealthy_since.get(&binding.key()).is_none());
    }
}
