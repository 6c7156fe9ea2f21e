//! The scheduler worker loop: pops a binding, runs it through the filter
//! and score pipelines against every candidate cluster, divides replicas
//! across the survivors, and writes the decision back out.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::cycle_state::CycleState;
use crate::error::{FitError, SchedulerError};
use crate::event::{self, ClusterEvent};
use crate::models::{Binding, Cluster, TargetCluster};
use crate::plugins::{ClusterToStatus, Code, Registry, Status};
use crate::queue::SchedulingQueue;
use crate::replica;
use crate::store::{BindingStore, ClusterStore, EstimatorNotifier, EventRecorder, MetricsSink};

pub struct Scheduler {
    pub queue: Arc<SchedulingQueue>,
    registry: Registry,
    config: SchedulerConfig,
    binding_store: Arc<dyn BindingStore>,
    cluster_store: Arc<dyn ClusterStore>,
    event_recorder: Arc<dyn EventRecorder>,
    estimator_notifier: Arc<dyn EstimatorNotifier>,
    metrics: Arc<dyn MetricsSink>,
}

impl Scheduler {
    pub fn new(
        queue: Arc<SchedulingQueue>,
        registry: Registry,
        config: SchedulerConfig,
        binding_store: Arc<dyn BindingStore>,
        cluster_store: Arc<dyn ClusterStore>,
        event_recorder: Arc<dyn EventRecorder>,
        estimator_notifier: Arc<dyn EstimatorNotifier>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            queue,
            registry,
            config,
            binding_store,
            cluster_store,
            event_recorder,
            estimator_notifier,
            metrics,
        }
    }

    /// Spawns the queue's flushers and the scheduling loop. Runs until the
    /// queue is closed.
    pub fn run(self: Arc<Self>) {
        self.queue.clone().run();
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                match scheduler.schedule_one().await {
                    Ok(()) => {}
                    Err(SchedulerError::QueueClosed) => return,
                    Err(err) => log::error!("scheduling cycle failed: {err}"),
                }
            }
        });
    }

    /// Only meant for use by inbound informer-style callbacks, not the
    /// worker loop itself.
    pub async fn on_binding_admitted(&self, binding: Binding) {
        if !event::classify_binding_admission(
            &binding,
            &self.config.scheduler_name,
            &["PropagationPolicyName", "ClusterPropagationPolicy"],
        ) {
            return;
        }
        self.queue.add(binding).await;
    }

    pub async fn on_binding_updated(&self, old: &Binding, new: Binding) {
        self.queue.update(old, new).await;
    }

    pub async fn on_binding_deleted(&self, binding: &Binding) {
        self.queue.delete(&binding.key()).await;
    }

    pub async fn on_cluster_add(&self, cluster: &Cluster) {
        if self.config.enable_scheduler_estimator {
            self.estimator_notifier.notify(&cluster.name).await;
        }
        self.queue
            .move_all_to_active_or_backoff(ClusterEvent::ClusterResourceSummaryChanged, None)
            .await;
    }

    pub async fn on_cluster_update(&self, old: &Cluster, new: &Cluster) {
        if self.config.enable_scheduler_estimator {
            self.estimator_notifier.notify(&new.name).await;
        }
        if let Some(event) = event::classify_cluster_event(old, new) {
            self.queue
                .move_all_to_active_or_backoff(
                    event,
                    Some(&|b: &Binding| new.untolerated_taint(&b.spec.placement.cluster_tolerations).is_none()),
                )
                .await;
        }
    }

    pub async fn on_cluster_delete(&self, cluster_name: &str) {
        if self.config.enable_scheduler_estimator {
            self.estimator_notifier.notify(cluster_name).await;
        }
    }

    async fn schedule_one(&self) -> Result<(), SchedulerError> {
        let (queued, cycle) = self.queue.pop().await?;
        let binding = queued.binding.clone();

        let current = self.binding_store.get(&binding.namespace, &binding.name).await?;
        let Some(current) = current else {
            return Ok(());
        };
        if current.is_deleted() {
            return Ok(());
        }

        let clusters = self.cluster_store.list().await?;
        let mut state = CycleState::default();

        match self.run_pipeline(&current, &clusters, &mut state) {
            Ok(targets) => {
                self.metrics.count_scheduler_binding("schedule_success").await;
                self.event_recorder
                    .record(
                        "scheduler",
                        "Scheduled",
                        &format!("binding {} scheduled to {} cluster(s)", binding.key(), targets.len()),
                    )
                    .await;
                let mut updated = current;
                updated.spec.clusters = targets;
                self.binding_store.update_spec(&updated).await?;
            }
            Err((fit_error, failing_plugins)) => {
                self.metrics.count_scheduler_binding("schedule_failure").await;
                self.event_recorder
                    .record("scheduler", "FailedScheduling", &fit_error.to_string())
                    .await;
                let mut queued = queued;
                queued.unschedulable_plugins = failing_plugins;
                self.queue.add_unschedulable_if_not_present(queued, cycle).await;
            }
        }
        Ok(())
    }

    /// Runs PreFilter → Filter → (on success) PreScore → Score → replica
    /// division. Returns the scheduling decision, or a `FitError` describing
    /// why no cluster fit.
    fn run_pipeline(
        &self,
        binding: &Binding,
        clusters: &[Cluster],
        state: &mut CycleState,
    ) -> Result<Vec<TargetCluster>, (FitError, HashSet<String>)> {
        let mut candidates: Vec<&Cluster> = clusters.iter().collect();

        for plugin in &self.registry.pre_filter {
            let (result, status) = plugin.pre_filter(state, binding, clusters);
            if status.code == Code::Skip {
                continue;
            }
            if let Some(names) = result.cluster_names {
                candidates.retain(|c| names.contains(&c.name));
            }
        }

        let mut by_cluster = ClusterToStatus::default();
        let mut passing: Vec<&Cluster> = Vec::new();
        for cluster in candidates {
            let mut status = Status::success();
            for plugin in &self.registry.filter {
                let result = plugin.filter(state, binding, cluster);
                if !result.is_success() {
                    status = result;
                    break;
                }
            }
            if status.is_success() {
                passing.push(cluster);
            } else if status.code == Code::Error {
                log::warn!(
                    "plugin {} errored filtering cluster {}: {:?}",
                    status.plugin,
                    cluster.name,
                    status.reasons
                );
            } else {
                by_cluster.by_cluster.insert(cluster.name.clone(), status);
            }
        }

        if passing.is_empty() {
            let failing_plugins: HashSet<String> = by_cluster
                .by_cluster
                .values()
                .map(|s| s.plugin.clone())
                .collect();
            return Err((self.build_fit_error(clusters.len(), &by_cluster), failing_plugins));
        }

        for plugin in &self.registry.pre_score {
            plugin.pre_score(state, binding, clusters);
        }

        let mut scores: HashMap<String, i64> = HashMap::new();
        for plugin in &self.registry.score {
            let mut plugin_scores: Vec<(String, i64)> = passing
                .iter()
                .map(|c| {
                    let (score, _) = plugin.score(state, binding, c);
                    (c.name.clone(), score)
                })
                .collect();
            plugin.normalize_scores(state, binding, &mut plugin_scores);
            for (name, score) in plugin_scores {
                *scores.entry(name).or_insert(0) += score;
            }
        }

        let scored: Vec<(String, i64)> = passing
            .iter()
            .map(|c| (c.name.clone(), scores.get(&c.name).copied().unwrap_or(0)))
            .collect();

        let available_capacity: HashMap<String, u64> = passing
            .iter()
            .map(|c| {
                let summary = &c.resource_summary;
                let headroom = summary
                    .allocatable
                    .cpu_millis
                    .saturating_sub(summary.allocated.cpu_millis)
                    .saturating_sub(summary.allocating.cpu_millis);
                (c.name.clone(), headroom)
            })
            .collect();

        let strategy = binding
            .spec
            .placement
            .replica_scheduling
            .clone()
            .unwrap_or(replica::ReplicaSchedulingStrategy::Duplicated);
        let total = binding.spec.resource.replicas;
        let divided = replica::divide(&strategy, total, &scored, &available_capacity);

        Ok(divided
            .into_iter()
            .map(|(name, replicas)| TargetCluster { name, replicas })
            .collect())
    }

    fn build_fit_error(&self, num_candidates: usize, by_cluster: &ClusterToStatus) -> FitError {
        let mut reason_histogram: BTreeMap<String, usize> = BTreeMap::new();
        for status in by_cluster.by_cluster.values() {
            for reason in &status.reasons {
                *reason_histogram.entry(reason.clone()).or_insert(0) += 1;
            }
        }
        FitError {
            num_candidates,
            reason_histogram,
        }
    }
}
