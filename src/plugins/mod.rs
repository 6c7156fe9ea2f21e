//! Scheduler plugins.
//!
//! Phase names and the `Status`/`Code` vocabulary follow the Kubernetes
//! scheduler framework, generalized from pods/nodes to bindings/clusters.
//! Reserve/Permit/Bind phases aren't part of this core — the worker loop
//! writes the scheduling decision straight to the external store rather
//! than running a binding cycle.

pub mod api_enablement;
pub mod cluster_affinity;
pub mod cluster_evicted;
pub mod priority_sort;
pub mod spread_constraint;
pub mod taint_toleration;

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;

use crate::cycle_state::CycleState;
use crate::models::{Binding, Cluster};

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
}

/// Plugin called before a binding is admitted to the active queue. Must be
/// lightweight.
pub trait PreEnqueuePlugin: Plugin {
    fn pre_enqueue(&self, binding: &Binding) -> Status;
}

/// Orders bindings in the activeQ. Only one queue-sort plugin is active at
/// a time.
pub trait QueueSortPlugin: Plugin {
    fn less(&self, a: &crate::queue::QueuedBinding, b: &crate::queue::QueuedBinding) -> std::cmp::Ordering;
}

pub struct ClusterEventWithHint {
    pub event: crate::event::ClusterEvent,
    /// Signals whether this event can make a binding, previously rejected
    /// by this plugin, schedulable again. Consulted before a binding moves
    /// from unschedulable to backoff/active. An error is treated as
    /// `Queue`, erring towards not stranding the binding.
    pub queueing_hint_fn:
        Option<Arc<dyn Fn(&Binding, &EventInner) -> Result<QueueingHint, String> + Send + Sync>>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ActionType: u32 {
        const ADD = 1;
        const DELETE = 1 << 1;
        const UPDATE_CLUSTER_LABEL = 1 << 2;
        const UPDATE_CLUSTER_TAINT = 1 << 3;
        const UPDATE_BINDING_LABEL = 1 << 4;
        const UPDATE_BINDING_TOLERATION = 1 << 5;
        const UPDATE_CLUSTER_ALLOCATABLE = 1 << 6;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventResource {
    Binding,
    Cluster,
}

#[derive(Clone)]
pub enum EventInner {
    Binding(Option<Binding>, Option<Binding>),
    Cluster(Option<Cluster>, Cluster),
}

pub enum QueueingHint {
    Skip,
    Queue,
}

/// Plugins implement this to register for the cluster/binding events that
/// should wake a binding they previously rejected.
pub trait EnqueueExtension: Plugin {
    fn events_to_register(&self) -> Vec<ClusterEventWithHint>;
}

pub struct PreFilterResult {
    pub cluster_names: Option<Vec<String>>,
}

pub trait PreFilterPlugin: Plugin {
    fn pre_filter(&self, state: &mut CycleState, binding: &Binding, clusters: &[Cluster]) -> (PreFilterResult, Status);
}

/// `(context, placement, bindingSpec, cluster) -> Result`. Must be
/// side-effect free.
pub trait FilterPlugin: Plugin {
    fn filter(&self, state: &mut CycleState, binding: &Binding, cluster: &Cluster) -> Status;
}

#[derive(Clone, Default)]
pub struct ClusterToStatus {
    pub by_cluster: HashMap<String, Status>,
}

pub trait PostFilterPlugin: Plugin {
    fn post_filter(
        &self,
        state: &mut CycleState,
        binding: &Binding,
        filtered_cluster_status: &ClusterToStatus,
    ) -> Status;
}

pub trait PreScorePlugin: Plugin {
    fn pre_score(&self, state: &mut CycleState, binding: &Binding, clusters: &[Cluster]) -> Status;
}

pub trait ScorePlugin: Plugin {
    fn score(&self, state: &CycleState, binding: &Binding, cluster: &Cluster) -> (i64, Status);

    fn normalize_scores(&self, _state: &CycleState, _binding: &Binding, scores: &mut [(String, i64)]) -> Status {
        let max = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
        if max > 0 {
            for (_, score) in scores.iter_mut() {
                *score = *score * 100 / max;
            }
        }
        Status::default()
    }
}

#[derive(Clone)]
pub struct Status {
    pub code: Code,
    pub reasons: Vec<String>,
    pub plugin: String,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            code: Code::Success,
            reasons: vec![],
            plugin: String::new(),
        }
    }
}

impl Status {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn unschedulable(plugin: &str, reason: impl Into<String>) -> Self {
        Self {
            code: Code::Unschedulable,
            reasons: vec![reason.into()],
            plugin: plugin.to_string(),
        }
    }

    pub fn error(plugin: &str, reason: impl Into<String>) -> Self {
        Self {
            code: Code::Error,
            reasons: vec![reason.into()],
            plugin: plugin.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.code, Code::Success | Code::Skip)
    }
}

/// Status code returned from a plugin phase.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Code {
    /// Plugin ran correctly and found the binding schedulable on this
    /// cluster.
    Success,
    /// Internal plugin error or unexpected input — not an expected
    /// rejection. The binding is requeued without recording unschedulable
    /// plugins.
    Error,
    /// A plugin found the binding unschedulable on this cluster.
    Unschedulable,
    /// Like `Unschedulable`, but no postFilter action would change the
    /// outcome.
    UnschedulableAndUnresolvable,
    /// Bypasses the coupled Filter/Score plugin for this cycle.
    Skip,
    /// Scheduling finished but the plugin wants to stop the cycle here,
    /// without a backoff penalty.
    Pending,
}

/// Registry of enabled plugins: the five filter/score plugins wired for
/// binding-to-cluster scheduling, plus the default queue-sort plugin.
#[derive(Clone)]
pub struct Registry {
    pub pre_enqueue: Vec<Arc<dyn PreEnqueuePlugin>>,
    pub queue_sort: Arc<dyn QueueSortPlugin>,
    pub pre_filter: Vec<Arc<dyn PreFilterPlugin>>,
    pub filter: Vec<Arc<dyn FilterPlugin>>,
    pub post_filter: Vec<Arc<dyn PostFilterPlugin>>,
    pub pre_score: Vec<Arc<dyn PreScorePlugin>>,
    pub score: Vec<Arc<dyn ScorePlugin>>,
    pub enqueue_extensions: Vec<Arc<dyn EnqueueExtension>>,
}

impl Default for Registry {
    fn default() -> Self {
        let cluster_affinity: Arc<cluster_affinity::ClusterAffinity> = Arc::new(cluster_affinity::ClusterAffinity);
        let taint_toleration: Arc<taint_toleration::TaintToleration> = Arc::new(taint_toleration::TaintToleration);
        let api_enablement: Arc<api_enablement::ApiEnablement> = Arc::new(api_enablement::ApiEnablement);
        let spread_constraint: Arc<spread_constraint::SpreadConstraint> = Arc::new(spread_constraint::SpreadConstraint);
        let cluster_evicted: Arc<cluster_evicted::ClusterEvicted> = Arc::new(cluster_evicted::ClusterEvicted);

        Self {
            pre_enqueue: vec![],
            queue_sort: Arc::new(priority_sort::PrioritySort),
            pre_filter: vec![cluster_affinity.clone()],
            filter: vec![
                api_enablement.clone(),
                taint_toleration.clone(),
                cluster_affinity.clone(),
                cluster_evicted,
                spread_constraint.clone(),
            ],
            post_filter: vec![],
            pre_score: vec![spread_constraint.clone(), taint_toleration.clone()],
            score: vec![spread_constraint, taint_toleration.clone()],
            enqueue_extensions: vec![cluster_affinity, taint_toleration, api_enablement],
        }
    }
}
