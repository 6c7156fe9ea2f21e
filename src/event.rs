//! Maps cluster object deltas to the closed set of cluster events the
//! queue understands, and binding object deltas to admission decisions.

use std::collections::HashSet;

use crate::models::{Binding, Cluster};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterEvent {
    ClusterTaintsChanged,
    ClusterAPIEnablementChanged,
    ClusterFieldChanged,
    ClusterLabelChanged,
    ClusterResourceSummaryChanged,
    /// Time-based; generated by the queue's rescue flusher, never by an
    /// object delta.
    UnschedulableTimeout,
}

impl ClusterEvent {
    /// Plugin names this event revives unschedulable bindings for.
    /// `UnschedulableTimeout` always revives regardless of plugin set; the
    /// queue special-cases that rather than consulting this table.
    pub fn plugin_set(self) -> HashSet<&'static str> {
        match self {
            ClusterEvent::ClusterAPIEnablementChanged => ["apienablement"].into_iter().collect(),
            ClusterEvent::ClusterFieldChanged => {
                ["spreadconstraint", "clusteraffinity"].into_iter().collect()
            }
            ClusterEvent::ClusterTaintsChanged => ["tainttoleration"].into_iter().collect(),
            ClusterEvent::ClusterLabelChanged => ["clusteraffinity"].into_iter().collect(),
            ClusterEvent::ClusterResourceSummaryChanged => HashSet::new(),
            ClusterEvent::UnschedulableTimeout => HashSet::new(),
        }
    }
}

/// Classifies an (old, new) cluster pair into at most one event, in
/// declared precedence order. The first applicable rule wins; others are
/// discarded. Returns `None` when nothing relevant changed (suppresses
/// wake-up).
pub fn classify_cluster_event(old: &Cluster, new: &Cluster) -> Option<ClusterEvent> {
    if old.taints != new.taints {
        return Some(ClusterEvent::ClusterTaintsChanged);
    }
    if old.api_enablements != new.api_enablements {
        return Some(ClusterEvent::ClusterAPIEnablementChanged);
    }
    if old.region != new.region || old.zone != new.zone || old.provider != new.provider {
        return Some(ClusterEvent::ClusterFieldChanged);
    }
    if old.labels != new.labels {
        return Some(ClusterEvent::ClusterLabelChanged);
    }
    if old.resource_summary != new.resource_summary {
        return Some(ClusterEvent::ClusterResourceSummaryChanged);
    }
    None
}

/// Admission predicate for the binding event stream: only bindings whose
/// scheduler name matches and which carry a propagation-policy label are
/// handed to the queue.
pub fn classify_binding_admission(
    binding: &Binding,
    configured_scheduler_name: &str,
    propagation_policy_label_keys: &[&str],
) -> bool {
    if binding.scheduler_name != configured_scheduler_name {
        return false;
    }
    propagation_policy_label_keys
        .iter()
        .any(|key| binding.labels.contains_key(*key))
}
