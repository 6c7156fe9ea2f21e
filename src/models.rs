//! Core data model: bindings, clusters, placements, and the queue's
//! internal wrapper around a binding.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::replica::ReplicaSchedulingStrategy;

/// Fixed order of resource names the resource-modeling index compares
/// signatures over. `cpu` is the primary resource used for grade bucketing.
pub const RESOURCE_NAMES: [&str; 4] = ["cpu", "memory", "storage", "ephemeral-storage"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
    pub storage_bytes: u64,
    pub ephemeral_storage_bytes: u64,
}

impl ResourceRequest {
    /// Returns the quantity for a resource name in `RESOURCE_NAMES` order.
    /// Unknown names default to zero; the caller is expected to log this.
    pub fn quantity(&self, name: &str) -> Option<u64> {
        match name {
            "cpu" => Some(self.cpu_millis),
            "memory" => Some(self.memory_bytes),
            "storage" => Some(self.storage_bytes),
            "ephemeral-storage" => Some(self.ephemeral_storage_bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub api_version: String,
    pub kind: String,
    pub replicas: u32,
    pub resource_request: ResourceRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: TaintEffect,
    /// Only meaningful for `NoExecute`.
    pub time_added: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TolerationOperator {
    Exists,
    Equal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toleration {
    pub key: Option<String>,
    pub operator: TolerationOperator,
    pub value: Option<String>,
    pub effect: Option<TaintEffect>,
    pub toleration_seconds: Option<i64>,
}

impl Toleration {
    /// Whether this toleration tolerates `taint`. An empty key with
    /// `Exists` tolerates everything.
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect
            && effect != taint.effect
        {
            return false;
        }
        match &self.key {
            None => true,
            Some(key) if key == &taint.key => match self.operator {
                TolerationOperator::Exists => true,
                TolerationOperator::Equal => self.value.as_deref() == Some(taint.value.as_str()),
            },
            Some(_) => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelector {
    pub region: Option<String>,
    pub zone: Option<String>,
    pub provider: Option<String>,
}

impl FieldSelector {
    pub fn matches(&self, cluster: &Cluster) -> bool {
        self.region.as_ref().is_none_or(|r| Some(r) == cluster.region.as_ref())
            && self.zone.as_ref().is_none_or(|z| Some(z) == cluster.zone.as_ref())
            && self
                .provider
                .as_ref()
                .is_none_or(|p| Some(p) == cluster.provider.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAffinity {
    pub cluster_names: Vec<String>,
    pub exclude_cluster_names: Vec<String>,
    pub label_selector: Option<LabelSelector>,
    pub field_selector: Option<FieldSelector>,
}

impl ClusterAffinity {
    pub fn matches(&self, cluster: &Cluster) -> bool {
        if self.exclude_cluster_names.iter().any(|n| n == &cluster.name) {
            return false;
        }
        if !self.cluster_names.is_empty() && !self.cluster_names.iter().any(|n| n == &cluster.name) {
            return false;
        }
        if let Some(sel) = &self.label_selector
            && !sel.matches(&cluster.labels)
        {
            return false;
        }
        if let Some(sel) = &self.field_selector
            && !sel.matches(cluster)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpreadFieldType {
    Region,
    Zone,
    Provider,
    Cluster,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadConstraint {
    pub spread_by_field: SpreadFieldType,
    pub max_groups: u32,
    pub min_groups: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Placement {
    /// Single affinity. Mutually usable alongside `cluster_affinities`;
    /// when both are empty every cluster is a candidate.
    pub cluster_affinity: Option<ClusterAffinity>,
    /// Ordered list of alternative affinities. `BindingStatus::scheduler_observed_affinity_name`
    /// tracks which one is currently in effect.
    pub cluster_affinities: Vec<(String, ClusterAffinity)>,
    pub cluster_tolerations: Vec<Toleration>,
    pub spread_constraints: Vec<SpreadConstraint>,
    pub replica_scheduling: Option<ReplicaSchedulingStrategy>,
}

impl PartialEq for Placement {
    fn eq(&self, other: &Self) -> bool {
        self.cluster_affinity == other.cluster_affinity
            && self.cluster_affinities == other.cluster_affinities
            && self.cluster_tolerations == other.cluster_tolerations
            && self.spread_constraints == other.spread_constraints
    }
}
impl Eq for Placement {}

impl Placement {
    /// Resolves the effective affinity given the binding's observed-affinity
    /// cursor, per the `ClusterAffinities[observedAffinityName]` rule.
    pub fn effective_affinity(&self, observed_affinity_name: &str) -> Option<&ClusterAffinity> {
        if let Some(direct) = &self.cluster_affinity {
            return Some(direct);
        }
        self.cluster_affinities
            .iter()
            .find(|(name, _)| name == observed_affinity_name)
            .map(|(_, affinity)| affinity)
            .or_else(|| self.cluster_affinities.first().map(|(_, a)| a))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedStatusItem {
    pub cluster_name: String,
    pub health: ClusterHealth,
    pub applied: bool,
}

/// One cluster the scheduler has decided to place this binding's replicas
/// on, and how many.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCluster {
    pub name: String,
    pub replicas: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictedCluster {
    pub cluster_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GracefulEvictionTask {
    pub cluster_name: String,
    pub producer: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingStatus {
    pub scheduler_observed_affinity_name: String,
    pub aggregated_status: Vec<AggregatedStatusItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingSpec {
    pub placement: Placement,
    pub resource: ResourceDescriptor,
    pub clusters: Vec<TargetCluster>,
    pub evicted_clusters: Vec<EvictedCluster>,
    pub graceful_eviction_tasks: Vec<GracefulEvictionTask>,
}

impl Default for ResourceDescriptor {
    fn default() -> Self {
        Self {
            api_version: String::new(),
            kind: String::new(),
            replicas: 0,
            resource_request: ResourceRequest::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub namespace: String,
    pub name: String,
    pub scheduler_name: String,
    pub labels: BTreeMap<String, String>,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub spec: BindingSpec,
    pub status: BindingStatus,
}

impl Binding {
    /// `name + "_" + namespace`, the queue's identity key.
    pub fn key(&self) -> String {
        format!("{}_{}", self.name, self.namespace)
    }

    pub fn is_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiEnablement {
    pub group_version: String,
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub allocatable: ResourceRequestSummary,
    pub allocating: ResourceRequestSummary,
    pub allocated: ResourceRequestSummary,
    pub node_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequestSummary {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

/// One configured grade band: nodes whose primary-resource quantity is at
/// least `lower_bound` (and less than the next grade's bound) fall here.
/// The last grade is unbounded above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceModelGrade {
    pub lower_bound: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub region: Option<String>,
    pub zone: Option<String>,
    pub provider: Option<String>,
    pub taints: Vec<Taint>,
    pub api_enablements: Vec<ApiEnablement>,
    pub resource_summary: ResourceSummary,
    pub resource_model: Vec<ResourceModelGrade>,
    /// Grace period an evicted-cluster record referencing this cluster is
    /// retained before the health controller's sweep drops it. Zero means
    /// retain indefinitely.
    pub cluster_evicted_seconds: u64,
}

impl Cluster {
    /// A placement's cluster-level tolerations must tolerate every
    /// `NoSchedule`/`NoExecute` taint on the cluster for it to remain a
    /// candidate.
    pub fn untolerated_taint<'a>(&'a self, tolerations: &[Toleration]) -> Option<&'a Taint> {
        self.taints.iter().find(|taint| {
            matches!(taint.effect, TaintEffect::NoSchedule | TaintEffect::NoExecute)
                && !tolerations.iter().any(|t| t.tolerates(taint))
        })
    }
}

/// Set of plugin names that rejected a binding on its last scheduling
/// attempt. Revives the binding when it intersects an incoming cluster
/// event's plugin set.
pub type UnschedulablePlugins = HashSet<String>;
