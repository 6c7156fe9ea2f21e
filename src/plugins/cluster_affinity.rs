//! Filters and scores clusters against a binding's placement affinity.
//!
//! A binding resolves one effective affinity via
//! `Placement::effective_affinity`, cursored by
//! `BindingStatus::scheduler_observed_affinity_name`; this plugin only
//! consults that single resolved affinity, never the whole
//! `cluster_affinities` list.

use crate::cycle_state::CycleState;
use crate::event::ClusterEvent;
use crate::models::{Binding, Cluster, ClusterAffinity as ClusterAffinityRule};
use crate::plugins::{
    ActionType, ClusterEventWithHint, Code, EnqueueExtension, EventInner, EventResource,
    FilterPlugin, Plugin, PreFilterPlugin, PreFilterResult, QueueingHint, Status,
};

pub struct ClusterAffinity;

const PRE_FILTER_KEY: &str = "clusteraffinity/requiredAffinity";
const ERR_REASON: &str = "cluster(s) didn't match the binding's cluster affinity/selector";

impl Plugin for ClusterAffinity {
    fn name(&self) -> &str {
        "clusteraffinity"
    }
}

struct PreFilterState {
    affinity: Option<ClusterAffinityRule>,
}

impl PreFilterPlugin for ClusterAffinity {
    fn pre_filter(&self, state: &mut CycleState, binding: &Binding, _clusters: &[Cluster]) -> (PreFilterResult, Status) {
        let affinity = binding
            .spec
            .placement
            .effective_affinity(&binding.status.scheduler_observed_affinity_name)
            .cloned();
        if affinity.is_none() {
            return (
                PreFilterResult { cluster_names: None },
                Status {
                    code: Code::Skip,
                    reasons: vec![],
                    plugin: self.name().to_string(),
                },
            );
        }
        state.write(PRE_FILTER_KEY, Box::new(PreFilterState { affinity }));
        (PreFilterResult { cluster_names: None }, Status::success())
    }
}

impl FilterPlugin for ClusterAffinity {
    fn filter(&self, state: &mut CycleState, _binding: &Binding, cluster: &Cluster) -> Status {
        let Some(pre_filter) = state.read::<PreFilterState>(PRE_FILTER_KEY) else {
            return Status::success();
        };
        match &pre_filter.affinity {
            Some(affinity) if !affinity.matches(cluster) => Status {
                code: Code::UnschedulableAndUnresolvable,
                reasons: vec![ERR_REASON.to_string()],
                plugin: self.name().to_string(),
            },
            _ => Status::success(),
        }
    }
}

impl EnqueueExtension for ClusterAffinity {
    fn events_to_register(&self) -> Vec<ClusterEventWithHint> {
        vec![
            ClusterEventWithHint {
                event: ClusterEvent::ClusterLabelChanged,
                queueing_hint_fn: Some(std::sync::Arc::new(is_schedulable_after_cluster_change)),
            },
            ClusterEventWithHint {
                event: ClusterEvent::ClusterFieldChanged,
                queueing_hint_fn: Some(std::sync::Arc::new(is_schedulable_after_cluster_change)),
            },
        ]
    }
}

fn is_schedulable_after_cluster_change(binding: &Binding, event: &EventInner) -> Result<QueueingHint, String> {
    match event {
        EventInner::Cluster(old, new) => {
            let Some(affinity) = binding
                .spec
                .placement
                .effective_affinity(&binding.status.scheduler_observed_affinity_name)
            else {
                return Ok(QueueingHint::Skip);
            };
            let now_matches = affinity.matches(new);
            let used_to_match = old.as_ref().is_some_and(|c| affinity.matches(c));
            if now_matches && !used_to_match {
                Ok(QueueingHint::Queue)
            } else {
                Ok(QueueingHint::Skip)
            }
        }
        _ => Err("unexpected event resource for cluster-affinity hint".to_string()),
    }
}

pub fn relevant_actions() -> ActionType {
    ActionType::ADD | ActionType::UPDATE_CLUSTER_LABEL
}

pub fn relevant_resource() -> EventResource {
    EventResource::Cluster
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BindingSpec, BindingStatus, FieldSelector, LabelSelector, ResourceSummary,
    };
    use std::collections::BTreeMap;

    fn cluster(name: &str, labels: &[(&str, &str)]) -> Cluster {
        Cluster {
            name: name.to_string(),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            region: None,
            zone: None,
            provider: None,
            taints: vec![],
            api_enablements: vec![],
            resource_summary: ResourceSummary::default(),
            resource_model: vec![],
            cluster_evicted_seconds: 0,
        }
    }

    fn binding_with_affinity(affinity: Option<ClusterAffinityRule>) -> Binding {
        let mut spec = BindingSpec::default();
        spec.placement.cluster_affinity = affinity;
        Binding {
            namespace: "default".to_string(),
            name: "b1".to_string(),
            scheduler_name: "default-scheduler".to_string(),
            labels: BTreeMap::new(),
            deletion_timestamp: None,
            spec,
            status: BindingStatus::default(),
        }
    }

    #[test]
    fn no_affinity_skips_filter() {
        let plugin = ClusterAffinity;
        let mut state = CycleState::default();
        let binding = binding_with_affinity(None);
        let (_, status) = plugin.pre_filter(&mut state, &binding, &[]);
        assert_eq!(status.code, Code::Skip);
    }

    #[test]
    fn label_selector_filters_non_matching_cluster() {
        let plugin = ClusterAffinity;
        let mut state = CycleState::default();
        let mut match_labels = BTreeMap::new();
        match_labels.insert("disktype".to_string(), "ssd".to_string());
        let affinity = ClusterAffinityRule {
            cluster_names: vec![],
            exclude_cluster_names: vec![],
            label_selector: Some(LabelSelector { match_labels }),
            field_selector: None,
        };
        let binding = binding_with_affinity(Some(affinity));

        let (_, status) = plugin.pre_filter(&mut state, &binding, &[]);
        assert!(status.is_success());

        let matching = cluster("c1", &[("disktype", "ssd")]);
        let non_matching = cluster("c2", &[("disktype", "hdd")]);
        assert!(plugin.filter(&mut state, &binding, &matching).is_success());
        assert_eq!(
            plugin.filter(&mut state, &binding, &non_matching).code,
            Code::UnschedulableAndUnresolvable
        );
    }

    #[test]
    fn exclude_cluster_names_always_rejects() {
        let plugin = ClusterAffinity;
        let mut state = CycleState::default();
        let affinity = ClusterAffinityRule {
            cluster_names: vec![],
            exclude_cluster_names: vec!["c1".to_string()],
            label_selector: None,
            field_selector: None,
        };
        let binding = binding_with_affinity(Some(affinity));
        plugin.pre_filter(&mut state, &binding, &[]);

        let excluded = cluster("c1", &[]);
        assert_eq!(
            plugin.filter(&mut state, &binding, &excluded).code,
            Code::UnschedulableAndUnresolvable
        );
    }

    #[test]
    fn field_selector_respects_region() {
        let plugin = ClusterAffinity;
        let mut state = CycleState::default();
        let affinity = ClusterAffinityRule {
            cluster_names: vec![],
            exclude_cluster_names: vec![],
            label_selector: None,
            field_selector: Some(FieldSelector {
                region: Some("us-west".to_string()),
                zone: None,
                provider: None,
            }),
        };
        let binding = binding_with_affinity(Some(affinity));
        plugin.pre_filter(&mut state, &binding, &[]);

        let mut in_region = cluster("c1", &[]);
        in_region.region = Some("us-west".to_string());
        let mut out_of_region = cluster("c2", &[]);
        out_of_region.region = Some("us-east".to_string());

        assert!(plugin.filter(&mut state, &binding, &in_region).is_success());
        assert_eq!(
            plugin.filter(&mut state, &binding, &out_of_region).code,
            Code::UnschedulableAndUnresolvable
        );
    }
}
