//! Soft-prefers clusters whose spread field value (region/zone/provider/
//! cluster name) is under-represented among the binding's candidate set,
//! so that replica division tends to spread across `min_groups..max_groups`
//! distinct values of the configured field rather than piling onto one.
//!
//! `Filter` only rejects when a constraint's `max_groups` is zero, which
//! means "no cluster is acceptable" by construction; the actual spread
//! preference is expressed entirely through scoring, since enforcing a hard
//! group cap needs cross-cluster state the filter phase doesn't have.

use crate::cycle_state::CycleState;
use crate::models::{Binding, Cluster, SpreadFieldType};
use crate::plugins::{Code, FilterPlugin, Plugin, PreScorePlugin, ScorePlugin, Status};
use std::collections::HashMap;

pub struct SpreadConstraint;

const PRE_SCORE_KEY: &str = "spreadconstraint/fieldCounts";

impl Plugin for SpreadConstraint {
    fn name(&self) -> &str {
        "spreadconstraint"
    }
}

fn field_value<'a>(field: SpreadFieldType, cluster: &'a Cluster) -> &'a str {
    match field {
        SpreadFieldType::Region => cluster.region.as_deref().unwrap_or(""),
        SpreadFieldType::Zone => cluster.zone.as_deref().unwrap_or(""),
        SpreadFieldType::Provider => cluster.provider.as_deref().unwrap_or(""),
        SpreadFieldType::Cluster => cluster.name.as_str(),
    }
}

impl FilterPlugin for SpreadConstraint {
    fn filter(&self, _state: &mut CycleState, binding: &Binding, _cluster: &Cluster) -> Status {
        for constraint in &binding.spec.placement.spread_constraints {
            if constraint.max_groups == 0 {
                return Status {
                    code: Code::UnschedulableAndUnresolvable,
                    reasons: vec!["spread constraint allows zero groups".to_string()],
                    plugin: self.name().to_string(),
                };
            }
        }
        Status::success()
    }
}

struct PreScoreState {
    /// Per spread-by field, counts of already-seen values among candidates.
    counts: Vec<HashMap<String, u32>>,
}

impl PreScorePlugin for SpreadConstraint {
    fn pre_score(&self, state: &mut CycleState, binding: &Binding, clusters: &[Cluster]) -> Status {
        if binding.spec.placement.spread_constraints.is_empty() {
            return Status {
                code: Code::Skip,
                reasons: vec![],
                plugin: self.name().to_string(),
            };
        }
        let counts = binding
            .spec
            .placement
            .spread_constraints
            .iter()
            .map(|constraint| {
                let mut counts: HashMap<String, u32> = HashMap::new();
                for cluster in clusters {
                    *counts
                        .entry(field_value(constraint.spread_by_field, cluster).to_string())
                        .or_insert(0) += 1;
                }
                counts
            })
            .collect();
        state.write(PRE_SCORE_KEY, Box::new(PreScoreState { counts }));
        Status::success()
    }
}

impl ScorePlugin for SpreadConstraint {
    fn score(&self, state: &CycleState, binding: &Binding, cluster: &Cluster) -> (i64, Status) {
        let Some(pre_score) = state.read::<PreScoreState>(PRE_SCORE_KEY) else {
            return (0, Status::success());
        };
        let mut score = 0i64;
        for (constraint, counts) in binding
            .spec
            .placement
            .spread_constraints
            .iter()
            .zip(pre_score.counts.iter())
        {
            let value = field_value(constraint.spread_by_field, cluster);
            let occupancy = counts.get(value).copied().unwrap_or(0);
            let distinct = counts.len().max(1) as i64;
            // Fewer other candidates sharing this value scores higher, capped
            // so a field with many distinct values doesn't dominate a field
            // with few.
            score += 100 - (100 * occupancy as i64).min(100) / distinct;
        }
        (score, Status::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BindingSpec, BindingStatus, ResourceSummary, SpreadConstraint as SpreadConstraintRule,
    };
    use std::collections::BTreeMap;

    fn cluster(name: &str, region: &str) -> Cluster {
        Cluster {
            name: name.to_string(),
            labels: BTreeMap::new(),
            region: Some(region.to_string()),
            zone: None,
            provider: None,
            taints: vec![],
            api_enablements: vec![],
            resource_summary: ResourceSummary::default(),
            resource_model: vec![],
            cluster_evicted_seconds: 0,
        }
    }

    fn binding_with_constraint(max_groups: u32) -> Binding {
        let mut spec = BindingSpec::default();
        spec.placement.spread_constraints = vec![SpreadConstraintRule {
            spread_by_field: SpreadFieldType::Region,
            max_groups,
            min_groups: 1,
        }];
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
    fn zero_max_groups_is_unschedulable() {
        let plugin = SpreadConstraint;
        let binding = binding_with_constraint(0);
        let status = plugin.filter(&mut CycleState::default(), &binding, &cluster("c1", "us-west"));
        assert_eq!(status.code, Code::UnschedulableAndUnresolvable);
    }

    #[test]
    fn under_represented_region_scores_higher() {
        let plugin = SpreadConstraint;
        let binding = binding_with_constraint(2);
        let clusters = vec![
            cluster("c1", "us-west"),
            cluster("c2", "us-west"),
            cluster("c3", "us-east"),
        ];
        let mut state = CycleState::default();
        plugin.pre_score(&mut state, &binding, &clusters);

        let (west_score, _) = plugin.score(&state, &binding, &clusters[0]);
        let (east_score, _) = plugin.score(&state, &binding, &clusters[2]);
        assert!(east_score > west_score);
    }

    #[test]
    fn no_constraints_skips_pre_score() {
        let plugin = SpreadConstraint;
        let binding = Binding {
            namespace: "default".to_string(),
            name: "b1".to_string(),
            scheduler_name: "default-scheduler".to_string(),
            labels: BTreeMap::new(),
            deletion_timestamp: None,
            spec: BindingSpec::default(),
            status: BindingStatus::default(),
        };
        let status = plugin.pre_score(&mut CycleState::default(), &binding, &[]);
        assert_eq!(status.code, Code::Skip);
    }
}
