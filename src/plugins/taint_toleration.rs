//! Filters out clusters whose untolerated `NoSchedule`/`NoExecute` taints
//! the binding's placement doesn't tolerate; scores clusters by how many
//! `PreferNoSchedule` taints remain untolerated.

use crate::cycle_state::CycleState;
use crate::event::ClusterEvent;
use crate::models::{Binding, Cluster, TaintEffect};
use crate::plugins::{
    ActionType, ClusterEventWithHint, EnqueueExtension, EventInner, EventResource, FilterPlugin,
    Plugin, PreScorePlugin, QueueingHint, ScorePlugin, Status,
};

pub const NAME: &str = "tainttoleration";
const PRE_SCORE_KEY: &str = "tainttoleration/preferNoScheduleTolerations";

pub struct TaintToleration;

impl Plugin for TaintToleration {
    fn name(&self) -> &str {
        NAME
    }
}

impl FilterPlugin for TaintToleration {
    fn filter(&self, _state: &mut CycleState, binding: &Binding, cluster: &Cluster) -> Status {
        match cluster.untolerated_taint(&binding.spec.placement.cluster_tolerations) {
            Some(taint) => Status::unschedulable(
                NAME,
                format!(
                    "cluster(s) had taint {{{}: {}}}, that the binding didn't tolerate",
                    taint.key, taint.value
                ),
            ),
            None => Status::success(),
        }
    }
}

impl PreScorePlugin for TaintToleration {
    fn pre_score(&self, state: &mut CycleState, binding: &Binding, _clusters: &[Cluster]) -> Status {
        let tolerated: Vec<String> = binding
            .spec
            .placement
            .cluster_tolerations
            .iter()
            .filter(|t| t.effect == Some(TaintEffect::PreferNoSchedule))
            .filter_map(|t| t.key.clone())
            .collect();
        state.write(PRE_SCORE_KEY, Box::new(tolerated));
        Status::success()
    }
}

impl ScorePlugin for TaintToleration {
    fn score(&self, state: &CycleState, _binding: &Binding, cluster: &Cluster) -> (i64, Status) {
        let tolerated_keys = state
            .read::<Vec<String>>(PRE_SCORE_KEY)
            .cloned()
            .unwrap_or_default();
        let untolerated = cluster
            .taints
            .iter()
            .filter(|t| t.effect == TaintEffect::PreferNoSchedule)
            .filter(|t| !tolerated_keys.contains(&t.key))
            .count();
        (-(untolerated as i64), Status::success())
    }
}

impl EnqueueExtension for TaintToleration {
    fn events_to_register(&self) -> Vec<ClusterEventWithHint> {
        vec![
            ClusterEventWithHint {
                event: ClusterEvent::ClusterTaintsChanged,
                queueing_hint_fn: Some(std::sync::Arc::new(is_schedulable_after_cluster_change)),
            },
            ClusterEventWithHint {
                event: ClusterEvent::ClusterTaintsChanged,
                queueing_hint_fn: Some(std::sync::Arc::new(is_schedulable_after_toleration_change)),
            },
        ]
    }
}

fn is_schedulable_after_cluster_change(binding: &Binding, event: &EventInner) -> Result<QueueingHint, String> {
    match event {
        EventInner::Cluster(old, new) => {
            let tolerations = &binding.spec.placement.cluster_tolerations;
            let new_blocks = new.untolerated_taint(tolerations).is_some();
            let old_blocked = old
                .as_ref()
                .is_some_and(|c| c.untolerated_taint(tolerations).is_some());
            if old_blocked && !new_blocks {
                Ok(QueueingHint::Queue)
            } else {
                Ok(QueueingHint::Skip)
            }
        }
        _ => Err("unexpected event resource for taint-toleration hint".to_string()),
    }
}

fn is_schedulable_after_toleration_change(_binding: &Binding, event: &EventInner) -> Result<QueueingHint, String> {
    match event {
        EventInner::Binding(_, _) => Ok(QueueingHint::Queue),
        _ => Err("unexpected event resource for toleration-change hint".to_string()),
    }
}

/// Events this plugin's filter cares about, not wired through the
/// `EnqueueExtension` trait object API: `Add`/`UpdateClusterTaint` on
/// clusters and `UpdateBindingToleration` on bindings.
pub fn relevant_actions() -> ActionType {
    ActionType::ADD | ActionType::UPDATE_CLUSTER_TAINT | ActionType::UPDATE_BINDING_TOLERATION
}

pub fn relevant_resource() -> EventResource {
    EventResource::Cluster
}
