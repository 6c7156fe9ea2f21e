//! Rejects clusters that don't have the binding's resource kind enabled
//! for its API group/version.

use crate::cycle_state::CycleState;
use crate::event::ClusterEvent;
use crate::models::{Binding, Cluster};
use crate::plugins::{
    ActionType, ClusterEventWithHint, EnqueueExtension, EventInner, EventResource, FilterPlugin,
    Plugin, QueueingHint, Status,
};

pub struct ApiEnablement;

const ERR_REASON: &str = "cluster(s) didn't enable external resourcemanager api";

impl Plugin for ApiEnablement {
    fn name(&self) -> &str {
        "apienablement"
    }
}

fn api_enabled(cluster: &Cluster, api_version: &str, kind: &str) -> bool {
    cluster
        .api_enablements
        .iter()
        .any(|e| e.group_version == api_version && e.resources.iter().any(|r| r == kind))
}

impl FilterPlugin for ApiEnablement {
    fn filter(&self, _state: &mut CycleState, binding: &Binding, cluster: &Cluster) -> Status {
        let resource = &binding.spec.resource;
        if resource.api_version.is_empty() && resource.kind.is_empty() {
            return Status::success();
        }
        if cluster.api_enablements.is_empty() {
            return Status::success();
        }
        if api_enabled(cluster, &resource.api_version, &resource.kind) {
            Status::success()
        } else {
            Status::unschedulable(self.name(), ERR_REASON)
        }
    }
}

impl EnqueueExtension for ApiEnablement {
    fn events_to_register(&self) -> Vec<ClusterEventWithHint> {
        vec![ClusterEventWithHint {
            event: ClusterEvent::ClusterAPIEnablementChanged,
            queueing_hint_fn: Some(std::sync::Arc::new(is_schedulable_after_cluster_change)),
        }]
    }
}

fn is_schedulable_after_cluster_change(binding: &Binding, event: &EventInner) -> Result<QueueingHint, String> {
    match event {
        EventInner::Cluster(_, new) => {
            let resource = &binding.spec.resource;
            if resource.api_version.is_empty()
                || cluster_is_enabled(new, &resource.api_version, &resource.kind)
            {
                Ok(QueueingHint::Queue)
            } else {
                Ok(QueueingHint::Skip)
            }
        }
        _ => Err("unexpected event resource for api-enablement hint".to_string()),
    }
}

fn cluster_is_enabled(cluster: &Cluster, api_version: &str, kind: &str) -> bool {
    cluster.api_enablements.is_empty() || api_enabled(cluster, api_version, kind)
}

pub fn relevant_actions() -> ActionType {
    ActionType::ADD | ActionType::DELETE
}

pub fn relevant_resource() -> EventResource {
    EventResource::Cluster
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ApiEnablement as ApiEnablementEntry, BindingSpec, BindingStatus, ResourceDescriptor,
        ResourceSummary,
    };
    use std::collections::BTreeMap;

    fn cluster(enablements: Vec<ApiEnablementEntry>) -> Cluster {
        Cluster {
            name: "c1".to_string(),
            labels: BTreeMap::new(),
            region: None,
            zone: None,
            provider: None,
            taints: vec![],
            api_enablements: enablements,
            resource_summary: ResourceSummary::default(),
            resource_model: vec![],
            cluster_evicted_seconds: 0,
        }
    }

    fn binding_requesting(api_version: &str, kind: &str) -> Binding {
        let mut spec = BindingSpec::default();
        spec.resource = ResourceDescriptor {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            replicas: 1,
            resource_request: Default::default(),
        };
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
    fn cluster_with_no_enablement_data_is_not_filtered() {
        let plugin = ApiEnablement;
        let binding = binding_requesting("apps/v1", "Deployment");
        let status = plugin.filter(&mut CycleState::default(), &binding, &cluster(vec![]));
        assert!(status.is_success());
    }

    #[test]
    fn cluster_missing_requested_kind_is_rejected() {
        let plugin = ApiEnablement;
        let binding = binding_requesting("apps/v1", "Deployment");
        let cluster = cluster(vec![ApiEnablementEntry {
            group_version: "apps/v1".to_string(),
            resources: vec!["StatefulSet".to_string()],
        }]);
        let status = plugin.filter(&mut CycleState::default(), &binding, &cluster);
        assert_eq!(status.code, crate::plugins::Code::Unschedulable);
    }

    #[test]
    fn cluster_with_requested_kind_passes() {
        let plugin = ApiEnablement;
        let binding = binding_requesting("apps/v1", "Deployment");
        let cluster = cluster(vec![ApiEnablementEntry {
            group_version: "apps/v1".to_string(),
            resources: vec!["Deployment".to_string()],
        }]);
        let status = plugin.filter(&mut CycleState::default(), &binding, &cluster);
        assert!(status.is_success());
    }
}
