//! Rejects clusters a binding has already been evicted from, before the
//! health controller's grace period has elapsed.

use crate::cycle_state::CycleState;
use crate::models::{Binding, Cluster};
use crate::plugins::{FilterPlugin, Plugin, Status};

pub struct ClusterEvicted;

const ERR_REASON: &str = "cluster(s) has been evicted before";

impl Plugin for ClusterEvicted {
    fn name(&self) -> &str {
        "clusterevicted"
    }
}

impl FilterPlugin for ClusterEvicted {
    fn filter(&self, _state: &mut CycleState, binding: &Binding, cluster: &Cluster) -> Status {
        let evicted = binding
            .spec
            .evicted_clusters
            .iter()
            .any(|e| e.cluster_name == cluster.name)
            || binding
                .spec
                .graceful_eviction_tasks
                .iter()
                .any(|t| t.cluster_name == cluster.name);
        if evicted {
            Status::unschedulable(self.name(), ERR_REASON)
        } else {
            Status::success()
        }
    }
}
