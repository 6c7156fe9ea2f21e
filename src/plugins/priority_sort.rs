use std::cmp::Ordering;

use crate::{
    plugins::{Plugin, QueueSortPlugin},
    queue::QueuedBinding,
};

pub struct PrioritySort;

impl Plugin for PrioritySort {
    fn name(&self) -> &str {
        "PrioritySort"
    }
}

/// Orders strictly by creation timestamp, earlier first. Bindings carry no
/// priority field to break ties on.
impl QueueSortPlugin for PrioritySort {
    fn less(&self, a: &QueuedBinding, b: &QueuedBinding) -> Ordering {
        a.timestamp.cmp(&b.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Binding, BindingSpec, BindingStatus};
    use std::collections::BTreeMap;
    use std::collections::HashSet;
    use tokio::time::Instant;

    fn binding_at(timestamp: Instant) -> QueuedBinding {
        QueuedBinding {
            binding: Binding {
                namespace: "default".to_string(),
                name: "b1".to_string(),
                scheduler_name: "default-scheduler".to_string(),
                labels: BTreeMap::new(),
                deletion_timestamp: None,
                spec: BindingSpec::default(),
                status: BindingStatus::default(),
            },
            timestamp,
            attempts: 0,
            unschedulable_plugins: HashSet::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_timestamp_sorts_first_regardless_of_anything_else() {
        let now = Instant::now();
        let earlier = binding_at(now);
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        let later = binding_at(Instant::now());
        assert_eq!(PrioritySort.less(&earlier, &later), Ordering::Less);
        assert_eq!(PrioritySort.less(&later, &earlier), Ordering::Greater);
    }
}
