//! The three-tier scheduling queue: activeQ, backoffQ, and
//! unschedulableBindings, plus the two periodic flushers that keep bindings
//! from getting stuck in the last tier.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, trace};
use tokio::sync::{Mutex, Notify};
use tokio::time::{self, Duration, Instant};

use crate::error::SchedulerError;
use crate::event::ClusterEvent;
use crate::models::{Binding, UnschedulablePlugins};

/// The queue's internal wrapper around a binding.
#[derive(Clone)]
pub struct QueuedBinding {
    pub binding: Binding,
    pub timestamp: Instant,
    pub attempts: u32,
    pub unschedulable_plugins: UnschedulablePlugins,
}

impl QueuedBinding {
    fn new(binding: Binding) -> Self {
        Self {
            binding,
            timestamp: Instant::now(),
            attempts: 0,
            unschedulable_plugins: UnschedulablePlugins::new(),
        }
    }

    fn key(&self) -> String {
        self.binding.key()
    }
}

/// Orders two `QueuedBinding`s in the activeQ. The default is "earlier
/// Timestamp wins"; callers may install a different comparator (e.g. one
/// that breaks ties on a priority field) at construction time.
pub type LessFn = Arc<dyn Fn(&QueuedBinding, &QueuedBinding) -> bool + Send + Sync>;

pub fn default_less_fn() -> LessFn {
    Arc::new(|a, b| a.timestamp < b.timestamp)
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_unschedulable_duration: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            max_unschedulable_duration: Duration::from_secs(300),
        }
    }
}

/// Backoff duration for `attempts` (attempts ≥ 1): `min(initial *
/// 2^(attempts-1), max)`, doubling with an overflow-safe pre-check rather
/// than multiplying outright.
pub fn backoff_duration(attempts: u32, initial: Duration, max: Duration) -> Duration {
    if attempts == 0 {
        return initial.min(max);
    }
    let mut duration = initial;
    for _ in 0..attempts.saturating_sub(1) {
        if duration > max.saturating_sub(duration) {
            return max;
        }
        duration += duration;
    }
    duration.min(max)
}

struct Inner {
    active: Vec<QueuedBinding>,
    backoff: Vec<QueuedBinding>,
    unschedulable: HashMap<String, QueuedBinding>,
    scheduling_cycle: u64,
    move_request_cycle: i64,
    closed: bool,
}

impl Inner {
    fn ready_at(&self, qb: &QueuedBinding, config: &QueueConfig) -> Instant {
        qb.timestamp + backoff_duration(qb.attempts, config.initial_backoff, config.max_backoff)
    }

    fn is_backing_off(&self, qb: &QueuedBinding, config: &QueueConfig, now: Instant) -> bool {
        self.ready_at(qb, config) > now
    }

    fn remove_everywhere(&mut self, key: &str) -> Option<QueuedBinding> {
        if let Some(idx) = self.active.iter().position(|qb| qb.key() == key) {
            return Some(self.active.remove(idx));
        }
        if let Some(idx) = self.backoff.iter().position(|qb| qb.key() == key) {
            return Some(self.backoff.remove(idx));
        }
        self.unschedulable.remove(key)
    }
}

/// Three-tier scheduling queue. All mutation happens under a single mutex;
/// `pop` suspends on a `Notify` rather than a condvar, which is the closer
/// async-native equivalent.
pub struct SchedulingQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    config: QueueConfig,
    less: LessFn,
}

impl SchedulingQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_less_fn(config, default_less_fn())
    }

    pub fn with_less_fn(config: QueueConfig, less: LessFn) -> Self {
        Self {
            inner: Mutex::new(Inner {
                active: Vec::new(),
                backoff: Vec::new(),
                unschedulable: HashMap::new(),
                scheduling_cycle: 0,
                move_request_cycle: -1,
                closed: false,
            }),
            notify: Notify::new(),
            config,
            less,
        }
    }

    /// Inserts a new binding into activeQ, removing any stale copy from the
    /// other two tiers first. Wakes one blocked `pop`.
    pub async fn add(&self, binding: Binding) {
        let key = binding.key();
        let mut inner = self.inner.lock().await;
        inner.remove_everywhere(&key);
        inner.active.push(QueuedBinding::new(binding));
        self.notify.notify_one();
    }

    /// Updates the binding identified by `old`'s key with `new`'s payload,
    /// following the per-tier rules in the scheduling queue's contract.
    pub async fn update(&self, old: &Binding, new: Binding) {
        let key = old.key();
        if new.is_deleted() {
            self.delete(&key).await;
            return;
        }

        let mut inner = self.inner.lock().await;

        if let Some(qb) = inner.active.iter_mut().find(|qb| qb.key() == key) {
            qb.binding = new;
            return;
        }
        if let Some(qb) = inner.backoff.iter_mut().find(|qb| qb.key() == key) {
            qb.binding = new;
            return;
        }
        if let Some(mut qb) = inner.unschedulable.remove(&key) {
            if old.spec.placement != new.spec.placement {
                qb.binding = new;
                if inner.is_backing_off(&qb, &self.config, Instant::now()) {
                    inner.backoff.push(qb);
                } else {
                    inner.active.push(qb);
                    self.notify.notify_one();
                }
            } else {
                qb.binding = new;
                inner.unschedulable.insert(key, qb);
            }
            return;
        }

        inner.active.push(QueuedBinding::new(new));
        self.notify.notify_one();
    }

    pub async fn delete(&self, key: &str) {
        let mut inner = self.inner.lock().await;
        inner.remove_everywhere(key);
    }

    /// Blocks while activeQ is empty and the queue is open. On success,
    /// increments `Attempts` and the monotonic scheduling cycle, returning
    /// the popped binding alongside the cycle it was popped at.
    pub async fn pop(&self) -> Result<(QueuedBinding, u64), SchedulerError> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if !inner.active.is_empty() {
                    let idx = inner
                        .active
                        .iter()
                        .enumerate()
                        .min_by(|(_, a), (_, b)| {
                            if (self.less)(a, b) {
                                std::cmp::Ordering::Less
                            } else if (self.less)(b, a) {
                                std::cmp::Ordering::Greater
                            } else {
                                std::cmp::Ordering::Equal
                            }
                        })
                        .map(|(idx, _)| idx)
                        .expect("active queue non-empty");
                    let mut qb = inner.active.remove(idx);
                    qb.attempts += 1;
                    inner.scheduling_cycle += 1;
                    let cycle = inner.scheduling_cycle;
                    return Ok((qb, cycle));
                }
                if inner.closed {
                    return Err(SchedulerError::QueueClosed);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Inserts a binding that could not be scheduled. If a move request
    /// landed during the in-flight scheduling cycle (`move_request_cycle
    /// >= cycle_at_schedule`), it goes to backoffQ; otherwise to the
    /// unschedulable tier. `Timestamp` is reset to now either way.
    pub async fn add_unschedulable_if_not_present(
        &self,
        mut qb: QueuedBinding,
        cycle_at_schedule: u64,
    ) {
        let mut inner = self.inner.lock().await;
        qb.timestamp = Instant::now();
        if inner.move_request_cycle >= cycle_at_schedule as i64 {
            inner.backoff.push(qb);
        } else {
            let key = qb.key();
            inner.unschedulable.insert(key, qb);
        }
    }

    /// Moves every unschedulable binding whose `pre_check` (if given)
    /// passes and whose `unschedulable_plugins` intersects `event`'s plugin
    /// set (or the event is `UnschedulableTimeout`) to backoff or active.
    pub async fn move_all_to_active_or_backoff(
        &self,
        event: ClusterEvent,
        pre_check: Option<&dyn Fn(&Binding) -> bool>,
    ) {
        let mut inner = self.inner.lock().await;
        let event_plugins = event.plugin_set();
        let now = Instant::now();

        let candidates: Vec<String> = inner
            .unschedulable
            .iter()
            .filter(|(_, qb)| pre_check.is_none_or(|check| check(&qb.binding)))
            .filter(|(_, qb)| {
                event == ClusterEvent::UnschedulableTimeout
                    || qb.unschedulable_plugins.is_empty()
                    || qb
                        .unschedulable_plugins
                        .iter()
                        .any(|p| event_plugins.contains(p.as_str()))
            })
            .map(|(key, _)| key.clone())
            .collect();

        let mut activated = false;
        for key in candidates {
            let qb = match inner.unschedulable.remove(&key) {
                Some(qb) => qb,
                None => continue,
            };
            if inner.is_backing_off(&qb, &self.config, now) {
                inner.backoff.push(qb);
            } else {
                inner.active.push(qb);
                activated = true;
            }
        }
        inner.move_request_cycle = inner.scheduling_cycle as i64;
        if activated {
            self.notify.notify_waiters();
        }
    }

    /// Adds a binding as new, or moves it from unschedulable to active or
    /// backoff if it's already sitting there.
    pub async fn add_or_move_unschedulable(&self, binding: Binding, event: ClusterEvent) {
        let key = binding.key();
        let already_unschedulable = {
            let inner = self.inner.lock().await;
            inner.unschedulable.contains_key(&key)
        };
        if already_unschedulable {
            self.move_all_to_active_or_backoff(event, Some(&|b: &Binding| b.key() == key))
                .await;
        } else {
            self.add(binding).await;
        }
    }

    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        self.notify.notify_waiters();
    }

    async fn flush_backoff_completed(&self) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let mut activated = false;
        loop {
            let ready_idx = inner
                .backoff
                .iter()
                .position(|qb| inner.ready_at(qb, &self.config) <= now);
            let Some(idx) = ready_idx else { break };
            let qb = inner.backoff.remove(idx);
            trace!("moving {} from backoff to active", qb.key());
            inner.active.push(qb);
            activated = true;
        }
        if activated {
            self.notify.notify_waiters();
        }
    }

    async fn flush_unschedulable_left_over(&self) {
        let now = Instant::now();
        let stale: Vec<String> = {
            let inner = self.inner.lock().await;
            inner
                .unschedulable
                .iter()
                .filter(|(_, qb)| now.saturating_duration_since(qb.timestamp) > self.config.max_unschedulable_duration)
                .map(|(key, _)| key.clone())
                .collect()
        };
        if stale.is_empty() {
            return;
        }
        debug!("rescuing {} stuck unschedulable bindings", stale.len());
        let stale: HashSet<String> = stale.into_iter().collect();
        self.move_all_to_active_or_backoff(
            ClusterEvent::UnschedulableTimeout,
            Some(&|b: &Binding| stale.contains(&b.key())),
        )
        .await;
    }

    /// Spawns the backoff (1s) and unschedulable-rescue (30s) flushers.
    /// Runs until the queue is closed.
    pub fn run(self: Arc<Self>) {
        let backoff_queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                if backoff_queue.inner.lock().await.closed {
                    return;
                }
                backoff_queue.flush_backoff_completed().await;
            }
        });

        let rescue_queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                if rescue_queue.inner.lock().await.closed {
                    return;
                }
                rescue_queue.flush_unschedulable_left_over().await;
            }
        });
    }

    pub async fn len_active(&self) -> usize {
        self.inner.lock().await.active.len()
    }

    pub async fn len_unschedulable(&self) -> usize {
        self.inner.lock().await.unschedulable.len()
    }

    pub async fn len_backoff(&self) -> usize {
        self.inner.lock().await.backoff.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BindingSpec;
    use std::collections::BTreeMap;

    fn binding(name: &str) -> Binding {
        Binding {
            namespace: "default".to_string(),
            name: name.to_string(),
            scheduler_name: "default-scheduler".to_string(),
            labels: BTreeMap::new(),
            deletion_timestamp: None,
            spec: BindingSpec::default(),
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn add_then_pop_returns_same_binding() {
        let queue = SchedulingQueue::new(QueueConfig::default());
        queue.add(binding("b1")).await;
        let (qb, cycle) = queue.pop().await.unwrap();
        assert_eq!(qb.binding.name, "b1");
        assert_eq!(qb.attempts, 1);
        assert_eq!(cycle, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pop_order_follows_add_order_under_default_less_fn() {
        let queue = SchedulingQueue::new(QueueConfig::default());
        queue.add(binding("first")).await;
        time::advance(Duration::from_millis(1)).await;
        queue.add(binding("second")).await;
        let (first, _) = queue.pop().await.unwrap();
        let (second, _) = queue.pop().await.unwrap();
        assert_eq!(first.binding.name, "first");
        assert_eq!(second.binding.name, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_duration_converges_per_scenario_one() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(4);
        let expected = [1u64, 2, 4, 4, 4];
        for (attempts, expected_secs) in (1u32..=5).zip(expected) {
            assert_eq!(backoff_duration(attempts, initial, max), Duration::from_secs(expected_secs));
        }
    }

    #[tokio::test]
    async fn close_wakes_all_blocked_poppers() {
        let queue = Arc::new(SchedulingQueue::new(QueueConfig::default()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let q = queue.clone();
            handles.push(tokio::spawn(async move { q.pop().await }));
        }
        tokio::task::yield_now().await;
        queue.close().await;
        for handle in handles {
            let result = handle.await.unwrap();
            assert!(matches!(result, Err(SchedulerError::QueueClosed)));
        }
    }

    #[tokio::test]
    async fn event_gated_wake_respects_plugin_intersection() {
        let queue = SchedulingQueue::new(QueueConfig::default());
        queue.add(binding("b1")).await;
        let (mut qb, cycle) = queue.pop().await.unwrap();
        qb.unschedulable_plugins.insert("tainttoleration".to_string());
        queue.add_unschedulable_if_not_present(qb, cycle).await;

        queue
            .move_all_to_active_or_backoff(ClusterEvent::ClusterLabelChanged, None)
            .await;
        assert_eq!(queue.len_unschedulable().await, 1);

        queue
            .move_all_to_active_or_backoff(ClusterEvent::ClusterTaintsChanged, None)
            .await;
        assert_eq!(queue.len_unschedulable().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_binding_rescue_after_max_duration() {
        let config = QueueConfig {
            max_unschedulable_duration: Duration::from_secs(300),
            ..Default::default()
        };
        let queue = SchedulingQueue::new(config);
        queue.add(binding("b1")).await;
        let (mut qb, cycle) = queue.pop().await.unwrap();
        qb.unschedulable_plugins.insert("clusteraffinity".to_string());
        queue.add_unschedulable_if_not_present(qb, cycle).await;

        time::advance(Duration::from_secs(301)).await;
        queue.flush_unschedulable_left_over().await;
        assert_eq!(queue.len_unschedulable().await, 0);
    }
}
