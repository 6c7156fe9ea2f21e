//! Default `MetricsSink` used when no real metrics backend is wired in.

use async_trait::async_trait;

use crate::store::MetricsSink;

#[derive(Default)]
pub struct LoggingMetricsSink;

#[async_trait]
impl MetricsSink for LoggingMetricsSink {
    async fn count_scheduler_binding(&self, event: &str) {
        log::debug!("scheduler_binding_count{{event={event}}} += 1");
    }
}
