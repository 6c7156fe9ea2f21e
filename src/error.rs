//! Typed errors surfaced by the scheduling core.
//!
//! Every recoverable failure path returns one of these variants rather than
//! panicking; see the kind table this mirrors for the policy attached to
//! each one.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Reading a binding or cluster that no longer exists. Callers should
    /// drop the work item and treat this as success.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic write to the external store lost a race. Callers should
    /// requeue.
    #[error("conflict writing {0}")]
    Conflict(String),

    /// No candidate cluster passed the filter pipeline.
    #[error("{0}")]
    FitError(#[from] FitError),

    /// `Pop` called after `Close`.
    #[error("scheduling queue is closed")]
    QueueClosed,

    /// Resource-modeling index delete on an absent signature.
    #[error("resource-model index has no entry for signature in cluster {cluster}")]
    IndexMissing { cluster: String },

    /// A binding or cluster object field failed to parse; the offending
    /// field was defaulted rather than aborting the loop.
    #[error("parse error in {field}: {message}")]
    Parse { field: String, message: String },
}

/// Diagnosis of a scheduling attempt that found zero candidate clusters.
///
/// The Display message matches the form `"0/N clusters are available:
/// <histogram of reasons>."` used by the worker loop to report failures.
#[derive(Debug, Clone, Default)]
pub struct FitError {
    pub num_candidates: usize,
    /// reason -> number of clusters that failed with that reason.
    pub reason_histogram: std::collections::BTreeMap<String, usize>,
}

impl std::error::Error for FitError {}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut reasons: Vec<String> = self
            .reason_histogram
            .iter()
            .map(|(reason, count)| format!("{reason} ({count})"))
            .collect();
        reasons.sort();
        write!(
            f,
            "0/{} clusters are available: {}.",
            self.num_candidates,
            reasons.join(", ")
        )
    }
}
