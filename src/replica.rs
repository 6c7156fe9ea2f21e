//! Replica-division strategies: how a binding's replica count is split
//! across the clusters that passed the filter/score pipeline.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterWeight {
    pub cluster_name: String,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaSchedulingStrategy {
    /// Every passing cluster runs the full replica count.
    Duplicated,
    /// Replicas are split across clusters in score order, with remainder
    /// front-loaded onto the highest-scored clusters.
    DividedAggregated,
    /// Replicas split proportionally to caller-supplied static weights.
    DividedWeightedStatic { weights: Vec<ClusterWeight> },
    /// Replicas split proportionally to each cluster's available capacity
    /// for the binding's resource descriptor.
    DividedWeightedDynamic,
}

/// Splits `total` replicas across `scored` clusters (name, score — higher
/// is better) per `strategy`. `available_capacity` supplies each cluster's
/// headroom for `DividedWeightedDynamic`, in the same unit as the binding's
/// per-replica resource request; clusters absent from it are treated as
/// having zero headroom.
pub fn divide(
    strategy: &ReplicaSchedulingStrategy,
    total: u32,
    scored: &[(String, i64)],
    available_capacity: &std::collections::HashMap<String, u64>,
) -> Vec<(String, u32)> {
    if scored.is_empty() || total == 0 {
        return vec![];
    }

    match strategy {
        ReplicaSchedulingStrategy::Duplicated => {
            scored.iter().map(|(name, _)| (name.clone(), total)).collect()
        }
        ReplicaSchedulingStrategy::DividedAggregated => {
            let mut ordered = scored.to_vec();
            ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            divide_by_weights(
                total,
                ordered.iter().map(|(name, _)| (name.clone(), 1u64)),
            )
        }
        ReplicaSchedulingStrategy::DividedWeightedStatic { weights } => {
            let pairs = scored.iter().map(|(name, _)| {
                let w = weights
                    .iter()
                    .find(|cw| &cw.cluster_name == name)
                    .map(|cw| cw.weight as u64)
                    .unwrap_or(0);
                (name.clone(), w)
            });
            divide_by_weights(total, pairs)
        }
        ReplicaSchedulingStrategy::DividedWeightedDynamic => {
            let pairs = scored.iter().map(|(name, _)| {
                let w = available_capacity.get(name).copied().unwrap_or(0);
                (name.clone(), w)
            });
            divide_by_weights(total, pairs)
        }
    }
}

/// Largest-remainder apportionment: integer part of `total * weight /
/// sum(weights)` per cluster, remainder distributed to the clusters with
/// the largest fractional remainder (ties broken by input order). Clusters
/// with zero weight get zero replicas unless every weight is zero, in
/// which case replicas fall back to an even split across all clusters.
fn divide_by_weights(total: u32, pairs: impl Iterator<Item = (String, u64)>) -> Vec<(String, u32)> {
    let pairs: Vec<(String, u64)> = pairs.collect();
    let sum: u64 = pairs.iter().map(|(_, w)| *w).sum();

    if sum == 0 {
        let n = pairs.len() as u32;
        let base = total / n;
        let mut remainder = total % n;
        return pairs
            .into_iter()
            .map(|(name, _)| {
                let extra = if remainder > 0 {
                    remainder -= 1;
                    1
                } else {
                    0
                };
                (name, base + extra)
            })
            .collect();
    }

    let total = total as u128;
    let mut allocations: Vec<(String, u32, u128)> = pairs
        .into_iter()
        .map(|(name, weight)| {
            let share = total * weight as u128 / sum as u128;
            let remainder = total * weight as u128 % sum as u128;
            (name, share as u32, remainder)
        })
        .collect();

    let allocated: u32 = allocations.iter().map(|(_, share, _)| *share).sum();
    let mut leftover = total as u32 - allocated;

    allocations.sort_by(|a, b| b.2.cmp(&a.2));
    for (_, share, _) in allocations.iter_mut() {
        if leftover == 0 {
            break;
        }
        *share += 1;
        leftover -= 1;
    }

    allocations.into_iter().map(|(name, share, _)| (name, share)).collect()
}
