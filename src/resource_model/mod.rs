//! The cluster resource-modeling index: a per-cluster, grade-bucketed
//! multiset of node resource signatures.
//!
//! `Init` is `Index::new`; `Add`/`Delete`/`Update` below map directly onto
//! the operations this module is grounded on.

pub mod bucket;

use log::warn;

use crate::error::SchedulerError;
use crate::models::{ResourceModelGrade, ResourceRequest, RESOURCE_NAMES};
use bucket::{ModelBucket, ResourceSignature};

/// Explicit, per-index configuration — never global mutable state, per the
/// redesign note on "global mutable config in modeling".
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub names: Vec<String>,
    pub grades: Vec<ResourceModelGrade>,
}

impl IndexConfig {
    fn validate(&self) -> Result<(), SchedulerError> {
        if self.names.is_empty() {
            return Err(SchedulerError::Parse {
                field: "resource_model.names".to_string(),
                message: "must name at least one resource".to_string(),
            });
        }
        if self.grades.is_empty() {
            return Err(SchedulerError::Parse {
                field: "resource_model.grades".to_string(),
                message: "must configure at least one grade band".to_string(),
            });
        }
        if !self.grades.windows(2).all(|w| w[0].lower_bound < w[1].lower_bound) {
            return Err(SchedulerError::Parse {
                field: "resource_model.grades".to_string(),
                message: "grade lower bounds must be strictly increasing".to_string(),
            });
        }
        Ok(())
    }
}

/// Default 9-band schedule over CPU millicores: 0/1/2/4/8/16/32/64/128
/// cores, unbounded top band.
pub fn default_index_config() -> IndexConfig {
    IndexConfig {
        names: RESOURCE_NAMES.iter().map(|s| s.to_string()).collect(),
        grades: [0u64, 1, 2, 4, 8, 16, 32, 64, 128]
            .into_iter()
            .map(|cores| ResourceModelGrade {
                lower_bound: cores * 1000,
            })
            .collect(),
    }
}

pub struct Index {
    config: IndexConfig,
    buckets: Vec<ModelBucket>,
}

impl Index {
    pub fn new(config: IndexConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let buckets = config.grades.iter().map(|_| ModelBucket::default()).collect();
        Ok(Self { config, buckets })
    }

    pub fn grade_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket(&self, grade: usize) -> Option<&ModelBucket> {
        self.buckets.get(grade)
    }

    /// Largest configured lower bound not exceeding `quantity` (left-closed
    /// bands); the last band is open above.
    fn grade_for_quantity(&self, quantity: u64) -> usize {
        match self
            .config
            .grades
            .binary_search_by(|grade| grade.lower_bound.cmp(&quantity))
        {
            Ok(idx) => idx,
            Err(0) => 0,
            Err(idx) => idx - 1,
        }
    }

    fn signature_for(&self, node: &ResourceRequest) -> ResourceSignature {
        let quantities = self
            .config
            .names
            .iter()
            .map(|name| {
                node.quantity(name).unwrap_or_else(|| {
                    warn!("unknown resource name {name} in resource-model index, defaulting to 0");
                    0
                })
            })
            .collect();
        ResourceSignature(quantities)
    }

    pub fn add(&mut self, node: &ResourceRequest) -> usize {
        let signature = self.signature_for(node);
        let grade = self.grade_for_quantity(signature.primary());
        self.buckets[grade].add(signature);
        grade
    }

    pub fn delete(&mut self, node: &ResourceRequest, cluster: &str) -> Result<(), SchedulerError> {
        let signature = self.signature_for(node);
        let grade = self.grade_for_quantity(signature.primary());
        self.buckets[grade].delete(&signature, cluster)
    }

    pub fn update(
        &mut self,
        old: &ResourceRequest,
        new: &ResourceRequest,
        cluster: &str,
    ) -> Result<(), SchedulerError> {
        self.delete(old, cluster)?;
        self.add(new);
        Ok(())
    }
}
