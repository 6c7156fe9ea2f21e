//! A single grade band's multiset of node resource signatures.

use std::collections::BTreeMap;

use crate::error::SchedulerError;
use crate::models::RESOURCE_NAMES;

/// An ordered tuple of resource quantities, one per entry in
/// `RESOURCE_NAMES`. Two nodes share a signature iff every component is
/// exactly equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceSignature(pub Vec<u64>);

impl ResourceSignature {
    pub fn from_quantities(quantities: [u64; RESOURCE_NAMES.len()]) -> Self {
        ResourceSignature(quantities.to_vec())
    }

    pub fn primary(&self) -> u64 {
        self.0[0]
    }
}

/// Threshold at which a bucket's sequence representation converts to a
/// balanced tree. The conversion is one-way on insert.
const SEQUENCE_CAPACITY: usize = 6;

#[derive(Debug)]
enum Storage {
    Sequence(Vec<(ResourceSignature, u64)>),
    Tree(BTreeMap<ResourceSignature, u64>),
}

/// One grade band: a multiset of (signature, count) pairs plus the running
/// total, stored as a short sequence while small and promoted to a
/// `BTreeMap` once it grows past `SEQUENCE_CAPACITY` distinct signatures.
#[derive(Debug)]
pub struct ModelBucket {
    storage: Storage,
    total: u64,
}

impl Default for ModelBucket {
    fn default() -> Self {
        Self {
            storage: Storage::Sequence(Vec::new()),
            total: 0,
        }
    }
}

impl ModelBucket {
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn distinct_signatures(&self) -> usize {
        match &self.storage {
            Storage::Sequence(seq) => seq.len(),
            Storage::Tree(tree) => tree.len(),
        }
    }

    /// True once this bucket has converted to the tree representation.
    pub fn is_tree(&self) -> bool {
        matches!(self.storage, Storage::Tree(_))
    }

    pub fn add(&mut self, signature: ResourceSignature) {
        self.total += 1;
        match &mut self.storage {
            Storage::Sequence(seq) => {
                if let Some(entry) = seq.iter_mut().find(|(s, _)| *s == signature) {
                    entry.1 += 1;
                    return;
                }
                if seq.len() + 1 > SEQUENCE_CAPACITY {
                    let mut tree: BTreeMap<ResourceSignature, u64> =
                        seq.drain(..).collect();
                    tree.insert(signature, 1);
                    self.storage = Storage::Tree(tree);
                } else {
                    seq.push((signature, 1));
                }
            }
            Storage::Tree(tree) => {
                *tree.entry(signature).or_insert(0) += 1;
            }
        }
    }

    /// Decrements `signature`'s count, removing the entry at zero. Returns
    /// `IndexMissing` if the signature isn't present. Lazily rematerializes
    /// a sequence from the tree representation if the tree has shrunk to
    /// `SEQUENCE_CAPACITY` or fewer distinct entries.
    pub fn delete(&mut self, signature: &ResourceSignature, cluster: &str) -> Result<(), SchedulerError> {
        if let Storage::Tree(tree) = &self.storage
            && tree.len() <= SEQUENCE_CAPACITY
        {
            let tree = std::mem::replace(&mut self.storage, Storage::Sequence(Vec::new()));
            if let Storage::Tree(tree) = tree {
                self.storage = Storage::Sequence(tree.into_iter().collect());
            }
        }

        match &mut self.storage {
            Storage::Sequence(seq) => {
                let idx = seq
                    .iter()
                    .position(|(s, _)| s == signature)
                    .ok_or_else(|| SchedulerError::IndexMissing {
                        cluster: cluster.to_string(),
                    })?;
                seq[idx].1 -= 1;
                if seq[idx].1 == 0 {
                    seq.remove(idx);
                }
            }
            Storage::Tree(tree) => {
                let count = tree
                    .get_mut(signature)
                    .ok_or_else(|| SchedulerError::IndexMissing {
                        cluster: cluster.to_string(),
                    })?;
                *count -= 1;
                if *count == 0 {
                    tree.remove(signature);
                }
            }
        }
        self.total -= 1;
        Ok(())
    }
}
