//! Per-node relation set and notification sequencing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::exchange::RelationKey;
use crate::observe::ObserveRelation;

use std::sync::Arc;

/// Set of active observe relations on one resource node, keyed by
/// subscriber.
///
/// Iteration is snapshot-on-iterate: mutation may interleave with an
/// in-flight notification pass without tearing, and a relation removed
/// mid-pass is skipped by the membership re-check at delivery time.
#[derive(Debug, Default)]
pub struct ObserveRegistry {
    relations: RwLock<HashMap<RelationKey, Arc<ObserveRelation>>>,
}

impl ObserveRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a relation. When a relation with the same subscriber key is
    /// already present it is replaced and returned.
    pub fn add(&self, relation: Arc<ObserveRelation>) -> Option<Arc<ObserveRelation>> {
        let mut map = self
            .relations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        map.insert(relation.key().clone(), relation)
    }

    /// Removes a relation by identity. Returns false when the registry holds
    /// no entry, or a different relation, under that key.
    pub fn remove(&self, relation: &Arc<ObserveRelation>) -> bool {
        let mut map = self
            .relations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match map.get(relation.key()) {
            Some(existing) if Arc::ptr_eq(existing, relation) => {
                map.remove(relation.key());
                true
            }
            _ => false,
        }
    }

    /// True when this exact relation is currently registered.
    #[must_use]
    pub fn contains(&self, relation: &Arc<ObserveRelation>) -> bool {
        let map = self
            .relations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        map.get(relation.key())
            .is_some_and(|existing| Arc::ptr_eq(existing, relation))
    }

    /// Number of active relations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.relations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when no relations are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current relation set.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<ObserveRelation>> {
        self.relations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Arc::clone)
            .collect()
    }

    /// Removes and returns all relations.
    pub fn drain(&self) -> Vec<Arc<ObserveRelation>> {
        let mut map = self
            .relations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        map.drain().map(|(_, relation)| relation).collect()
    }
}

/// Strictly increasing per-node notification sequence counter.
///
/// The sequence advances by exactly one per successful `changed()` pass;
/// subscribers use it to detect stale or out-of-order notifications.
#[derive(Debug, Default)]
pub struct NotificationOrderer {
    seq: AtomicU32,
}

impl NotificationOrderer {
    /// Creates a counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current sequence number.
    #[must_use]
    pub fn current(&self) -> u32 {
        self.seq.load(Ordering::Acquire)
    }

    /// Advances and returns the next sequence number.
    pub fn next(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::AcqRel) + 1
    }
}
