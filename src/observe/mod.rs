//! Observe subsystem: relations, the per-node registry, sequence ordering,
//! and the optional asynchronous notify pool.
//!
//! A peer that registers interest in a resource gets an [`ObserveRelation`]
//! keyed by its address and token. Each node keeps its relations in an
//! [`ObserveRegistry`] and stamps outgoing notifications with a strictly
//! increasing sequence number from a [`NotificationOrderer`]. When a
//! [`NotifyPool`] is configured on the tree root, `changed()` hands
//! notification work to it and returns immediately.

/// Asynchronous notification worker pool.
pub mod notify;
/// Per-node relation set and sequence counter.
pub mod registry;
/// Observe relation and filters.
pub mod relation;

pub use notify::{NotifyPool, NotifyPoolConfig};
pub use registry::{NotificationOrderer, ObserveRegistry};
pub use relation::{ObserveRelation, RelationFilter};
