//! The resource tree.
//!
//! A [`ResourceNode`] is one addressable entity in the routing tree: a name
//! unique among its siblings, a materialized path, children keyed by name, a
//! non-owning parent backlink, and the observe machinery for that node. The
//! tree owns nodes top-down through `Arc`s in the children maps; the parent
//! link is a `Weak` used only for path recomputation and upward traversal.
//!
//! Concurrency discipline: structural mutation (`add`, `delete_child`,
//! `set_name`, `set_path`) on a given node is serialized by that node's
//! structural mutex and does not block mutation elsewhere in the tree.
//! Children are behind an `RwLock`, so lookups and dispatch proceed
//! concurrently with sibling mutation.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use log::{info, warn};

use crate::error::{NotifyError, TreeError};
use crate::exchange::{CoapExchange, Response};
use crate::handler::Handler;
use crate::method::{DeliveryMode, Method, ResponseCode};
use crate::observe::{
    NotificationOrderer, NotifyPool, ObserveRegistry, ObserveRelation, RelationFilter,
};

// Tree locks guard plain data; a guard recovered from a poisoned lock is
// still structurally valid.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observer of structural events on one node.
///
/// All methods default to no-ops so implementations pick the events they
/// care about.
pub trait ResourceObserver: Send + Sync {
    /// A child was added beneath the observed node.
    fn added_child(&self, _child: &Arc<ResourceNode>) {}
    /// A child was removed from beneath the observed node.
    fn removed_child(&self, _child: &Arc<ResourceNode>) {}
    /// The observed node's path changed; `_old` is the previous path.
    fn changed_path(&self, _old: &str) {}
    /// The observed node's name changed; `_old` is the previous name.
    fn changed_name(&self, _old: &str) {}
    /// An observe relation was added on the observed node.
    fn added_observe_relation(&self, _relation: &Arc<ObserveRelation>) {}
    /// An observe relation was removed from the observed node.
    fn removed_observe_relation(&self, _relation: &Arc<ObserveRelation>) {}
}

/// One addressable node in the resource tree.
pub struct ResourceNode {
    name: RwLock<String>,
    path: RwLock<String>,
    visible: AtomicBool,
    observable: AtomicBool,
    attributes: RwLock<HashMap<String, Vec<String>>>,
    children: RwLock<HashMap<String, Arc<ResourceNode>>>,
    parent: RwLock<Weak<ResourceNode>>,
    allowed: RwLock<HashSet<Method>>,
    observe_type: RwLock<Option<DeliveryMode>>,
    handler: Option<Arc<dyn Handler>>,
    relations: ObserveRegistry,
    orderer: NotificationOrderer,
    notifying: AtomicBool,
    structure: Mutex<()>,
    observers: RwLock<Vec<Arc<dyn ResourceObserver>>>,
    pool: RwLock<Option<Arc<NotifyPool>>>,
}

/// Clears the "notification in progress" flag on scope exit, including
/// handler panics.
struct NotifyGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for NotifyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl ResourceNode {
    fn build(name: String, handler: Option<Arc<dyn Handler>>, allowed: HashSet<Method>) -> Arc<Self> {
        Arc::new(Self {
            name: RwLock::new(name),
            path: RwLock::new(String::new()),
            visible: AtomicBool::new(true),
            observable: AtomicBool::new(false),
            attributes: RwLock::new(HashMap::new()),
            children: RwLock::new(HashMap::new()),
            parent: RwLock::new(Weak::new()),
            allowed: RwLock::new(allowed),
            observe_type: RwLock::new(None),
            handler,
            relations: ObserveRegistry::new(),
            orderer: NotificationOrderer::new(),
            notifying: AtomicBool::new(false),
            structure: Mutex::new(()),
            observers: RwLock::new(Vec::new()),
            pool: RwLock::new(None),
        })
    }

    /// Creates a plain node with no handler and an empty allowed-verb set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), None, HashSet::new())
    }

    /// Creates a synthetic placeholder for an intermediate path segment. It
    /// exists only for addressing and answers every request not-allowed.
    #[must_use]
    pub fn placeholder(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), None, HashSet::new())
    }

    /// Creates a terminal node bound to a handler. An empty `allowed` set
    /// means the handler accepts every verb.
    #[must_use]
    pub fn with_handler(
        name: impl Into<String>,
        allowed: HashSet<Method>,
        handler: Arc<dyn Handler>,
    ) -> Arc<Self> {
        Self::build(name.into(), Some(handler), allowed)
    }

    /// Creates the synthetic server root (empty name, empty path).
    #[must_use]
    pub fn root() -> Arc<Self> {
        Self::build(String::new(), None, HashSet::new())
    }

    // ------------------------------------------------------------------
    // Identity and addressing
    // ------------------------------------------------------------------

    /// Segment name, unique among siblings.
    #[must_use]
    pub fn name(&self) -> String {
        read(&self.name).clone()
    }

    /// Materialized path of the ancestor chain, `""` at the root.
    #[must_use]
    pub fn path(&self) -> String {
        read(&self.path).clone()
    }

    /// Full URI: `path + name`.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("{}{}", self.path(), self.name())
    }

    /// The parent node, if attached.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<ResourceNode>> {
        read(&self.parent).upgrade()
    }

    /// Renames the node. When attached, the re-key in the parent's children
    /// map is atomic with respect to that parent: detach under the old name,
    /// rename, re-attach under the new name as one guarded step. The new
    /// path propagates to every descendant before returning.
    pub fn set_name(self: &Arc<Self>, name: impl Into<String>) -> Result<(), TreeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TreeError::InvalidName);
        }

        let old = if let Some(parent) = self.parent() {
            let _guard = lock(&parent.structure);
            let mut siblings = write(&parent.children);
            let old = self.name();
            siblings.remove(&old);
            *write(&self.name) = name;
            siblings.insert(self.name(), Arc::clone(self));
            old
        } else {
            let mut slot = write(&self.name);
            std::mem::replace(&mut *slot, name)
        };

        self.adjust_children_paths();
        self.notify_structural(|obs| obs.changed_name(&old));
        Ok(())
    }

    /// Rewrites the node's path and propagates to every descendant before
    /// returning.
    pub fn set_path(self: &Arc<Self>, path: impl Into<String>) {
        let old = {
            let mut slot = write(&self.path);
            std::mem::replace(&mut *slot, path.into())
        };
        self.notify_structural(|obs| obs.changed_path(&old));
        self.adjust_children_paths();
    }

    fn adjust_children_paths(self: &Arc<Self>) {
        let child_path = format!("{}{}/", self.path(), self.name());
        for child in self.children() {
            child.set_path(child_path.clone());
        }
    }

    fn set_parent(self: &Arc<Self>, parent: Option<&Arc<ResourceNode>>) {
        match parent {
            Some(parent) => {
                *write(&self.parent) = Arc::downgrade(parent);
                *write(&self.path) = format!("{}{}/", parent.path(), parent.name());
            }
            None => {
                *write(&self.parent) = Weak::new();
                *write(&self.path) = String::new();
            }
        }
        self.adjust_children_paths();
    }

    // ------------------------------------------------------------------
    // Tree structure
    // ------------------------------------------------------------------

    /// Adds a child.
    ///
    /// A child that already has a parent is first detached from it. When the
    /// child's name equals this node's own name, the child's children are
    /// merged into this subtree instead (same-name collisions merge
    /// recursively); otherwise the child is inserted directly. Structural
    /// observers see the addition either way.
    pub fn add(self: &Arc<Self>, child: Arc<ResourceNode>) -> Result<(), TreeError> {
        if child.name().is_empty() {
            return Err(TreeError::InvalidChild);
        }
        if let Some(old_parent) = child.parent() {
            old_parent.delete_child(&child);
        }

        {
            let _guard = lock(&self.structure);
            if child.name() == self.name() {
                // The colliding node itself is discarded; only its children
                // move into this subtree.
                self.merge_children(&child);
            } else {
                write(&self.children).insert(child.name(), Arc::clone(&child));
                child.set_parent(Some(self));
            }
        }

        self.notify_structural(|obs| obs.added_child(&child));
        Ok(())
    }

    /// Moves each of `other`'s children into this subtree. A name collision
    /// merges the colliding subtrees rather than replacing the existing one.
    ///
    /// The caller holds `self.structure`; every nested merge level takes the
    /// nested node's own structure lock so the check-then-insert below stays
    /// serialized against concurrent `add`/`delete_child` on that node. Lock
    /// order is strictly parent to child.
    fn merge_children(self: &Arc<Self>, other: &Arc<ResourceNode>) {
        let grandchildren: Vec<Arc<ResourceNode>> = {
            let mut map = write(&other.children);
            map.drain().map(|(_, node)| node).collect()
        };
        for grandchild in grandchildren {
            let existing = read(&self.children).get(&grandchild.name()).map(Arc::clone);
            match existing {
                Some(existing) => {
                    let _guard = lock(&existing.structure);
                    existing.merge_children(&grandchild);
                }
                None => {
                    write(&self.children).insert(grandchild.name(), Arc::clone(&grandchild));
                    grandchild.set_parent(Some(self));
                }
            }
        }
    }

    /// Removes `child` if it is this node's child under its current name.
    /// The removed node is detached (parent link cleared, path reset).
    pub fn delete_child(self: &Arc<Self>, child: &Arc<ResourceNode>) -> bool {
        let removed = {
            let _guard = lock(&self.structure);
            let mut children = write(&self.children);
            match children.get(&child.name()) {
                Some(existing) if Arc::ptr_eq(existing, child) => {
                    children.remove(&child.name());
                    true
                }
                _ => false,
            }
        };
        if removed {
            child.set_parent(None);
            self.notify_structural(|obs| obs.removed_child(child));
        }
        removed
    }

    /// Removes a child by name and returns it detached.
    pub fn remove_child(self: &Arc<Self>, name: &str) -> Option<Arc<ResourceNode>> {
        let removed = {
            let _guard = lock(&self.structure);
            write(&self.children).remove(name)
        };
        if let Some(child) = &removed {
            child.set_parent(None);
            self.notify_structural(|obs| obs.removed_child(child));
        }
        removed
    }

    /// Deletes this node: detaches it from its parent and, when observable,
    /// cancels every observe relation with a terminal "resource gone"
    /// notification.
    pub fn delete(self: &Arc<Self>) {
        if let Some(parent) = self.parent() {
            parent.delete_child(self);
        }
        if self.is_observable() {
            self.clear_and_notify_observe_relations(ResponseCode::NotFound);
        }
    }

    /// Child lookup by name.
    #[must_use]
    pub fn get_child(&self, name: &str) -> Option<Arc<ResourceNode>> {
        read(&self.children).get(name).map(Arc::clone)
    }

    /// Snapshot of the current children.
    #[must_use]
    pub fn children(&self) -> Vec<Arc<ResourceNode>> {
        read(&self.children).values().map(Arc::clone).collect()
    }

    /// Number of children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        read(&self.children).len()
    }

    // ------------------------------------------------------------------
    // Flags, attributes, verbs
    // ------------------------------------------------------------------

    /// Visibility flag; carried, not interpreted by the core.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    /// Sets the visibility flag.
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
    }

    /// True when the node accepts observe registrations.
    #[must_use]
    pub fn is_observable(&self) -> bool {
        self.observable.load(Ordering::Acquire)
    }

    /// Sets the observable flag.
    pub fn set_observable(&self, observable: bool) {
        self.observable.store(observable, Ordering::Release);
    }

    /// Allowed-verb set. Empty means not-allowed to everything on nodes
    /// without a handler, and all-verbs-allowed on handler nodes.
    #[must_use]
    pub fn allowed_methods(&self) -> HashSet<Method> {
        read(&self.allowed).clone()
    }

    /// Replaces the allowed-verb set.
    pub fn set_allowed_methods(&self, allowed: HashSet<Method>) {
        *write(&self.allowed) = allowed;
    }

    /// The bound handler, if this is a terminal node.
    #[must_use]
    pub fn handler(&self) -> Option<&Arc<dyn Handler>> {
        self.handler.as_ref()
    }

    /// Delivery-mode override for notifications.
    #[must_use]
    pub fn observe_type(&self) -> Option<DeliveryMode> {
        *read(&self.observe_type)
    }

    /// Sets the delivery-mode override. Control-plane modes are rejected.
    pub fn set_observe_type(&self, mode: DeliveryMode) -> Result<(), TreeError> {
        if mode.is_control_plane() {
            return Err(TreeError::InvalidObserveType { mode });
        }
        *write(&self.observe_type) = Some(mode);
        Ok(())
    }

    /// Adds an attribute value under a metadata key. Keys are opaque to the
    /// core and multi-valued.
    pub fn add_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        write(&self.attributes)
            .entry(key.into())
            .or_default()
            .push(value.into());
    }

    /// Values recorded under a metadata key.
    #[must_use]
    pub fn attribute_values(&self, key: &str) -> Vec<String> {
        read(&self.attributes).get(key).cloned().unwrap_or_default()
    }

    /// Snapshot of all attributes.
    #[must_use]
    pub fn attributes(&self) -> HashMap<String, Vec<String>> {
        read(&self.attributes).clone()
    }

    // ------------------------------------------------------------------
    // Structural observers
    // ------------------------------------------------------------------

    /// Registers a structural observer.
    pub fn add_observer(&self, observer: Arc<dyn ResourceObserver>) {
        write(&self.observers).push(observer);
    }

    /// Removes a structural observer by identity.
    pub fn remove_observer(&self, observer: &Arc<dyn ResourceObserver>) {
        write(&self.observers).retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    fn notify_structural(&self, f: impl Fn(&dyn ResourceObserver)) {
        let observers = read(&self.observers).clone();
        for observer in observers {
            f(observer.as_ref());
        }
    }

    // ------------------------------------------------------------------
    // Observe relations
    // ------------------------------------------------------------------

    /// Registers an observe relation. An existing relation under the same
    /// subscriber key is replaced and canceled.
    pub fn add_observe_relation(&self, relation: Arc<ObserveRelation>) {
        match self.relations.add(Arc::clone(&relation)) {
            Some(replaced) => {
                replaced.cancel();
                info!(
                    "replacing observe relation {} with {} on {}",
                    replaced.key(),
                    relation.key(),
                    self.uri()
                );
            }
            None => {
                info!(
                    "established observe relation {} on {}",
                    relation.key(),
                    self.uri()
                );
            }
        }
        self.notify_structural(|obs| obs.added_observe_relation(&relation));
    }

    /// Removes an observe relation by identity.
    pub fn remove_observe_relation(&self, relation: &Arc<ObserveRelation>) {
        if self.relations.remove(relation) {
            self.notify_structural(|obs| obs.removed_observe_relation(relation));
        }
    }

    /// Number of active observe relations.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.relations.len()
    }

    /// Current notification sequence number.
    #[must_use]
    pub fn current_sequence(&self) -> u32 {
        self.orderer.current()
    }

    /// Cancels every relation without notifying subscribers.
    pub fn clear_observe_relations(&self) {
        for relation in self.relations.drain() {
            relation.cancel();
        }
    }

    /// Cancels every relation and attempts one terminal notification per
    /// relation with the given code. Delivery failures are logged, not
    /// retried.
    pub fn clear_and_notify_observe_relations(&self, code: ResponseCode) {
        for relation in self.relations.drain() {
            relation.cancel();
            if let Err(err) = relation.exchange().push_notification(Response::new(code)) {
                warn!(
                    "terminal notification to {} for {} failed: {err}",
                    relation.key(),
                    self.uri()
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Change notification
    // ------------------------------------------------------------------

    /// Notifies every observe relation of a state change.
    pub fn changed(self: &Arc<Self>) -> Result<(), NotifyError> {
        self.changed_filtered(None)
    }

    /// Notifies observe relations of a state change, skipping relations the
    /// filter rejects. The sequence number advances by exactly one whether
    /// or not any relation passes the filter.
    ///
    /// With a notify pool configured on the tree root, the pass is handed to
    /// the pool and this call returns immediately. Without one, the pass
    /// runs synchronously under a non-reentrant per-node guard; a nested
    /// synchronous `changed()` on the same node fails with
    /// [`NotifyError::RecursionDetected`] instead of deadlocking.
    pub fn changed_filtered(
        self: &Arc<Self>,
        filter: Option<Arc<dyn RelationFilter>>,
    ) -> Result<(), NotifyError> {
        if let Some(pool) = self.notify_pool() {
            // Keyed by node identity: all of this node's passes land on one
            // worker and run in submission order, so subscribers never see a
            // later sequence number before an earlier one.
            let node = Arc::clone(self);
            let key = Arc::as_ptr(self) as usize;
            return pool.execute_keyed(key, move || {
                node.notify_observe_relations(filter.as_deref());
            });
        }

        if self
            .notifying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(NotifyError::RecursionDetected { uri: self.uri() });
        }
        let _guard = NotifyGuard {
            flag: &self.notifying,
        };
        self.notify_observe_relations(filter.as_deref());
        Ok(())
    }

    fn notify_observe_relations(self: &Arc<Self>, filter: Option<&dyn RelationFilter>) {
        let seq = self.orderer.next();
        for relation in self.relations.snapshot() {
            if let Some(filter) = filter {
                if !filter.accept(&relation) {
                    continue;
                }
            }
            // A relation canceled or removed since the snapshot must not
            // receive this pass.
            if relation.is_canceled() || !self.relations.contains(&relation) {
                continue;
            }
            self.notify_relation(&relation, seq);
        }
    }

    fn notify_relation(self: &Arc<Self>, relation: &Arc<ObserveRelation>, seq: u32) {
        match &self.handler {
            Some(handler) => {
                // Re-produce the representation for this subscriber.
                let exchange = CoapExchange::notification(
                    Arc::clone(relation.exchange()),
                    Arc::clone(self),
                    seq,
                );
                if let Err(err) = handler.invoke(&exchange) {
                    warn!(
                        "notification handler '{}' failed for {}: {err}",
                        handler.name(),
                        relation.key()
                    );
                }
            }
            None => {
                let mut response = Response::new(ResponseCode::Content);
                response.observe = Some(seq);
                response.mode = self.observe_type();
                if let Err(err) = relation.notify(response) {
                    warn!("notification to {} failed: {err}", relation.key());
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Execution facility
    // ------------------------------------------------------------------

    /// Sets the notify pool on this node. Descendants inherit it through the
    /// parent chain; conventionally it is set on the tree root.
    pub fn set_notify_pool(&self, pool: Arc<NotifyPool>) {
        *write(&self.pool) = Some(pool);
    }

    /// The notify pool configured on this node or the nearest ancestor.
    #[must_use]
    pub fn notify_pool(&self) -> Option<Arc<NotifyPool>> {
        if let Some(pool) = read(&self.pool).clone() {
            return Some(pool);
        }
        self.parent().and_then(|parent| parent.notify_pool())
    }

    /// Runs a task on the configured notify pool, or inline when none is
    /// configured.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<(), NotifyError> {
        match self.notify_pool() {
            Some(pool) => pool.execute(task),
            None => {
                task();
                Ok(())
            }
        }
    }

    /// Runs a task and waits for it to complete.
    pub fn execute_and_wait(
        &self,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<(), NotifyError> {
        match self.notify_pool() {
            Some(pool) => pool.execute_and_wait(task),
            None => {
                task();
                Ok(())
            }
        }
    }
}

impl fmt::Debug for ResourceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceNode")
            .field("name", &self.name())
            .field("path", &self.path())
            .field("children", &self.child_count())
            .field("observable", &self.is_observable())
            .field("relations", &self.observer_count())
            .finish()
    }
}
