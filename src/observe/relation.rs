//! Observe relations.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::NotifyError;
use crate::exchange::{Exchange, RelationKey, Response};

/// A subscription by which a peer receives notifications when a resource's
/// state changes.
///
/// The relation holds the pending exchange of the originating request; every
/// notification is pushed through it. Cancellation is idempotent and
/// notifying a canceled relation is a no-op.
pub struct ObserveRelation {
    key: RelationKey,
    exchange: Arc<Exchange>,
    established: AtomicBool,
    canceled: AtomicBool,
    established_at: DateTime<Utc>,
}

impl ObserveRelation {
    /// Creates a pending (not yet established) relation from the exchange of
    /// the originating request.
    #[must_use]
    pub fn new(exchange: Arc<Exchange>) -> Arc<Self> {
        let key = RelationKey::from_request(exchange.request());
        Arc::new(Self {
            key,
            exchange,
            established: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            established_at: Utc::now(),
        })
    }

    /// Subscriber key.
    #[must_use]
    pub const fn key(&self) -> &RelationKey {
        &self.key
    }

    /// The pending exchange notifications are pushed through.
    #[must_use]
    pub const fn exchange(&self) -> &Arc<Exchange> {
        &self.exchange
    }

    /// True once the relation has been registered on its resource.
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    /// Marks the relation established.
    pub fn set_established(&self) {
        self.established.store(true, Ordering::Release);
    }

    /// True once the relation has been canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Cancels the relation. Idempotent; returns true only for the call that
    /// performed the cancellation.
    pub fn cancel(&self) -> bool {
        !self.canceled.swap(true, Ordering::AcqRel)
    }

    /// When the relation was created.
    #[must_use]
    pub const fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    /// Pushes a notification. No-op when the relation is canceled.
    pub fn notify(&self, response: Response) -> Result<(), NotifyError> {
        if self.is_canceled() {
            return Ok(());
        }
        self.exchange.push_notification(response)
    }
}

impl fmt::Debug for ObserveRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserveRelation")
            .field("key", &self.key.to_string())
            .field("established", &self.is_established())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Filter applied per relation during a `changed()` pass. A rejected
/// relation is skipped for that pass only.
pub trait RelationFilter: Send + Sync {
    /// Returns true when the relation should be notified.
    fn accept(&self, relation: &ObserveRelation) -> bool;
}

impl<F> RelationFilter for F
where
    F: Fn(&ObserveRelation) -> bool + Send + Sync,
{
    fn accept(&self, relation: &ObserveRelation) -> bool {
        self(relation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Request;
    use crate::method::{Method, ResponseCode};
    use crossbeam_channel::bounded;

    fn relation() -> (Arc<ObserveRelation>, crossbeam_channel::Receiver<Response>) {
        let (tx, rx) = bounded(8);
        let exchange = Exchange::new(
            Request::new(Method::Get, "coap/foo").observing(),
            tx,
        );
        (ObserveRelation::new(exchange), rx)
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (relation, _rx) = relation();
        assert!(!relation.is_canceled());
        assert!(relation.cancel());
        assert!(!relation.cancel());
        assert!(relation.is_canceled());
    }

    #[test]
    fn test_notify_canceled_is_noop() {
        let (relation, rx) = relation();
        relation.cancel();
        relation.notify(Response::new(ResponseCode::Content)).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notify_pushes_through_exchange() {
        let (relation, rx) = relation();
        relation.notify(Response::new(ResponseCode::Content)).unwrap();
        assert_eq!(rx.try_recv().unwrap().code, ResponseCode::Content);
    }

    #[test]
    fn test_closure_filter() {
        let (relation, _rx) = relation();
        let accept_all = |_: &ObserveRelation| true;
        let reject_all = |_: &ObserveRelation| false;
        assert!(RelationFilter::accept(&accept_all, &relation));
        assert!(!RelationFilter::accept(&reject_all, &relation));
    }
}
