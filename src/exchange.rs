//! Request/response exchange plumbing.
//!
//! The transport collaborator hands the dispatcher a [`Request`] together
//! with a reply channel. An [`Exchange`] wraps both and enforces the
//! at-most-once response contract; observe notifications reuse the exchange
//! after the initial response has been sent. [`CoapExchange`] is the
//! handler-facing view and finalizes observe-relation establishment when a
//! successful response is produced.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NotifyError;
use crate::method::{DeliveryMode, Method, ResponseCode};
use crate::observe::ObserveRelation;
use crate::resource::ResourceNode;

/// Inbound request as produced by the transport collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id for logging.
    pub id: Uuid,
    /// Request verb.
    pub method: Method,
    /// Requested path, separator-delimited.
    pub path: String,
    /// Peer-chosen token identifying the exchange on the wire.
    pub token: Vec<u8>,
    /// Originating peer address.
    pub source: SocketAddr,
    /// True when the request asks to establish an observe relation.
    pub observe: bool,
    /// Opaque request body.
    pub payload: Vec<u8>,
}

impl Request {
    /// Creates a request with a fresh id and empty token/payload.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            token: Vec::new(),
            source: SocketAddr::from(([0, 0, 0, 0], 0)),
            observe: false,
            payload: Vec::new(),
        }
    }

    /// Sets the originating peer address.
    #[must_use]
    pub fn from_source(mut self, source: SocketAddr) -> Self {
        self.source = source;
        self
    }

    /// Sets the wire token.
    #[must_use]
    pub fn with_token(mut self, token: Vec<u8>) -> Self {
        self.token = token;
        self
    }

    /// Marks the request as an observe registration.
    #[must_use]
    pub fn observing(mut self) -> Self {
        self.observe = true;
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

/// Outbound response or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Response code.
    pub code: ResponseCode,
    /// Opaque body.
    pub payload: Vec<u8>,
    /// Observe sequence number, present on notifications and on the
    /// response that establishes a relation.
    pub observe: Option<u32>,
    /// Delivery-mode override requested by the resource.
    pub mode: Option<DeliveryMode>,
}

impl Response {
    /// Creates an empty response with the given code.
    #[must_use]
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            payload: Vec::new(),
            observe: None,
            mode: None,
        }
    }

    /// Attaches a body.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Attaches a UTF-8 body.
    #[must_use]
    pub fn with_text(code: ResponseCode, text: &str) -> Self {
        Self::new(code).with_payload(text.as_bytes().to_vec())
    }
}

/// Subscriber identity, derived from the originating request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationKey {
    source: SocketAddr,
    token: Vec<u8>,
}

impl RelationKey {
    /// Derives the key from a request's peer address and token.
    #[must_use]
    pub fn from_request(request: &Request) -> Self {
        Self {
            source: request.source,
            token: request.token.clone(),
        }
    }

    /// Originating peer address.
    #[must_use]
    pub const fn source(&self) -> SocketAddr {
        self.source
    }
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#", self.source)?;
        for byte in &self.token {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A pending request/response exchange.
///
/// The dispatcher produces at most one response per request through
/// [`Exchange::respond`]; established observe relations keep the exchange
/// alive and push further notifications through it.
pub struct Exchange {
    request: Request,
    reply_tx: Sender<Response>,
    responded: AtomicBool,
}

impl Exchange {
    /// Wraps a request and its reply channel.
    #[must_use]
    pub fn new(request: Request, reply_tx: Sender<Response>) -> Arc<Self> {
        Arc::new(Self {
            request,
            reply_tx,
            responded: AtomicBool::new(false),
        })
    }

    /// The request this exchange answers.
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// True once the initial response has been sent.
    #[must_use]
    pub fn has_responded(&self) -> bool {
        self.responded.load(Ordering::Acquire)
    }

    /// Sends the initial response. Later calls are no-ops; returns whether
    /// this call actually delivered.
    pub fn respond(&self, response: Response) -> bool {
        if self.responded.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.reply_tx.try_send(response).is_ok()
    }

    /// Pushes a notification through the open exchange, bypassing the
    /// at-most-once guard.
    pub fn push_notification(&self, response: Response) -> Result<(), NotifyError> {
        match self.reply_tx.try_send(response) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(NotifyError::QueueFull {
                path: format!("exchange {}", self.request.id),
            }),
            Err(TrySendError::Disconnected(_)) => Err(NotifyError::Disconnected {
                path: format!("exchange {}", self.request.id),
            }),
        }
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("request", &self.request)
            .field("responded", &self.has_responded())
            .finish()
    }
}

/// Handler-facing view of an exchange, bound to the resource it targets.
///
/// For regular requests, a successful response stamps the resource's current
/// observe sequence and establishes a pending relation. For notification
/// re-delivery the sequence number is pre-assigned by the notifying node and
/// the response goes out through [`Exchange::push_notification`].
pub struct CoapExchange {
    exchange: Arc<Exchange>,
    resource: Arc<ResourceNode>,
    relation: Option<Arc<ObserveRelation>>,
    notification_seq: Option<u32>,
}

impl CoapExchange {
    pub(crate) fn new(exchange: Arc<Exchange>, resource: Arc<ResourceNode>) -> Self {
        Self {
            exchange,
            resource,
            relation: None,
            notification_seq: None,
        }
    }

    pub(crate) fn with_relation(mut self, relation: Arc<ObserveRelation>) -> Self {
        self.relation = Some(relation);
        self
    }

    pub(crate) fn notification(
        exchange: Arc<Exchange>,
        resource: Arc<ResourceNode>,
        seq: u32,
    ) -> Self {
        Self {
            exchange,
            resource,
            relation: None,
            notification_seq: Some(seq),
        }
    }

    /// The request being answered.
    #[must_use]
    pub fn request(&self) -> &Request {
        self.exchange.request()
    }

    /// The resource this exchange targets.
    #[must_use]
    pub const fn resource(&self) -> &Arc<ResourceNode> {
        &self.resource
    }

    /// True when this exchange re-delivers a state-change notification
    /// rather than answering a fresh request.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.notification_seq.is_some()
    }

    /// Responds with an empty body.
    pub fn respond(&self, code: ResponseCode) {
        self.finish(Response::new(code));
    }

    /// Responds with a body.
    pub fn respond_payload(&self, code: ResponseCode, payload: Vec<u8>) {
        self.finish(Response::new(code).with_payload(payload));
    }

    /// Responds with a UTF-8 body.
    pub fn respond_text(&self, code: ResponseCode, text: &str) {
        self.finish(Response::with_text(code, text));
    }

    fn finish(&self, mut response: Response) {
        if let Some(seq) = self.notification_seq {
            response.observe = Some(seq);
            if response.mode.is_none() {
                response.mode = self.resource.observe_type();
            }
            if let Err(err) = self.exchange.push_notification(response) {
                debug!(
                    "notification push failed for {}: {err}",
                    self.resource.uri()
                );
            }
            return;
        }

        if response.code.is_success() {
            if let Some(relation) = &self.relation {
                if !relation.is_canceled() {
                    response.observe = Some(self.resource.current_sequence());
                    if relation.is_established() {
                        if let Some(mode) = self.resource.observe_type() {
                            response.mode = Some(mode);
                        }
                    } else {
                        relation.set_established();
                        self.resource.add_observe_relation(Arc::clone(relation));
                    }
                }
            }
        }
        self.exchange.respond(response);
    }
}

impl fmt::Debug for CoapExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoapExchange")
            .field("request", self.request())
            .field("resource", &self.resource.uri())
            .field("notification_seq", &self.notification_seq)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_exchange_responds_at_most_once() {
        let (tx, rx) = bounded(4);
        let exchange = Exchange::new(Request::new(Method::Get, "coap/foo"), tx);

        assert!(exchange.respond(Response::new(ResponseCode::Content)));
        assert!(!exchange.respond(Response::new(ResponseCode::NotFound)));
        assert!(exchange.has_responded());

        let first = rx.try_recv().unwrap();
        assert_eq!(first.code, ResponseCode::Content);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_push_notification_bypasses_once_guard() {
        let (tx, rx) = bounded(4);
        let exchange = Exchange::new(Request::new(Method::Get, "coap/foo"), tx);

        assert!(exchange.respond(Response::new(ResponseCode::Content)));
        exchange
            .push_notification(Response::new(ResponseCode::Content))
            .unwrap();
        exchange
            .push_notification(Response::new(ResponseCode::Content))
            .unwrap();

        assert_eq!(rx.len(), 3);
    }

    #[test]
    fn test_push_notification_reports_disconnect() {
        let (tx, rx) = bounded(1);
        let exchange = Exchange::new(Request::new(Method::Get, "coap/foo"), tx);
        drop(rx);

        let err = exchange
            .push_notification(Response::new(ResponseCode::Content))
            .unwrap_err();
        assert!(matches!(err, NotifyError::Disconnected { .. }));
    }

    #[test]
    fn test_relation_key_display_includes_token() {
        let request = Request::new(Method::Get, "coap/foo")
            .from_source(SocketAddr::from(([127, 0, 0, 1], 5683)))
            .with_token(vec![0xAB, 0x01]);
        let key = RelationKey::from_request(&request);
        assert_eq!(key.to_string(), "127.0.0.1:5683#ab01");
    }

    #[test]
    fn test_request_builders() {
        let request = Request::new(Method::Put, "a/b")
            .observing()
            .with_payload(b"x".to_vec());
        assert!(request.observe);
        assert_eq!(request.payload, b"x");
        assert_eq!(request.method, Method::Put);
    }
}
