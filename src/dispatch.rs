//! Request dispatch.
//!
//! The dispatcher walks the resource tree for an incoming request and either
//! invokes the matched handler or produces a structured rejection. Handler
//! failures are caught at this boundary, logged with the handler's identity,
//! and answered with a generic server error; they never propagate past the
//! dispatcher and never crash the serving loop.

use std::sync::Arc;

use crossbeam_channel::Sender;
use log::{debug, error};

use crate::exchange::{CoapExchange, Exchange, Request, Response};
use crate::method::{Method, ResponseCode};
use crate::observe::ObserveRelation;
use crate::resource::ResourceNode;

/// Walks the tree and routes requests to handlers.
#[derive(Debug)]
pub struct Dispatcher {
    root: Arc<ResourceNode>,
}

impl Dispatcher {
    /// Creates a dispatcher over a tree root. Routes built by
    /// [`RouteBuilder`](crate::router::RouteBuilder) sit beneath it.
    #[must_use]
    pub const fn new(root: Arc<ResourceNode>) -> Self {
        Self { root }
    }

    /// The tree root requests are resolved against.
    #[must_use]
    pub const fn root(&self) -> &Arc<ResourceNode> {
        &self.root
    }

    /// Entry point for the transport collaborator. Exactly one response goes
    /// out per request: the handler's, or a dispatcher-produced rejection.
    pub fn deliver(&self, request: Request, reply_tx: Sender<Response>) {
        let exchange = Exchange::new(request, reply_tx);
        match self.find_resource(&exchange.request().path) {
            Some(node) => self.handle_request(&node, &exchange),
            None => {
                debug!("no resource at '{}'", exchange.request().path);
                exchange.respond(Response::new(ResponseCode::NotFound));
            }
        }
    }

    /// Resolves a path to a node by walking children segment by segment.
    #[must_use]
    pub fn find_resource(&self, path: &str) -> Option<Arc<ResourceNode>> {
        let mut cursor = Arc::clone(&self.root);
        let mut walked = false;
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            cursor = cursor.get_child(segment)?;
            walked = true;
        }
        walked.then_some(cursor)
    }

    /// Handles a request already resolved to its node.
    ///
    /// A non-empty allowed-verb set excluding the request verb produces a
    /// 4.05 rejection without touching the handler; so does a node with no
    /// handler at all (synthetic placeholders).
    pub fn handle_request(&self, node: &Arc<ResourceNode>, exchange: &Arc<Exchange>) {
        let method = exchange.request().method;

        let allowed = node.allowed_methods();
        if !allowed.is_empty() && !allowed.contains(&method) {
            exchange.respond(Response::new(ResponseCode::MethodNotAllowed));
            return;
        }

        let Some(handler) = node.handler() else {
            exchange.respond(Response::new(ResponseCode::MethodNotAllowed));
            return;
        };

        let mut coap = CoapExchange::new(Arc::clone(exchange), Arc::clone(node));
        if exchange.request().observe && method == Method::Get && node.is_observable() {
            coap = coap.with_relation(ObserveRelation::new(Arc::clone(exchange)));
        }

        if let Err(err) = handler.invoke(&coap) {
            error!(
                "handler '{}' failed for {} {}: {err}",
                handler.name(),
                method,
                exchange.request().path
            );
            // Always answer the peer; a no-op if the handler responded
            // before failing.
            exchange.respond(Response::new(ResponseCode::InternalServerError));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::FnHandler;
    use crossbeam_channel::bounded;
    use std::collections::HashSet;

    fn tree_with(handler: Arc<crate::handler::FnHandler>) -> Dispatcher {
        let root = ResourceNode::root();
        let coap = ResourceNode::placeholder("coap");
        let foo = ResourceNode::with_handler(
            "foo",
            HashSet::from([Method::Get, Method::Post]),
            handler,
        );
        coap.add(foo).unwrap();
        root.add(coap).unwrap();
        Dispatcher::new(root)
    }

    #[test]
    fn test_unknown_path_is_not_found() {
        let dispatcher = tree_with(FnHandler::new("h", |ex| {
            ex.respond(ResponseCode::Content);
            Ok(())
        }));
        let (tx, rx) = bounded(1);
        dispatcher.deliver(Request::new(Method::Get, "coap/missing"), tx);
        assert_eq!(rx.try_recv().unwrap().code, ResponseCode::NotFound);
    }

    #[test]
    fn test_empty_path_is_not_found() {
        let dispatcher = tree_with(FnHandler::new("h", |ex| {
            ex.respond(ResponseCode::Content);
            Ok(())
        }));
        let (tx, rx) = bounded(1);
        dispatcher.deliver(Request::new(Method::Get, "/"), tx);
        assert_eq!(rx.try_recv().unwrap().code, ResponseCode::NotFound);
    }

    #[test]
    fn test_allowed_verb_reaches_handler() {
        let dispatcher = tree_with(FnHandler::new("h", |ex| {
            ex.respond_text(ResponseCode::Content, "ok");
            Ok(())
        }));
        let (tx, rx) = bounded(1);
        dispatcher.deliver(Request::new(Method::Get, "coap/foo"), tx);
        let response = rx.try_recv().unwrap();
        assert_eq!(response.code, ResponseCode::Content);
        assert_eq!(response.payload, b"ok");
    }

    #[test]
    fn test_excluded_verb_is_rejected_without_invocation() {
        let dispatcher = tree_with(FnHandler::new("h", |_ex| {
            panic!("handler must not run");
        }));
        let (tx, rx) = bounded(1);
        dispatcher.deliver(Request::new(Method::Put, "coap/foo"), tx);
        assert_eq!(rx.try_recv().unwrap().code, ResponseCode::MethodNotAllowed);
    }

    #[test]
    fn test_placeholder_rejects_every_verb() {
        let dispatcher = tree_with(FnHandler::new("h", |ex| {
            ex.respond(ResponseCode::Content);
            Ok(())
        }));
        let (tx, rx) = bounded(1);
        dispatcher.deliver(Request::new(Method::Get, "coap"), tx);
        assert_eq!(rx.try_recv().unwrap().code, ResponseCode::MethodNotAllowed);
    }

    #[test]
    fn test_handler_error_becomes_server_error() {
        let dispatcher = tree_with(FnHandler::new("h", |_ex| {
            Err(HandlerError::new("boom"))
        }));
        let (tx, rx) = bounded(1);
        dispatcher.deliver(Request::new(Method::Get, "coap/foo"), tx);
        assert_eq!(
            rx.try_recv().unwrap().code,
            ResponseCode::InternalServerError
        );

        // The dispatcher survives and keeps serving.
        let (tx, rx) = bounded(1);
        dispatcher.deliver(Request::new(Method::Put, "coap/foo"), tx);
        assert_eq!(rx.try_recv().unwrap().code, ResponseCode::MethodNotAllowed);
    }

    #[test]
    fn test_handler_response_wins_over_error_conversion() {
        let dispatcher = tree_with(FnHandler::new("h", |ex| {
            ex.respond(ResponseCode::Content);
            Err(HandlerError::new("failed after responding"))
        }));
        let (tx, rx) = bounded(2);
        dispatcher.deliver(Request::new(Method::Get, "coap/foo"), tx);
        assert_eq!(rx.try_recv().unwrap().code, ResponseCode::Content);
        assert!(rx.try_recv().is_err());
    }
}
