//! Server-core assembly.
//!
//! Ties the pieces together the way a booting server does: build the route
//! tree from descriptors, hang it under a synthetic root, optionally attach
//! a notify pool to the root, and expose the dispatch entry point the
//! transport collaborator feeds requests into. Wire transport, security, and
//! discovery stay outside this crate.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Sender;
use log::info;

use crate::dispatch::Dispatcher;
use crate::error::RouteError;
use crate::exchange::{Request, Response};
use crate::observe::{NotifyPool, NotifyPoolConfig};
use crate::resource::ResourceNode;
use crate::router::RouteBuilder;

/// Server-core configuration.
#[derive(Debug, Clone, Default)]
pub struct CoapServerConfig {
    /// When set, `changed()` hands notification work to a pool of this
    /// shape instead of delivering synchronously on the caller's thread.
    pub notify: Option<NotifyPoolConfig>,
}

/// The assembled dispatch core: route tree, dispatcher, and optional notify
/// pool.
#[derive(Debug)]
pub struct CoapServer {
    root: Arc<ResourceNode>,
    dispatcher: Dispatcher,
    table: HashMap<String, String>,
    pool: Option<Arc<NotifyPool>>,
}

impl CoapServer {
    /// Builds the server core from a route set. Route errors are fatal and
    /// abort startup.
    pub fn new(config: CoapServerConfig, routes: RouteBuilder) -> Result<Self, RouteError> {
        let (tree_root, table) = routes.build()?.into_parts();

        let root = ResourceNode::root();
        root.add(tree_root)?;

        let pool = config.notify.map(|cfg| {
            let pool = NotifyPool::new(cfg);
            root.set_notify_pool(Arc::clone(&pool));
            pool
        });

        info!(
            "server core ready: {} route(s), async notify: {}",
            table.len(),
            pool.is_some()
        );

        Ok(Self {
            dispatcher: Dispatcher::new(Arc::clone(&root)),
            root,
            table,
            pool,
        })
    }

    /// Delivery entry point for the transport collaborator.
    pub fn deliver(&self, request: Request, reply_tx: Sender<Response>) {
        self.dispatcher.deliver(request, reply_tx);
    }

    /// Resolves a path to its resource node.
    #[must_use]
    pub fn find_resource(&self, path: &str) -> Option<Arc<ResourceNode>> {
        self.dispatcher.find_resource(path)
    }

    /// The synthetic server root.
    #[must_use]
    pub const fn root(&self) -> &Arc<ResourceNode> {
        &self.root
    }

    /// Handler name registered at a normalized path.
    #[must_use]
    pub fn handler_at(&self, path: &str) -> Option<&str> {
        self.table.get(path).map(String::as_str)
    }

    /// The notify pool, when asynchronous notification is configured.
    #[must_use]
    pub const fn notify_pool(&self) -> Option<&Arc<NotifyPool>> {
        self.pool.as_ref()
    }

    /// Blocks until all notification work queued so far has completed.
    /// No-op without a pool; used for shutdown quiescence.
    pub fn quiesce(&self) {
        if let Some(pool) = &self.pool {
            let _ = pool.quiesce();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::FnHandler;
    use crate::method::{Method, ResponseCode};
    use crate::router::RouteDescriptor;
    use crossbeam_channel::bounded;

    fn routes() -> RouteBuilder {
        RouteBuilder::new()
            .route(RouteDescriptor::new(
                "/coap/foo",
                [Method::Get],
                FnHandler::new("h1", |ex| {
                    ex.respond_text(ResponseCode::Content, "foo");
                    Ok(())
                }),
            ))
            .route(RouteDescriptor::new(
                "/coap/baz",
                [],
                FnHandler::new("h2", |ex| {
                    ex.respond_text(ResponseCode::Content, "baz");
                    Ok(())
                }),
            ))
    }

    #[test]
    fn test_server_assembles_and_dispatches() {
        let server = CoapServer::new(CoapServerConfig::default(), routes()).unwrap();

        assert_eq!(server.handler_at("coap/foo"), Some("h1"));
        assert_eq!(server.handler_at("coap/baz"), Some("h2"));
        assert!(server.find_resource("coap/foo").is_some());
        assert!(server.notify_pool().is_none());

        let (tx, rx) = bounded(1);
        server.deliver(Request::new(Method::Get, "coap/foo"), tx);
        assert_eq!(rx.try_recv().unwrap().payload, b"foo");
    }

    #[test]
    fn test_server_with_notify_pool_reaches_leaves() {
        let server = CoapServer::new(
            CoapServerConfig {
                notify: Some(NotifyPoolConfig::default()),
            },
            routes(),
        )
        .unwrap();

        let foo = server.find_resource("coap/foo").unwrap();
        assert!(foo.notify_pool().is_some());
        server.quiesce();
    }

    #[test]
    fn test_duplicate_routes_abort_startup() {
        let routes = routes().route(RouteDescriptor::new(
            "coap/foo",
            [],
            FnHandler::new("h3", |_| Ok(())),
        ));
        assert!(CoapServer::new(CoapServerConfig::default(), routes).is_err());
    }
}
