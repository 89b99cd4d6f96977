//! # coaptree
//!
//! The dispatch core of a CoAP server: a concurrent resource tree,
//! observe-relation bookkeeping with ordered change notifications, a
//! route-table builder that turns flat endpoint declarations into a merged
//! tree, and the dispatcher that resolves requests to handlers.
//!
//! The crate deliberately stops at the dispatch boundary. Wire encoding,
//! datagram transport, DTLS, and resource discovery live in collaborating
//! components that feed [`Request`]s in and consume [`Response`]s out.
//!
//! ## Quick start
//!
//! ```
//! use coaptree::{
//!     CoapServer, CoapServerConfig, FnHandler, Method, Request, ResponseCode,
//!     RouteBuilder, RouteDescriptor,
//! };
//!
//! let routes = RouteBuilder::new().route(RouteDescriptor::new(
//!     "/sensors/temp",
//!     [Method::Get],
//!     FnHandler::new("temp", |exchange| {
//!         exchange.respond_text(ResponseCode::Content, "21.5");
//!         Ok(())
//!     }),
//! ));
//!
//! let server = CoapServer::new(CoapServerConfig::default(), routes).unwrap();
//! let (tx, rx) = crossbeam_channel::bounded(1);
//! server.deliver(Request::new(Method::Get, "sensors/temp"), tx);
//! assert_eq!(rx.recv().unwrap().payload, b"21.5");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod handler;
pub mod method;
pub mod observe;
pub mod resource;
pub mod router;
pub mod server;

pub use dispatch::Dispatcher;
pub use error::{CoapResult, CoapTreeError, HandlerError, NotifyError, RouteError, TreeError};
pub use exchange::{CoapExchange, Exchange, RelationKey, Request, Response};
pub use handler::{FnHandler, Handler};
pub use method::{DeliveryMode, Method, ResponseCode};
pub use observe::{
    NotificationOrderer, NotifyPool, NotifyPoolConfig, ObserveRegistry, ObserveRelation,
    RelationFilter,
};
pub use resource::{ResourceNode, ResourceObserver};
pub use router::{RouteBuilder, RouteDescriptor, RouteTree};
pub use server::{CoapServer, CoapServerConfig};
