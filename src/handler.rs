//! Handler capability.
//!
//! A handler is the opaque reference a route descriptor binds to a terminal
//! resource node. It is a plain capability, `invoke(exchange) -> result`,
//! satisfied by any implementation; the dispatcher performs static interface
//! dispatch, never reflective lookup.

use std::fmt;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::exchange::CoapExchange;

/// Application request handler bound to a terminal resource node.
///
/// Implementations respond through the exchange. A returned error is caught
/// at the dispatcher boundary, logged under `name()`, and converted into a
/// generic server-error response.
pub trait Handler: Send + Sync {
    /// Stable identity used in route tables, diagnostics, and logs.
    fn name(&self) -> &str;

    /// Handles one exchange.
    fn invoke(&self, exchange: &CoapExchange) -> Result<(), HandlerError>;
}

/// Closure-backed [`Handler`].
pub struct FnHandler {
    name: String,
    f: Box<dyn Fn(&CoapExchange) -> Result<(), HandlerError> + Send + Sync>,
}

impl FnHandler {
    /// Wraps a closure as a named handler.
    pub fn new<F>(name: impl Into<String>, f: F) -> Arc<Self>
    where
        F: Fn(&CoapExchange) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            f: Box::new(f),
        })
    }
}

impl Handler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, exchange: &CoapExchange) -> Result<(), HandlerError> {
        (self.f)(exchange)
    }
}

impl fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}
