//! Error types for coaptree.
//!
//! All errors are strongly typed using thiserror and grouped by the stage at
//! which they arise: tree mutation, route building, and notification delivery.
//! Method-not-allowed is deliberately not an error; it is a structured
//! rejection response produced by the dispatcher.

use thiserror::Error;

use crate::method::DeliveryMode;

/// Errors raised by structural mutation of the resource tree.
#[derive(Debug, Error)]
pub enum TreeError {
    /// A child handed to `add` has an empty name.
    #[error("Child must have a non-empty name")]
    InvalidChild,

    /// `set_name` was called with an empty name.
    #[error("Resource name cannot be empty")]
    InvalidName,

    /// The observe-type override is restricted to data-plane delivery modes.
    #[error("Only confirmable and non-confirmable notifications are allowed, got {mode:?}")]
    InvalidObserveType {
        /// The rejected control-plane mode.
        mode: DeliveryMode,
    },
}

/// Errors raised while building the route table at startup. All of these are
/// fatal: the server must not start with a broken route set.
#[derive(Debug, Error)]
pub enum RouteError {
    /// Two descriptors normalize to the same full path.
    #[error("Ambiguous mapping: cannot map handler '{conflicting}' to '{path}', handler '{existing}' is already mapped there")]
    Ambiguous {
        /// The normalized path both descriptors claim.
        path: String,
        /// Name of the handler registered first.
        existing: String,
        /// Name of the handler whose registration collided.
        conflicting: String,
    },

    /// A descriptor's template decomposes into zero path segments.
    #[error("Route template '{template}' normalizes to zero path segments")]
    InvalidRoute {
        /// The offending template.
        template: String,
    },

    /// The builder was asked to build with no descriptors at all.
    #[error("Route set is empty")]
    EmptyRouteSet,

    /// Tree mutation failed while assembling chains.
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Errors raised on the notification path.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// A synchronous `changed()` arrived while a notification pass was
    /// already in progress on the same node.
    #[error("Recursion detected while notifying '{uri}': nested triggers must go through a notify pool")]
    RecursionDetected {
        /// URI of the node being notified.
        uri: String,
    },

    /// The notify pool's bounded queue is full.
    #[error("Notify queue full: {path}")]
    QueueFull {
        /// Which queue rejected the hand-off.
        path: String,
    },

    /// The receiving side of a channel is gone.
    #[error("Channel disconnected: {path}")]
    Disconnected {
        /// Which channel was found closed.
        path: String,
    },
}

/// Error returned by a handler invocation. The dispatcher catches these at
/// its boundary, logs them with the handler's identity, and answers the peer
/// with a generic server-error response.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Human-readable failure description.
    pub message: String,
}

impl HandlerError {
    /// Creates a handler error from any displayable message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Top-level error type for coaptree.
#[derive(Debug, Error)]
pub enum CoapTreeError {
    /// Structural tree error.
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    /// Route-building error.
    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    /// Notification error.
    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),

    /// Handler invocation error.
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
}

impl CoapTreeError {
    /// Returns true if this is a structural tree error.
    #[must_use]
    pub const fn is_tree(&self) -> bool {
        matches!(self, Self::Tree(_))
    }

    /// Returns true if this is a route-building error.
    #[must_use]
    pub const fn is_route(&self) -> bool {
        matches!(self, Self::Route(_))
    }

    /// Returns true if this is a notification error.
    #[must_use]
    pub const fn is_notify(&self) -> bool {
        matches!(self, Self::Notify(_))
    }

    /// Returns true if this is a handler error.
    #[must_use]
    pub const fn is_handler(&self) -> bool {
        matches!(self, Self::Handler(_))
    }
}

/// Result type alias for coaptree operations.
pub type CoapResult<T> = Result<T, CoapTreeError>;
