//! Route-table builder.
//!
//! The discovery collaborator produces a flat, ordered list of endpoint
//! descriptors at startup; the builder turns it into one merged resource
//! tree plus an immutable path-to-handler table. Intermediate path segments
//! become synthetic placeholder nodes that exist only for addressing.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::error::RouteError;
use crate::handler::Handler;
use crate::method::Method;
use crate::resource::ResourceNode;

/// One declared endpoint: a path template, the verbs it accepts (empty set
/// means all), and the handler bound to the terminal segment.
#[derive(Clone)]
pub struct RouteDescriptor {
    /// Path template, e.g. `/coap/foo`.
    pub template: String,
    /// Allowed verbs; empty accepts every verb.
    pub methods: HashSet<Method>,
    /// Handler bound to the terminal node.
    pub handler: Arc<dyn Handler>,
}

impl RouteDescriptor {
    /// Creates a descriptor.
    pub fn new(
        template: impl Into<String>,
        methods: impl IntoIterator<Item = Method>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            template: template.into(),
            methods: methods.into_iter().collect(),
            handler,
        }
    }
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("template", &self.template)
            .field("methods", &self.methods)
            .field("handler", &self.handler.name())
            .finish()
    }
}

/// The built route set: the merged tree and the normalized-path table.
///
/// The table is immutable after startup and requires no synchronization.
#[derive(Debug)]
pub struct RouteTree {
    root: Arc<ResourceNode>,
    table: HashMap<String, String>,
}

impl RouteTree {
    /// Root of the merged tree.
    #[must_use]
    pub const fn root(&self) -> &Arc<ResourceNode> {
        &self.root
    }

    /// Handler name registered at a normalized path.
    #[must_use]
    pub fn handler_at(&self, path: &str) -> Option<&str> {
        self.table.get(path).map(String::as_str)
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when no routes are registered (never produced by `build`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Splits into the tree root and the path table.
    #[must_use]
    pub fn into_parts(self) -> (Arc<ResourceNode>, HashMap<String, String>) {
        (self.root, self.table)
    }
}

/// Builds a resource tree from endpoint descriptors.
#[derive(Debug, Default)]
pub struct RouteBuilder {
    descriptors: Vec<RouteDescriptor>,
}

impl RouteBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a descriptor, consuming style.
    #[must_use]
    pub fn route(mut self, descriptor: RouteDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Appends a descriptor in place.
    pub fn push(&mut self, descriptor: RouteDescriptor) {
        self.descriptors.push(descriptor);
    }

    /// Number of descriptors collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// True when no descriptors were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Builds the merged tree.
    ///
    /// Each descriptor becomes a chain: placeholders for the leading and
    /// interior segments, a handler-bound terminal for the last. Chains are
    /// reduced into one tree by attaching each subsequent chain's root under
    /// the first chain's root via `add`, which merges same-name subtrees.
    /// Duplicate normalized paths and zero-segment templates abort the
    /// build; both are startup bugs.
    pub fn build(self) -> Result<RouteTree, RouteError> {
        if self.descriptors.is_empty() {
            return Err(RouteError::EmptyRouteSet);
        }

        let mut table: HashMap<String, String> = HashMap::new();
        let mut overall: Option<Arc<ResourceNode>> = None;

        for descriptor in self.descriptors {
            let segments = normalize(&descriptor.template);
            if segments.is_empty() {
                return Err(RouteError::InvalidRoute {
                    template: descriptor.template,
                });
            }

            let normalized = segments.join("/");
            if let Some(existing) = table.get(&normalized) {
                return Err(RouteError::Ambiguous {
                    path: normalized,
                    existing: existing.clone(),
                    conflicting: descriptor.handler.name().to_string(),
                });
            }
            table.insert(normalized.clone(), descriptor.handler.name().to_string());
            debug!(
                "mapped route '{normalized}' to handler '{}'",
                descriptor.handler.name()
            );

            let chain = build_chain(&segments, &descriptor)?;
            overall = Some(match overall {
                None => chain,
                Some(root) => {
                    root.add(chain)?;
                    root
                }
            });
        }

        // Non-empty descriptor list always yields a root.
        let root = overall.ok_or(RouteError::EmptyRouteSet)?;
        Ok(RouteTree { root, table })
    }
}

/// Strips leading/trailing separators and splits into non-empty segments.
fn normalize(template: &str) -> Vec<String> {
    template
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn build_chain(
    segments: &[String],
    descriptor: &RouteDescriptor,
) -> Result<Arc<ResourceNode>, RouteError> {
    let terminal = ResourceNode::with_handler(
        segments[segments.len() - 1].clone(),
        descriptor.methods.clone(),
        Arc::clone(&descriptor.handler),
    );

    if segments.len() == 1 {
        return Ok(terminal);
    }

    let root = ResourceNode::placeholder(segments[0].clone());
    let mut cursor = Arc::clone(&root);
    for segment in &segments[1..segments.len() - 1] {
        let placeholder = ResourceNode::placeholder(segment.clone());
        cursor.add(Arc::clone(&placeholder))?;
        cursor = placeholder;
    }
    cursor.add(terminal)?;
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::FnHandler;
    use crate::method::ResponseCode;

    fn handler(name: &str) -> Arc<dyn Handler> {
        FnHandler::new(name, |exchange| {
            exchange.respond(ResponseCode::Content);
            Ok(())
        })
    }

    #[test]
    fn test_normalize_strips_separators() {
        assert_eq!(normalize("/coap/foo/"), vec!["coap", "foo"]);
        assert_eq!(normalize("coap"), vec!["coap"]);
        assert!(normalize("/").is_empty());
        assert!(normalize("").is_empty());
    }

    #[test]
    fn test_single_segment_is_terminal() {
        let tree = RouteBuilder::new()
            .route(RouteDescriptor::new("/solo", [Method::Get], handler("h")))
            .build()
            .unwrap();

        let root = tree.root();
        assert_eq!(root.name(), "solo");
        assert!(root.handler().is_some());
        assert_eq!(root.allowed_methods(), HashSet::from([Method::Get]));
    }

    #[test]
    fn test_multi_segment_builds_placeholder_chain() {
        let tree = RouteBuilder::new()
            .route(RouteDescriptor::new("/a/b/c", [], handler("h")))
            .build()
            .unwrap();

        let a = tree.root();
        assert_eq!(a.name(), "a");
        assert!(a.handler().is_none());
        assert!(a.allowed_methods().is_empty());

        let b = a.get_child("b").unwrap();
        assert!(b.handler().is_none());

        let c = b.get_child("c").unwrap();
        assert!(c.handler().is_some());
        assert_eq!(c.uri(), "a/b/c");
    }

    #[test]
    fn test_shared_prefix_chains_merge() {
        let tree = RouteBuilder::new()
            .route(RouteDescriptor::new("/coap/foo", [Method::Get], handler("h1")))
            .route(RouteDescriptor::new("/coap/baz", [], handler("h2")))
            .build()
            .unwrap();

        let root = tree.root();
        assert_eq!(root.name(), "coap");
        assert_eq!(root.child_count(), 2);
        assert!(root.get_child("foo").unwrap().handler().is_some());
        assert!(root.get_child("baz").unwrap().handler().is_some());
        assert_eq!(tree.handler_at("coap/foo"), Some("h1"));
        assert_eq!(tree.handler_at("coap/baz"), Some("h2"));
    }

    #[test]
    fn test_duplicate_path_is_ambiguous() {
        let err = RouteBuilder::new()
            .route(RouteDescriptor::new("/coap/foo", [], handler("h1")))
            .route(RouteDescriptor::new("coap/foo/", [], handler("h2")))
            .build()
            .unwrap_err();

        match err {
            RouteError::Ambiguous {
                path,
                existing,
                conflicting,
            } => {
                assert_eq!(path, "coap/foo");
                assert_eq!(existing, "h1");
                assert_eq!(conflicting, "h2");
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_segment_template_is_invalid() {
        let err = RouteBuilder::new()
            .route(RouteDescriptor::new("///", [], handler("h")))
            .build()
            .unwrap_err();
        assert!(matches!(err, RouteError::InvalidRoute { .. }));
    }

    #[test]
    fn test_empty_route_set_is_rejected() {
        assert!(matches!(
            RouteBuilder::new().build(),
            Err(RouteError::EmptyRouteSet)
        ));
    }

    #[test]
    fn test_placeholder_not_replaced_by_later_chain() {
        // A deeper route first, then a sibling under the same placeholder.
        let tree = RouteBuilder::new()
            .route(RouteDescriptor::new("/coap/foo/deep", [], handler("h1")))
            .route(RouteDescriptor::new("/coap/foo", [Method::Get], handler("h2")))
            .build()
            .unwrap();

        let root = tree.root();
        let foo = root.get_child("foo").unwrap();
        // The first chain's placeholder "foo" keeps its subtree across the
        // merge with the second chain.
        assert!(foo.get_child("deep").unwrap().handler().is_some());
    }
}
