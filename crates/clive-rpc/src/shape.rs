//! Router shape: names and kinds only, serializable, and declarable with
//! [`router_shape!`](crate::router_shape).
//!
//! ```json
//! { "bridge": { "status": "query", "restart": "mutation" } }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::procedure::ProcedureKind;

/// One entry in a [`RouterShape`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShapeNode {
    /// A leaf procedure.
    Procedure(ProcedureKind),
    /// A nested branch.
    Router(RouterShape),
}

/// The structure of a router without its resolvers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouterShape {
    entries: BTreeMap<String, ShapeNode>,
}

impl RouterShape {
    /// Empty shape.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a leaf.
    #[must_use]
    pub fn with_procedure(mut self, name: &str, kind: ProcedureKind) -> Self {
        let _ = self.entries.insert(name.to_owned(), ShapeNode::Procedure(kind));
        self
    }

    /// Add a branch.
    #[must_use]
    pub fn with_router(mut self, name: &str, shape: RouterShape) -> Self {
        let _ = self.entries.insert(name.to_owned(), ShapeNode::Router(shape));
        self
    }

    /// Direct children, sorted by name.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ShapeNode)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Look up a dot path.
    pub fn get(&self, path: &str) -> Option<&ShapeNode> {
        let mut segments = path.split('.');
        let mut node = self.entries.get(segments.next()?)?;
        for segment in segments {
            match node {
                ShapeNode::Router(shape) => node = shape.entries.get(segment)?,
                ShapeNode::Procedure(_) => return None,
            }
        }
        Some(node)
    }

    /// Kind of the procedure at `path`, if it is a leaf.
    pub fn kind_of(&self, path: &str) -> Option<ProcedureKind> {
        match self.get(path)? {
            ShapeNode::Procedure(kind) => Some(*kind),
            ShapeNode::Router(_) => None,
        }
    }

    /// Every leaf as `(dot path, kind)`, sorted by path.
    pub fn leaves(&self) -> Vec<(String, ProcedureKind)> {
        let mut out = Vec::new();
        self.collect_leaves("", &mut out);
        out
    }

    fn collect_leaves(&self, prefix: &str, out: &mut Vec<(String, ProcedureKind)>) {
        for (name, node) in &self.entries {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            match node {
                ShapeNode::Procedure(kind) => out.push((path, *kind)),
                ShapeNode::Router(shape) => shape.collect_leaves(&path, out),
            }
        }
    }

    /// Number of direct children.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the shape has no children.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Declare a [`RouterShape`] that mirrors a host router.
///
/// ```ignore
/// let shape = router_shape! {
///     bridge: { status: query, restart: mutation, onStatusChange: subscription },
///     knowledge: { search: query },
/// };
/// ```
#[macro_export]
macro_rules! router_shape {
    (@entry $shape:ident, $name:ident : query) => {
        $shape = $shape.with_procedure(stringify!($name), $crate::procedure::ProcedureKind::Query);
    };
    (@entry $shape:ident, $name:ident : mutation) => {
        $shape = $shape.with_procedure(stringify!($name), $crate::procedure::ProcedureKind::Mutation);
    };
    (@entry $shape:ident, $name:ident : subscription) => {
        $shape = $shape.with_procedure(stringify!($name), $crate::procedure::ProcedureKind::Subscription);
    };
    (@entry $shape:ident, $name:ident : { $($inner:tt)* }) => {
        $shape = $shape.with_router(stringify!($name), $crate::router_shape!($($inner)*));
    };
    ($($name:ident : $body:tt),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut shape = $crate::shape::RouterShape::new();
        $($crate::router_shape!(@entry shape, $name : $body);)*
        shape
    }};
}
