//! Dynamic client proxy: a tree of JSON handles built from a
//! [`RouterShape`] received at runtime.
//!
//! Paths and kinds are checked against the shape before anything is sent,
//! but inputs and outputs are plain [`Value`]s. Code that knows the router
//! at compile time uses a [`typed_client!`](crate::typed_client) instead.
//!
//! ```ignore
//! let api = ClientProxy::new(&shape, transport);
//! let status = api.query("bridge.status")?.call(Value::Null).await?;
//! let mut changes = api.subscription("bridge.onStatusChange")?.subscribe(Value::Null).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::RpcError;
use crate::procedure::ProcedureKind;
use crate::shape::{RouterShape, ShapeNode};
use crate::transport::{RpcSubscription, Transport};

/// Everything a handle needs to reach its procedure.
#[derive(Clone)]
struct Target {
    path: String,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target").field("path", &self.path).finish_non_exhaustive()
    }
}

/// Handle for a query.
#[derive(Clone, Debug)]
pub struct QueryHandle(Target);

/// Handle for a mutation.
#[derive(Clone, Debug)]
pub struct MutationHandle(Target);

/// Handle for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionHandle(Target);

macro_rules! call_handle {
    ($handle:ident, $kind:expr) => {
        impl $handle {
            /// Dot path of the procedure.
            pub fn path(&self) -> &str {
                &self.0.path
            }

            /// Kind of the procedure.
            pub fn kind(&self) -> ProcedureKind {
                $kind
            }

            /// Call with a raw JSON input.
            pub async fn call(&self, input: Value) -> Result<Value, RpcError> {
                self.0.transport.request(&self.0.path, $kind, input).await
            }
        }
    };
}

call_handle!(QueryHandle, ProcedureKind::Query);
call_handle!(MutationHandle, ProcedureKind::Mutation);

impl SubscriptionHandle {
    /// Dot path of the procedure.
    pub fn path(&self) -> &str {
        &self.0.path
    }

    /// Always [`ProcedureKind::Subscription`].
    pub fn kind(&self) -> ProcedureKind {
        ProcedureKind::Subscription
    }

    /// Open with a raw JSON input.
    pub async fn subscribe(&self, input: Value) -> Result<RpcSubscription, RpcError> {
        self.0.transport.subscribe(&self.0.path, input).await
    }
}

/// One child of a [`ProxyNode`].
#[derive(Clone, Debug)]
pub enum ProxyEntry {
    /// Nested branch.
    Node(ProxyNode),
    /// Query leaf.
    Query(QueryHandle),
    /// Mutation leaf.
    Mutation(MutationHandle),
    /// Subscription leaf.
    Subscription(SubscriptionHandle),
}

impl ProxyEntry {
    fn kind(&self) -> Option<ProcedureKind> {
        match self {
            Self::Node(_) => None,
            Self::Query(_) => Some(ProcedureKind::Query),
            Self::Mutation(_) => Some(ProcedureKind::Mutation),
            Self::Subscription(_) => Some(ProcedureKind::Subscription),
        }
    }
}

/// A branch of the proxy tree.
#[derive(Clone, Debug)]
pub struct ProxyNode {
    path: String,
    children: BTreeMap<String, ProxyEntry>,
}

impl ProxyNode {
    fn build(prefix: &str, shape: &RouterShape, transport: &Arc<dyn Transport>) -> Self {
        let children = shape
            .entries()
            .map(|(name, node)| {
                let path = if prefix.is_empty() {
                    name.to_owned()
                } else {
                    format!("{prefix}.{name}")
                };
                let entry = match node {
                    ShapeNode::Router(inner) => ProxyEntry::Node(Self::build(&path, inner, transport)),
                    ShapeNode::Procedure(kind) => {
                        let target = Target {
                            path,
                            transport: Arc::clone(transport),
                        };
                        match kind {
                            ProcedureKind::Query => ProxyEntry::Query(QueryHandle(target)),
                            ProcedureKind::Mutation => ProxyEntry::Mutation(MutationHandle(target)),
                            ProcedureKind::Subscription => {
                                ProxyEntry::Subscription(SubscriptionHandle(target))
                            }
                        }
                    }
                };
                (name.to_owned(), entry)
            })
            .collect();
        Self {
            path: prefix.to_owned(),
            children,
        }
    }

    /// Dot path of this branch; empty at the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Direct children, sorted by name.
    pub fn children(&self) -> impl Iterator<Item = (&str, &ProxyEntry)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn full_path(&self, relative: &str) -> String {
        if self.path.is_empty() {
            relative.to_owned()
        } else {
            format!("{}.{relative}", self.path)
        }
    }

    fn lookup(&self, relative: &str) -> Result<&ProxyEntry, RpcError> {
        let not_found = || RpcError::RouteNotFound {
            path: self.full_path(relative),
        };
        let mut node = self;
        let mut segments = relative.split('.').peekable();
        while let Some(segment) = segments.next() {
            let entry = node.children.get(segment).ok_or_else(not_found)?;
            if segments.peek().is_none() {
                return Ok(entry);
            }
            match entry {
                ProxyEntry::Node(next) => node = next,
                _ => return Err(not_found()),
            }
        }
        Err(not_found())
    }

    fn mismatch(&self, relative: &str, expected: ProcedureKind, entry: &ProxyEntry) -> RpcError {
        match entry.kind() {
            Some(actual) => RpcError::KindMismatch {
                path: self.full_path(relative),
                expected,
                actual,
            },
            None => RpcError::RouteNotFound {
                path: self.full_path(relative),
            },
        }
    }

    /// Nested branch at a relative dot path.
    pub fn node(&self, path: &str) -> Result<&ProxyNode, RpcError> {
        match self.lookup(path)? {
            ProxyEntry::Node(node) => Ok(node),
            _ => Err(RpcError::RouteNotFound {
                path: self.full_path(path),
            }),
        }
    }

    /// Query at a relative dot path.
    pub fn query(&self, path: &str) -> Result<&QueryHandle, RpcError> {
        match self.lookup(path)? {
            ProxyEntry::Query(handle) => Ok(handle),
            other => Err(self.mismatch(path, ProcedureKind::Query, other)),
        }
    }

    /// Mutation at a relative dot path.
    pub fn mutation(&self, path: &str) -> Result<&MutationHandle, RpcError> {
        match self.lookup(path)? {
            ProxyEntry::Mutation(handle) => Ok(handle),
            other => Err(self.mismatch(path, ProcedureKind::Mutation, other)),
        }
    }

    /// Subscription at a relative dot path.
    pub fn subscription(&self, path: &str) -> Result<&SubscriptionHandle, RpcError> {
        match self.lookup(path)? {
            ProxyEntry::Subscription(handle) => Ok(handle),
            other => Err(self.mismatch(path, ProcedureKind::Subscription, other)),
        }
    }
}

/// JSON client for a host router, built from its shape.
///
/// Paths that are not in the shape are rejected locally, before anything is
/// sent.
#[derive(Clone)]
pub struct ClientProxy {
    root: ProxyNode,
    transport: Arc<dyn Transport>,
}

impl ClientProxy {
    /// Mirror `shape` over `transport`.
    pub fn new(shape: &RouterShape, transport: Arc<dyn Transport>) -> Self {
        Self {
            root: ProxyNode::build("", shape, &transport),
            transport,
        }
    }

    /// Root of the proxy tree.
    pub fn root(&self) -> &ProxyNode {
        &self.root
    }

    /// The transport every handle uses.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Branch at a dot path.
    pub fn node(&self, path: &str) -> Result<&ProxyNode, RpcError> {
        self.root.node(path)
    }

    /// Query at a dot path.
    pub fn query(&self, path: &str) -> Result<&QueryHandle, RpcError> {
        self.root.query(path)
    }

    /// Mutation at a dot path.
    pub fn mutation(&self, path: &str) -> Result<&MutationHandle, RpcError> {
        self.root.mutation(path)
    }

    /// Subscription at a dot path.
    pub fn subscription(&self, path: &str) -> Result<&SubscriptionHandle, RpcError> {
        self.root.subscription(path)
    }
}

impl std::fmt::Debug for ClientProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientProxy").field("root", &self.root).finish_non_exhaustive()
    }
}
