//! Router tree: named procedures and nested routers addressed by dot paths.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::time::Instant;

use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::errors::{RouterBuildError, RpcError};
use crate::procedure::{Procedure, ProcedureKind, ValueStream};
use crate::shape::RouterShape;

enum Node<C> {
    Procedure(Procedure<C>),
    Router(Router<C>),
}

/// Immutable procedure tree. Built once with [`RouterBuilder`]; there is no
/// registration API afterwards.
pub struct Router<C> {
    entries: BTreeMap<String, Node<C>>,
}

/// Collects procedures and nested routers. The first naming error is kept
/// and reported by [`build`](Self::build).
pub struct RouterBuilder<C> {
    entries: BTreeMap<String, Node<C>>,
    error: Option<RouterBuildError>,
}

impl<C> Default for RouterBuilder<C> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            error: None,
        }
    }
}

impl<C> RouterBuilder<C> {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a procedure under `name`.
    #[must_use]
    pub fn procedure(self, name: &str, procedure: Procedure<C>) -> Self {
        self.insert(name, Node::Procedure(procedure))
    }

    /// Mount a built router under `name`.
    #[must_use]
    pub fn nest(self, name: &str, router: Router<C>) -> Self {
        self.insert(name, Node::Router(router))
    }

    fn insert(mut self, name: &str, node: Node<C>) -> Self {
        if self.error.is_some() {
            return self;
        }
        if name.is_empty() || name.contains('.') {
            self.error = Some(RouterBuildError::InvalidName {
                name: name.to_owned(),
            });
            return self;
        }
        match self.entries.entry(name.to_owned()) {
            Entry::Occupied(_) => {
                self.error = Some(RouterBuildError::Duplicate {
                    name: name.to_owned(),
                });
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(node);
            }
        }
        self
    }

    /// Freeze the tree.
    pub fn build(self) -> Result<Router<C>, RouterBuildError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(Router {
                entries: self.entries,
            }),
        }
    }
}

impl<C: Send + 'static> Router<C> {
    /// Start building a router.
    pub fn builder() -> RouterBuilder<C> {
        RouterBuilder::new()
    }

    /// Walk `path` to a procedure.
    pub fn resolve(&self, path: &str) -> Result<&Procedure<C>, RpcError> {
        let not_found = || RpcError::RouteNotFound {
            path: path.to_owned(),
        };
        let mut router = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let node = router.entries.get(segment).ok_or_else(not_found)?;
            match (node, segments.peek().is_some()) {
                (Node::Router(next), true) => router = next,
                (Node::Procedure(p), false) => return Ok(p),
                // Path ends on a branch, or continues past a leaf.
                (Node::Router(_), false) | (Node::Procedure(_), true) => return Err(not_found()),
            }
        }
        Err(not_found())
    }

    /// Run the query or mutation at `path`. `kind` must match the
    /// procedure's kind.
    #[instrument(skip(self, input, ctx))]
    pub async fn call(
        &self,
        path: &str,
        kind: ProcedureKind,
        input: Value,
        ctx: C,
    ) -> Result<Value, RpcError> {
        counter!("rpc_requests_total", "path" => path.to_owned(), "kind" => kind.as_str()).increment(1);
        let start = Instant::now();

        let result = async {
            let procedure = self.resolve(path)?;
            if kind == ProcedureKind::Subscription || procedure.kind() != kind {
                return Err(RpcError::KindMismatch {
                    path: path.to_owned(),
                    expected: kind,
                    actual: procedure.kind(),
                });
            }
            procedure.call(path, input, ctx).await
        }
        .await;

        let elapsed = start.elapsed();
        histogram!("rpc_request_duration_seconds", "path" => path.to_owned())
            .record(elapsed.as_secs_f64());
        if elapsed.as_secs() >= 5 {
            warn!(duration_secs = elapsed.as_secs_f64(), "slow RPC call");
        }
        if let Err(e) = &result {
            counter!("rpc_errors_total", "path" => path.to_owned(), "code" => e.code()).increment(1);
            debug!(error = %e, "rpc call failed");
        }
        result
    }

    /// Open the subscription at `path`.
    #[instrument(skip(self, input, ctx))]
    pub async fn subscribe(&self, path: &str, input: Value, ctx: C) -> Result<ValueStream, RpcError> {
        counter!("rpc_requests_total", "path" => path.to_owned(), "kind" => "subscription").increment(1);
        let procedure = self.resolve(path)?;
        if procedure.kind() != ProcedureKind::Subscription {
            return Err(RpcError::KindMismatch {
                path: path.to_owned(),
                expected: ProcedureKind::Subscription,
                actual: procedure.kind(),
            });
        }
        procedure.subscribe(path, input, ctx).await
    }

    /// Names and kinds, without resolvers.
    pub fn shape(&self) -> RouterShape {
        self.entries
            .iter()
            .fold(RouterShape::new(), |shape, (name, node)| match node {
                Node::Procedure(p) => shape.with_procedure(name, p.kind()),
                Node::Router(r) => shape.with_router(name, r.shape()),
            })
    }
}

impl<C> std::fmt::Debug for Router<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::procedure;
    use assert_matches::assert_matches;
    use futures::StreamExt;
    use serde_json::json;

    #[derive(Clone)]
    struct Ctx {
        greeting: &'static str,
    }

    fn app() -> Router<Ctx> {
        let status = Router::builder()
            .procedure(
                "branchChanges",
                procedure::<Ctx>().query(|(), _| async { Ok(vec!["a.rs", "b.rs"]) }),
            )
            .build()
            .unwrap();
        Router::builder()
            .procedure(
                "hello",
                procedure::<Ctx>()
                    .input::<String>()
                    .query(|name, ctx: Ctx| async move { Ok(format!("{} {name}", ctx.greeting)) }),
            )
            .procedure(
                "count",
                procedure::<Ctx>().input::<u32>().subscription(|n, _| async move {
                    Ok(futures::stream::iter((1..=n).map(Ok::<_, RpcError>)))
                }),
            )
            .procedure(
                "touch",
                procedure::<Ctx>().mutation(|(), _| async { Ok(json!({"touched": true})) }),
            )
            .nest("status", status)
            .build()
            .unwrap()
    }

    fn ctx() -> Ctx {
        Ctx { greeting: "hi" }
    }

    #[tokio::test]
    async fn call_walks_nested_paths() {
        let router = app();
        let out = router
            .call("status.branchChanges", ProcedureKind::Query, Value::Null, ctx())
            .await
            .unwrap();
        assert_eq!(out, json!(["a.rs", "b.rs"]));
        let out = router
            .call("hello", ProcedureKind::Query, json!("ada"), ctx())
            .await
            .unwrap();
        assert_eq!(out, json!("hi ada"));
    }

    #[tokio::test]
    async fn unknown_and_internal_paths_are_not_found() {
        let router = app();
        for path in ["nope", "status", "status.nope", "hello.extra", "", "status."] {
            assert_matches!(
                router.call(path, ProcedureKind::Query, Value::Null, ctx()).await,
                Err(RpcError::RouteNotFound { path: ref p }) if p == path,
                "{path}"
            );
        }
    }

    #[tokio::test]
    async fn kind_mismatch_is_reported() {
        let router = app();
        assert_matches!(
            router.call("touch", ProcedureKind::Query, Value::Null, ctx()).await,
            Err(RpcError::KindMismatch { expected: ProcedureKind::Query, actual: ProcedureKind::Mutation, .. })
        );
        assert_matches!(
            router.call("count", ProcedureKind::Subscription, json!(1), ctx()).await,
            Err(RpcError::KindMismatch { .. })
        );
        assert!(matches!(
            router.subscribe("hello", json!("x"), ctx()).await,
            Err(RpcError::KindMismatch { actual: ProcedureKind::Query, .. })
        ));
    }

    #[tokio::test]
    async fn subscribe_streams_values() {
        let router = app();
        let items: Vec<_> = router
            .subscribe("count", json!(3), ctx())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items, vec![Ok(json!(1)), Ok(json!(2)), Ok(json!(3))]);
    }

    #[test]
    fn build_rejects_bad_and_duplicate_names() {
        let p = || procedure::<()>().query(|(), ()| async { Ok(()) });
        assert_eq!(
            Router::builder().procedure("a.b", p()).build().unwrap_err(),
            RouterBuildError::InvalidName { name: "a.b".into() }
        );
        assert_eq!(
            Router::builder().procedure("", p()).build().unwrap_err(),
            RouterBuildError::InvalidName { name: String::new() }
        );
        assert_eq!(
            Router::builder()
                .procedure("x", p())
                .nest("x", Router::builder().build().unwrap())
                .build()
                .unwrap_err(),
            RouterBuildError::Duplicate { name: "x".into() }
        );
    }

    #[test]
    fn shape_mirrors_tree() {
        let expected = crate::router_shape! {
            count: subscription,
            hello: query,
            status: { branchChanges: query },
            touch: mutation,
        };
        assert_eq!(app().shape(), expected);
    }
}
