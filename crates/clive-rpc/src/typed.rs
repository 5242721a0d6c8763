//! Statically typed clients, declared once with [`typed_client!`](crate::typed_client).
//!
//! Each declared struct is one branch of the host router. Branch accessors
//! and leaf handles are plain methods, so a misspelled path or a call of the
//! wrong kind does not compile, and every leaf carries its input and output
//! types. The same declaration produces the [`RouterShape`] that the wire
//! layer and the host's mirror test compare against the real router.
//!
//! ```ignore
//! clive_rpc::typed_client! {
//!     /// Host API.
//!     pub struct Api {
//!         bridge: branch(BridgeApi),
//!         ping: query(() => String),
//!     }
//!
//!     /// `bridge.*`.
//!     pub struct BridgeApi {
//!         status: query(() => BridgeStatus),
//!         on_status_change = "onStatusChange": subscription(() => BridgeStatus),
//!     }
//! }
//!
//! let api = Api::new(transport);
//! let status = api.bridge().status().call(&()).await?;
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::RpcError;
use crate::procedure::ProcedureKind;
use crate::shape::RouterShape;
use crate::transport::{RpcSubscription, SubscriptionEnd, Transport};

/// Where a client node sits: its dot path and the transport it uses.
#[derive(Clone)]
pub struct ClientBase {
    path: String,
    transport: Arc<dyn Transport>,
}

impl ClientBase {
    /// The router root.
    pub fn root(transport: Arc<dyn Transport>) -> Self {
        Self {
            path: String::new(),
            transport,
        }
    }

    /// A direct child named `name`.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        let path = if self.path.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{name}", self.path)
        };
        Self {
            path,
            transport: Arc::clone(&self.transport),
        }
    }

    /// Dot path; empty at the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl fmt::Debug for ClientBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBase").field("path", &self.path).finish_non_exhaustive()
    }
}

/// A branch struct generated by [`typed_client!`](crate::typed_client).
pub trait ClientNode {
    /// The branch rooted at `base`.
    fn at(base: ClientBase) -> Self;

    /// Names and kinds of everything below this branch.
    fn shape() -> RouterShape;
}

fn encode_input<I: Serialize>(path: &str, input: &I) -> Result<Value, RpcError> {
    serde_json::to_value(input).map_err(|e| RpcError::InputValidation {
        path: path.to_owned(),
        message: e.to_string(),
    })
}

fn decode_output<O: DeserializeOwned>(path: &str, value: Value) -> Result<O, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::Internal {
        message: format!("unexpected output from {path}: {e}"),
    })
}

/// Query taking `I` and returning `O`.
pub struct Query<I, O> {
    base: ClientBase,
    _types: PhantomData<fn(I) -> O>,
}

/// Mutation taking `I` and returning `O`.
pub struct Mutation<I, O> {
    base: ClientBase,
    _types: PhantomData<fn(I) -> O>,
}

/// Subscription taking `I` and yielding `O` items.
pub struct Subscription<I, O> {
    base: ClientBase,
    _types: PhantomData<fn(I) -> O>,
}

macro_rules! leaf_common {
    ($leaf:ident, $kind:expr) => {
        impl<I, O> $leaf<I, O> {
            /// Handle for the procedure at `base`.
            pub fn new(base: ClientBase) -> Self {
                Self {
                    base,
                    _types: PhantomData,
                }
            }

            /// Dot path of the procedure.
            pub fn path(&self) -> &str {
                self.base.path()
            }

            /// Kind of the procedure.
            pub fn kind(&self) -> ProcedureKind {
                $kind
            }
        }

        impl<I, O> Clone for $leaf<I, O> {
            fn clone(&self) -> Self {
                Self::new(self.base.clone())
            }
        }

        impl<I, O> fmt::Debug for $leaf<I, O> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($leaf)).field(&self.base.path).finish()
            }
        }
    };
}

leaf_common!(Query, ProcedureKind::Query);
leaf_common!(Mutation, ProcedureKind::Mutation);
leaf_common!(Subscription, ProcedureKind::Subscription);

macro_rules! call_leaf {
    ($leaf:ident, $kind:expr) => {
        impl<I: Serialize, O: DeserializeOwned> $leaf<I, O> {
            /// Run the procedure.
            pub async fn call(&self, input: &I) -> Result<O, RpcError> {
                let path = self.base.path();
                let input = encode_input(path, input)?;
                let output = self.base.transport.request(path, $kind, input).await?;
                decode_output(path, output)
            }
        }
    };
}

call_leaf!(Query, ProcedureKind::Query);
call_leaf!(Mutation, ProcedureKind::Mutation);

impl<I: Serialize, O: DeserializeOwned> Subscription<I, O> {
    /// Open the subscription.
    pub async fn subscribe(&self, input: &I) -> Result<TypedSubscription<O>, RpcError> {
        let path = self.base.path();
        let input = encode_input(path, input)?;
        let inner = self.base.transport.subscribe(path, input).await?;
        Ok(TypedSubscription {
            inner,
            path: path.to_owned(),
            _item: PhantomData,
        })
    }
}

/// [`RpcSubscription`] whose items decode as `O`. An item that does not
/// decode is yielded as [`RpcError::Internal`].
pub struct TypedSubscription<O> {
    inner: RpcSubscription,
    path: String,
    _item: PhantomData<fn() -> O>,
}

impl<O> TypedSubscription<O> {
    /// Stop the subscription.
    pub fn cancel(&mut self) {
        self.inner.cancel();
    }

    /// How the subscription ended, once it has.
    pub fn end_reason(&self) -> Option<&SubscriptionEnd> {
        self.inner.end_reason()
    }

    /// Drain remaining items and return how the subscription ended.
    pub async fn finish(self) -> SubscriptionEnd {
        self.inner.finish().await
    }
}

impl<O: DeserializeOwned> Stream for TypedSubscription<O> {
    type Item = Result<O, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        polled.map(|item| item.map(|value| value.and_then(|v| decode_output(&self.path, v))))
    }
}

impl<O> fmt::Debug for TypedSubscription<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedSubscription")
            .field("path", &self.path)
            .field("id", &self.inner.id())
            .finish_non_exhaustive()
    }
}

/// Declare typed client structs for a router tree.
///
/// Each entry is `method[ = "wireName"]: kind(..)`:
/// - `query(I => O)`, `mutation(I => O)`, `subscription(I => O)` for leaves
/// - `branch(Type)` for a nested branch declared in the same invocation (or
///   anywhere else that implements [`ClientNode`](crate::typed::ClientNode))
///
/// The wire name defaults to the method name.
#[macro_export]
macro_rules! typed_client {
    (@wire $method:ident []) => { stringify!($method) };
    (@wire $method:ident [$wire:literal]) => { $wire };

    (@method query $method:ident [$($wire:literal)?] ($in:ty => $out:ty)) => {
        #[doc = concat!("Query `", stringify!($method), "`.")]
        pub fn $method(&self) -> $crate::typed::Query<$in, $out> {
            $crate::typed::Query::new(self.base.child($crate::typed_client!(@wire $method [$($wire)?])))
        }
    };
    (@method mutation $method:ident [$($wire:literal)?] ($in:ty => $out:ty)) => {
        #[doc = concat!("Mutation `", stringify!($method), "`.")]
        pub fn $method(&self) -> $crate::typed::Mutation<$in, $out> {
            $crate::typed::Mutation::new(self.base.child($crate::typed_client!(@wire $method [$($wire)?])))
        }
    };
    (@method subscription $method:ident [$($wire:literal)?] ($in:ty => $out:ty)) => {
        #[doc = concat!("Subscription `", stringify!($method), "`.")]
        pub fn $method(&self) -> $crate::typed::Subscription<$in, $out> {
            $crate::typed::Subscription::new(self.base.child($crate::typed_client!(@wire $method [$($wire)?])))
        }
    };
    (@method branch $method:ident [$($wire:literal)?] ($node:ty)) => {
        #[doc = concat!("Branch `", stringify!($method), "`.")]
        pub fn $method(&self) -> $node {
            <$node as $crate::typed::ClientNode>::at(
                self.base.child($crate::typed_client!(@wire $method [$($wire)?])),
            )
        }
    };

    (@shape_entry $shape:ident, $name:ident, query $args:tt) => {
        $shape.with_procedure($name, $crate::procedure::ProcedureKind::Query)
    };
    (@shape_entry $shape:ident, $name:ident, mutation $args:tt) => {
        $shape.with_procedure($name, $crate::procedure::ProcedureKind::Mutation)
    };
    (@shape_entry $shape:ident, $name:ident, subscription $args:tt) => {
        $shape.with_procedure($name, $crate::procedure::ProcedureKind::Subscription)
    };
    (@shape_entry $shape:ident, $name:ident, branch ($node:ty)) => {
        $shape.with_router($name, <$node as $crate::typed::ClientNode>::shape())
    };

    (@methods $($method:ident $(= $wire:literal)? : $kind:ident $args:tt),* $(,)?) => {
        $($crate::typed_client!(@method $kind $method [$($wire)?] $args);)*
    };
    (@shape $shape:ident; $($method:ident $(= $wire:literal)? : $kind:ident $args:tt),* $(,)?) => {
        $({
            let name: &str = $crate::typed_client!(@wire $method [$($wire)?]);
            $shape = $crate::typed_client!(@shape_entry $shape, name, $kind $args);
        })*
    };

    () => {};
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident { $($body:tt)* }
        $($rest:tt)*
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $name {
            base: $crate::typed::ClientBase,
        }

        impl $crate::typed::ClientNode for $name {
            fn at(base: $crate::typed::ClientBase) -> Self {
                Self { base }
            }

            fn shape() -> $crate::shape::RouterShape {
                #[allow(unused_mut)]
                let mut shape = $crate::shape::RouterShape::new();
                $crate::typed_client!(@shape shape; $($body)*);
                shape
            }
        }

        impl $name {
            /// Client rooted at the router root of `transport`.
            pub fn new(transport: ::std::sync::Arc<dyn $crate::transport::Transport>) -> Self {
                <Self as $crate::typed::ClientNode>::at($crate::typed::ClientBase::root(transport))
            }

            /// Names and kinds this client expects the router to have.
            pub fn shape() -> $crate::shape::RouterShape {
                <Self as $crate::typed::ClientNode>::shape()
            }

            /// Dot path of this branch; empty at the root.
            pub fn path(&self) -> &str {
                self.base.path()
            }

            $crate::typed_client!(@methods $($body)*);
        }

        $crate::typed_client!($($rest)*);
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SubscriptionEvent;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// Records what was sent and answers with the input.
    #[derive(Default)]
    struct Echo {
        sent: Mutex<Vec<(String, ProcedureKind, Value)>>,
    }

    #[async_trait]
    impl Transport for Echo {
        async fn request(&self, path: &str, kind: ProcedureKind, input: Value) -> Result<Value, RpcError> {
            self.sent.lock().push((path.to_owned(), kind, input.clone()));
            Ok(input)
        }

        async fn subscribe(&self, path: &str, input: Value) -> Result<RpcSubscription, RpcError> {
            self.sent
                .lock()
                .push((path.to_owned(), ProcedureKind::Subscription, input.clone()));
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(SubscriptionEvent::Next(input));
            let _ = tx.send(SubscriptionEvent::Next(json!("not a number")));
            let _ = tx.send(SubscriptionEvent::Complete);
            Ok(RpcSubscription::new(path, rx, || {}))
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Restart {
        grace_ms: u32,
    }

    crate::typed_client! {
        /// Root.
        struct Api {
            bridge: branch(BridgeApi),
            ping: query(() => ()),
        }

        /// `bridge.*`.
        struct BridgeApi {
            status: query(() => ()),
            restart: mutation(Restart => Restart),
            on_status_change = "onStatusChange": subscription(u32 => u32),
        }
    }

    fn api() -> (Api, Arc<Echo>) {
        let echo = Arc::new(Echo::default());
        let transport: Arc<dyn Transport> = Arc::clone(&echo) as _;
        (Api::new(transport), echo)
    }

    #[test]
    fn shape_follows_declaration() {
        let expected = crate::router_shape! {
            bridge: { status: query, restart: mutation, onStatusChange: subscription },
            ping: query,
        };
        assert_eq!(Api::shape(), expected);
    }

    #[tokio::test]
    async fn leaves_send_full_path_kind_and_typed_input() {
        let (api, echo) = api();
        let bridge = api.bridge();
        assert_eq!(bridge.path(), "bridge");
        assert_eq!(bridge.on_status_change().path(), "bridge.onStatusChange");

        let out = bridge.restart().call(&Restart { grace_ms: 5 }).await.unwrap();
        assert_eq!(out, Restart { grace_ms: 5 });
        api.ping().call(&()).await.unwrap();

        assert_eq!(
            echo.sent.lock().clone(),
            vec![
                ("bridge.restart".into(), ProcedureKind::Mutation, json!({"graceMs": 5})),
                ("ping".into(), ProcedureKind::Query, Value::Null),
            ]
        );
    }

    #[tokio::test]
    async fn subscription_items_decode_or_fail_per_item() {
        let (api, _) = api();
        let mut sub = api.bridge().on_status_change().subscribe(&5).await.unwrap();
        assert_eq!(sub.next().await, Some(Ok(5)));
        assert_matches!(sub.next().await, Some(Err(RpcError::Internal { message })) if message.contains("bridge.onStatusChange"));
        assert_eq!(sub.finish().await, SubscriptionEnd::Completed);
    }

    #[tokio::test]
    async fn output_that_does_not_decode_is_internal() {
        crate::typed_client! {
            struct Mismatched {
                ping: query(String => u32),
            }
        }
        let echo: Arc<dyn Transport> = Arc::new(Echo::default());
        let result = Mismatched::new(echo).ping().call(&"text".to_owned()).await;
        assert_matches!(result, Err(RpcError::Internal { .. }));
    }
}
