//! # clive-rpc
//!
//! Typed procedure router shared by the host process and its clients.
//!
//! - **Procedures**: [`procedure::procedure`] builds queries, mutations and subscriptions with validated input
//! - **Router**: [`router::Router`] is an immutable tree addressed by dot paths; [`shape::RouterShape`] is its resolver-free mirror
//! - **Messages**: [`message::RpcMessage`] / [`message::RpcReply`], tagged JSON shared by every transport
//! - **Server**: [`server::RpcServer`] dispatches messages with a per-call context and cancellation
//! - **Client**: [`transport::ChannelTransport`] correlates replies; [`typed_client!`] declares statically typed clients; [`proxy::ClientProxy`] is the dynamic, shape-driven client
//!
//! ## Crate Position
//!
//! Depends on: clive-core. Depended on by: clive-host.

#![deny(unsafe_code)]

pub mod errors;
pub mod message;
pub mod procedure;
pub mod proxy;
pub mod router;
pub mod server;
pub mod shape;
pub mod transport;
pub mod typed;

pub use errors::{RouterBuildError, RpcError, RpcErrorBody};
pub use message::{RpcMessage, RpcReply};
pub use procedure::{Procedure, ProcedureKind, ValidateInput, ValueStream, procedure};
pub use proxy::{ClientProxy, MutationHandle, ProxyEntry, ProxyNode, QueryHandle, SubscriptionHandle};
pub use router::{Router, RouterBuilder};
pub use server::RpcServer;
pub use shape::{RouterShape, ShapeNode};
pub use transport::{ChannelTransport, RpcSubscription, SubscriptionEnd, SubscriptionEvent, Transport};
pub use typed::{ClientBase, ClientNode, Mutation, Query, Subscription, TypedSubscription};
