//! # clive-bridge
//!
//! Local IPC channel that lets an externally spawned tool-server process
//! call back into the long-lived host process.
//!
//! - **Protocol**: [`protocol::BridgeRequest`] / [`protocol::BridgeResponse`] envelopes, newline-delimited JSON on a Unix socket
//! - **Registry**: [`registry::HandlerRegistry`] maps method names to async [`registry::BridgeHandler`]s
//! - **Manager**: [`manager::BridgeManager`] owns the endpoint, the lifecycle state machine, and status fan-out
//! - **Client**: [`client::BridgeClient`] is the tool-server side, correlating responses by id
//! - **Runtime**: [`runtime::BridgeRuntime`] wraps one manager with a cancellation scope and disposal
//!
//! ## Crate Position
//!
//! Depends on: clive-core, clive-settings. Depended on by: clive-host.

#![deny(unsafe_code)]

pub mod client;
mod connection;
pub mod errors;
pub mod global;
pub mod manager;
pub mod methods;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod status;

pub use client::BridgeClient;
pub use errors::{BridgeError, HandlerError, RegistryError};
pub use manager::{BridgeConfig, BridgeManager};
pub use protocol::{BridgeRequest, BridgeResponse, Outcome};
pub use registry::{BridgeHandler, HandlerRegistry, handler_fn};
pub use runtime::{BridgeRuntime, SharedBridgeRuntime, StatusListener};
pub use status::{BridgeState, BridgeStatus, StatusStream};
