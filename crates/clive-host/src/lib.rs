//! # clive-host
//!
//! The host side of Clive: what the editor extension runs.
//!
//! - **Bridge handlers**: [`handlers::register_all`] answers the tool server's `proposeTestPlan`, `approvePlan`, `summarizeContext` and `writeTestFile`
//! - **Router**: [`router::app_router`] serves the UI layers (`bridge`, `plan`, `status`, `knowledge`, `files`, `process`); [`router::client::AppClient`] is its typed client
//! - **Context**: [`context::ContextFactory`] builds a fresh [`context::RequestContext`] per call, with per-slot overrides
//! - **Stores**: [`stores::PlanStore`] and [`stores::ContextStore`] hold what the agent hands over
//! - **Assembly**: [`host::Host`] wires all of the above to one [`clive_bridge::BridgeRuntime`]
//!
//! ## Crate Position
//!
//! Depends on: clive-core, clive-settings, clive-tools, clive-bridge, clive-rpc.

#![deny(unsafe_code)]

pub mod context;
pub mod handlers;
pub mod host;
pub mod router;
pub mod state;
pub mod stores;

pub use context::{ContextFactory, ContextOverrides, RequestContext};
pub use host::{Host, HostError, HostOptions};
pub use router::client::AppClient;
pub use router::{app_router, app_shape};
pub use state::HostState;
