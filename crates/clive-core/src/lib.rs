//! # clive-core
//!
//! Shared vocabulary for the Clive host process and its tool servers.
//!
//! - **Correlation ids**: [`ids::CorrelationId`] links a bridge request to its response
//! - **Framing**: [`codec::JsonLinesCodec`] newline-delimited JSON shared by the bridge socket and stdio RPC
//! - **Logging**: [`logging::init_subscriber`] installs the `tracing` subscriber (stderr only)
//! - **Text**: [`text::truncate_with_suffix`] and [`text::strip_ansi`] for log- and wire-safe strings
//! - **Constants**: well-known directory and file names
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other clive crates.

#![deny(unsafe_code)]

pub mod codec;
pub mod constants;
pub mod ids;
pub mod logging;
pub mod text;
