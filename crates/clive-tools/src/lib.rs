//! # clive-tools
//!
//! Narrow capability interfaces the host's resolvers and bridge handlers
//! call into, plus their production implementations.
//!
//! | Capability | Trait | Implementation |
//! |------------|-------|----------------|
//! | File write | [`traits::FileWriter`] | [`fs::write::TokioFileWriter`] |
//! | Knowledge search | [`traits::KnowledgeSearch`] | [`search::InMemoryKnowledgeIndex`] |
//! | Process spawn | [`traits::ProcessSpawner`] | [`providers::process::TokioProcessSpawner`] |
//!
//! ## Crate Position
//!
//! Depends on: clive-core. Depended on by: clive-host.

#![deny(unsafe_code)]

pub mod errors;
pub mod fs;
pub mod providers;
pub mod search;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use errors::ToolError;
pub use traits::{
    FileWriter, KnowledgeSearch, OutputLine, ProcessOptions, ProcessOutput, ProcessSpawner,
    ProcessStream, SearchHit, SearchQuery, WriteReceipt,
};
