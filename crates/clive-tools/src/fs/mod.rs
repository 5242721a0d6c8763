//! Filesystem capabilities.

pub mod path;
pub mod write;
