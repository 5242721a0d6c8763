//! Production capability providers backed by the OS.

pub mod process;
