//! Shared setup for the engine binaries.

pub mod common;
