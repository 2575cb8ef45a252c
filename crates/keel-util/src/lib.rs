//! Shared utilities for the Keel build tool.
//!
//! This crate provides cross-cutting concerns used by the other Keel crates:
//! the unified error and result types.

pub mod errors;
