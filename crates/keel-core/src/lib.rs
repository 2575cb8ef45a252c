//! Core data model for the Keel build tool's dependency resolver.
//!
//! This crate defines the types a Keel project declares and the resolver
//! consumes: module identities and coordinates, version ordering and range
//! matching, version selectors and constraints, declared dependencies,
//! capabilities, and component metadata.
//!
//! This crate is intentionally free of async code and network I/O.

pub mod dependency;
pub mod metadata;
pub mod module;
pub mod selector;
pub mod version;
