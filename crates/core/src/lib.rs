//! Shared domain types, errors, and pure helpers for the image gateway.
//!
//! This crate has no I/O and no internal dependencies so it can be used by
//! the protocol client, the pipeline, and the HTTP layer alike.

pub mod error;
pub mod naming;
pub mod seed;
pub mod types;
pub mod validation;
