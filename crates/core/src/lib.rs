//! `dynjob-core`: shared primitives for dynamic jobs.
//!
//! Identifiers and the error taxonomy used on both sides of the store boundary:
//! the declaration side (building envelopes) and the execution side (replaying them).

pub mod error;
pub mod id;

pub use error::{
    BoxError, CodecError, DeclarationError, DeclarationResult, ExecutionError, ExecutionResult,
};
pub use id::JobId;
