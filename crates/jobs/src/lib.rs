//! `dynjob-jobs`: the dynamic job indirection layer.
//!
//! Turns a statically-typed method call into a transportable envelope and back:
//!
//! ```text
//! MethodCall ──► InvocationDescriptor ─┐
//!                                      ├─► DynamicJobEnvelope ──► store / scheduler
//! PolicySource ──► PolicyAggregator ───┘
//!
//! DynamicJobEnvelope ──► MethodResolver ──► codec::decode ──► ResolvedMethod::invoke
//! ```
//!
//! This crate is pure: no storage, no threads. Collaborators live in `dynjob-infra`.

pub mod cancellation;
pub mod catalog;
pub mod codec;
pub mod descriptor;
pub mod envelope;
pub mod policy;
pub mod resolver;

pub use cancellation::{CancellationToken, OperationCancelled};
pub use catalog::{JobCatalog, MethodDecl, TypeDecl};
pub use codec::{ArgType, ArgValue, Bytes, FromArg, JobArg};
pub use descriptor::{InvocationDescriptor, MethodCall, MethodRef};
pub use envelope::{DEFAULT_QUEUE, DynamicJobEnvelope, EnvelopeBuilder};
pub use policy::{
    Policy, PolicyAggregator, PolicySource, QUEUE_POLICY, declared_policies,
    ensure_valid_queues, is_valid_queue_name,
};
pub use resolver::{Arguments, InvocationContext, JobHandler, MethodResolver, ResolvedMethod};
