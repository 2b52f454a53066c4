//! Execution policies and their aggregation.
//!
//! A policy is a named behavior applied around a job's execution (queue routing,
//! auditing, concurrency guards, ...). Policies come from three places, always
//! concatenated in this order:
//!
//! 1. caller-supplied overrides given at registration time
//! 2. type-level declarations (own, then inherited)
//! 3. method-level declarations (own, then inherited)
//!
//! Duplicates are preserved; interpreting them is left to the executor.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use dynjob_core::{DeclarationError, DeclarationResult};

use crate::descriptor::MethodRef;

/// Kind name under which queue policies are dispatched.
pub const QUEUE_POLICY: &str = "queue";

/// A named execution behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Policy {
    /// Route the job to a named queue.
    Queue { queue: String },
    /// Any other behavior, identified by name.
    Custom {
        name: String,
        #[serde(default)]
        settings: JsonValue,
    },
}

impl Policy {
    pub fn queue(queue: impl Into<String>) -> Self {
        Self::Queue {
            queue: queue.into(),
        }
    }

    pub fn custom(name: impl Into<String>, settings: JsonValue) -> Self {
        Self::Custom {
            name: name.into(),
            settings,
        }
    }

    /// Name used to look up the behavior that applies this policy.
    pub fn kind(&self) -> &str {
        match self {
            Policy::Queue { .. } => QUEUE_POLICY,
            Policy::Custom { name, .. } => name,
        }
    }

    pub fn as_queue(&self) -> Option<&str> {
        match self {
            Policy::Queue { queue } => Some(queue),
            Policy::Custom { .. } => None,
        }
    }
}

/// Queue names: non-empty, lowercase ASCII letters, digits, `_` and `-`.
pub fn is_valid_queue_name(queue: &str) -> bool {
    !queue.is_empty()
        && queue
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Reject any queue policy whose name fails [`is_valid_queue_name`].
pub fn ensure_valid_queues(policies: &[Policy]) -> DeclarationResult<()> {
    match policies
        .iter()
        .filter_map(Policy::as_queue)
        .find(|queue| !is_valid_queue_name(queue))
    {
        Some(queue) => Err(DeclarationError::invalid_argument(format!(
            "invalid queue name: {queue:?}"
        ))),
        None => Ok(()),
    }
}

/// Read-only view of the policy and naming markers declared for job types.
///
/// Implementations must enumerate markers in declaration order and return
/// identical results for identical, unchanged declarations.
pub trait PolicySource: Send + Sync {
    /// Markers on the type, then on its ancestors (nearest first).
    fn type_policies(&self, type_name: &str) -> DeclarationResult<Vec<Policy>>;

    /// Markers on the method, then on the same method of each ancestor.
    fn method_policies(&self, method: &MethodRef) -> DeclarationResult<Vec<Policy>>;

    /// Display-name template declared on the method, if any.
    fn display_name(&self, method: &MethodRef) -> DeclarationResult<Option<String>>;
}

impl<P> PolicySource for Arc<P>
where
    P: PolicySource + ?Sized,
{
    fn type_policies(&self, type_name: &str) -> DeclarationResult<Vec<Policy>> {
        (**self).type_policies(type_name)
    }

    fn method_policies(&self, method: &MethodRef) -> DeclarationResult<Vec<Policy>> {
        (**self).method_policies(method)
    }

    fn display_name(&self, method: &MethodRef) -> DeclarationResult<Option<String>> {
        (**self).display_name(method)
    }
}

impl<P> PolicySource for &P
where
    P: PolicySource + ?Sized,
{
    fn type_policies(&self, type_name: &str) -> DeclarationResult<Vec<Policy>> {
        (**self).type_policies(type_name)
    }

    fn method_policies(&self, method: &MethodRef) -> DeclarationResult<Vec<Policy>> {
        (**self).method_policies(method)
    }

    fn display_name(&self, method: &MethodRef) -> DeclarationResult<Option<String>> {
        (**self).display_name(method)
    }
}

/// All policies declared for `method`: type-level followed by method-level.
pub fn declared_policies<S>(source: &S, method: &MethodRef) -> DeclarationResult<Vec<Policy>>
where
    S: PolicySource + ?Sized,
{
    let mut policies = source.type_policies(method.type_name())?;
    policies.extend(source.method_policies(method)?);
    Ok(policies)
}

/// Merges caller overrides with declared policies.
#[derive(Debug, Clone)]
pub struct PolicyAggregator<S> {
    source: S,
}

impl<S: PolicySource> PolicyAggregator<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// `caller ++ type-level ++ method-level`, without deduplication.
    ///
    /// Every queue policy in the result must carry a valid queue name.
    pub fn aggregate(&self, method: &MethodRef, caller: &[Policy]) -> DeclarationResult<Vec<Policy>> {
        ensure_valid_queues(caller)?;
        let declared = declared_policies(&self.source, method)?;
        ensure_valid_queues(&declared)?;

        let mut policies = Vec::with_capacity(caller.len() + declared.len());
        policies.extend_from_slice(caller);
        policies.extend(declared);
        Ok(policies)
    }
}
