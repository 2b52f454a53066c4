//! Worker-side resolution of descriptors back into callable methods.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use dynjob_core::{BoxError, CodecError, ExecutionResult, JobId};

use crate::cancellation::CancellationToken;
use crate::codec::{ArgValue, FromArg};
use crate::descriptor::MethodRef;

/// Job method implementation.
pub type JobHandler =
    Arc<dyn Fn(&InvocationContext, Arguments) -> Result<JsonValue, BoxError> + Send + Sync>;

/// Per-attempt state visible to policy layers and to the job method.
///
/// Created fresh for every execution; never shared between attempts.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    job_id: Option<JobId>,
    display_name: String,
    queue: Option<String>,
    cancellation: CancellationToken,
    items: BTreeMap<String, JsonValue>,
}

impl InvocationContext {
    pub fn new(display_name: impl Into<String>, cancellation: CancellationToken) -> Self {
        Self {
            job_id: None,
            display_name: display_name.into(),
            queue: None,
            cancellation,
            items: BTreeMap::new(),
        }
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Queue the job was routed through, once a queue policy has been applied.
    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    pub fn set_queue(&mut self, queue: impl Into<String>) {
        self.queue = Some(queue.into());
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Scratch values policy layers leave for inner layers or the method.
    pub fn item(&self, key: &str) -> Option<&JsonValue> {
        self.items.get(key)
    }

    pub fn insert_item(&mut self, key: impl Into<String>, value: JsonValue) {
        self.items.insert(key.into(), value);
    }
}

/// Decoded arguments, in parameter order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    values: Vec<ArgValue>,
}

impl Arguments {
    pub fn new(values: Vec<ArgValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[ArgValue] {
        &self.values
    }

    /// Fill every cancellation slot with `token`.
    pub fn bind_cancellation(mut self, token: &CancellationToken) -> Self {
        for value in &mut self.values {
            if matches!(value, ArgValue::Cancellation) {
                *value = ArgValue::Token(token.clone());
            }
        }
        self
    }

    /// Read argument `index` as `T`.
    pub fn get<T: FromArg>(&self, index: usize) -> Result<T, CodecError> {
        let value = self
            .values
            .get(index)
            .cloned()
            .ok_or_else(|| CodecError::malformed(format!("no argument at index {index}")))?;
        T::from_arg(value)
    }
}

/// A method found by a [`MethodResolver`], ready to invoke.
#[derive(Clone)]
pub struct ResolvedMethod {
    method: MethodRef,
    handler: JobHandler,
}

impl ResolvedMethod {
    pub fn new(method: MethodRef, handler: JobHandler) -> Self {
        Self { method, handler }
    }

    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    pub fn invoke(&self, ctx: &InvocationContext, args: Arguments) -> Result<JsonValue, BoxError> {
        (self.handler)(ctx, args)
    }
}

impl core::fmt::Debug for ResolvedMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResolvedMethod")
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Looks up implementations by the names stored in a descriptor.
///
/// Failing to find the type or method is a `TargetResolution` error: the worker's
/// deployed code does not know this job.
pub trait MethodResolver: Send + Sync {
    fn resolve(
        &self,
        type_name: &str,
        method_name: &str,
        parameter_types: &[String],
    ) -> ExecutionResult<ResolvedMethod>;
}

impl<R> MethodResolver for Arc<R>
where
    R: MethodResolver + ?Sized,
{
    fn resolve(
        &self,
        type_name: &str,
        method_name: &str,
        parameter_types: &[String],
    ) -> ExecutionResult<ResolvedMethod> {
        (**self).resolve(type_name, method_name, parameter_types)
    }
}
