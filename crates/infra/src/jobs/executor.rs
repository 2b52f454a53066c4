//! Deferred executor: replays a stored envelope on a worker.
//!
//! ```text
//! Received -> Resolving -> Decoding -> PolicyWrapping -> Invoking -> Succeeded | Failed
//! ```
//!
//! Every failure is terminal for the attempt. Retrying is the store's call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use dynjob_core::{ExecutionError, ExecutionResult};
use dynjob_jobs::codec;
use dynjob_jobs::{
    Arguments, CancellationToken, DynamicJobEnvelope, InvocationContext, InvocationDescriptor,
    MethodRef, MethodResolver, OperationCancelled, Policy, QUEUE_POLICY,
};

use super::types::{ExecutionOutcome, StoredJob};

/// The rest of the chain, as seen from a policy layer.
pub type Next<'a> = &'a mut dyn FnMut(&mut InvocationContext) -> ExecutionResult<JsonValue>;

/// Behavior applied around an invocation for one policy kind.
///
/// A layer decides whether and how to call `next`; returning without calling it
/// skips the method.
pub trait PolicyLayer: Send + Sync {
    fn around(
        &self,
        policy: &Policy,
        ctx: &mut InvocationContext,
        next: Next<'_>,
    ) -> ExecutionResult<JsonValue>;
}

/// Records the routing queue on the context. The outermost queue policy wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueLayer;

impl PolicyLayer for QueueLayer {
    fn around(
        &self,
        policy: &Policy,
        ctx: &mut InvocationContext,
        next: Next<'_>,
    ) -> ExecutionResult<JsonValue> {
        if let Some(queue) = policy.as_queue() {
            if ctx.queue().is_none() {
                ctx.set_queue(queue);
            }
        }
        next(ctx)
    }
}

/// Resolves, decodes, wraps and invokes envelopes.
///
/// Holds no per-execution state; one executor can serve any number of threads.
pub struct DeferredExecutor<R> {
    resolver: R,
    layers: HashMap<String, Arc<dyn PolicyLayer>>,
}

impl<R: MethodResolver> DeferredExecutor<R> {
    /// Executor with the built-in queue layer registered.
    pub fn new(resolver: R) -> Self {
        let mut layers: HashMap<String, Arc<dyn PolicyLayer>> = HashMap::new();
        layers.insert(QUEUE_POLICY.to_string(), Arc::new(QueueLayer));
        Self { resolver, layers }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Register the layer applied for policies of `kind`. Replaces any previous one.
    pub fn register_layer<L>(&mut self, kind: impl Into<String>, layer: L) -> &mut Self
    where
        L: PolicyLayer + 'static,
    {
        self.layers.insert(kind.into(), Arc::new(layer));
        self
    }

    pub fn execute(
        &self,
        envelope: &DynamicJobEnvelope,
        cancellation: CancellationToken,
    ) -> ExecutionResult<JsonValue> {
        let ctx = InvocationContext::new(envelope.display_name(), cancellation);
        self.run(envelope, ctx)
    }

    /// Execute from the stored JSON form. An unreadable envelope is a
    /// resolution failure.
    pub fn execute_json(
        &self,
        payload: &str,
        cancellation: CancellationToken,
    ) -> ExecutionResult<JsonValue> {
        let envelope = parse_envelope(payload)?;
        self.execute(&envelope, cancellation)
    }

    /// Execute a claimed job and classify the result for the store.
    pub fn execute_stored(&self, job: &StoredJob, cancellation: CancellationToken) -> ExecutionOutcome {
        let result = parse_envelope(&job.payload).and_then(|envelope| {
            let ctx = InvocationContext::new(envelope.display_name(), cancellation).with_job_id(job.id);
            self.run(&envelope, ctx)
        });

        if let Err(err) = &result {
            if !err.is_cancelled() {
                warn!(job_id = %job.id, name = %job.display_name, error = %err, "job failed");
            }
        }
        ExecutionOutcome::from_result(result)
    }

    fn run(
        &self,
        envelope: &DynamicJobEnvelope,
        mut ctx: InvocationContext,
    ) -> ExecutionResult<JsonValue> {
        let descriptor = envelope.descriptor();
        let started = Instant::now();
        let job_id = ctx.job_id().map(|id| id.to_string()).unwrap_or_default();

        if ctx.cancellation().is_cancelled() {
            info!(job_id = %job_id, "job cancelled before start");
            return Err(ExecutionError::Cancelled);
        }

        debug!(
            job_id = %job_id,
            type_name = %descriptor.type_name(),
            method = %descriptor.method_name(),
            signature = %descriptor.signature(),
            "resolving"
        );
        let method = self.resolver.resolve(
            descriptor.type_name(),
            descriptor.method_name(),
            descriptor.parameter_types(),
        )?;

        debug!(job_id = %job_id, arguments = descriptor.arguments().len(), "decoding");
        let args = decode_arguments(descriptor, method.method())?.bind_cancellation(ctx.cancellation());

        debug!(job_id = %job_id, policies = envelope.policies().len(), "policy wrapping");
        let mut invoke = |ctx: &mut InvocationContext| -> ExecutionResult<JsonValue> {
            ctx.cancellation()
                .check()
                .map_err(|_| ExecutionError::Cancelled)?;

            debug!(job_id = %job_id, queue = ?ctx.queue(), "invoking");
            method.invoke(ctx, args.clone()).map_err(|source| {
                if source.is::<OperationCancelled>() || ctx.cancellation().is_cancelled() {
                    ExecutionError::Cancelled
                } else {
                    ExecutionError::invocation_failed(source)
                }
            })
        };
        let result = self.run_chain(envelope.policies(), &mut ctx, &mut invoke);

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(job_id = %job_id, name = %ctx.display_name(), duration_ms, "job succeeded"),
            Err(ExecutionError::Cancelled) => {
                info!(job_id = %job_id, name = %ctx.display_name(), duration_ms, "job cancelled")
            }
            Err(err) => {
                debug!(job_id = %job_id, name = %ctx.display_name(), duration_ms, error = %err, "job invocation failed")
            }
        }
        result
    }

    /// Apply `policies[0]` outermost, then the rest, then `invoke`.
    fn run_chain(
        &self,
        policies: &[Policy],
        ctx: &mut InvocationContext,
        invoke: Next<'_>,
    ) -> ExecutionResult<JsonValue> {
        let Some((policy, rest)) = policies.split_first() else {
            return invoke(ctx);
        };

        match self.layers.get(policy.kind()) {
            Some(layer) => layer.around(policy, ctx, &mut |ctx: &mut InvocationContext| {
                self.run_chain(rest, ctx, &mut *invoke)
            }),
            None => {
                warn!(policy = %policy.kind(), "no layer registered for policy, passing through");
                self.run_chain(rest, ctx, invoke)
            }
        }
    }
}

fn parse_envelope(payload: &str) -> ExecutionResult<DynamicJobEnvelope> {
    DynamicJobEnvelope::from_json(payload)
        .map_err(|e| ExecutionError::target_resolution(format!("unreadable envelope: {e}")))
}

fn decode_arguments(descriptor: &InvocationDescriptor, method: &MethodRef) -> ExecutionResult<Arguments> {
    let types = method.parameter_types();
    let encoded = descriptor.arguments();

    if types.len() != encoded.len() {
        let index = types.len().min(encoded.len());
        return Err(ExecutionError::decoding(
            index,
            dynjob_core::CodecError::malformed(format!(
                "{method} takes {} argument(s), envelope has {}",
                types.len(),
                encoded.len()
            )),
        ));
    }

    types
        .iter()
        .zip(encoded)
        .enumerate()
        .map(|(index, (ty, text))| {
            codec::decode(text, ty).map_err(|e| ExecutionError::decoding(index, e))
        })
        .collect::<ExecutionResult<Vec<_>>>()
        .map(Arguments::new)
}
