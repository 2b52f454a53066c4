//! The dynamic job envelope: the single unit handed across the store boundary.

use serde::{Deserialize, Serialize};
use tracing::debug;

use dynjob_core::DeclarationResult;

use crate::descriptor::{InvocationDescriptor, MethodCall};
use crate::policy::{Policy, PolicyAggregator, PolicySource};

/// Queue used when no queue policy is attached.
pub const DEFAULT_QUEUE: &str = "default";

/// Descriptor + aggregated policies + display-name hint.
///
/// Immutable once built. The serialized JSON is what stores persist; it must be
/// handed back to the executor unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicJobEnvelope {
    descriptor: InvocationDescriptor,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    policies: Vec<Policy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
}

impl DynamicJobEnvelope {
    pub fn new(
        descriptor: InvocationDescriptor,
        policies: Vec<Policy>,
        display_name_hint: Option<String>,
    ) -> Self {
        Self {
            descriptor,
            policies,
            display_name: display_name_hint,
        }
    }

    pub fn descriptor(&self) -> &InvocationDescriptor {
        &self.descriptor
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    pub fn display_name_hint(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// First queue policy in stored order; caller overrides therefore win over
    /// type-level, and type-level over method-level.
    pub fn effective_queue(&self) -> &str {
        self.policies
            .iter()
            .find_map(Policy::as_queue)
            .unwrap_or(DEFAULT_QUEUE)
    }

    /// Human-readable job name.
    ///
    /// Renders the hint with `{0}`, `{1}`, ... replaced by the corresponding
    /// argument, or falls back to `Type.Method`.
    pub fn display_name(&self) -> String {
        let Some(template) = &self.display_name else {
            return format!(
                "{}.{}",
                self.descriptor.type_name(),
                self.descriptor.method_name()
            );
        };

        // Single pass: substituted text is never scanned again.
        let arguments = self.descriptor.arguments();
        let mut name = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(open) = rest.find('{') {
            name.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let placeholder = after.find('}').and_then(|close| {
                let digits = &after[..close];
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let encoded = arguments.get(digits.parse::<usize>().ok()?)?;
                Some((close, encoded))
            });
            match placeholder {
                Some((close, encoded)) => {
                    name.push_str(&shown_argument(encoded));
                    rest = &after[close + 1..];
                }
                None => {
                    name.push('{');
                    rest = after;
                }
            }
        }
        name.push_str(rest);
        name
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Builds envelopes from live method calls.
///
/// The display-name hint is read from the original method declaration here,
/// before wrapping; the envelope is the only place it survives.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder<S> {
    aggregator: PolicyAggregator<S>,
}

impl<S: PolicySource> EnvelopeBuilder<S> {
    pub fn new(source: S) -> Self {
        Self {
            aggregator: PolicyAggregator::new(source),
        }
    }

    pub fn aggregator(&self) -> &PolicyAggregator<S> {
        &self.aggregator
    }

    /// Capture `call`, aggregate its policies with `caller_policies`, and wrap both.
    pub fn build(
        &self,
        call: &MethodCall,
        caller_policies: &[Policy],
    ) -> DeclarationResult<DynamicJobEnvelope> {
        let descriptor = InvocationDescriptor::build(call)?;
        let display_name = self.aggregator.source().display_name(call.method())?;
        let policies = self.aggregator.aggregate(call.method(), caller_policies)?;

        debug!(
            target_type = %descriptor.type_name(),
            method = %descriptor.method_name(),
            policies = policies.len(),
            "built dynamic job envelope"
        );

        Ok(DynamicJobEnvelope::new(descriptor, policies, display_name))
    }
}

/// Strings show unquoted; everything else shows as its transport text.
fn shown_argument(encoded: &str) -> String {
    serde_json::from_str::<String>(encoded).unwrap_or_else(|_| encoded.to_string())
}
