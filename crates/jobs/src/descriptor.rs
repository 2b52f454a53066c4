//! Invocation descriptors: a method call reduced to names and encoded arguments.

use serde::{Deserialize, Serialize};

use dynjob_core::{DeclarationError, DeclarationResult};

use crate::codec::{self, ArgType, ArgValue, JobArg};

/// A method on a job type together with its static parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    type_name: String,
    method_name: String,
    parameter_types: Vec<ArgType>,
}

impl MethodRef {
    pub fn new(
        type_name: impl Into<String>,
        method_name: impl Into<String>,
        parameter_types: Vec<ArgType>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            method_name: method_name.into(),
            parameter_types,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn parameter_types(&self) -> &[ArgType] {
        &self.parameter_types
    }

    /// Canonical parameter type names, in order.
    pub fn signature(&self) -> Vec<String> {
        self.parameter_types.iter().map(ArgType::name).collect()
    }
}

impl core::fmt::Display for MethodRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}.{}({})",
            self.type_name,
            self.method_name,
            self.signature().join(", ")
        )
    }
}

/// A live, statically-typed method call captured at the declaration site.
///
/// ```ignore
/// let call = MethodCall::new("NewsletterJob", "Send").arg("a@b.com").arg(3_i64);
/// ```
///
/// Each argument's parameter type is taken from its Rust type, so the signature
/// and the argument list are built together and cannot drift apart.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    method: MethodRef,
    arguments: Vec<ArgValue>,
}

impl MethodCall {
    pub fn new(type_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            method: MethodRef::new(type_name, method_name, Vec::new()),
            arguments: Vec::new(),
        }
    }

    /// Untyped construction, for callers that already hold a [`MethodRef`].
    pub fn from_parts(method: MethodRef, arguments: Vec<ArgValue>) -> Self {
        Self { method, arguments }
    }

    pub fn arg<A: JobArg>(mut self, value: A) -> Self {
        self.method.parameter_types.push(A::arg_type());
        self.arguments.push(value.into_arg());
        self
    }

    /// Reserve a parameter for the executing job's cancellation token.
    pub fn cancellation(mut self) -> Self {
        self.method.parameter_types.push(ArgType::Cancellation);
        self.arguments.push(ArgValue::Cancellation);
        self
    }

    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    pub fn arguments(&self) -> &[ArgValue] {
        &self.arguments
    }
}

/// Type-erased description of a method call, sufficient to re-resolve and
/// re-invoke it in another process.
///
/// Invariant: `parameter_types.len() == arguments.len()` for every descriptor
/// produced by [`InvocationDescriptor::build`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationDescriptor {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(rename = "method")]
    method_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    parameter_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    arguments: Vec<String>,
}

impl InvocationDescriptor {
    /// Capture `call` as a descriptor, encoding every argument.
    pub fn build(call: &MethodCall) -> DeclarationResult<Self> {
        Self::from_method(call.method(), call.arguments())
    }

    pub fn from_method(method: &MethodRef, arguments: &[ArgValue]) -> DeclarationResult<Self> {
        if method.type_name().trim().is_empty() {
            return Err(DeclarationError::invalid_argument("target type name is required"));
        }
        if method.method_name().trim().is_empty() {
            return Err(DeclarationError::invalid_argument("method name is required"));
        }
        if method.parameter_types().len() != arguments.len() {
            return Err(DeclarationError::invalid_argument(format!(
                "{} expects {} argument(s), got {}",
                method,
                method.parameter_types().len(),
                arguments.len()
            )));
        }

        let encoded = method
            .parameter_types()
            .iter()
            .zip(arguments)
            .enumerate()
            .map(|(index, (ty, value))| {
                codec::encode(value, ty).map_err(|e| DeclarationError::encoding(index, e))
            })
            .collect::<DeclarationResult<Vec<_>>>()?;

        Ok(Self {
            type_name: method.type_name().to_string(),
            method_name: method.method_name().to_string(),
            parameter_types: method.signature(),
            arguments: encoded,
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Compact signature form, e.g. `"string,i64"`; empty for no parameters.
    pub fn signature(&self) -> String {
        self.parameter_types.join(",")
    }
}
